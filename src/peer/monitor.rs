use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::events::CallEvents;
use crate::peer::transport::ConnectionState;

/// Tells the UI when a live connection drops and whether it came back.
///
/// A drop starts a grace period; reconnecting inside it reports recovery,
/// otherwise the UI is told the connection failed. The call itself is left
/// alone either way.
pub struct ConnectionMonitor {
    events: Arc<dyn CallEvents>,
    grace: Duration,
    grace_task: Option<JoinHandle<()>>,
    troubled: bool,
}

impl ConnectionMonitor {
    pub fn new(events: Arc<dyn CallEvents>, grace: Duration) -> Self {
        Self {
            events,
            grace,
            grace_task: None,
            troubled: false,
        }
    }

    pub fn observe(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                self.cancel_grace();
                if self.troubled {
                    info!("connection recovered");
                    self.troubled = false;
                    self.events.on_connection_recovered();
                }
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                if self.grace_task.as_ref().is_some_and(|t| !t.is_finished()) {
                    debug!("grace period already running, ignoring {state:?}");
                    return;
                }
                self.troubled = true;
                self.events.on_connection_problem();

                let events = Arc::clone(&self.events);
                let grace = self.grace;
                info!("connection {state:?}, waiting {}s for recovery", grace.as_secs());
                self.grace_task = Some(tokio::spawn(async move {
                    sleep(grace).await;
                    warn!("connection did not recover within grace period");
                    events.on_connection_failed();
                }));
            }
            ConnectionState::Closed => self.reset(),
            ConnectionState::New | ConnectionState::Connecting => {}
        }
    }

    pub fn reset(&mut self) {
        self.cancel_grace();
        self.troubled = false;
    }

    fn cancel_grace(&mut self) {
        if let Some(task) = self.grace_task.take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.cancel_grace();
    }
}

//! The call loop and the handle UI code talks to it through.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CallError;
use crate::peer::{CallKind, PeerId, SessionEvent};
use crate::session::{CallSession, CallState};
use crate::signaling::RelayFrame;

#[derive(Debug)]
pub enum CallCommand {
    Start { target: PeerId, kind: CallKind },
    Accept,
    End,
    SwitchToScreen,
    SwitchToCamera,
    ToggleMute(oneshot::Sender<bool>),
    ToggleVideo(oneshot::Sender<bool>),
    State(oneshot::Sender<CallState>),
}

/// Cheap, cloneable front door to the call loop.
///
/// Call operations are fire-and-forget: their outcome reaches the UI through
/// [`crate::CallEvents`]. Only a stopped loop is reported here.
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<CallCommand>,
}

impl CallHandle {
    pub fn start_call(&self, target: PeerId, kind: CallKind) -> Result<(), CallError> {
        self.send(CallCommand::Start { target, kind })
    }

    pub fn accept_incoming(&self) -> Result<(), CallError> {
        self.send(CallCommand::Accept)
    }

    /// Hangs up, declines a ringing call or cancels an outgoing one.
    pub fn end_call(&self) -> Result<(), CallError> {
        self.send(CallCommand::End)
    }

    pub fn switch_to_screen(&self) -> Result<(), CallError> {
        self.send(CallCommand::SwitchToScreen)
    }

    pub fn switch_to_camera(&self) -> Result<(), CallError> {
        self.send(CallCommand::SwitchToCamera)
    }

    /// Returns `true` when the microphone is now muted.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        let (reply, rx) = oneshot::channel();
        self.send(CallCommand::ToggleMute(reply))?;
        rx.await.map_err(|_| CallError::LoopClosed)
    }

    /// Returns `true` when the outgoing video is now off.
    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        let (reply, rx) = oneshot::channel();
        self.send(CallCommand::ToggleVideo(reply))?;
        rx.await.map_err(|_| CallError::LoopClosed)
    }

    pub async fn state(&self) -> Result<CallState, CallError> {
        let (reply, rx) = oneshot::channel();
        self.send(CallCommand::State(reply))?;
        rx.await.map_err(|_| CallError::LoopClosed)
    }

    fn send(&self, command: CallCommand) -> Result<(), CallError> {
        self.tx.send(command).map_err(|_| CallError::LoopClosed)
    }
}

/// Moves `session` into its own task.
///
/// `relay` carries frames received from the chat socket. The loop runs until
/// every [`CallHandle`] is dropped, ending any call still in progress.
pub fn spawn_call_loop(
    session: CallSession,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    relay: mpsc::UnboundedReceiver<RelayFrame>,
) -> (CallHandle, JoinHandle<()>) {
    let (tx, commands) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(session, commands, session_events, relay));
    (CallHandle { tx }, task)
}

async fn run(
    mut session: CallSession,
    mut commands: mpsc::UnboundedReceiver<CallCommand>,
    mut session_events: mpsc::UnboundedReceiver<SessionEvent>,
    mut relay: mpsc::UnboundedReceiver<RelayFrame>,
) {
    info!("call loop started");
    let mut relay_open = true;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => dispatch(&mut session, command).await,
                None => break,
            },
            frame = relay.recv(), if relay_open => match frame {
                Some(frame) => {
                    let event = frame.event.clone();
                    match frame.decode() {
                        Ok(signal) => report(&event, session.handle_signal(signal).await),
                        Err(e) => warn!("dropping relay frame: {e}"),
                    }
                }
                None => {
                    warn!("relay connection closed");
                    relay_open = false;
                }
            },
            Some(event) = session_events.recv() => session.handle_session_event(event).await,
        }
    }
    report("shutdown", session.end().await);
    info!("call loop stopped");
}

async fn dispatch(session: &mut CallSession, command: CallCommand) {
    match command {
        CallCommand::Start { target, kind } => report("start", session.start(target, kind).await),
        CallCommand::Accept => report("accept", session.accept_incoming().await),
        CallCommand::End => report("end", session.end().await),
        CallCommand::SwitchToScreen => report("screen", session.switch_to_screen().await),
        CallCommand::SwitchToCamera => report("camera", session.switch_to_camera().await),
        CallCommand::ToggleMute(reply) => {
            let _ = reply.send(session.toggle_mute());
        }
        CallCommand::ToggleVideo(reply) => {
            let _ = reply.send(session.toggle_video());
        }
        CallCommand::State(reply) => {
            let _ = reply.send(session.state());
        }
    }
}

// Failures already reached the UI through CallEvents.
fn report(what: &str, result: Result<(), CallError>) {
    if let Err(e) = result {
        debug!("{what}: {e}");
    }
}

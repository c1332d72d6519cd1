use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::peer::ice::CandidateStats;
use crate::peer::types::{IceCandidate, PeerId};
use crate::signaling::{OutboundSignal, SignalingChannel};

#[derive(Default)]
struct BatchState {
    target: Option<PeerId>,
    queue: Vec<IceCandidate>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is armed or cancelled so a stale task cannot flush.
    generation: u64,
}

impl BatchState {
    fn cancel_timer(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Buffers local candidates and sends them to the peer in batches.
///
/// A batch goes out as soon as `batch_size` candidates are queued, or
/// `window` after the first candidate of the batch, whichever comes first.
pub struct CandidateBatcher {
    state: Arc<Mutex<BatchState>>,
    signaling: Arc<dyn SignalingChannel>,
    batch_size: usize,
    window: Duration,
}

impl CandidateBatcher {
    pub fn new(signaling: Arc<dyn SignalingChannel>, batch_size: usize, window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BatchState::default())),
            signaling,
            batch_size: batch_size.max(1),
            window,
        }
    }

    /// Directs future batches to `target`.
    pub fn bind(&self, target: PeerId) {
        lock(&self.state).target = Some(target);
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn has_timer(&self) -> bool {
        lock(&self.state).timer.is_some()
    }

    pub fn enqueue(&self, candidate: IceCandidate) {
        let mut state = lock(&self.state);
        if state.target.is_none() {
            debug!("no call target, dropping local candidate");
            return;
        }
        state.queue.push(candidate);

        if state.queue.len() >= self.batch_size {
            state.cancel_timer();
            send_batch(&mut state, self.signaling.as_ref());
            return;
        }
        if state.timer.is_some() {
            return;
        }

        state.generation += 1;
        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let signaling = Arc::clone(&self.signaling);
        let window = self.window;
        state.timer = Some(tokio::spawn(async move {
            sleep(window).await;
            let mut state = lock(&shared);
            if state.generation != generation {
                return;
            }
            state.timer = None;
            send_batch(&mut state, signaling.as_ref());
        }));
    }

    /// Sends whatever is queued right now.
    pub fn flush(&self) {
        let mut state = lock(&self.state);
        state.cancel_timer();
        send_batch(&mut state, self.signaling.as_ref());
    }

    /// Drops the queue and the target without sending anything.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.cancel_timer();
        if !state.queue.is_empty() {
            debug!(count = state.queue.len(), "discarding unsent local candidates");
        }
        state.queue.clear();
        state.target = None;
    }
}

impl Drop for CandidateBatcher {
    fn drop(&mut self) {
        lock(&self.state).cancel_timer();
    }
}

fn lock(state: &Mutex<BatchState>) -> MutexGuard<'_, BatchState> {
    // queue contents stay consistent even if a holder panicked
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn send_batch(state: &mut BatchState, signaling: &dyn SignalingChannel) {
    if state.queue.is_empty() {
        return;
    }
    let Some(target) = state.target.clone() else {
        state.queue.clear();
        return;
    };
    let candidates = std::mem::take(&mut state.queue);
    let stats = CandidateStats::analyze(&candidates);
    debug!(
        count = candidates.len(),
        host = stats.host,
        srflx = stats.srflx,
        relay = stats.relay,
        "sending candidate batch"
    );
    if let Err(e) = signaling.send(OutboundSignal::IceCandidates { target, candidates }) {
        warn!("failed to send candidate batch: {e}");
    }
}

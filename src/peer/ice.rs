use tracing::{debug, warn};

use crate::logger::dump_candidate;
use crate::peer::transport::PeerTransport;
use crate::peer::types::IceCandidate;

/// Remote candidates that arrived before the remote description.
#[derive(Debug, Default)]
pub struct PendingCandidateCache {
    pending: Vec<IceCandidate>,
}

impl PendingCandidateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Applies `candidates` now if the remote description is known, caches them otherwise.
    ///
    /// Returns the number applied successfully.
    pub async fn handle_incoming(
        &mut self,
        transport: Option<&dyn PeerTransport>,
        candidates: Vec<IceCandidate>,
    ) -> usize {
        let ready = match transport {
            Some(t) => t.has_remote_description().await,
            None => false,
        };
        match transport {
            Some(t) if ready => apply_all(t, candidates, "remote").await,
            _ => {
                debug!(
                    count = candidates.len(),
                    "remote description not set yet, caching candidates"
                );
                self.pending.extend(candidates);
                0
            }
        }
    }

    /// Replays the cache in arrival order and empties it, even on partial failure.
    pub async fn flush_to(&mut self, transport: &dyn PeerTransport) -> usize {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return 0;
        }
        debug!(count = pending.len(), "applying cached candidates");
        apply_all(transport, pending, "cached").await
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

async fn apply_all(
    transport: &dyn PeerTransport,
    candidates: Vec<IceCandidate>,
    label: &str,
) -> usize {
    let mut applied = 0;
    for candidate in candidates {
        dump_candidate(label, &candidate);
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => warn!("failed to apply {label} candidate: {e}"),
        }
    }
    applied
}

/// Host/srflx/relay breakdown of a candidate set
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

impl CandidateStats {
    pub fn analyze(candidates: &[IceCandidate]) -> Self {
        let mut stats = Self::default();
        for candidate in candidates {
            if candidate.candidate.contains("typ host") {
                stats.host += 1;
            } else if candidate.candidate.contains("typ srflx") {
                stats.srflx += 1;
            } else if candidate.candidate.contains("typ relay") {
                stats.relay += 1;
            }
        }
        stats
    }
}

use tracing::{debug, info};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

use crate::config::{DEFAULT_LOG_FILTER, LOGGING_ENABLED};
use crate::peer::types::IceCandidate;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the built-in filter. In release builds nothing is
/// installed unless `RUST_LOG` is set. Calling this twice is harmless.
pub fn init() {
    let from_env = std::env::var("RUST_LOG").ok();
    if !LOGGING_ENABLED && from_env.is_none() {
        return;
    }
    let filter = from_env
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_owned()))
        .with_target(false)
        .try_init();
}

/// Trickle log line for one candidate
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index
    );
}

/// Logs the nominated candidate pair, handy right before a connection drops.
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for report in stats.reports.into_values() {
        if let StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                info!(
                    "stats {moment}: {} <-> {} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

use crate::config::{DEFAULT_LOG_FILTER, LOGGING_ENABLED};
use crate::peer::types::IceCandidate;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;

/// Устанавливает глобальный subscriber. В release-сборке выключено,
/// если хост не задал RUST_LOG явно
pub fn init_tracing() {
    let forced = std::env::var("RUST_LOG").is_ok();
    if !LOGGING_ENABLED && !forced {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // хост мог уже поставить свой subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
            init.candidate, init.sdp_mid, init.sdp_mline_index, init.username_fragment
        );
    }
}

/// Быстрый снимок getStats → выбранная пара
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

/// Счётчики кандидатов по типу: (host, srflx, relay)
pub fn analyze_candidates<'a, I>(slot: &str, candidates: I) -> (usize, usize, usize)
where
    I: IntoIterator<Item = &'a IceCandidate>,
{
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.candidate.contains("typ relay") {
            relay_count += 1;
        }
    }

    info!(
        slot,
        "Candidate analysis: {} host, {} srflx, {} relay", host_count, srflx_count, relay_count
    );

    if relay_count == 0 {
        warn!(slot, "No TURN relay candidates found! Connection through NAT may fail.");
    }
    (host_count, srflx_count, relay_count)
}

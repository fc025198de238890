use crate::peer::types::IceCandidate;
use crate::peer::MediaSession;
use tracing::{debug, warn};

/// Remote candidates received before the remote description
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Vec<IceCandidate>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: IceCandidate) {
        debug!(
            "Remote description not set yet, queuing candidate ({} pending)",
            self.queue.len() + 1
        );
        self.queue.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Applies every buffered candidate once the remote description is set.
    /// Returns how many were accepted by the media layer.
    pub async fn apply(&mut self, media: &dyn MediaSession) -> usize {
        let mut applied = 0;
        for candidate in self.queue.drain(..) {
            debug!("Applying pending candidate: {}", candidate.candidate);
            match media.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("Failed to apply pending candidate: {e}"),
            }
        }
        applied
    }
}

/// Candidate type counts, for NAT diagnostics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates<'a>(
    candidates: impl IntoIterator<Item = &'a IceCandidate>,
) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(line: &str) -> IceCandidate {
        IceCandidate {
            candidate: line.to_string(),
            sdp_mid: "0".into(),
            sdp_mline_index: 0,
        }
    }

    #[test]
    fn counts_candidate_types() {
        let list = vec![
            candidate("candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host"),
            candidate("candidate:2 1 udp 1694498815 1.2.3.4 6000 typ srflx raddr 10.0.0.2 rport 5000"),
            candidate("candidate:3 1 udp 16777215 5.6.7.8 7000 typ relay raddr 1.2.3.4 rport 6000"),
            candidate("candidate:4 1 udp 2130706431 10.0.0.3 5001 typ host"),
        ];

        let summary = analyze_candidates(&list);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
    }

    #[test]
    fn pending_queue_keeps_arrival_order() {
        let mut pending = PendingCandidates::default();
        pending.push(candidate("a"));
        pending.push(candidate("b"));
        assert_eq!(pending.len(), 2);

        let lines: Vec<_> = pending.queue.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(lines, vec!["a", "b"]);

        pending.clear();
        assert!(pending.is_empty());
    }
}

//! Endorsement collection.
//!
//! Fans a signed proposal out to every target peer concurrently and
//! gathers their responses, bounding each round-trip with a per-peer
//! timeout. The original proposal is sent verbatim to every target;
//! responses come back in target order.

use crate::config::EndorsementPolicy;
use crate::error::{EngineError, Phase, Result};
use crate::transport::PeerEndorser;
use fabric_types::{ProposalResponse, SignedProposal};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Collects endorsements from a set of peers.
pub struct EndorsementCollector {
    policy: EndorsementPolicy,
}

impl EndorsementCollector {
    pub fn new(policy: EndorsementPolicy) -> Self {
        Self { policy }
    }

    /// Send `signed` to every target and wait for all of them (or the
    /// per-peer timeout).
    ///
    /// Policy is explicit, never implicit:
    /// - `FailFast`: every target must answer; the first timeout or
    ///   transport failure fails the collection.
    /// - `BestEffort`: failed peers are dropped with a warning; the
    ///   collection fails only when no peer answered, surfacing the
    ///   first peer's error.
    pub async fn collect(
        &self,
        signed: &SignedProposal,
        targets: &[Arc<dyn PeerEndorser>],
        per_peer_timeout: Duration,
    ) -> Result<Vec<ProposalResponse>> {
        let tx_id = signed.proposal.tx_id.clone();

        if targets.is_empty() {
            return Err(EngineError::NoTargets { tx_id });
        }

        debug!(
            "Sending proposal for tx {} to {} peers (timeout {:?})",
            tx_id,
            targets.len(),
            per_peer_timeout
        );

        let calls = targets.iter().map(|peer| {
            let peer = Arc::clone(peer);
            async move {
                let outcome = timeout(per_peer_timeout, peer.process_proposal(signed)).await;
                (peer.id(), outcome)
            }
        });

        let results = join_all(calls).await;

        match self.policy {
            EndorsementPolicy::FailFast => {
                let mut responses = Vec::with_capacity(results.len());
                for (peer, outcome) in results {
                    match outcome {
                        Ok(Ok(response)) => responses.push(response),
                        Ok(Err(e)) => {
                            return Err(EngineError::Transport {
                                tx_id,
                                phase: Phase::Endorse,
                                source: e,
                            });
                        }
                        Err(_) => {
                            return Err(EngineError::EndorsementTimeout {
                                tx_id,
                                peer,
                                timeout: per_peer_timeout,
                            });
                        }
                    }
                }
                Ok(responses)
            }
            EndorsementPolicy::BestEffort => {
                let mut responses = Vec::new();
                let mut first_err = None;
                for (peer, outcome) in results {
                    match outcome {
                        Ok(Ok(response)) => responses.push(response),
                        Ok(Err(e)) => {
                            warn!("Peer {} failed to endorse tx {}: {}", peer, tx_id, e);
                            first_err.get_or_insert(EngineError::Transport {
                                tx_id: tx_id.clone(),
                                phase: Phase::Endorse,
                                source: e,
                            });
                        }
                        Err(_) => {
                            warn!(
                                "Peer {} did not endorse tx {} within {:?}",
                                peer, tx_id, per_peer_timeout
                            );
                            first_err.get_or_insert(EngineError::EndorsementTimeout {
                                tx_id: tx_id.clone(),
                                peer,
                                timeout: per_peer_timeout,
                            });
                        }
                    }
                }

                if responses.is_empty() {
                    Err(first_err.unwrap_or(EngineError::NoTargets { tx_id }))
                } else {
                    debug!(
                        "Collected {} of {} endorsements for tx {}",
                        responses.len(),
                        targets.len(),
                        tx_id
                    );
                    Ok(responses)
                }
            }
        }
    }
}

//! Submission to the ordering service.

use crate::error::{EngineError, Result};
use crate::transport::OrdererClient;
use fabric_types::{BroadcastAck, TransactionEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Forwards a validated endorsement set to the ordering service.
///
/// The orderer is the sole sequencing authority. Exactly one broadcast
/// attempt is made per call: an ambiguous network failure may mean the
/// envelope was accepted, and retrying here could double-submit. The
/// caller sees `SubmissionTimeout` and `SubmissionFailed` as distinct
/// kinds and owns any retry decision.
pub struct TransactionSubmitter {
    submission_timeout: Duration,
}

impl TransactionSubmitter {
    pub fn new(submission_timeout: Duration) -> Self {
        Self { submission_timeout }
    }

    pub async fn submit(
        &self,
        orderer: &Arc<dyn OrdererClient>,
        envelope: &TransactionEnvelope,
    ) -> Result<BroadcastAck> {
        let tx_id = envelope.tx_id.clone();

        debug!(
            "Broadcasting tx {} with {} endorsements",
            tx_id,
            envelope.endorsements.len()
        );

        let ack = match timeout(self.submission_timeout, orderer.broadcast(envelope)).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(e)) => {
                return Err(EngineError::SubmissionFailed {
                    tx_id,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(EngineError::SubmissionTimeout {
                    tx_id,
                    timeout: self.submission_timeout,
                });
            }
        };

        if !ack.is_success() {
            return Err(EngineError::SubmissionFailed {
                tx_id,
                reason: format!("orderer returned {}: {}", ack.status, ack.info),
            });
        }

        info!("Orderer accepted tx {}", tx_id);
        Ok(ack)
    }
}

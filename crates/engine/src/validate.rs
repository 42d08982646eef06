//! Cross-peer response validation.
//!
//! Before an endorsement set can be submitted it must be internally
//! consistent: every peer returned status 200 and every read/write-set
//! digest is bit-identical. The two failure modes are kept distinct so
//! callers can abort (rejected) or retry (mismatch, usually a
//! concurrent-update artifact) as they see fit.

use crate::error::{EngineError, Result};
use fabric_types::{ProposalResponse, TransactionId};
use tracing::{debug, error};

/// An endorsement set that passed validation.
///
/// Only [`ResponseValidator`] constructs this; holding one proves the
/// responses agree and are submittable.
#[derive(Debug, Clone)]
pub struct ValidatedResponses {
    responses: Vec<ProposalResponse>,
}

impl ValidatedResponses {
    /// Payload of the first endorser, taken as the canonical result.
    /// The digest check covers the read/write set, not the payload
    /// bytes, so agreement is on effects rather than on output.
    pub fn payload(&self) -> &[u8] {
        &self.responses[0].payload
    }

    pub fn responses(&self) -> &[ProposalResponse] {
        &self.responses
    }

    pub fn into_inner(self) -> Vec<ProposalResponse> {
        self.responses
    }
}

/// Validates proposal responses across peers.
pub struct ResponseValidator;

impl ResponseValidator {
    /// Accepts only if every response has status 200 and all read/write
    /// set digests match the first endorser's.
    pub fn validate(
        tx_id: &TransactionId,
        responses: Vec<ProposalResponse>,
    ) -> Result<ValidatedResponses> {
        Self::check_status(tx_id, &responses)?;

        let reference = &responses[0];
        for response in &responses[1..] {
            if response.rw_set_digest != reference.rw_set_digest {
                error!(
                    "Endorsement mismatch for tx {}: peer {} digest {} != peer {} digest {}",
                    tx_id,
                    response.peer,
                    response.digest_hex(),
                    reference.peer,
                    reference.digest_hex()
                );
                return Err(EngineError::EndorsementMismatch {
                    tx_id: tx_id.clone(),
                    peer: response.peer.clone(),
                });
            }
        }

        debug!(
            "Validated {} endorsements for tx {}",
            responses.len(),
            tx_id
        );
        Ok(ValidatedResponses { responses })
    }

    /// Status-only check, used for install proposals where peers return
    /// no comparable read/write set.
    pub fn check_status(tx_id: &TransactionId, responses: &[ProposalResponse]) -> Result<()> {
        if responses.is_empty() {
            return Err(EngineError::NoTargets {
                tx_id: tx_id.clone(),
            });
        }
        for response in responses {
            if !response.is_ok() {
                return Err(EngineError::EndorsementRejected {
                    tx_id: tx_id.clone(),
                    peer: response.peer.clone(),
                    status: response.status,
                    message: response.message.clone(),
                });
            }
        }
        Ok(())
    }

    /// Query-path check: responses must carry byte-identical payloads.
    /// Returns the agreed payload.
    pub fn validate_query(
        tx_id: &TransactionId,
        responses: &[ProposalResponse],
    ) -> Result<Vec<u8>> {
        Self::check_status(tx_id, responses)?;

        let reference = &responses[0];
        for response in &responses[1..] {
            if response.payload != reference.payload {
                return Err(EngineError::EndorsementMismatch {
                    tx_id: tx_id.clone(),
                    peer: response.peer.clone(),
                });
            }
        }
        Ok(reference.payload.clone())
    }
}

//! Error types for the transaction engine

use fabric_types::{CommitCode, PeerId, TransactionId};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Phase of an invocation, for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Endorse,
    Submit,
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Endorse => write!(f, "endorsement"),
            Phase::Submit => write!(f, "submission"),
            Phase::Commit => write!(f, "commit"),
        }
    }
}

/// Errors surfaced by the transaction engine.
///
/// None of these are retried internally; every variant carries enough
/// context (transaction id, peer, phase) for the caller to decide
/// retry vs abort.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("endorsement timed out after {timeout:?} for tx {tx_id} on peer {peer}")]
    EndorsementTimeout {
        tx_id: TransactionId,
        peer: PeerId,
        timeout: Duration,
    },

    #[error("peer {peer} rejected proposal for tx {tx_id}: status {status} ({message})")]
    EndorsementRejected {
        tx_id: TransactionId,
        peer: PeerId,
        status: u16,
        message: String,
    },

    #[error("read/write set mismatch for tx {tx_id}: peer {peer} diverged from the first endorser")]
    EndorsementMismatch { tx_id: TransactionId, peer: PeerId },

    #[error("broadcast of tx {tx_id} failed: {reason}")]
    SubmissionFailed { tx_id: TransactionId, reason: String },

    #[error("broadcast of tx {tx_id} timed out after {timeout:?}")]
    SubmissionTimeout {
        tx_id: TransactionId,
        timeout: Duration,
    },

    #[error("no commit event for tx {tx_id} within {deadline:?}")]
    CommitTimeout {
        tx_id: TransactionId,
        deadline: Duration,
    },

    #[error("tx {tx_id} committed as {code} on peer {peer}")]
    CommitInvalid {
        tx_id: TransactionId,
        peer: PeerId,
        code: CommitCode,
    },

    #[error("transport failure during {phase} for tx {tx_id}: {source}")]
    Transport {
        tx_id: TransactionId,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to sign proposal for tx {tx_id}: {source}")]
    Signing {
        tx_id: TransactionId,
        #[source]
        source: anyhow::Error,
    },

    #[error("event hub {peer} connection failed: {source}")]
    EventHub {
        peer: PeerId,
        #[source]
        source: anyhow::Error,
    },

    #[error("no endorsement targets for tx {tx_id}")]
    NoTargets { tx_id: TransactionId },

    #[error("commit listener already registered for tx {0}")]
    ListenerExists(TransactionId),

    #[error("session context already released")]
    SessionReleased,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Status(#[from] fabric_types::TransitionError),

    #[error("internal error: {0}")]
    Internal(String),
}

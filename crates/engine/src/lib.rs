//! Client-side transaction engine for a permissioned ledger.
//!
//! Drives the asynchronous flow of one transaction against a network
//! of endorsing peers, an ordering service and peer event streams:
//!
//! 1. **Endorse** — the signed proposal fans out to every target peer
//!    concurrently with a per-peer timeout.
//! 2. **Validate** — responses must all carry status 200 and
//!    bit-identical read/write-set digests.
//! 3. **Submit** — the assembled envelope goes to the orderer exactly
//!    once; the orderer is the sole sequencing authority.
//! 4. **Correlate** — commit events from the subscribed hubs resolve
//!    the transaction, bounded by the caller's deadline.
//!
//! All network collaborators sit behind the narrow traits in
//! [`transport`]; the engine owns no wire format and no credential
//! material.

pub mod config;
pub mod context;
pub mod endorse;
pub mod error;
pub mod events;
pub mod invoke;
pub mod submit;
pub mod transport;
pub mod validate;

pub use config::{CommitPolicy, EndorsementPolicy, EngineConfig, EngineConfigBuilder};
pub use context::{SessionContext, SessionContextBuilder};
pub use endorse::EndorsementCollector;
pub use error::{EngineError, Phase, Result};
pub use events::{CommitOutcome, EventCorrelator};
pub use invoke::{InvocationService, InvocationServiceBuilder};
pub use submit::TransactionSubmitter;
pub use transport::{EventHub, OrdererClient, PeerEndorser, SigningIdentity};
pub use validate::{ResponseValidator, ValidatedResponses};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CommitPolicy, EndorsementPolicy, EngineConfig};
    pub use crate::context::SessionContext;
    pub use crate::error::{EngineError, Result};
    pub use crate::invoke::InvocationService;
    pub use crate::transport::{EventHub, OrdererClient, PeerEndorser, SigningIdentity};
    pub use fabric_types::{
        ChaincodeCall, ChaincodeDeploy, ChaincodeId, InvocationState, InvocationStatus,
        TransactionId,
    };
}

//! Boundary contracts for the network collaborators.
//!
//! The engine owns no wire format; everything behind these traits
//! (gRPC plumbing, TLS, credential material) belongs to the
//! implementations. Trait methods return `anyhow::Result` so
//! implementations stay decoupled from the engine's error taxonomy;
//! the engine wraps failures with transaction and phase context.

use async_trait::async_trait;
use fabric_types::{
    BroadcastAck, CommitEvent, PeerId, ProposalResponse, SignedProposal, TransactionEnvelope,
};

/// A peer RPC endpoint that simulates proposals and returns endorsements.
#[async_trait]
pub trait PeerEndorser: Send + Sync {
    fn id(&self) -> PeerId;

    /// Execute the proposal against the peer and return its endorsement.
    async fn process_proposal(&self, proposal: &SignedProposal)
        -> anyhow::Result<ProposalResponse>;
}

/// The ordering-service endpoint accepting assembled transactions.
#[async_trait]
pub trait OrdererClient: Send + Sync {
    async fn broadcast(&self, envelope: &TransactionEnvelope) -> anyhow::Result<BroadcastAck>;
}

/// A peer event stream emitting commit notifications.
///
/// `connect` hands back the stream as a channel receiver; the event
/// correlator pumps it. `disconnect` tears the stream down and must be
/// safe to call more than once.
#[async_trait]
pub trait EventHub: Send + Sync {
    fn peer(&self) -> PeerId;

    async fn connect(&self) -> anyhow::Result<async_channel::Receiver<CommitEvent>>;

    async fn disconnect(&self) -> anyhow::Result<()>;

    fn is_connected(&self) -> bool;
}

/// Credential provider for the submitting identity.
pub trait SigningIdentity: Send + Sync {
    /// MSP the identity belongs to.
    fn msp_id(&self) -> &str;

    /// Serialized identity (certificate bytes) used as the creator field.
    fn creator(&self) -> &[u8];

    fn sign(&self, message: &[u8]) -> anyhow::Result<Vec<u8>>;
}

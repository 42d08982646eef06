//! Session context: the scoped unit-of-work handle.
//!
//! A context bundles the identity, channel, peer set, orderer and
//! event-hub subscriptions for one logical scenario. It is created
//! once, shared read-only across many operations, and released at the
//! end; `release` tears every subscription down and is idempotent, so
//! callers can put it on every exit path without bookkeeping. Nothing
//! in the context is ambient: every operation receives the context it
//! runs against.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use fabric_types::{ChaincodeCall, Proposal, SignedProposal, TransactionId};

use crate::config::CommitPolicy;
use crate::error::{EngineError, Result};
use crate::events::EventCorrelator;
use crate::transport::{EventHub, OrdererClient, PeerEndorser, SigningIdentity};

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("org", &self.org)
            .field("channel", &self.channel)
            .field("peers", &self.peers.len())
            .field("hubs", &self.hubs.len())
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

pub struct SessionContext {
    org: String,
    channel: String,
    identity: Arc<dyn SigningIdentity>,
    peers: Vec<Arc<dyn PeerEndorser>>,
    orderer: Arc<dyn OrdererClient>,
    hubs: Vec<Arc<dyn EventHub>>,
    correlator: EventCorrelator,
    released: AtomicBool,
}

impl SessionContext {
    pub fn builder() -> SessionContextBuilder {
        SessionContextBuilder::new()
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn msp_id(&self) -> &str {
        self.identity.msp_id()
    }

    pub fn peers(&self) -> &[Arc<dyn PeerEndorser>] {
        &self.peers
    }

    pub fn orderer(&self) -> &Arc<dyn OrdererClient> {
        &self.orderer
    }

    pub fn correlator(&self) -> &EventCorrelator {
        &self.correlator
    }

    /// Fresh transaction identifier: sha256 over a random nonce and the
    /// submitter's serialized identity, hex encoded. Never reused.
    pub fn new_transaction_id(&self) -> TransactionId {
        let mut nonce = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(nonce);
        hasher.update(self.identity.creator());
        TransactionId(hex::encode(hasher.finalize()))
    }

    pub fn build_proposal(
        &self,
        tx_id: TransactionId,
        call: ChaincodeCall,
        endorsement_policy: Option<serde_json::Value>,
        chaincode_path: Option<String>,
    ) -> Proposal {
        Proposal {
            tx_id,
            channel: self.channel.clone(),
            call,
            creator_msp: self.identity.msp_id().to_string(),
            creator_cert: self.identity.creator().to_vec(),
            endorsement_policy,
            chaincode_path,
        }
    }

    /// Sign the canonical serialization of the proposal with the
    /// context identity.
    pub fn sign_proposal(&self, proposal: Proposal) -> Result<SignedProposal> {
        let tx_id = proposal.tx_id.clone();
        let message = serde_json::to_vec(&proposal)
            .map_err(|e| EngineError::Internal(format!("proposal serialization failed: {e}")))?;
        let signature = self
            .identity
            .sign(&message)
            .map_err(|e| EngineError::Signing { tx_id, source: e })?;
        Ok(SignedProposal {
            proposal,
            signature,
        })
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Fail fast if the context has been released.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_released() {
            return Err(EngineError::SessionReleased);
        }
        Ok(())
    }

    /// Tear down every event subscription held by this context.
    ///
    /// Idempotent; hub disconnect failures are logged and do not stop
    /// the remaining teardown.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        for hub in &self.hubs {
            if hub.is_connected() {
                if let Err(e) = hub.disconnect().await {
                    warn!("Failed to disconnect event hub {}: {}", hub.peer(), e);
                }
            }
        }
        self.correlator.shutdown().await;

        info!(
            "Released session context for org {} on channel {}",
            self.org, self.channel
        );
    }
}

/// Builder for SessionContext
pub struct SessionContextBuilder {
    org: Option<String>,
    channel: Option<String>,
    identity: Option<Arc<dyn SigningIdentity>>,
    peers: Vec<Arc<dyn PeerEndorser>>,
    orderer: Option<Arc<dyn OrdererClient>>,
    hubs: Vec<Arc<dyn EventHub>>,
    commit_policy: CommitPolicy,
}

impl SessionContextBuilder {
    pub fn new() -> Self {
        Self {
            org: None,
            channel: None,
            identity: None,
            peers: Vec::new(),
            orderer: None,
            hubs: Vec::new(),
            commit_policy: CommitPolicy::AllHubs,
        }
    }

    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn SigningIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_peer(mut self, peer: Arc<dyn PeerEndorser>) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn with_orderer(mut self, orderer: Arc<dyn OrdererClient>) -> Self {
        self.orderer = Some(orderer);
        self
    }

    pub fn with_event_hub(mut self, hub: Arc<dyn EventHub>) -> Self {
        self.hubs.push(hub);
        self
    }

    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit_policy = policy;
        self
    }

    /// Connect every event hub and assemble the context.
    pub async fn build(self) -> Result<SessionContext> {
        let org = self
            .org
            .ok_or_else(|| EngineError::Config("org is required".to_string()))?;
        let channel = self
            .channel
            .ok_or_else(|| EngineError::Config("channel is required".to_string()))?;
        let identity = self
            .identity
            .ok_or_else(|| EngineError::Config("identity is required".to_string()))?;
        let orderer = self
            .orderer
            .ok_or_else(|| EngineError::Config("orderer is required".to_string()))?;
        if self.peers.is_empty() {
            return Err(EngineError::Config(
                "at least one peer is required".to_string(),
            ));
        }

        let correlator = EventCorrelator::new(self.commit_policy);
        for hub in &self.hubs {
            correlator.attach_hub(Arc::clone(hub)).await?;
        }

        Ok(SessionContext {
            org,
            channel,
            identity,
            peers: self.peers,
            orderer,
            hubs: self.hubs,
            correlator,
            released: AtomicBool::new(false),
        })
    }
}

impl Default for SessionContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_channel::{bounded, Receiver};
    use async_trait::async_trait;
    use fabric_types::{
        BroadcastAck, ChaincodeId, CommitEvent, PeerId, ProposalResponse, TransactionEnvelope,
    };

    struct TestIdentity;

    impl SigningIdentity for TestIdentity {
        fn msp_id(&self) -> &str {
            "Org1MSP"
        }

        fn creator(&self) -> &[u8] {
            b"-----BEGIN CERTIFICATE-----test"
        }

        fn sign(&self, message: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(message.iter().rev().copied().collect())
        }
    }

    struct FailingIdentity;

    impl SigningIdentity for FailingIdentity {
        fn msp_id(&self) -> &str {
            "Org1MSP"
        }

        fn creator(&self) -> &[u8] {
            b"cert"
        }

        fn sign(&self, _message: &[u8]) -> anyhow::Result<Vec<u8>> {
            bail!("hsm unavailable")
        }
    }

    struct NoopPeer;

    #[async_trait]
    impl PeerEndorser for NoopPeer {
        fn id(&self) -> PeerId {
            PeerId::from("peer0")
        }

        async fn process_proposal(
            &self,
            _proposal: &fabric_types::SignedProposal,
        ) -> anyhow::Result<ProposalResponse> {
            bail!("not wired in this test")
        }
    }

    struct NoopOrderer;

    #[async_trait]
    impl OrdererClient for NoopOrderer {
        async fn broadcast(&self, _envelope: &TransactionEnvelope) -> anyhow::Result<BroadcastAck> {
            Ok(BroadcastAck::success())
        }
    }

    struct TrackedHub {
        peer: PeerId,
        event_rx: Receiver<CommitEvent>,
        connected: AtomicBool,
    }

    impl TrackedHub {
        fn new(peer: &str) -> Arc<Self> {
            let (_tx, event_rx) = bounded(4);
            Arc::new(Self {
                peer: PeerId::from(peer),
                event_rx,
                connected: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl EventHub for TrackedHub {
        fn peer(&self) -> PeerId {
            self.peer.clone()
        }

        async fn connect(&self) -> anyhow::Result<Receiver<CommitEvent>> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(self.event_rx.clone())
        }

        async fn disconnect(&self) -> anyhow::Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    async fn context_with_hub(hub: Arc<TrackedHub>) -> SessionContext {
        SessionContext::builder()
            .with_org("org1")
            .with_channel("mychannel")
            .with_identity(Arc::new(TestIdentity))
            .with_peer(Arc::new(NoopPeer))
            .with_orderer(Arc::new(NoopOrderer))
            .with_event_hub(hub)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn transaction_ids_are_unique_hex_digests() {
        let ctx = context_with_hub(TrackedHub::new("peer0")).await;

        let a = ctx.new_transaction_id();
        let b = ctx.new_transaction_id();

        assert_ne!(a, b);
        assert_eq!(a.0.len(), 64);
        assert!(a.0.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn build_connects_hubs_and_release_disconnects() {
        let hub = TrackedHub::new("peer0");
        let ctx = context_with_hub(hub.clone()).await;
        assert!(hub.is_connected());
        assert_eq!(ctx.correlator().hub_count().await, 1);

        ctx.release().await;
        assert!(!hub.is_connected());
        assert!(ctx.is_released());
        assert!(matches!(
            ctx.ensure_active(),
            Err(EngineError::SessionReleased)
        ));

        // Second release is a no-op.
        ctx.release().await;
    }

    #[tokio::test]
    async fn builder_requires_peers() {
        let err = SessionContext::builder()
            .with_org("org1")
            .with_channel("mychannel")
            .with_identity(Arc::new(TestIdentity))
            .with_orderer(Arc::new(NoopOrderer))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn sign_failure_is_surfaced_with_tx_context() {
        let ctx = SessionContext::builder()
            .with_org("org1")
            .with_channel("mychannel")
            .with_identity(Arc::new(FailingIdentity))
            .with_peer(Arc::new(NoopPeer))
            .with_orderer(Arc::new(NoopOrderer))
            .build()
            .await
            .unwrap();

        let tx_id = ctx.new_transaction_id();
        let call = ChaincodeCall::new(ChaincodeId::new("marbles", "v1"), "init", vec![]);
        let proposal = ctx.build_proposal(tx_id.clone(), call, None, None);

        let err = ctx.sign_proposal(proposal).unwrap_err();
        match err {
            EngineError::Signing { tx_id: id, .. } => assert_eq!(id, tx_id),
            other => panic!("expected Signing, got {other}"),
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unique identifier for one transaction attempt.
///
/// Generated from the submitter's identity and a fresh nonce; never reused.
/// Correlates proposal -> endorsement -> commit event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        TransactionId(s)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        TransactionId(s.to_string())
    }
}

/// Peer identifier (network identity)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

/// Deployed chaincode identity: name plus version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeId {
    pub name: String,
    pub version: String,
}

impl ChaincodeId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ChaincodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// One chaincode invocation's worth of input. Created per call, consumed once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaincodeCall {
    pub chaincode: ChaincodeId,
    pub fcn: String,
    pub args: Vec<String>,
    /// Transient data visible to the endorsing peer but excluded from the
    /// transaction payload.
    pub transient: Option<BTreeMap<String, Vec<u8>>>,
}

impl ChaincodeCall {
    pub fn new(chaincode: ChaincodeId, fcn: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            chaincode,
            fcn: fcn.into(),
            args,
            transient: None,
        }
    }

    pub fn with_transient(mut self, transient: BTreeMap<String, Vec<u8>>) -> Self {
        self.transient = Some(transient);
        self
    }
}

/// Input for install/instantiate/upgrade administration operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaincodeDeploy {
    pub call: ChaincodeCall,
    /// Package path for install proposals.
    pub path: Option<String>,
    /// Endorsement policy attached to instantiate/upgrade proposals.
    /// Opaque to the engine; evaluated by the network.
    pub endorsement_policy: Option<serde_json::Value>,
    pub upgrade: bool,
}

impl ChaincodeDeploy {
    pub fn install(call: ChaincodeCall, path: impl Into<String>) -> Self {
        Self {
            call,
            path: Some(path.into()),
            endorsement_policy: None,
            upgrade: false,
        }
    }

    pub fn instantiate(call: ChaincodeCall) -> Self {
        Self {
            call,
            path: None,
            endorsement_policy: None,
            upgrade: false,
        }
    }

    pub fn with_endorsement_policy(mut self, policy: serde_json::Value) -> Self {
        self.endorsement_policy = Some(policy);
        self
    }

    pub fn as_upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }
}

/// Unsigned proposal sent to endorsing peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub tx_id: TransactionId,
    pub channel: String,
    pub call: ChaincodeCall,
    pub creator_msp: String,
    pub creator_cert: Vec<u8>,
    /// Endorsement policy for deploy proposals; None for plain invokes.
    pub endorsement_policy: Option<serde_json::Value>,
    /// Package path for install/instantiate proposals.
    pub chaincode_path: Option<String>,
}

/// Proposal plus the submitter's signature over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedProposal {
    pub proposal: Proposal,
    pub signature: Vec<u8>,
}

/// A single peer's simulated execution result for a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub peer: PeerId,
    pub status: u16,
    pub message: String,
    pub payload: Vec<u8>,
    /// Digest over the simulated read/write set. Must be bit-identical
    /// across endorsers for the endorsement set to be usable.
    pub rw_set_digest: Vec<u8>,
}

impl ProposalResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(&self.rw_set_digest)
    }
}

/// Assembled transaction forwarded to the ordering service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub tx_id: TransactionId,
    pub channel: String,
    pub endorsements: Vec<ProposalResponse>,
}

/// Ordering-service broadcast outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Success,
    BadRequest,
    ServiceUnavailable,
    InternalError,
}

impl fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastStatus::Success => write!(f, "SUCCESS"),
            BroadcastStatus::BadRequest => write!(f, "BAD_REQUEST"),
            BroadcastStatus::ServiceUnavailable => write!(f, "SERVICE_UNAVAILABLE"),
            BroadcastStatus::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastAck {
    pub status: BroadcastStatus,
    pub info: String,
}

impl BroadcastAck {
    pub fn success() -> Self {
        Self {
            status: BroadcastStatus::Success,
            info: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BroadcastStatus::Success
    }
}

/// Validation code a peer reports for a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitCode {
    Valid,
    EndorsementPolicyFailure,
    MvccReadConflict,
    PhantomReadConflict,
    BadPayload,
    InvalidOther,
}

impl CommitCode {
    pub fn is_valid(&self) -> bool {
        matches!(self, CommitCode::Valid)
    }
}

impl fmt::Display for CommitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitCode::Valid => write!(f, "VALID"),
            CommitCode::EndorsementPolicyFailure => write!(f, "ENDORSEMENT_POLICY_FAILURE"),
            CommitCode::MvccReadConflict => write!(f, "MVCC_READ_CONFLICT"),
            CommitCode::PhantomReadConflict => write!(f, "PHANTOM_READ_CONFLICT"),
            CommitCode::BadPayload => write!(f, "BAD_PAYLOAD"),
            CommitCode::InvalidOther => write!(f, "INVALID_OTHER"),
        }
    }
}

/// Commit notification emitted by a peer event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitEvent {
    pub tx_id: TransactionId,
    pub peer: PeerId,
    pub code: CommitCode,
    pub block_number: u64,
}

/// Lifecycle state of one invocation.
///
/// Transitions are monotonic: created -> endorsed -> ordered -> valid|invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Created,
    Endorsed,
    Ordered,
    Valid,
    Invalid,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvocationState::Valid | InvocationState::Invalid)
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationState::Created => write!(f, "created"),
            InvocationState::Endorsed => write!(f, "endorsed"),
            InvocationState::Ordered => write!(f, "ordered"),
            InvocationState::Valid => write!(f, "valid"),
            InvocationState::Invalid => write!(f, "invalid"),
        }
    }
}

/// Attempted backward or out-of-order status transition.
#[derive(Debug, thiserror::Error)]
#[error("invalid status transition {from} -> {to} for tx {tx_id}")]
pub struct TransitionError {
    pub tx_id: TransactionId,
    pub from: InvocationState,
    pub to: InvocationState,
}

/// Per-invocation progress record for observability.
///
/// Mutated in place as the operation advances; frozen once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationStatus {
    pub tx_id: TransactionId,
    pub state: InvocationState,
    pub time_created: DateTime<Utc>,
    pub time_endorsed: Option<DateTime<Utc>>,
    pub time_ordered: Option<DateTime<Utc>>,
    pub time_valid: Option<DateTime<Utc>>,
    pub result: Option<Vec<u8>>,
}

impl InvocationStatus {
    pub fn new(tx_id: TransactionId) -> Self {
        Self {
            tx_id,
            state: InvocationState::Created,
            time_created: Utc::now(),
            time_endorsed: None,
            time_ordered: None,
            time_valid: None,
            result: None,
        }
    }

    fn transition(&mut self, from: InvocationState, to: InvocationState) -> Result<(), TransitionError> {
        if self.state != from {
            return Err(TransitionError {
                tx_id: self.tx_id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn mark_endorsed(&mut self, result: Vec<u8>) -> Result<(), TransitionError> {
        self.transition(InvocationState::Created, InvocationState::Endorsed)?;
        self.time_endorsed = Some(Utc::now());
        self.result = Some(result);
        Ok(())
    }

    pub fn mark_ordered(&mut self) -> Result<(), TransitionError> {
        self.transition(InvocationState::Endorsed, InvocationState::Ordered)?;
        self.time_ordered = Some(Utc::now());
        Ok(())
    }

    pub fn mark_valid(&mut self) -> Result<(), TransitionError> {
        self.transition(InvocationState::Ordered, InvocationState::Valid)?;
        self.time_valid = Some(Utc::now());
        Ok(())
    }

    pub fn mark_invalid(&mut self) -> Result<(), TransitionError> {
        self.transition(InvocationState::Ordered, InvocationState::Invalid)?;
        Ok(())
    }

    /// Terminal success shortcut for read-only paths that never order.
    pub fn mark_query_done(&mut self, result: Vec<u8>) -> Result<(), TransitionError> {
        self.transition(InvocationState::Created, InvocationState::Endorsed)?;
        self.time_endorsed = Some(Utc::now());
        self.result = Some(result);
        self.state = InvocationState::Valid;
        self.time_valid = Some(Utc::now());
        Ok(())
    }
}

/// Ordering-service endpoint description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdererEndpoint {
    pub id: String,
    pub url: String,
    pub tls_ca_path: Option<String>,
    pub server_hostname: Option<String>,
}

/// Single peer's request and event endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub id: PeerId,
    pub request_url: String,
    pub event_url: String,
    pub tls_ca_path: Option<String>,
    pub server_hostname: Option<String>,
}

/// One organization's membership and peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgConfig {
    pub name: String,
    pub msp_id: String,
    pub peers: Vec<PeerEndpoint>,
}

/// Typed network topology, validated at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub orderer: OrdererEndpoint,
    pub orgs: Vec<OrgConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("network config has no organizations")]
    NoOrgs,

    #[error("organization {0} has no peers")]
    EmptyOrg(String),

    #[error("duplicate peer id {0} in network config")]
    DuplicatePeer(PeerId),

    #[error("{entity} has an empty {field}")]
    EmptyField { entity: String, field: &'static str },
}

impl NetworkConfig {
    /// Reject structurally invalid topologies before any connection is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orderer.url.is_empty() {
            return Err(ConfigError::EmptyField {
                entity: format!("orderer {}", self.orderer.id),
                field: "url",
            });
        }
        if self.orgs.is_empty() {
            return Err(ConfigError::NoOrgs);
        }
        let mut seen = std::collections::HashSet::new();
        for org in &self.orgs {
            if org.peers.is_empty() {
                return Err(ConfigError::EmptyOrg(org.name.clone()));
            }
            if org.msp_id.is_empty() {
                return Err(ConfigError::EmptyField {
                    entity: format!("org {}", org.name),
                    field: "msp_id",
                });
            }
            for peer in &org.peers {
                if peer.request_url.is_empty() {
                    return Err(ConfigError::EmptyField {
                        entity: format!("peer {}", peer.id),
                        field: "request_url",
                    });
                }
                if peer.event_url.is_empty() {
                    return Err(ConfigError::EmptyField {
                        entity: format!("peer {}", peer.id),
                        field: "event_url",
                    });
                }
                if !seen.insert(peer.id.clone()) {
                    return Err(ConfigError::DuplicatePeer(peer.id.clone()));
                }
            }
        }
        Ok(())
    }

    /// All peers across all organizations, in config order.
    pub fn all_peers(&self) -> impl Iterator<Item = &PeerEndpoint> {
        self.orgs.iter().flat_map(|org| org.peers.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> PeerEndpoint {
        PeerEndpoint {
            id: PeerId::from(id),
            request_url: format!("grpcs://{id}:7051"),
            event_url: format!("grpcs://{id}:7053"),
            tls_ca_path: None,
            server_hostname: None,
        }
    }

    fn config() -> NetworkConfig {
        NetworkConfig {
            orderer: OrdererEndpoint {
                id: "orderer0".into(),
                url: "grpcs://orderer0:7050".into(),
                tls_ca_path: None,
                server_hostname: None,
            },
            orgs: vec![OrgConfig {
                name: "org1".into(),
                msp_id: "Org1MSP".into(),
                peers: vec![peer("peer0.org1"), peer("peer1.org1")],
            }],
        }
    }

    #[test]
    fn status_advances_monotonically() {
        let mut status = InvocationStatus::new(TransactionId::from("tx-1"));
        assert_eq!(status.state, InvocationState::Created);

        status.mark_endorsed(b"payload".to_vec()).unwrap();
        status.mark_ordered().unwrap();
        status.mark_valid().unwrap();

        assert!(status.state.is_terminal());
        assert!(status.time_endorsed.is_some());
        assert!(status.time_ordered.is_some());
        assert!(status.time_valid.is_some());
    }

    #[test]
    fn status_rejects_backward_transition() {
        let mut status = InvocationStatus::new(TransactionId::from("tx-2"));
        status.mark_endorsed(Vec::new()).unwrap();
        status.mark_ordered().unwrap();
        status.mark_valid().unwrap();

        // Terminal state is frozen.
        let err = status.mark_invalid().unwrap_err();
        assert_eq!(err.from, InvocationState::Valid);
        assert_eq!(status.state, InvocationState::Valid);
    }

    #[test]
    fn status_rejects_skipped_phase() {
        let mut status = InvocationStatus::new(TransactionId::from("tx-3"));
        assert!(status.mark_ordered().is_err());
        assert_eq!(status.state, InvocationState::Created);
    }

    #[test]
    fn valid_config_passes() {
        config().validate().unwrap();
    }

    #[test]
    fn config_rejects_duplicate_peer() {
        let mut cfg = config();
        cfg.orgs[0].peers.push(peer("peer0.org1"));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicatePeer(_))
        ));
    }

    #[test]
    fn config_rejects_empty_org() {
        let mut cfg = config();
        cfg.orgs[0].peers.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyOrg(_))));
    }

    #[test]
    fn commit_code_display_matches_wire_form() {
        assert_eq!(CommitCode::Valid.to_string(), "VALID");
        assert_eq!(
            CommitCode::MvccReadConflict.to_string(),
            "MVCC_READ_CONFLICT"
        );
        assert!(CommitCode::Valid.is_valid());
        assert!(!CommitCode::BadPayload.is_valid());
    }
}

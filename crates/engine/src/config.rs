//! Configuration for the transaction engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the endorsement collector reacts to a non-responsive peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndorsementPolicy {
    /// Every target must answer within the timeout; the first failure
    /// fails the whole collection. Default.
    FailFast,
    /// Per-peer failures are dropped; the collection fails only when no
    /// peer responded at all.
    BestEffort,
}

/// When a transaction counts as committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Every subscribed event hub must report VALID. Default.
    AllHubs,
    /// The first VALID report resolves the transaction.
    AnyHub,
}

/// Configuration for the transaction engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-peer timeout for invoke/query proposals
    pub endorsement_timeout: Duration,

    /// Per-peer timeout for install/instantiate/upgrade proposals
    pub deploy_endorsement_timeout: Duration,

    /// Timeout for one broadcast to the ordering service
    pub submission_timeout: Duration,

    /// Default deadline for the commit-correlation phase
    pub commit_timeout: Duration,

    /// Floor applied to the remaining commit deadline after endorsement
    /// time is subtracted
    pub min_commit_timeout: Duration,

    /// Endorsement collection policy
    pub endorsement_policy: EndorsementPolicy,

    /// Commit correlation policy
    pub commit_policy: CommitPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endorsement_timeout: Duration::from_secs(60),
            deploy_endorsement_timeout: Duration::from_secs(120),
            submission_timeout: Duration::from_secs(30),
            commit_timeout: Duration::from_secs(300),
            min_commit_timeout: Duration::from_secs(1),
            endorsement_policy: EndorsementPolicy::FailFast,
            commit_policy: CommitPolicy::AllHubs,
        }
    }
}

/// Builder for EngineConfig
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn endorsement_timeout(mut self, timeout: Duration) -> Self {
        self.config.endorsement_timeout = timeout;
        self
    }

    pub fn deploy_endorsement_timeout(mut self, timeout: Duration) -> Self {
        self.config.deploy_endorsement_timeout = timeout;
        self
    }

    pub fn submission_timeout(mut self, timeout: Duration) -> Self {
        self.config.submission_timeout = timeout;
        self
    }

    pub fn commit_timeout(mut self, timeout: Duration) -> Self {
        self.config.commit_timeout = timeout;
        self
    }

    pub fn min_commit_timeout(mut self, timeout: Duration) -> Self {
        self.config.min_commit_timeout = timeout;
        self
    }

    pub fn endorsement_policy(mut self, policy: EndorsementPolicy) -> Self {
        self.config.endorsement_policy = policy;
        self
    }

    pub fn commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.config.commit_policy = policy;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.endorsement_timeout, Duration::from_secs(60));
        assert_eq!(config.commit_timeout, Duration::from_secs(300));
        assert_eq!(config.endorsement_policy, EndorsementPolicy::FailFast);
        assert_eq!(config.commit_policy, CommitPolicy::AllHubs);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfigBuilder::new()
            .endorsement_timeout(Duration::from_secs(10))
            .commit_policy(CommitPolicy::AnyHub)
            .endorsement_policy(EndorsementPolicy::BestEffort)
            .build();

        assert_eq!(config.endorsement_timeout, Duration::from_secs(10));
        assert_eq!(config.commit_policy, CommitPolicy::AnyHub);
        assert_eq!(config.endorsement_policy, EndorsementPolicy::BestEffort);
    }
}

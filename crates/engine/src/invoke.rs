//! Invocation service
//!
//! Drives the full client-side transaction flow against a session
//! context: build and sign the proposal, collect endorsements, validate
//! them, broadcast to the orderer, then wait for the commit event.
//! Within one invocation the phases are strictly ordered: endorsement
//! completes and validates before anything reaches the ordering
//! service, and commit correlation only consumes events after the
//! broadcast. The commit listener is registered just before the
//! broadcast so the event cannot be lost in the gap.
//!
//! Failures are never coerced into resolved statuses: every operation
//! either returns a terminal-success `InvocationStatus` or the one
//! specific `EngineError` kind that ended it.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use fabric_types::{
    ChaincodeCall, ChaincodeDeploy, InvocationStatus, TransactionEnvelope,
};

use crate::config::EngineConfig;
use crate::context::SessionContext;
use crate::endorse::EndorsementCollector;
use crate::error::{EngineError, Result};
use crate::events::CommitOutcome;
use crate::submit::TransactionSubmitter;
use crate::validate::ResponseValidator;

pub struct InvocationService {
    config: EngineConfig,
    collector: EndorsementCollector,
    submitter: TransactionSubmitter,
}

impl InvocationService {
    pub fn new(config: EngineConfig) -> Self {
        let collector = EndorsementCollector::new(config.endorsement_policy);
        let submitter = TransactionSubmitter::new(config.submission_timeout);
        Self {
            config,
            collector,
            submitter,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Invoke chaincode and wait for it to commit, bounded by the
    /// configured default deadline.
    pub async fn invoke(
        &self,
        ctx: &SessionContext,
        call: ChaincodeCall,
    ) -> Result<InvocationStatus> {
        self.invoke_with_deadline(ctx, call, self.config.commit_timeout)
            .await
    }

    /// Invoke chaincode and wait for it to commit.
    ///
    /// `deadline` spans the whole operation; whatever the endorsement
    /// and submission phases consume is subtracted from the time spent
    /// waiting for the commit event.
    pub async fn invoke_with_deadline(
        &self,
        ctx: &SessionContext,
        call: ChaincodeCall,
        deadline: Duration,
    ) -> Result<InvocationStatus> {
        ctx.ensure_active()?;
        let mut status = InvocationStatus::new(ctx.new_transaction_id());
        self.execute(
            ctx,
            call,
            None,
            None,
            self.config.endorsement_timeout,
            deadline,
            &mut status,
        )
        .await?;
        Ok(status)
    }

    /// Instantiate (or upgrade) chaincode on the channel: the invoke
    /// flow with the endorsement policy and package path carried in the
    /// proposal and the longer deploy endorsement timeout.
    pub async fn instantiate(
        &self,
        ctx: &SessionContext,
        deploy: ChaincodeDeploy,
        deadline: Duration,
    ) -> Result<InvocationStatus> {
        ctx.ensure_active()?;
        let kind = if deploy.upgrade { "upgrade" } else { "instantiate" };
        info!(
            "Starting {} of {} on channel {}",
            kind, deploy.call.chaincode, ctx.channel()
        );

        let mut status = InvocationStatus::new(ctx.new_transaction_id());
        self.execute(
            ctx,
            deploy.call,
            deploy.endorsement_policy,
            deploy.path,
            self.config.deploy_endorsement_timeout,
            deadline,
            &mut status,
        )
        .await?;
        Ok(status)
    }

    /// Install a chaincode package on every peer of the context.
    ///
    /// Endorse-only: install proposals never reach the orderer, and
    /// peers return no comparable read/write set, so only the status of
    /// each response is checked.
    pub async fn install(&self, ctx: &SessionContext, deploy: ChaincodeDeploy) -> Result<()> {
        ctx.ensure_active()?;
        let tx_id = ctx.new_transaction_id();
        let chaincode = deploy.call.chaincode.clone();
        let proposal = ctx.build_proposal(tx_id.clone(), deploy.call, None, deploy.path);
        let signed = ctx.sign_proposal(proposal)?;

        let responses = self
            .collector
            .collect(&signed, ctx.peers(), self.config.deploy_endorsement_timeout)
            .await?;
        ResponseValidator::check_status(&tx_id, &responses)?;

        info!(
            "Installed {} on {} peers (tx {})",
            chaincode,
            responses.len(),
            tx_id
        );
        Ok(())
    }

    /// Query chaincode: endorse-only read with no ordering phase.
    /// All peers must return byte-identical payloads.
    pub async fn query(
        &self,
        ctx: &SessionContext,
        call: ChaincodeCall,
    ) -> Result<InvocationStatus> {
        ctx.ensure_active()?;
        let tx_id = ctx.new_transaction_id();
        let mut status = InvocationStatus::new(tx_id.clone());

        let proposal = ctx.build_proposal(tx_id.clone(), call, None, None);
        let signed = ctx.sign_proposal(proposal)?;

        let responses = self
            .collector
            .collect(&signed, ctx.peers(), self.config.endorsement_timeout)
            .await?;
        let payload = ResponseValidator::validate_query(&tx_id, &responses)?;
        status.mark_query_done(payload)?;

        Ok(status)
    }

    /// Run one full endorse -> validate -> submit -> correlate pass,
    /// recording progress in `status`.
    ///
    /// `status` is updated through every phase it reaches, so on error
    /// the caller can still observe how far the invocation got (e.g. a
    /// commit timeout leaves it in `ordered`).
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        ctx: &SessionContext,
        call: ChaincodeCall,
        endorsement_policy: Option<serde_json::Value>,
        chaincode_path: Option<String>,
        endorse_timeout: Duration,
        deadline: Duration,
        status: &mut InvocationStatus,
    ) -> Result<()> {
        ctx.ensure_active()?;
        let started = Instant::now();
        let tx_id = status.tx_id.clone();

        info!(
            "Invoking {}::{} as tx {} on channel {}",
            call.chaincode,
            call.fcn,
            tx_id,
            ctx.channel()
        );

        let proposal = ctx.build_proposal(tx_id.clone(), call, endorsement_policy, chaincode_path);
        let signed = ctx.sign_proposal(proposal)?;

        let responses = self
            .collector
            .collect(&signed, ctx.peers(), endorse_timeout)
            .await?;
        let validated = ResponseValidator::validate(&tx_id, responses)?;
        status.mark_endorsed(validated.payload().to_vec())?;

        // Register before broadcast; the commit event may arrive
        // immediately after the orderer accepts.
        let outcome_rx = ctx.correlator().register(tx_id.clone()).await?;

        let envelope = TransactionEnvelope {
            tx_id: tx_id.clone(),
            channel: ctx.channel().to_string(),
            endorsements: validated.into_inner(),
        };
        if let Err(e) = self.submitter.submit(ctx.orderer(), &envelope).await {
            ctx.correlator().unregister(&tx_id).await;
            return Err(e);
        }
        status.mark_ordered()?;

        let mut remaining = deadline.saturating_sub(started.elapsed());
        if remaining < self.config.min_commit_timeout {
            warn!(
                "Remaining commit deadline for tx {} is below the floor, using {:?}",
                tx_id, self.config.min_commit_timeout
            );
            remaining = self.config.min_commit_timeout;
        }

        match ctx.correlator().wait(&tx_id, outcome_rx, remaining).await {
            Ok(CommitOutcome::Valid { peer, block_number }) => {
                status.mark_valid()?;
                info!(
                    "Tx {} committed valid (peer {}, block {})",
                    tx_id, peer, block_number
                );
                Ok(())
            }
            Ok(CommitOutcome::Invalid { .. }) => {
                // wait() maps invalid outcomes to CommitInvalid.
                Err(EngineError::Internal(
                    "correlator returned unmapped invalid outcome".to_string(),
                ))
            }
            Err(e) => {
                if matches!(e, EngineError::CommitInvalid { .. }) {
                    status.mark_invalid()?;
                }
                Err(e)
            }
        }
    }
}

/// Builder for InvocationService
pub struct InvocationServiceBuilder {
    config: Option<EngineConfig>,
}

impl InvocationServiceBuilder {
    pub fn new() -> Self {
        Self { config: None }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> InvocationService {
        InvocationService::new(self.config.unwrap_or_default())
    }
}

impl Default for InvocationServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

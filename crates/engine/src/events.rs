//! Commit-event correlation.
//!
//! Bridges peer event streams and per-transaction completion signals.
//! Each attached hub gets a pump task that forwards its commit events
//! into a shared registry keyed by transaction id; callers register a
//! listener before broadcast and wait on the returned channel. A
//! registration resolves at most once: the entry is removed from the
//! registry before the outcome is sent, and every event arriving after
//! that is discarded.
//!
//! Registration state machine, terminal on first transition:
//!
//! ```text
//! subscribed -> committed-valid | committed-invalid | timed-out
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_channel::{bounded, Receiver, Sender};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use fabric_types::{CommitCode, CommitEvent, PeerId, TransactionId};

use crate::config::CommitPolicy;
use crate::error::{EngineError, Result};
use crate::transport::EventHub;

/// Terminal outcome of a commit registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The policy-required set of hubs reported VALID. `peer` is the
    /// hub whose report completed the set.
    Valid { peer: PeerId, block_number: u64 },
    Invalid { peer: PeerId, code: CommitCode },
}

struct Registration {
    outcome_tx: Sender<CommitOutcome>,
    /// Hubs still required to report VALID before the registration
    /// resolves (1 under `AnyHub`).
    remaining: usize,
    /// Hubs whose VALID report was already counted.
    seen: HashSet<PeerId>,
}

/// Correlates commit events from N peer event streams with pending
/// transaction registrations.
pub struct EventCorrelator {
    policy: CommitPolicy,
    hubs: RwLock<Vec<Arc<dyn EventHub>>>,
    registrations: Arc<RwLock<HashMap<TransactionId, Registration>>>,
    pumps: StdMutex<Vec<JoinHandle<()>>>,
}

impl EventCorrelator {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            policy,
            hubs: RwLock::new(Vec::new()),
            registrations: Arc::new(RwLock::new(HashMap::new())),
            pumps: StdMutex::new(Vec::new()),
        }
    }

    /// Connect a hub and start pumping its events into the registry.
    pub async fn attach_hub(&self, hub: Arc<dyn EventHub>) -> Result<()> {
        let peer = hub.peer();
        let rx = hub.connect().await.map_err(|e| EngineError::EventHub {
            peer: peer.clone(),
            source: e,
        })?;

        let registrations = Arc::clone(&self.registrations);
        let pump_peer = peer.clone();
        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                Self::dispatch(&registrations, event).await;
            }
            debug!("Event stream from {} closed", pump_peer);
        });

        self.pumps
            .lock()
            .expect("pump registry poisoned")
            .push(handle);
        self.hubs.write().await.push(hub);

        info!("Attached event hub for peer {}", peer);
        Ok(())
    }

    /// Register a commit listener for `tx_id`.
    ///
    /// Must happen before the transaction is broadcast so the commit
    /// event cannot be missed. Duplicate registration is rejected: a
    /// transaction id is never reused, so a second listener for the
    /// same id indicates a caller bug.
    pub async fn register(&self, tx_id: TransactionId) -> Result<Receiver<CommitOutcome>> {
        let hub_count = self.hubs.read().await.len();
        if hub_count == 0 {
            return Err(EngineError::Config(
                "cannot register commit listener: no event hubs attached".to_string(),
            ));
        }

        let expected = match self.policy {
            CommitPolicy::AllHubs => hub_count,
            CommitPolicy::AnyHub => 1,
        };

        {
            let registrations = self.registrations.read().await;
            if registrations.contains_key(&tx_id) {
                return Err(EngineError::ListenerExists(tx_id));
            }
        }

        // Terminal outcome fits in one slot; the sender fires at most once.
        let (outcome_tx, outcome_rx) = bounded(1);

        let mut registrations = self.registrations.write().await;
        // Double-check after acquiring the write lock.
        if registrations.contains_key(&tx_id) {
            return Err(EngineError::ListenerExists(tx_id));
        }
        registrations.insert(
            tx_id.clone(),
            Registration {
                outcome_tx,
                remaining: expected,
                seen: HashSet::new(),
            },
        );

        debug!(
            "Registered commit listener for tx {} (awaiting {} of {} hubs)",
            tx_id, expected, hub_count
        );
        Ok(outcome_rx)
    }

    /// Remove a pending registration. Idempotent: the entry may already
    /// have resolved and been removed.
    pub async fn unregister(&self, tx_id: &TransactionId) {
        let mut registrations = self.registrations.write().await;
        if registrations.remove(tx_id).is_some() {
            debug!("Unregistered commit listener for tx {}", tx_id);
        }
    }

    /// Wait for the terminal outcome of a registration, bounded by
    /// `deadline`. On expiry the registration is explicitly removed so
    /// it cannot leak into later operations.
    pub async fn wait(
        &self,
        tx_id: &TransactionId,
        outcome_rx: Receiver<CommitOutcome>,
        deadline: Duration,
    ) -> Result<CommitOutcome> {
        match timeout(deadline, outcome_rx.recv()).await {
            Ok(Ok(CommitOutcome::Invalid { peer, code })) => Err(EngineError::CommitInvalid {
                tx_id: tx_id.clone(),
                peer,
                code,
            }),
            Ok(Ok(outcome)) => Ok(outcome),
            // Channel dropped without an outcome: the correlator shut down.
            Ok(Err(_)) => Err(EngineError::SessionReleased),
            Err(_) => {
                self.unregister(tx_id).await;
                Err(EngineError::CommitTimeout {
                    tx_id: tx_id.clone(),
                    deadline,
                })
            }
        }
    }

    /// Route one commit event to its registration, if any.
    async fn dispatch(
        registrations: &RwLock<HashMap<TransactionId, Registration>>,
        event: CommitEvent,
    ) {
        let mut registrations = registrations.write().await;

        let Some(entry) = registrations.get_mut(&event.tx_id) else {
            debug!(
                "Discarding commit event for tx {} from {} (no listener)",
                event.tx_id, event.peer
            );
            return;
        };

        if !event.code.is_valid() {
            warn!(
                "Peer {} reported tx {} invalid: {}",
                event.peer, event.tx_id, event.code
            );
            // Remove first so the outcome fires at most once.
            if let Some(registration) = registrations.remove(&event.tx_id) {
                let _ = registration.outcome_tx.try_send(CommitOutcome::Invalid {
                    peer: event.peer,
                    code: event.code,
                });
            }
            return;
        }

        if !entry.seen.insert(event.peer.clone()) {
            debug!(
                "Duplicate VALID report for tx {} from {}",
                event.tx_id, event.peer
            );
            return;
        }

        entry.remaining = entry.remaining.saturating_sub(1);
        if entry.remaining > 0 {
            debug!(
                "Tx {} valid on {}, waiting for {} more hubs",
                event.tx_id, event.peer, entry.remaining
            );
            return;
        }

        if let Some(registration) = registrations.remove(&event.tx_id) {
            let _ = registration.outcome_tx.try_send(CommitOutcome::Valid {
                peer: event.peer,
                block_number: event.block_number,
            });
        }
    }

    /// Number of registrations still awaiting an outcome.
    pub async fn pending_count(&self) -> usize {
        self.registrations.read().await.len()
    }

    pub async fn hub_count(&self) -> usize {
        self.hubs.read().await.len()
    }

    /// Stop all pump tasks and drop every pending registration.
    /// Waiters observe a closed channel and fail with `SessionReleased`.
    pub async fn shutdown(&self) {
        for handle in self
            .pumps
            .lock()
            .expect("pump registry poisoned")
            .drain(..)
        {
            handle.abort();
        }
        self.registrations.write().await.clear();
        self.hubs.write().await.clear();
        debug!("Event correlator shut down");
    }
}

impl Drop for EventCorrelator {
    fn drop(&mut self) {
        // Backstop so pump tasks never outlive the correlator.
        if let Ok(mut pumps) = self.pumps.lock() {
            for handle in pumps.drain(..) {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockHub {
        peer: PeerId,
        event_tx: Sender<CommitEvent>,
        event_rx: Receiver<CommitEvent>,
        connected: AtomicBool,
    }

    impl MockHub {
        fn new(peer: &str) -> Arc<Self> {
            let (event_tx, event_rx) = bounded(16);
            Arc::new(Self {
                peer: PeerId::from(peer),
                event_tx,
                event_rx,
                connected: AtomicBool::new(false),
            })
        }

        async fn emit(&self, tx_id: &TransactionId, code: CommitCode) {
            self.event_tx
                .send(CommitEvent {
                    tx_id: tx_id.clone(),
                    peer: self.peer.clone(),
                    code,
                    block_number: 42,
                })
                .await
                .unwrap();
        }
    }

    #[async_trait]
    impl EventHub for MockHub {
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

    async fn settle() {
        // Let pump tasks drain their channels.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn tx(name: &str) -> TransactionId {
        TransactionId::from(name)
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_at_most_once_with_concurrent_reports() {
        let correlator = EventCorrelator::new(CommitPolicy::AnyHub);
        let hub_a = MockHub::new("peer0");
        let hub_b = MockHub::new("peer1");
        correlator.attach_hub(hub_a.clone()).await.unwrap();
        correlator.attach_hub(hub_b.clone()).await.unwrap();

        let tx_id = tx("tx-once");
        let rx = correlator.register(tx_id.clone()).await.unwrap();

        hub_a.emit(&tx_id, CommitCode::Valid).await;
        hub_b.emit(&tx_id, CommitCode::Valid).await;
        settle().await;

        // Exactly one outcome; the channel closes after the first.
        assert!(matches!(rx.recv().await, Ok(CommitOutcome::Valid { .. })));
        assert!(rx.recv().await.is_err());
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn all_hubs_policy_waits_for_every_hub() {
        let correlator = EventCorrelator::new(CommitPolicy::AllHubs);
        let hub_a = MockHub::new("peer0");
        let hub_b = MockHub::new("peer1");
        correlator.attach_hub(hub_a.clone()).await.unwrap();
        correlator.attach_hub(hub_b.clone()).await.unwrap();

        let tx_id = tx("tx-all");
        let rx = correlator.register(tx_id.clone()).await.unwrap();

        hub_a.emit(&tx_id, CommitCode::Valid).await;
        settle().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(correlator.pending_count().await, 1);

        hub_b.emit(&tx_id, CommitCode::Valid).await;
        let outcome = correlator
            .wait(&tx_id, rx, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::Valid { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_valid_from_same_hub_is_not_double_counted() {
        let correlator = EventCorrelator::new(CommitPolicy::AllHubs);
        let hub_a = MockHub::new("peer0");
        let hub_b = MockHub::new("peer1");
        correlator.attach_hub(hub_a.clone()).await.unwrap();
        correlator.attach_hub(hub_b.clone()).await.unwrap();

        let tx_id = tx("tx-dup");
        let rx = correlator.register(tx_id.clone()).await.unwrap();

        hub_a.emit(&tx_id, CommitCode::Valid).await;
        hub_a.emit(&tx_id, CommitCode::Valid).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        hub_b.emit(&tx_id, CommitCode::Valid).await;
        settle().await;
        assert!(matches!(rx.try_recv(), Ok(CommitOutcome::Valid { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_code_resolves_immediately() {
        let correlator = EventCorrelator::new(CommitPolicy::AllHubs);
        let hub_a = MockHub::new("peer0");
        let hub_b = MockHub::new("peer1");
        correlator.attach_hub(hub_a.clone()).await.unwrap();
        correlator.attach_hub(hub_b.clone()).await.unwrap();

        let tx_id = tx("tx-bad");
        let rx = correlator.register(tx_id.clone()).await.unwrap();

        hub_a.emit(&tx_id, CommitCode::MvccReadConflict).await;

        let err = correlator
            .wait(&tx_id, rx, Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            EngineError::CommitInvalid { peer, code, .. } => {
                assert_eq!(peer, PeerId::from("peer0"));
                assert_eq!(code, CommitCode::MvccReadConflict);
            }
            other => panic!("expected CommitInvalid, got {other}"),
        }
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_removes_registration() {
        let correlator = EventCorrelator::new(CommitPolicy::AnyHub);
        let hub = MockHub::new("peer0");
        correlator.attach_hub(hub.clone()).await.unwrap();

        let tx_id = tx("tx-timeout");
        let rx = correlator.register(tx_id.clone()).await.unwrap();

        let err = correlator
            .wait(&tx_id, rx, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CommitTimeout { .. }));
        assert_eq!(correlator.pending_count().await, 0);

        // A late event for the expired registration is discarded.
        hub.emit(&tx_id, CommitCode::Valid).await;
        settle().await;
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let correlator = EventCorrelator::new(CommitPolicy::AnyHub);
        let hub = MockHub::new("peer0");
        correlator.attach_hub(hub).await.unwrap();

        let tx_id = tx("tx-twice");
        let _rx = correlator.register(tx_id.clone()).await.unwrap();
        let err = correlator.register(tx_id).await.unwrap_err();
        assert!(matches!(err, EngineError::ListenerExists(_)));
    }

    #[tokio::test]
    async fn registration_requires_a_hub() {
        let correlator = EventCorrelator::new(CommitPolicy::AllHubs);
        let err = correlator.register(tx("tx-nohub")).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn shutdown_fails_pending_waiters() {
        let correlator = EventCorrelator::new(CommitPolicy::AnyHub);
        let hub = MockHub::new("peer0");
        correlator.attach_hub(hub).await.unwrap();

        let tx_id = tx("tx-shutdown");
        let rx = correlator.register(tx_id.clone()).await.unwrap();
        correlator.shutdown().await;

        let err = correlator
            .wait(&tx_id, rx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionReleased));
        assert_eq!(correlator.pending_count().await, 0);
    }
}

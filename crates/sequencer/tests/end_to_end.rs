//! Batches driven through the native prover pool, with and without the service loop.
#![expect(unused_crate_dependencies, reason = "test dependencies")]

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use rollup_admission::RateLimiter;
use rollup_block_cache::BlockCache;
use rollup_codec::{Block, InnerProofData, RollupProofData};
use rollup_lock::{InMemoryLockStore, LockConfig, LockError, LockResult, LockStore, SequencerLock};
use rollup_primitives::{
    Address20, Buf32, Buf64, Clock, ManualClock, Nullifier, ProofKind, RollupId, RollupSize,
};
use rollup_proof_pipeline::{
    NativeProverHandle, NativeProverPool, PipelineConfig, ProofPipeline, RetryConfig,
    RootTransition, TxProof,
};
use rollup_publish_timer::PublishTimeManager;
use rollup_sequencer::{
    BatchDecision, InMemoryWorldState, LoggingPublisher, PendingTx, PublishError, PublishRequest,
    Publisher, RollupCoordinator, SequencerError, SequencerHandle, SequencerService,
    SequencerState, ServiceConfig, TxKind, TxSubmission, WorldState, WorldStateError,
};
use tokio::time;

/// Shortly after a 60s deadline.
const NOW_MS: u64 = 1_700_000_000_000;
const INTERVAL_SECS: u64 = 60;

fn submission(seed: u8, identifier: &str) -> TxSubmission {
    TxSubmission {
        identifier: identifier.to_owned(),
        kind: TxKind::Send,
        fee_asset: 0,
        fee_amount: 10,
        proof: TxProof {
            proof_data: vec![seed; 16],
            public_inputs: InnerProofData {
                public_input: Buf32::zero(),
                public_output: Buf32::zero(),
                new_note1: Buf64([seed; 64]),
                new_note2: Buf64([seed ^ 0xff; 64]),
                nullifier1: Nullifier::from(seed as u128),
                nullifier2: Nullifier::from(seed as u128 + 1_000),
                input_owner: Address20([seed; 20]),
                output_owner: Address20([seed; 20]),
            },
        },
        claim: None,
    }
}

/// Reports the first publication as indeterminate, then succeeds.
#[derive(Debug, Default)]
struct FlakyPublisher {
    failed: AtomicBool,
    inner: LoggingPublisher,
}

#[async_trait]
impl Publisher for FlakyPublisher {
    async fn publish(&self, request: PublishRequest) -> Result<Buf32, PublishError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(PublishError::Indeterminate {
                rollup_id: request.rollup_id,
                tx_hash: Some(Buf32([7; 32])),
                reason: "receipt timed out".to_owned(),
            });
        }
        self.inner.publish(request).await
    }
}

/// In-memory trees whose commit and discard can be made to fail once.
#[derive(Debug, Default)]
struct FaultyWorldState {
    inner: InMemoryWorldState,
    fail_commit: AtomicBool,
    fail_discard: AtomicBool,
}

impl FaultyWorldState {
    fn data_root(&self) -> Buf32 {
        self.inner.data_root()
    }
}

#[async_trait]
impl WorldState for FaultyWorldState {
    async fn stage_rollup(
        &self,
        rollup_id: RollupId,
        data_start_index: u32,
        txs: &[PendingTx],
    ) -> Result<RootTransition, WorldStateError> {
        self.inner
            .stage_rollup(rollup_id, data_start_index, txs)
            .await
    }

    async fn commit(&self, rollup_id: RollupId) -> Result<(), WorldStateError> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(WorldStateError::Backend("disk full".to_owned()));
        }
        self.inner.commit(rollup_id).await
    }

    async fn discard(&self, rollup_id: RollupId) -> Result<(), WorldStateError> {
        if self.fail_discard.swap(false, Ordering::SeqCst) {
            return Err(WorldStateError::Backend("disk full".to_owned()));
        }
        self.inner.discard(rollup_id).await
    }
}

/// Grants the lease to its first caller only and refuses every renewal.
#[derive(Debug, Default)]
struct RevokingLockStore {
    inner: InMemoryLockStore,
    granted: AtomicBool,
}

#[async_trait]
impl LockStore for RevokingLockStore {
    async fn acquire(&self, name: &str, owner: &str, ttl: Duration) -> LockResult<bool> {
        if self.granted.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.acquire(name, owner, ttl).await
    }

    async fn extend(&self, name: &str, owner: &str, _ttl: Duration) -> LockResult<()> {
        Err(LockError::NotHeld {
            name: name.to_owned(),
            owner: owner.to_owned(),
        })
    }

    async fn release(&self, name: &str, owner: &str) -> LockResult<()> {
        self.inner.release(name, owner).await
    }
}

struct Harness {
    prover: NativeProverHandle,
    coordinator: RollupCoordinator,
    world_state: Arc<FaultyWorldState>,
    blocks: Arc<BlockCache<Block>>,
    limiter: Arc<RateLimiter>,
    clock: Arc<ManualClock>,
    state: SequencerState,
}

impl Harness {
    fn new(publisher: Arc<dyn Publisher>) -> Self {
        let (prover, channels) = NativeProverPool::new(2).start();
        let pipeline = Arc::new(ProofPipeline::new(
            channels,
            PipelineConfig {
                max_in_flight: 4,
                retry: RetryConfig {
                    max_retries: 0,
                    base_delay_ms: 10,
                    multiplier: 2.0,
                    max_delay_ms: 100,
                },
            },
        ));
        let clock = Arc::new(ManualClock::new(NOW_MS));
        let world_state = Arc::new(FaultyWorldState::default());
        let blocks = Arc::new(BlockCache::new());
        let coordinator = RollupCoordinator::new(
            pipeline,
            world_state.clone(),
            publisher,
            blocks.clone(),
        )
        .with_clock(clock.clone());

        Self {
            prover,
            coordinator,
            world_state,
            blocks,
            limiter: Arc::new(RateLimiter::with_clock(100, clock.clone())),
            clock,
            state: SequencerState::new(RollupSize::new(2, 2), 0, 0),
        }
    }

    fn admit(&mut self, seeds: impl IntoIterator<Item = u8>) {
        for seed in seeds {
            let tx = PendingTx::new(submission(seed, "alice"), self.clock.now_millis());
            self.state.admit(tx, &self.limiter).unwrap();
        }
    }

    fn timer(&self) -> PublishTimeManager {
        PublishTimeManager::with_clock(INTERVAL_SECS, Vec::new(), self.clock.clone())
    }

    /// Hands the sequencer state over to a service polling every 100ms.
    fn service(&mut self, lock: SequencerLock) -> (SequencerService, SequencerHandle) {
        let state = mem::replace(
            &mut self.state,
            SequencerState::new(RollupSize::new(2, 2), 0, 0),
        );
        let (service, handle) = SequencerService::new(
            state,
            lock,
            self.coordinator.clone(),
            self.limiter.clone(),
            self.timer(),
            ServiceConfig {
                poll_interval: Duration::from_millis(100),
                command_buffer: 8,
            },
        );
        (service.with_clock(self.clock.clone()), handle)
    }
}

fn published_rollup(blocks: &BlockCache<Block>, index: usize) -> RollupProofData {
    let query = blocks.get_blocks(index, 1).unwrap();
    let block = query.results[0].as_ref().unwrap();
    RollupProofData::decode(&block.encoded_proof_data).unwrap()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn full_batches_advance_the_data_start_index() {
    let mut h = Harness::new(Arc::new(LoggingPublisher::new()));
    h.admit(1..=6);

    let decision = h.state.decide(h.timer().last_timeout());
    assert_eq!(decision, BatchDecision::CloseBySize);
    let batch = h.state.open_batch(decision).unwrap();
    let published = h.coordinator.process_batch(&mut h.state, batch).await.unwrap();
    assert_eq!(published.rollup_id, 0);
    assert_eq!(published.num_txs, 4);
    assert!(!published.forced);

    let rollup = published_rollup(&h.blocks, 0);
    assert_eq!(rollup.rollup_id, 0);
    assert_eq!(rollup.data_start_index, 0);
    assert_eq!(rollup.num_txs(), 4);
    assert_eq!(rollup.new_data_root, h.world_state.data_root());
    assert_eq!(h.state.next_data_start_index(), 8);

    // two leftovers only close once flushed
    assert_eq!(h.state.decide(h.timer().last_timeout()), BatchDecision::Wait);
    h.state.request_flush().unwrap();
    let batch = h.state.open_batch(BatchDecision::CloseByFlush).unwrap();
    let published = h.coordinator.process_batch(&mut h.state, batch).await.unwrap();
    assert!(published.forced);

    let rollup = published_rollup(&h.blocks, 1);
    assert_eq!(rollup.data_start_index, 8);
    assert_eq!(rollup.num_txs(), 2);
    assert_eq!(h.blocks.latest_index(), Some(1));
    // 2 tx rollups + root, then 1 tx rollup + root
    assert_eq!(h.prover.jobs_proved(), 5);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn stale_txs_close_by_timeout() {
    let mut h = Harness::new(Arc::new(LoggingPublisher::new()));
    h.admit([1]);
    assert_eq!(h.state.decide(h.timer().last_timeout()), BatchDecision::Wait);

    h.clock.advance(INTERVAL_SECS * 1000);
    assert_eq!(
        h.state.decide(h.timer().last_timeout()),
        BatchDecision::CloseByTimeout
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_proof_requeues_batch() {
    let mut h = Harness::new(Arc::new(LoggingPublisher::new()));
    h.admit(1..=4);
    let before: Vec<_> = h.state.pending().map(|tx| tx.id).collect();

    h.prover.fail_next(ProofKind::RootRollup, 1);
    let batch = h.state.open_batch(BatchDecision::CloseBySize).unwrap();
    let err = h.coordinator.process_batch(&mut h.state, batch).await.unwrap_err();
    assert!(matches!(err, SequencerError::ProofJobFailed(_)));

    let after: Vec<_> = h.state.pending().map(|tx| tx.id).collect();
    assert_eq!(before, after);
    assert_eq!(h.state.next_rollup_id(), 0);
    assert_eq!(h.world_state.data_root(), Buf32::zero());
    assert_eq!(h.blocks.latest_index(), None);

    // the same txs go through on the next attempt, under the same rollup id
    let batch = h.state.open_batch(BatchDecision::CloseBySize).unwrap();
    let published = h.coordinator.process_batch(&mut h.state, batch).await.unwrap();
    assert_eq!(published.rollup_id, 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn indeterminate_publish_parks_until_resolved() {
    let mut h = Harness::new(Arc::new(FlakyPublisher::default()));
    h.admit(1..=5);

    let batch = h.state.open_batch(BatchDecision::CloseBySize).unwrap();
    let err = h.coordinator.process_batch(&mut h.state, batch).await.unwrap_err();
    assert!(matches!(err, SequencerError::PublishFailed(_)));
    assert_eq!(h.state.unconfirmed().map(|u| u.batch.rollup_id), Some(0));

    // the leftover tx still accepts a flush, but nothing closes behind the parked rollup
    h.state.request_flush().unwrap();
    assert_eq!(h.state.decide(None), BatchDecision::Wait);
    assert!(matches!(
        h.state.open_batch(BatchDecision::CloseByFlush),
        Err(SequencerError::UnconfirmedBatch(0))
    ));

    let resolved = h
        .coordinator
        .resolve_unconfirmed(&mut h.state, true)
        .await
        .unwrap();
    assert_eq!(resolved, 0);
    assert_eq!(h.state.next_rollup_id(), 1);
    let query = h.blocks.get_blocks(0, 1).unwrap();
    let block = query.results[0].as_ref().unwrap();
    assert_eq!(block.tx_hash, Buf32([7; 32]));
    assert_ne!(h.world_state.data_root(), Buf32::zero());

    assert!(matches!(
        h.coordinator.resolve_unconfirmed(&mut h.state, true).await,
        Err(SequencerError::NoUnconfirmedBatch)
    ));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_discard_keeps_the_rollup_parked() {
    let mut h = Harness::new(Arc::new(FlakyPublisher::default()));
    h.admit(1..=5);

    let batch = h.state.open_batch(BatchDecision::CloseBySize).unwrap();
    h.coordinator
        .process_batch(&mut h.state, batch)
        .await
        .unwrap_err();
    assert_eq!(h.state.pending_len(), 1);

    h.world_state.fail_discard.store(true, Ordering::SeqCst);
    assert!(matches!(
        h.coordinator.resolve_unconfirmed(&mut h.state, false).await,
        Err(SequencerError::WorldState(_))
    ));
    assert_eq!(h.state.unconfirmed().map(|u| u.batch.rollup_id), Some(0));
    assert_eq!(h.state.pending_len(), 1);
    assert_eq!(h.state.next_rollup_id(), 0);

    // the retry discards and requeues the batch ahead of the leftover
    let resolved = h
        .coordinator
        .resolve_unconfirmed(&mut h.state, false)
        .await
        .unwrap();
    assert_eq!(resolved, 0);
    assert!(h.state.unconfirmed().is_none());
    assert_eq!(h.state.pending_len(), 5);
    assert_eq!(h.state.next_rollup_id(), 0);
    assert_eq!(h.world_state.data_root(), Buf32::zero());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unrecorded_publication_is_fatal() {
    let mut h = Harness::new(Arc::new(LoggingPublisher::new()));
    h.admit(1..=4);
    h.world_state.fail_commit.store(true, Ordering::SeqCst);

    let batch = h.state.open_batch(BatchDecision::CloseBySize).unwrap();
    let err = h.coordinator.process_batch(&mut h.state, batch).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, SequencerError::Unrecorded { rollup_id: 0, .. }));

    // the rollup is on chain, so its id and txs are spent
    assert_eq!(h.state.next_rollup_id(), 1);
    assert_eq!(h.state.next_data_start_index(), 8);
    assert_eq!(h.state.pending_len(), 0);
    assert_eq!(h.blocks.latest_index(), None);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn root_verifier_wraps_the_root_proof() {
    let mut h = Harness::new(Arc::new(LoggingPublisher::new()));
    h.coordinator = h.coordinator.clone().with_root_verifier(true);
    h.admit(1..=4);

    let batch = h.state.open_batch(BatchDecision::CloseBySize).unwrap();
    h.coordinator.process_batch(&mut h.state, batch).await.unwrap();
    // 2 tx rollups, root and verifier
    assert_eq!(h.prover.jobs_proved(), 4);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn service_publishes_through_the_handle() {
    let mut h = Harness::new(Arc::new(LoggingPublisher::new()));
    let store = Arc::new(InMemoryLockStore::new());
    let lock = SequencerLock::new("rollup", "replica-a", store.clone(), LockConfig::default());
    let (service, handle) = h.service(lock);
    let shutdown = service.shutdown_token();
    let task = tokio::spawn(service.run());

    let mut status = handle.subscribe_status();
    status.wait_for(|s| s.is_leader).await.unwrap();
    assert_eq!(store.owner("rollup").as_deref(), Some("replica-a"));

    let id = handle.submit_tx(submission(1, "alice")).await.unwrap();
    assert!(matches!(
        handle.submit_tx(submission(1, "alice")).await,
        Err(SequencerError::DuplicateTx(dup)) if dup == id
    ));
    handle.submit_tx(submission(2, "bob")).await.unwrap();

    time::sleep(Duration::from_millis(500)).await;
    let current = handle.get_status().await.unwrap();
    assert_eq!(current.pending_txs, 2);
    assert_eq!(current.last_published, None);

    handle.flush().await.unwrap();
    status
        .wait_for(|s| s.last_published == Some(0))
        .await
        .unwrap();
    assert_eq!(handle.latest_status().pending_txs, 0);
    assert_eq!(h.blocks.latest_index(), Some(0));

    // a flush with nothing pending is refused rather than left armed
    assert!(matches!(
        handle.flush().await,
        Err(SequencerError::NothingToClose)
    ));
    handle.submit_tx(submission(3, "carol")).await.unwrap();
    time::sleep(Duration::from_millis(500)).await;
    let current = handle.get_status().await.unwrap();
    assert_eq!(current.pending_txs, 1);
    assert_eq!(current.open_batch, None);
    assert_eq!(current.last_published, Some(0));

    shutdown.cancel();
    task.await.unwrap().unwrap();
    assert!(!handle.latest_status().is_leader);
    assert_eq!(store.owner("rollup"), None);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn standby_replica_refuses_txs() {
    let mut h = Harness::new(Arc::new(LoggingPublisher::new()));
    let store = Arc::new(InMemoryLockStore::new());

    let mut leader = SequencerLock::new("rollup", "replica-a", store.clone(), LockConfig::default());
    leader.lock().await.unwrap();

    let lock = SequencerLock::new("rollup", "replica-b", store, LockConfig::default());
    let (service, handle) = h.service(lock);
    let shutdown = service.shutdown_token();
    let task = tokio::spawn(service.run());

    assert!(matches!(
        handle.submit_tx(submission(1, "alice")).await,
        Err(SequencerError::NotLeader)
    ));
    assert!(!handle.get_status().await.unwrap().is_leader);

    shutdown.cancel();
    task.await.unwrap().unwrap();
    leader.unlock().await.unwrap();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lost_lease_steps_down_without_publishing() {
    let publisher = Arc::new(LoggingPublisher::new());
    let mut h = Harness::new(publisher.clone());
    let store = Arc::new(RevokingLockStore::default());
    let lock = SequencerLock::new("rollup", "replica-a", store, LockConfig::default());
    let (service, handle) = h.service(lock);
    let shutdown = service.shutdown_token();
    let task = tokio::spawn(service.run());

    let mut status = handle.subscribe_status();
    status.wait_for(|s| s.is_leader).await.unwrap();

    // the root proof outlives the first renewal
    h.prover
        .set_delay(ProofKind::RootRollup, Duration::from_secs(20));
    for seed in 1..=4 {
        handle
            .submit_tx(submission(seed, "alice"))
            .await
            .unwrap();
    }
    status.wait_for(|s| s.open_batch == Some(0)).await.unwrap();

    status
        .wait_for(|s| !s.is_leader && s.open_batch.is_none() && s.pending_txs == 4)
        .await
        .unwrap();
    assert_eq!(publisher.published(), 0);
    assert_eq!(h.blocks.latest_index(), None);
    assert_eq!(h.world_state.data_root(), Buf32::zero());
    assert!(matches!(
        handle.submit_tx(submission(5, "bob")).await,
        Err(SequencerError::NotLeader)
    ));

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unrecorded_publication_halts_the_service() {
    let mut h = Harness::new(Arc::new(LoggingPublisher::new()));
    h.world_state.fail_commit.store(true, Ordering::SeqCst);
    let store = Arc::new(InMemoryLockStore::new());
    let lock = SequencerLock::new("rollup", "replica-a", store.clone(), LockConfig::default());
    let (service, handle) = h.service(lock);
    let task = tokio::spawn(service.run());

    let mut status = handle.subscribe_status();
    status.wait_for(|s| s.is_leader).await.unwrap();
    for seed in 1..=4 {
        handle
            .submit_tx(submission(seed, "alice"))
            .await
            .unwrap();
    }

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, SequencerError::Unrecorded { rollup_id: 0, .. }));
    assert!(!handle.latest_status().is_leader);
    assert_eq!(store.owner("rollup"), None);
}

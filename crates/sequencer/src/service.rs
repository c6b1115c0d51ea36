//! The sequencer's main loop and the handle used to talk to it.

use std::{sync::Arc, time::Duration};

use futures::future::{BoxFuture, OptionFuture};
use rollup_admission::RateLimiter;
use rollup_lock::SequencerLock;
use rollup_primitives::{Clock, RollupId, SystemClock};
use rollup_publish_timer::{PublishTimeManager, RollupTimeout};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    coordinator::{BatchResult, RollupCoordinator},
    error::{SequencerError, SequencerResult},
    state::{RollupBatch, SequencerState},
    tx::{PendingTx, TxId, TxSubmission},
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_COMMAND_BUFFER: usize = 256;

type InFlightBatch = BoxFuture<'static, (RollupBatch, BatchResult)>;

/// Why the service stopped leading.
#[derive(Debug)]
enum LeadExit {
    Shutdown,
    /// The lease went stale; another replica may be leading already.
    LockLost,
    Failed(SequencerError),
}

/// Snapshot of the sequencer, refreshed after every state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerStatus {
    /// Whether this replica holds the sequencer lock.
    pub is_leader: bool,
    pub pending_txs: usize,
    pub next_rollup_id: RollupId,
    pub open_batch: Option<RollupId>,
    pub unconfirmed_batch: Option<RollupId>,
    pub last_published: Option<RollupId>,
    pub next_publish_timeout: Option<RollupTimeout>,
}

/// Requests handled by [`SequencerService`].
///
/// Each carries a [`oneshot::Sender`] for the reply.
#[derive(Debug)]
pub enum SequencerCommand {
    SubmitTx(Box<TxSubmission>, oneshot::Sender<SequencerResult<TxId>>),
    Flush(oneshot::Sender<SequencerResult<()>>),
    GetStatus(oneshot::Sender<SequencerStatus>),
    /// Settle the parked rollup; `true` if it landed on chain.
    ResolveUnconfirmed(bool, oneshot::Sender<SequencerResult<RollupId>>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    /// How often the close decision is re-evaluated.
    pub poll_interval: Duration,
    pub command_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// Handle for communication with the [`SequencerService`] task.
#[derive(Clone, Debug)]
pub struct SequencerHandle {
    tx: mpsc::Sender<SequencerCommand>,
    status: watch::Receiver<SequencerStatus>,
}

impl SequencerHandle {
    async fn request<R>(
        &self,
        build_request: impl FnOnce(oneshot::Sender<R>) -> SequencerCommand,
    ) -> SequencerResult<R> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build_request(tx))
            .await
            .map_err(|_| SequencerError::RequestChannelClosed)?;
        rx.await.map_err(|_| SequencerError::ResponseChannelClosed)
    }

    /// Admits a transaction into the pending set. Returns its id.
    pub async fn submit_tx(&self, submission: TxSubmission) -> SequencerResult<TxId> {
        self.request(|tx| SequencerCommand::SubmitTx(Box::new(submission), tx))
            .await?
    }

    /// Closes a batch from whatever is pending at the next evaluation. Fails with
    /// [`SequencerError::NothingToClose`] when nothing is pending.
    pub async fn flush(&self) -> SequencerResult<()> {
        self.request(SequencerCommand::Flush).await?
    }

    pub async fn get_status(&self) -> SequencerResult<SequencerStatus> {
        self.request(SequencerCommand::GetStatus).await
    }

    pub async fn resolve_unconfirmed(&self, landed: bool) -> SequencerResult<RollupId> {
        self.request(|tx| SequencerCommand::ResolveUnconfirmed(landed, tx))
            .await?
    }

    /// Last published status, without a round trip to the service.
    pub fn latest_status(&self) -> SequencerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SequencerStatus> {
        self.status.clone()
    }
}

/// Owns the [`SequencerState`] while holding the [`SequencerLock`].
///
/// Until the lock is acquired the service answers status requests and refuses everything
/// else. Once leading it admits txs, closes batches and runs at most one batch at a time
/// through the [`RollupCoordinator`]. Losing the lease sends it back to standby; a fatal
/// [`SequencerError`] stops it.
#[derive(Debug)]
pub struct SequencerService {
    state: SequencerState,
    lock: SequencerLock,
    coordinator: RollupCoordinator,
    limiter: Arc<RateLimiter>,
    timer: PublishTimeManager,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
    commands: mpsc::Receiver<SequencerCommand>,
    status: watch::Sender<SequencerStatus>,
    shutdown: CancellationToken,
}

impl SequencerService {
    pub fn new(
        state: SequencerState,
        lock: SequencerLock,
        coordinator: RollupCoordinator,
        limiter: Arc<RateLimiter>,
        timer: PublishTimeManager,
        config: ServiceConfig,
    ) -> (Self, SequencerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let initial = snapshot(&state, &timer, false);
        let (status_tx, status_rx) = watch::channel(initial);

        let service = Self {
            state,
            lock,
            coordinator,
            limiter,
            timer,
            clock: Arc::new(SystemClock),
            config,
            commands: cmd_rx,
            status: status_tx,
            shutdown: CancellationToken::new(),
        };
        let handle = SequencerHandle {
            tx: cmd_tx,
            status: status_rx,
        };
        (service, handle)
    }

    /// Clock stamping admitted txs.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cancelling the token makes [`Self::run`] finish the in-flight batch, release the lock
    /// and return.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[instrument(skip_all, fields(lock = %self.lock.name(), owner = %self.lock.owner()))]
    pub async fn run(mut self) -> SequencerResult<()> {
        loop {
            if !self.acquire_lock().await? {
                info!("sequencer stopped while standing by");
                return Ok(());
            }
            self.publish_status();
            info!("sequencer is leading");

            match self.lead().await {
                LeadExit::Shutdown => {
                    self.lock.unlock().await?;
                    self.publish_status();
                    info!("sequencer stopped");
                    return Ok(());
                }
                LeadExit::LockLost => {
                    warn!("sequencer lock lost, standing by");
                    self.step_down().await;
                }
                LeadExit::Failed(err) => {
                    error!(%err, "sequencer halted");
                    self.step_down().await;
                    return Err(err);
                }
            }
        }
    }

    async fn step_down(&mut self) {
        if let Err(err) = self.lock.unlock().await {
            warn!(%err, "failed to release sequencer lock");
        }
        self.publish_status();
    }

    /// Waits for the lock while answering commands as a standby replica. Returns `false` if
    /// shut down first.
    async fn acquire_lock(&mut self) -> SequencerResult<bool> {
        let Self {
            lock,
            commands,
            status,
            shutdown,
            ..
        } = self;

        let acquire = lock.lock();
        tokio::pin!(acquire);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(false),
                res = &mut acquire => {
                    res?;
                    return Ok(true);
                }
                cmd = commands.recv() => match cmd {
                    Some(cmd) => reply_standby(cmd, status),
                    None => return Ok(false),
                },
            }
        }
    }

    async fn lead(&mut self) -> LeadExit {
        let lease_lost = self.lock.lost_token();
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<InFlightBatch> = None;

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break LeadExit::Shutdown,
                _ = lease_lost.cancelled() => break LeadExit::LockLost,
                Some((batch, result)) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                    in_flight = None;
                    if let Err(err) = self.settle(batch, result).await {
                        break LeadExit::Failed(err);
                    }
                    ticker.reset_immediately();
                }
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => match self.handle_command(cmd).await {
                        Ok(true) => ticker.reset_immediately(),
                        Ok(false) => {}
                        Err(err) => break LeadExit::Failed(err),
                    },
                    None => {
                        info!("all sequencer handles dropped");
                        break LeadExit::Shutdown;
                    }
                },
                _ = ticker.tick() => {
                    if in_flight.is_none() {
                        in_flight = self.start_batch(&lease_lost);
                    }
                    self.publish_status();
                }
            }
        };

        // proof jobs are never abandoned mid-flight
        let Some(batch) = in_flight.take() else {
            return exit;
        };
        info!("waiting for the in-flight batch before stepping down");
        let (batch, result) = batch.await;
        match (exit, self.settle(batch, result).await) {
            (LeadExit::Failed(err), _) | (_, Err(err)) => LeadExit::Failed(err),
            (exit, Ok(())) => exit,
        }
    }

    /// Returns `true` when the close decision should be re-evaluated right away. Errors are
    /// fatal to the service.
    async fn handle_command(&mut self, cmd: SequencerCommand) -> SequencerResult<bool> {
        match cmd {
            SequencerCommand::SubmitTx(submission, reply) => {
                let tx = PendingTx::new(*submission, self.clock.now_millis());
                let res = self.state.admit(tx, &self.limiter);
                let full = self.state.pending_len() >= self.state.size().capacity() as usize;
                let _ = reply.send(res);
                self.publish_status();
                Ok(full)
            }
            SequencerCommand::Flush(reply) => {
                let res = self.state.request_flush();
                let close = res.is_ok();
                let _ = reply.send(res);
                Ok(close)
            }
            SequencerCommand::GetStatus(reply) => {
                let _ = reply.send(self.snapshot());
                Ok(false)
            }
            SequencerCommand::ResolveUnconfirmed(landed, reply) => {
                let res = self
                    .coordinator
                    .resolve_unconfirmed(&mut self.state, landed)
                    .await;
                self.publish_status();
                match res {
                    Err(err) if err.is_fatal() => {
                        let _ = reply.send(Err(SequencerError::Halted(err.to_string())));
                        Err(err)
                    }
                    res => {
                        let _ = reply.send(res);
                        Ok(true)
                    }
                }
            }
        }
    }

    fn start_batch(&mut self, lease_lost: &CancellationToken) -> Option<InFlightBatch> {
        let decision = self.state.decide(self.timer.last_timeout());
        if !decision.should_close() {
            trace!(pending = self.state.pending_len(), "batch not ready");
            return None;
        }

        let batch = match self.state.open_batch(decision) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(%err, "could not open batch");
                return None;
            }
        };
        self.publish_status();

        let coordinator = self.coordinator.clone();
        let lease_lost = lease_lost.clone();
        Some(Box::pin(async move {
            let result = coordinator.execute(&batch, &lease_lost).await;
            (batch, result)
        }))
    }

    /// Applies a finished batch. Only fatal errors are returned.
    async fn settle(&mut self, batch: RollupBatch, result: BatchResult) -> SequencerResult<()> {
        let res = self.coordinator.settle(&mut self.state, batch, result).await;
        self.publish_status();
        match res {
            Ok(published) => {
                debug!(
                    rollup_id = published.rollup_id,
                    forced = published.forced,
                    "batch settled"
                );
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(%err, "batch not published");
                Ok(())
            }
        }
    }

    fn snapshot(&self) -> SequencerStatus {
        snapshot(&self.state, &self.timer, self.lock.is_held())
    }

    fn publish_status(&self) {
        self.status.send_replace(self.snapshot());
    }
}

fn snapshot(state: &SequencerState, timer: &PublishTimeManager, is_leader: bool) -> SequencerStatus {
    SequencerStatus {
        is_leader,
        pending_txs: state.pending_len(),
        next_rollup_id: state.next_rollup_id(),
        open_batch: state.open_batch_id(),
        unconfirmed_batch: state.unconfirmed().map(|u| u.batch.rollup_id),
        last_published: state.last_published(),
        next_publish_timeout: timer.next_timeout(),
    }
}

fn reply_standby(cmd: SequencerCommand, status: &watch::Sender<SequencerStatus>) {
    match cmd {
        SequencerCommand::SubmitTx(_, reply) => {
            let _ = reply.send(Err(SequencerError::NotLeader));
        }
        SequencerCommand::Flush(reply) => {
            let _ = reply.send(Err(SequencerError::NotLeader));
        }
        SequencerCommand::GetStatus(reply) => {
            let _ = reply.send(status.borrow().clone());
        }
        SequencerCommand::ResolveUnconfirmed(_, reply) => {
            let _ = reply.send(Err(SequencerError::NotLeader));
        }
    }
}

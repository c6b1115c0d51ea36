use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use rollup_primitives::{ProofKind, RollupId};
use tokio::{
    sync::{mpsc, oneshot, Semaphore},
    task::JoinHandle,
    time,
};
use tracing::*;

use crate::{
    config::PipelineConfig,
    error::{PipelineError, PipelineResult},
    job::ProofJob,
    status::{JobStatus, StatusSummary},
    tracker::BatchJobTracker,
    transport::{ProofOutput, ProverChannels, ProverRequest, ProverResponse},
};

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<ProofOutput, String>>>>>;

#[derive(Debug)]
struct JobEntry {
    rollup_id: RollupId,
    status: JobStatus,
}

/// A completed job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofResult {
    pub correlation_id: u64,
    pub kind: ProofKind,
    pub output: ProofOutput,
}

/// Submits proof jobs to a prover pool and matches their results.
pub struct ProofPipeline {
    requests: mpsc::Sender<ProverRequest>,
    waiters: Waiters,
    statuses: Mutex<HashMap<u64, JobEntry>>,
    next_id: AtomicU64,
    permits: Semaphore,
    config: PipelineConfig,
    dispatcher: JoinHandle<()>,
}

impl fmt::Debug for ProofPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofPipeline")
            .field("config", &self.config)
            .field("waiting", &self.waiters.lock().len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl ProofPipeline {
    /// Wires the pipeline to a pool and spawns the response dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(channels: ProverChannels, config: PipelineConfig) -> Self {
        let waiters: Waiters = Arc::default();
        let dispatcher = tokio::spawn(dispatch_responses(channels.responses, waiters.clone()));

        Self {
            requests: channels.requests,
            waiters,
            statuses: Mutex::default(),
            next_id: AtomicU64::new(1),
            permits: Semaphore::new(config.max_in_flight.max(1)),
            config,
            dispatcher,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Submits a job once and waits for its result.
    #[instrument(skip_all, fields(kind = %job.kind(), rollup_id = job.rollup_id()))]
    pub async fn submit(&self, job: &ProofJob) -> PipelineResult<ProofResult> {
        let kind = job.kind();
        let frame = job.encode_frame()?;
        let correlation_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.statuses.lock().insert(
            correlation_id,
            JobEntry {
                rollup_id: job.rollup_id(),
                status: JobStatus::Pending,
            },
        );

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(self.fail_closed(correlation_id)),
        };

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(correlation_id, tx);

        let request = ProverRequest {
            correlation_id,
            frame,
        };
        if self.requests.send(request).await.is_err() {
            self.waiters.lock().remove(&correlation_id);
            return Err(self.fail_closed(correlation_id));
        }
        self.set_status(correlation_id, JobStatus::Proving);
        debug!(%correlation_id, "submitted proof job");

        match rx.await {
            Ok(Ok(output)) => {
                self.set_status(correlation_id, JobStatus::Completed);
                debug!(%correlation_id, "proof job completed");
                Ok(ProofResult {
                    correlation_id,
                    kind,
                    output,
                })
            }
            Ok(Err(reason)) => {
                warn!(%correlation_id, %reason, "proof job failed");
                self.set_status(
                    correlation_id,
                    JobStatus::Failed {
                        error: reason.clone(),
                    },
                );
                Err(PipelineError::JobFailed {
                    kind,
                    correlation_id,
                    reason,
                })
            }
            Err(_) => Err(self.fail_closed(correlation_id)),
        }
    }

    /// Submits a job, resubmitting the identical payload under a fresh correlation id while
    /// the failure is transient and the retry budget allows.
    pub async fn submit_with_retry(&self, job: &ProofJob) -> PipelineResult<ProofResult> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match self.submit(job).await {
                Ok(res) => return Ok(res),
                Err(err) if err.is_transient() && retry.should_retry(attempt) => {
                    let delay = retry.calculate_delay(attempt);
                    warn!(
                        kind = %job.kind(),
                        rollup_id = job.rollup_id(),
                        %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying proof job"
                    );
                    time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Submits a job of a batch after `tracker` has cleared its dependencies.
    ///
    /// Rejected jobs never reach the pool. The tracker is updated with the outcome once the
    /// job (including its retries) resolves.
    pub async fn submit_tracked(
        &self,
        tracker: &BatchJobTracker,
        job: &ProofJob,
    ) -> PipelineResult<ProofResult> {
        let kind = tracker.begin(job)?;
        let res = self.submit_with_retry(job).await;
        tracker.finish(kind, res.is_ok());
        res
    }

    pub fn job_status(&self, correlation_id: u64) -> Option<JobStatus> {
        self.statuses
            .lock()
            .get(&correlation_id)
            .map(|entry| entry.status.clone())
    }

    pub fn status_summary(&self) -> StatusSummary {
        StatusSummary::from_statuses(self.statuses.lock().values().map(|entry| &entry.status))
    }

    /// Forgets completed and failed jobs.
    pub fn clear_finished(&self) {
        self.statuses
            .lock()
            .retain(|_, entry| !entry.status.is_finished());
    }

    /// Forgets the finished jobs of one rollup, retries included. Called once the rollup's
    /// proving is over.
    pub fn forget_batch(&self, rollup_id: RollupId) {
        let mut statuses = self.statuses.lock();
        let before = statuses.len();
        statuses.retain(|_, entry| entry.rollup_id != rollup_id || !entry.status.is_finished());
        trace!(%rollup_id, forgotten = before - statuses.len(), "cleared job statuses");
    }

    fn set_status(&self, correlation_id: u64, status: JobStatus) {
        if let Some(entry) = self.statuses.lock().get_mut(&correlation_id) {
            entry.status = status;
        }
    }

    fn fail_closed(&self, correlation_id: u64) -> PipelineError {
        self.set_status(
            correlation_id,
            JobStatus::Failed {
                error: "prover pool unavailable".to_owned(),
            },
        );
        PipelineError::PoolClosed
    }
}

impl Drop for ProofPipeline {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Routes responses to their submitters until the pool closes its side.
async fn dispatch_responses(mut responses: mpsc::Receiver<ProverResponse>, waiters: Waiters) {
    while let Some(resp) = responses.recv().await {
        let waiter = waiters.lock().remove(&resp.correlation_id);
        match waiter {
            Some(tx) => {
                if tx.send(resp.result).is_err() {
                    debug!(correlation_id = resp.correlation_id, "submitter gone, dropping result");
                }
            }
            None => {
                warn!(correlation_id = resp.correlation_id, "dropping response for unknown job");
            }
        }
    }

    // Dropping the senders fails everyone still waiting.
    let orphaned = {
        let mut waiters = waiters.lock();
        let n = waiters.len();
        waiters.clear();
        n
    };
    info!(%orphaned, "prover response channel closed");
}

use parking_lot::Mutex;
use rollup_primitives::{ProofKind, RollupId};
use tracing::*;

use crate::{
    error::{PipelineError, PipelineResult},
    job::ProofJob,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Stage {
    NotSubmitted,
    Submitted,
    Completed,
    Failed,
}

#[derive(Debug)]
struct TrackerState {
    tx_outstanding: u32,
    tx_completed: u32,
    tx_failed: u32,
    claims_outstanding: u32,
    root: Stage,
    verifier: Stage,
}

/// Dependency gate for the jobs of one batch.
///
/// Tx rollups and claims are independent; at most `inners_per_root` tx rollups are
/// admitted. The root rollup is admitted once, after every
/// tx rollup has resolved successfully and either all `inners_per_root` completed or the
/// root is forced. The root verifier is admitted once, after the root completed.
#[derive(Debug)]
pub struct BatchJobTracker {
    rollup_id: RollupId,
    inners_per_root: u32,
    state: Mutex<TrackerState>,
}

impl BatchJobTracker {
    pub fn new(rollup_id: RollupId, inners_per_root: u32) -> Self {
        Self {
            rollup_id,
            inners_per_root,
            state: Mutex::new(TrackerState {
                tx_outstanding: 0,
                tx_completed: 0,
                tx_failed: 0,
                claims_outstanding: 0,
                root: Stage::NotSubmitted,
                verifier: Stage::NotSubmitted,
            }),
        }
    }

    pub fn rollup_id(&self) -> RollupId {
        self.rollup_id
    }

    /// Admits `job` or explains why its dependencies are not met.
    pub fn begin(&self, job: &ProofJob) -> PipelineResult<ProofKind> {
        if job.rollup_id() != self.rollup_id {
            return Err(PipelineError::WrongBatch {
                job: job.rollup_id(),
                tracker: self.rollup_id,
            });
        }

        let mut st = self.state.lock();
        match job {
            ProofJob::TxRollup(_) => {
                if st.root != Stage::NotSubmitted {
                    return Err(PipelineError::DuplicateStage {
                        kind: ProofKind::RootRollup,
                        rollup_id: self.rollup_id,
                    });
                }
                if st.tx_outstanding + st.tx_completed + st.tx_failed >= self.inners_per_root {
                    return Err(PipelineError::TooManyTxRollups {
                        rollup_id: self.rollup_id,
                        limit: self.inners_per_root,
                    });
                }
                st.tx_outstanding += 1;
            }
            ProofJob::Claim(_) => {
                st.claims_outstanding += 1;
            }
            ProofJob::RootRollup(root) => {
                if st.root != Stage::NotSubmitted {
                    return Err(PipelineError::DuplicateStage {
                        kind: ProofKind::RootRollup,
                        rollup_id: self.rollup_id,
                    });
                }
                let enough = st.tx_completed >= self.inners_per_root
                    || (root.forced && st.tx_completed > 0);
                if st.tx_outstanding > 0 || st.tx_failed > 0 || !enough {
                    return Err(PipelineError::RootNotReady {
                        rollup_id: self.rollup_id,
                        outstanding: st.tx_outstanding,
                        completed: st.tx_completed,
                        failed: st.tx_failed,
                        required: self.inners_per_root,
                    });
                }
                st.root = Stage::Submitted;
            }
            ProofJob::RootVerifier(_) => {
                if st.verifier != Stage::NotSubmitted {
                    return Err(PipelineError::DuplicateStage {
                        kind: ProofKind::RootVerifier,
                        rollup_id: self.rollup_id,
                    });
                }
                if st.root != Stage::Completed {
                    return Err(PipelineError::VerifierNotReady(self.rollup_id));
                }
                st.verifier = Stage::Submitted;
            }
        }

        trace!(rollup_id = self.rollup_id, kind = %job.kind(), "admitted job");
        Ok(job.kind())
    }

    /// Records the outcome of a job admitted by [`Self::begin`].
    pub fn finish(&self, kind: ProofKind, ok: bool) {
        let mut st = self.state.lock();
        let stage = if ok { Stage::Completed } else { Stage::Failed };
        match kind {
            ProofKind::TxRollup => {
                st.tx_outstanding = st.tx_outstanding.saturating_sub(1);
                if ok {
                    st.tx_completed += 1;
                } else {
                    st.tx_failed += 1;
                }
            }
            ProofKind::Claim => st.claims_outstanding = st.claims_outstanding.saturating_sub(1),
            ProofKind::RootRollup => st.root = stage,
            ProofKind::RootVerifier => st.verifier = stage,
        }
    }

    /// Whether no job of this batch is still in flight, so the batch may be abandoned.
    pub fn is_settled(&self) -> bool {
        let st = self.state.lock();
        st.tx_outstanding == 0
            && st.claims_outstanding == 0
            && st.root != Stage::Submitted
            && st.verifier != Stage::Submitted
    }

    pub fn completed_tx_rollups(&self) -> u32 {
        self.state.lock().tx_completed
    }
}

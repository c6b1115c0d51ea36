//! Error types for the proof pipeline

use rollup_codec::CodecError;
use rollup_primitives::{ProofKind, RollupId};
use thiserror::Error;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The prover reported an error for this job. Proving is a pure function of the job, so
    /// the same payload may be resubmitted.
    #[error("{kind} job {correlation_id} failed: {reason}")]
    JobFailed {
        kind: ProofKind,
        correlation_id: u64,
        reason: String,
    },

    /// Root rollup requested while tx rollups are outstanding or too few have completed.
    #[error(
        "root rollup {rollup_id} not ready: {outstanding} tx rollups outstanding, \
         {completed}/{required} completed, {failed} failed"
    )]
    RootNotReady {
        rollup_id: RollupId,
        outstanding: u32,
        completed: u32,
        failed: u32,
        required: u32,
    },

    /// More tx rollups than one root rollup aggregates.
    #[error("rollup {rollup_id} already has {limit} tx rollups")]
    TooManyTxRollups { rollup_id: RollupId, limit: u32 },

    /// Root verifier requested before its root rollup completed.
    #[error("root verifier for rollup {0} submitted before its root rollup completed")]
    VerifierNotReady(RollupId),

    /// A once-per-batch stage was submitted a second time.
    #[error("{kind} already submitted for rollup {rollup_id}")]
    DuplicateStage { kind: ProofKind, rollup_id: RollupId },

    /// Job belongs to a different batch than the tracker gating it.
    #[error("job for rollup {job} routed through tracker of rollup {tracker}")]
    WrongBatch { job: RollupId, tracker: RollupId },

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// The prover pool's channels are closed.
    #[error("prover pool unavailable")]
    PoolClosed,
}

impl PipelineError {
    /// Check if this error is transient (should retry)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::JobFailed { .. })
    }

    /// Proof kind the error concerns, where there is one.
    pub fn kind(&self) -> Option<ProofKind> {
        match self {
            Self::JobFailed { kind, .. } | Self::DuplicateStage { kind, .. } => Some(*kind),
            Self::RootNotReady { .. } => Some(ProofKind::RootRollup),
            Self::TooManyTxRollups { .. } => Some(ProofKind::TxRollup),
            Self::VerifierNotReady(_) => Some(ProofKind::RootVerifier),
            Self::WrongBatch { .. } | Self::Codec(_) | Self::PoolClosed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::JobFailed {
            kind: ProofKind::Claim,
            correlation_id: 12,
            reason: "witness missing".into(),
        };
        assert_eq!(err.to_string(), "claim job 12 failed: witness missing");

        let err = PipelineError::RootNotReady {
            rollup_id: 3,
            outstanding: 1,
            completed: 1,
            failed: 0,
            required: 2,
        };
        assert!(err.to_string().contains("1/2 completed"));
    }

    #[test]
    fn test_only_job_failures_are_transient() {
        let failed = PipelineError::JobFailed {
            kind: ProofKind::TxRollup,
            correlation_id: 1,
            reason: "oom".into(),
        };
        assert!(failed.is_transient());
        assert!(!PipelineError::PoolClosed.is_transient());
        assert!(!PipelineError::VerifierNotReady(1).is_transient());
        assert!(!PipelineError::Codec(CodecError::NonZeroPadding { field: "x" }).is_transient());
    }
}

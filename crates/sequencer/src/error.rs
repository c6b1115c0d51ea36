use rollup_block_cache::BlockCacheError;
use rollup_codec::CodecError;
use rollup_lock::LockError;
use rollup_primitives::RollupId;
use rollup_proof_pipeline::PipelineError;
use thiserror::Error;

use crate::{publisher::PublishError, tx::TxId, world_state::WorldStateError};

pub type SequencerResult<T> = Result<T, SequencerError>;

#[derive(Debug, Error)]
pub enum SequencerError {
    /// The identifier used up its daily quota. The tx was not stored.
    #[error("daily tx quota exceeded for {identifier}")]
    AdmissionRejected { identifier: String },

    #[error("tx {0} already pending")]
    DuplicateTx(TxId),

    /// This replica does not hold the sequencer lock.
    #[error("not the active sequencer")]
    NotLeader,

    #[error("rollup {0} is still being processed")]
    BatchInProgress(RollupId),

    /// A published rollup may have landed on chain and must be resolved first.
    #[error("rollup {0} has an unconfirmed publication")]
    UnconfirmedBatch(RollupId),

    #[error("no unconfirmed rollup to resolve")]
    NoUnconfirmedBatch,

    #[error("no pending txs to close a batch from")]
    NothingToClose,

    #[error("proof job failed: {0}")]
    ProofJobFailed(#[from] PipelineError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// The root proof's public inputs do not describe the batch that was submitted.
    #[error("rollup public inputs mismatch on {field}: expected {expected}, got {actual}")]
    RollupMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("publish failed: {0}")]
    PublishFailed(#[from] PublishError),

    #[error("world state: {0}")]
    WorldState(#[from] WorldStateError),

    #[error("block cache: {0}")]
    BlockCache(#[from] BlockCacheError),

    #[error("sequencer lock: {0}")]
    Lock(#[from] LockError),

    /// A rollup reached the chain but could not be recorded locally.
    #[error("rollup {rollup_id} published but not recorded: {source}")]
    Unrecorded {
        rollup_id: RollupId,
        source: Box<SequencerError>,
    },

    /// The service stopped after an unrecoverable error.
    #[error("sequencer halted: {0}")]
    Halted(String),

    #[error("sequencer request channel closed")]
    RequestChannelClosed,

    #[error("sequencer response channel closed")]
    ResponseChannelClosed,
}

impl SequencerError {
    /// Whether local state can no longer be trusted to match the chain. The service stops
    /// instead of opening further batches.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SequencerError::Unrecorded { .. })
    }
}

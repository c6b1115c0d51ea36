//! Batching state owned by the active sequencer.

use std::collections::{HashSet, VecDeque};

use rollup_admission::RateLimiter;
use rollup_primitives::{Buf32, RollupId, RollupSize, NOTES_PER_TX};
use rollup_publish_timer::RollupTimeout;
use tracing::*;

use crate::{
    error::{SequencerError, SequencerResult},
    tx::{BridgeClaim, PendingTx, TxId},
};

/// Whether the pending set should be closed into a batch now.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BatchDecision {
    /// Not eligible yet; poll again later.
    Wait,
    CloseBySize,
    /// The oldest pending tx predates the last publish deadline.
    CloseByTimeout,
    CloseByFlush,
}

impl BatchDecision {
    pub fn should_close(&self) -> bool {
        !matches!(self, BatchDecision::Wait)
    }

    /// Early closes may publish fewer inner proofs than a full root.
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            BatchDecision::CloseByTimeout | BatchDecision::CloseByFlush
        )
    }
}

/// Txs taken from the pending set to be proven and published as one rollup.
#[derive(Clone, Debug)]
pub struct RollupBatch {
    pub rollup_id: RollupId,
    pub data_start_index: u32,
    pub size: RollupSize,
    pub decision: BatchDecision,
    pub txs: Vec<PendingTx>,
}

impl RollupBatch {
    pub fn forced(&self) -> bool {
        self.decision.is_forced()
    }

    /// Txs grouped by tx rollup, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[PendingTx]> {
        self.txs.chunks(self.size.txs_per_inner.max(1) as usize)
    }

    /// Data tree index of the first note of chunk `inner_index`.
    pub fn chunk_data_start_index(&self, inner_index: u32) -> u32 {
        let per_chunk = self.size.txs_per_inner * NOTES_PER_TX;
        self.data_start_index + inner_index * per_chunk
    }

    pub fn claims(&self) -> impl Iterator<Item = &BridgeClaim> {
        self.txs.iter().filter_map(|tx| tx.claim.as_ref())
    }
}

/// A batch whose publication may or may not have landed on chain.
#[derive(Clone, Debug)]
pub struct UnconfirmedRollup {
    pub batch: RollupBatch,
    /// Hash of the submitted publication, if the publisher got that far.
    pub tx_hash: Option<Buf32>,
    pub encoded_proof_data: Vec<u8>,
}

/// The pending set, the open batch and the rollup counters.
///
/// Only the holder of the sequencer lock owns one of these.
#[derive(Debug)]
pub struct SequencerState {
    size: RollupSize,
    pending: VecDeque<PendingTx>,
    /// Ids of every tx not yet published: pending, in the open batch or unconfirmed.
    known: HashSet<TxId>,
    open_batch: Option<RollupId>,
    unconfirmed: Option<UnconfirmedRollup>,
    flush_requested: bool,
    next_rollup_id: RollupId,
    next_data_start_index: u32,
    last_published: Option<RollupId>,
}

impl SequencerState {
    pub fn new(size: RollupSize, next_rollup_id: RollupId, next_data_start_index: u32) -> Self {
        Self {
            size,
            pending: VecDeque::new(),
            known: HashSet::new(),
            open_batch: None,
            unconfirmed: None,
            flush_requested: false,
            next_rollup_id,
            next_data_start_index,
            last_published: next_rollup_id.checked_sub(1),
        }
    }

    pub fn size(&self) -> RollupSize {
        self.size
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingTx> {
        self.pending.iter()
    }

    pub fn next_rollup_id(&self) -> RollupId {
        self.next_rollup_id
    }

    pub fn next_data_start_index(&self) -> u32 {
        self.next_data_start_index
    }

    pub fn open_batch_id(&self) -> Option<RollupId> {
        self.open_batch
    }

    pub fn unconfirmed(&self) -> Option<&UnconfirmedRollup> {
        self.unconfirmed.as_ref()
    }

    pub fn last_published(&self) -> Option<RollupId> {
        self.last_published
    }

    /// Charges the tx to its identifier's quota and queues it.
    pub fn admit(&mut self, tx: PendingTx, limiter: &RateLimiter) -> SequencerResult<TxId> {
        if self.known.contains(&tx.id) {
            return Err(SequencerError::DuplicateTx(tx.id));
        }
        if !limiter.admit(&tx.identifier, 1) {
            return Err(SequencerError::AdmissionRejected {
                identifier: tx.identifier,
            });
        }

        let id = tx.id;
        debug!(%id, identifier = %tx.identifier, pending = self.pending.len() + 1, "admitted tx");
        self.known.insert(id);
        self.pending.push_back(tx);
        Ok(id)
    }

    /// Closes the next batch regardless of size or deadline.
    ///
    /// Refused with [`SequencerError::NothingToClose`] while no tx is pending, so a flush
    /// never carries over to txs that arrive later.
    pub fn request_flush(&mut self) -> SequencerResult<()> {
        if self.pending.is_empty() {
            return Err(SequencerError::NothingToClose);
        }
        self.flush_requested = true;
        Ok(())
    }

    pub fn decide(&self, last_timeout: Option<RollupTimeout>) -> BatchDecision {
        if self.open_batch.is_some() || self.unconfirmed.is_some() || self.pending.is_empty() {
            return BatchDecision::Wait;
        }

        if self.pending.len() >= self.size.capacity() as usize {
            return BatchDecision::CloseBySize;
        }

        let oldest = self.pending.iter().map(|tx| tx.received_at_ms).min();
        if let (Some(timeout), Some(oldest)) = (last_timeout, oldest) {
            if oldest < timeout.timeout_ms {
                return BatchDecision::CloseByTimeout;
            }
        }

        if self.flush_requested {
            return BatchDecision::CloseByFlush;
        }

        BatchDecision::Wait
    }

    /// Moves up to one batch worth of txs, oldest first, into a new batch.
    pub fn open_batch(&mut self, decision: BatchDecision) -> SequencerResult<RollupBatch> {
        if let Some(id) = self.open_batch {
            return Err(SequencerError::BatchInProgress(id));
        }
        if let Some(unconfirmed) = &self.unconfirmed {
            return Err(SequencerError::UnconfirmedBatch(unconfirmed.batch.rollup_id));
        }
        if !decision.should_close() || self.pending.is_empty() {
            return Err(SequencerError::NothingToClose);
        }

        let take = self.pending.len().min(self.size.capacity() as usize);
        let txs: Vec<_> = self.pending.drain(..take).collect();
        let batch = RollupBatch {
            rollup_id: self.next_rollup_id,
            data_start_index: self.next_data_start_index,
            size: self.size,
            decision,
            txs,
        };

        self.flush_requested = false;
        self.open_batch = Some(batch.rollup_id);
        info!(
            rollup_id = batch.rollup_id,
            data_start_index = batch.data_start_index,
            txs = batch.txs.len(),
            ?decision,
            "opened rollup batch"
        );
        Ok(batch)
    }

    /// Records that `batch` was published.
    pub fn complete_batch(&mut self, batch: &RollupBatch) {
        self.finalize(batch);
        self.open_batch = None;
    }

    /// Returns the batch's txs to the front of the pending set, in their original order.
    pub fn abort_batch(&mut self, batch: RollupBatch) {
        warn!(
            rollup_id = batch.rollup_id,
            txs = batch.txs.len(),
            "aborting rollup batch"
        );
        self.requeue(batch.txs);
        self.open_batch = None;
    }

    /// Parks a batch whose publication outcome is unknown. No new batch opens until it is
    /// resolved.
    pub fn park_unconfirmed(&mut self, unconfirmed: UnconfirmedRollup) {
        warn!(
            rollup_id = unconfirmed.batch.rollup_id,
            tx_hash = ?unconfirmed.tx_hash,
            "rollup publication unconfirmed"
        );
        self.open_batch = None;
        self.unconfirmed = Some(unconfirmed);
    }

    /// Settles the parked batch: counted as published if it `landed`, otherwise its txs are
    /// requeued to be proven again.
    pub fn resolve_unconfirmed(&mut self, landed: bool) -> SequencerResult<UnconfirmedRollup> {
        let unconfirmed = self
            .unconfirmed
            .take()
            .ok_or(SequencerError::NoUnconfirmedBatch)?;

        if landed {
            self.finalize(&unconfirmed.batch);
        } else {
            self.requeue(unconfirmed.batch.txs.clone());
        }
        info!(
            rollup_id = unconfirmed.batch.rollup_id,
            landed, "resolved unconfirmed rollup"
        );
        Ok(unconfirmed)
    }

    fn finalize(&mut self, batch: &RollupBatch) {
        for tx in &batch.txs {
            self.known.remove(&tx.id);
        }
        self.last_published = Some(batch.rollup_id);
        self.next_rollup_id = batch.rollup_id + 1;
        self.next_data_start_index = batch.data_start_index + self.size.data_leaves();
    }

    fn requeue(&mut self, txs: Vec<PendingTx>) {
        for tx in txs.into_iter().rev() {
            self.pending.push_front(tx);
        }
    }
}

//! Drives one batch through the proof stages and onto the chain.

use std::sync::Arc;

use futures::{future::join_all, join};
use rollup_block_cache::BlockCache;
use rollup_codec::{Block, RollupProofData};
use rollup_primitives::{Buf32, Clock, RollupId, SystemClock};
use rollup_proof_pipeline::{
    BatchJobTracker, ClaimJob, InnerRollupProof, ProofJob, ProofPipeline, RootRollupJob,
    RootVerifierJob, TxRollupJob,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    error::{SequencerError, SequencerResult},
    publisher::{PublishError, PublishRequest, Publisher},
    state::{RollupBatch, SequencerState, UnconfirmedRollup},
    world_state::WorldState,
};

/// A rollup that made it on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedRollup {
    pub rollup_id: RollupId,
    pub tx_hash: Buf32,
    pub num_txs: usize,
    pub forced: bool,
}

/// How far a batch got, before the outcome is applied to the [`SequencerState`].
#[derive(Debug)]
pub enum BatchResult {
    Published {
        tx_hash: Buf32,
        encoded_proof_data: Vec<u8>,
    },
    /// Nothing reached the chain; the txs can be proven again.
    Failed(SequencerError),
    /// The publication may have landed.
    Unconfirmed {
        tx_hash: Option<Buf32>,
        encoded_proof_data: Vec<u8>,
        error: PublishError,
    },
}

#[derive(Debug)]
struct ProvenRollup {
    encoded_proof_data: Vec<u8>,
    proof: Vec<u8>,
}

/// Proves batches through the [`ProofPipeline`] and hands them to the [`Publisher`].
#[derive(Clone, Debug)]
pub struct RollupCoordinator {
    pipeline: Arc<ProofPipeline>,
    world_state: Arc<dyn WorldState>,
    publisher: Arc<dyn Publisher>,
    blocks: Arc<BlockCache<Block>>,
    clock: Arc<dyn Clock>,
    use_root_verifier: bool,
}

impl RollupCoordinator {
    pub fn new(
        pipeline: Arc<ProofPipeline>,
        world_state: Arc<dyn WorldState>,
        publisher: Arc<dyn Publisher>,
        blocks: Arc<BlockCache<Block>>,
    ) -> Self {
        Self {
            pipeline,
            world_state,
            publisher,
            blocks,
            clock: Arc::new(SystemClock),
            use_root_verifier: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Compress root proofs with a root verifier proof before publishing.
    pub fn with_root_verifier(mut self, enabled: bool) -> Self {
        self.use_root_verifier = enabled;
        self
    }

    pub fn blocks(&self) -> &Arc<BlockCache<Block>> {
        &self.blocks
    }

    pub fn pipeline(&self) -> &Arc<ProofPipeline> {
        &self.pipeline
    }

    /// Proves and publishes `batch`, then applies the outcome to `state`.
    pub async fn process_batch(
        &self,
        state: &mut SequencerState,
        batch: RollupBatch,
    ) -> SequencerResult<PublishedRollup> {
        let result = self.execute(&batch, &CancellationToken::new()).await;
        self.settle(state, batch, result).await
    }

    /// Proves and publishes `batch` without touching the sequencer state.
    ///
    /// Only returns once every proof job of the batch has resolved. Nothing is published
    /// once `lease_lost` is cancelled.
    #[instrument(skip_all, fields(rollup_id = batch.rollup_id, txs = batch.txs.len()))]
    pub async fn execute(
        &self,
        batch: &RollupBatch,
        lease_lost: &CancellationToken,
    ) -> BatchResult {
        let proven = self.prove(batch).await;
        self.pipeline.forget_batch(batch.rollup_id);
        let proven = match proven {
            Ok(proven) => proven,
            Err(err) => return BatchResult::Failed(err),
        };

        if lease_lost.is_cancelled() {
            warn!("sequencer lock lost while proving, not publishing");
            return BatchResult::Failed(SequencerError::NotLeader);
        }

        let request = PublishRequest {
            rollup_id: batch.rollup_id,
            encoded_proof_data: proven.encoded_proof_data.clone(),
            proof: proven.proof,
        };
        match self.publisher.publish(request).await {
            Ok(tx_hash) => BatchResult::Published {
                tx_hash,
                encoded_proof_data: proven.encoded_proof_data,
            },
            Err(error) if error.may_have_landed() => BatchResult::Unconfirmed {
                tx_hash: error.tx_hash(),
                encoded_proof_data: proven.encoded_proof_data,
                error,
            },
            Err(error) => BatchResult::Failed(error.into()),
        }
    }

    /// Applies the outcome of [`Self::execute`] to `state`.
    pub async fn settle(
        &self,
        state: &mut SequencerState,
        batch: RollupBatch,
        result: BatchResult,
    ) -> SequencerResult<PublishedRollup> {
        let rollup_id = batch.rollup_id;
        match result {
            BatchResult::Published {
                tx_hash,
                encoded_proof_data,
            } => {
                // on chain either way, so the counters move before local bookkeeping
                state.complete_batch(&batch);
                self.record_published(rollup_id, tx_hash, encoded_proof_data)
                    .await?;
                info!(%rollup_id, %tx_hash, txs = batch.txs.len(), "rollup published");
                Ok(PublishedRollup {
                    rollup_id,
                    tx_hash,
                    num_txs: batch.txs.len(),
                    forced: batch.forced(),
                })
            }
            BatchResult::Failed(err) => {
                warn!(%rollup_id, %err, "rollup batch failed");
                if let Err(discard_err) = self.world_state.discard(rollup_id).await {
                    // staging itself may be what failed
                    debug!(%rollup_id, %discard_err, "nothing staged to discard");
                }
                state.abort_batch(batch);
                Err(err)
            }
            BatchResult::Unconfirmed {
                tx_hash,
                encoded_proof_data,
                error,
            } => {
                error!(%rollup_id, %error, "rollup publication needs operator resolution");
                state.park_unconfirmed(UnconfirmedRollup {
                    batch,
                    tx_hash,
                    encoded_proof_data,
                });
                Err(error.into())
            }
        }
    }

    /// Settles the parked rollup once the operator knows whether it `landed`.
    pub async fn resolve_unconfirmed(
        &self,
        state: &mut SequencerState,
        landed: bool,
    ) -> SequencerResult<RollupId> {
        let rollup_id = state
            .unconfirmed()
            .ok_or(SequencerError::NoUnconfirmedBatch)?
            .batch
            .rollup_id;
        if !landed {
            self.world_state.discard(rollup_id).await?;
        }

        let unconfirmed = state.resolve_unconfirmed(landed)?;
        if landed {
            self.record_published(
                rollup_id,
                unconfirmed.tx_hash.unwrap_or_default(),
                unconfirmed.encoded_proof_data,
            )
            .await?;
        }
        Ok(rollup_id)
    }

    async fn prove(&self, batch: &RollupBatch) -> SequencerResult<ProvenRollup> {
        let rollup_id = batch.rollup_id;
        let transition = self
            .world_state
            .stage_rollup(rollup_id, batch.data_start_index, &batch.txs)
            .await?;

        let tx_jobs: Vec<_> = batch
            .chunks()
            .enumerate()
            .map(|(idx, chunk)| {
                let inner_index = idx as u32;
                ProofJob::TxRollup(TxRollupJob {
                    rollup_id,
                    inner_index,
                    data_start_index: batch.chunk_data_start_index(inner_index),
                    txs: chunk.iter().map(|tx| tx.proof.clone()).collect(),
                })
            })
            .collect();
        let claim_jobs: Vec<_> = batch
            .claims()
            .map(|claim| {
                ProofJob::Claim(ClaimJob {
                    rollup_id,
                    bridge_id: claim.bridge_id,
                    interaction_nonce: claim.interaction_nonce,
                    claim_data: claim.claim_data.clone(),
                })
            })
            .collect();

        let tracker = BatchJobTracker::new(rollup_id, batch.size.inners_per_root);
        debug!(
            tx_rollups = tx_jobs.len(),
            claims = claim_jobs.len(),
            "submitting first stage proofs"
        );
        let (tx_results, claim_results) = join!(
            join_all(
                tx_jobs
                    .iter()
                    .map(|job| self.pipeline.submit_tracked(&tracker, job))
            ),
            join_all(
                claim_jobs
                    .iter()
                    .map(|job| self.pipeline.submit_tracked(&tracker, job))
            ),
        );

        let mut inner_proofs = Vec::with_capacity(tx_results.len());
        for res in tx_results {
            let res = res?;
            inner_proofs.push(InnerRollupProof {
                proof: res.output.proof,
                public_inputs: res.output.public_inputs,
            });
        }
        for res in claim_results {
            res?;
        }

        let root_job = ProofJob::RootRollup(RootRollupJob {
            rollup_id,
            data_start_index: batch.data_start_index,
            forced: batch.forced(),
            transition,
            inner_proofs,
        });
        let root = self.pipeline.submit_tracked(&tracker, &root_job).await?;

        let rollup = RollupProofData::decode(&root.output.public_inputs)?;
        check_field("rollup_id", batch.rollup_id, rollup.rollup_id)?;
        check_field(
            "data_start_index",
            batch.data_start_index,
            rollup.data_start_index,
        )?;
        check_field("num_txs", batch.txs.len() as u64, rollup.num_txs() as u64)?;

        let proof = if self.use_root_verifier {
            let verifier_job = ProofJob::RootVerifier(RootVerifierJob {
                rollup_id,
                root_proof: root.output.proof,
                public_inputs: root.output.public_inputs,
            });
            self.pipeline
                .submit_tracked(&tracker, &verifier_job)
                .await?
                .output
                .proof
        } else {
            root.output.proof
        };

        Ok(ProvenRollup {
            encoded_proof_data: rollup.encode()?,
            proof,
        })
    }

    /// Commits the staged transition and caches the block of a rollup that is on chain.
    ///
    /// A failure here leaves local state behind the chain, see [`SequencerError::is_fatal`].
    async fn record_published(
        &self,
        rollup_id: RollupId,
        tx_hash: Buf32,
        encoded: Vec<u8>,
    ) -> SequencerResult<()> {
        let unrecorded = |source: SequencerError| {
            error!(%rollup_id, %source, "published rollup could not be recorded");
            SequencerError::Unrecorded {
                rollup_id,
                source: Box::new(source),
            }
        };

        self.world_state
            .commit(rollup_id)
            .await
            .map_err(|err| unrecorded(err.into()))?;

        let block = Block {
            rollup_id,
            mined_at_ms: self.clock.now_millis(),
            tx_hash,
            encoded_proof_data: encoded,
        };
        self.blocks
            .add_blocks(vec![block], rollup_id as usize)
            .map_err(|err| unrecorded(err.into()))
    }
}

fn check_field<T>(field: &'static str, expected: T, actual: T) -> SequencerResult<()>
where
    T: Into<u64> + PartialEq + Copy,
{
    if expected != actual {
        return Err(SequencerError::RollupMismatch {
            field,
            expected: expected.into(),
            actual: actual.into(),
        });
    }
    Ok(())
}

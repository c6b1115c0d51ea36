//! State tree roots a rollup transitions between.

use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use rollup_primitives::{Buf32, RollupId};
use rollup_proof_pipeline::RootTransition;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::*;

use crate::tx::PendingTx;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldStateError {
    #[error("rollup {staged} is already staged")]
    AlreadyStaged { staged: RollupId },

    #[error("rollup {0} is not staged")]
    NotStaged(RollupId),

    #[error("world state backend: {0}")]
    Backend(String),
}

/// The data, nullifier and data-roots trees.
///
/// A rollup is staged before proving and committed once it is published, or discarded if
/// the batch is aborted.
#[async_trait]
pub trait WorldState: Send + Sync + fmt::Debug + 'static {
    async fn stage_rollup(
        &self,
        rollup_id: RollupId,
        data_start_index: u32,
        txs: &[PendingTx],
    ) -> Result<RootTransition, WorldStateError>;

    async fn commit(&self, rollup_id: RollupId) -> Result<(), WorldStateError>;

    async fn discard(&self, rollup_id: RollupId) -> Result<(), WorldStateError>;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Roots {
    data: Buf32,
    null: Buf32,
    data_roots: Buf32,
}

#[derive(Debug, Default)]
struct Inner {
    roots: Roots,
    staged: Option<(RollupId, RootTransition)>,
}

/// Stand-in tree store that chains roots with SHA-256 instead of maintaining Merkle trees.
#[derive(Debug, Default)]
pub struct InMemoryWorldState {
    inner: Mutex<Inner>,
}

impl InMemoryWorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current committed data root.
    pub fn data_root(&self) -> Buf32 {
        self.inner.lock().roots.data
    }
}

#[async_trait]
impl WorldState for InMemoryWorldState {
    async fn stage_rollup(
        &self,
        rollup_id: RollupId,
        data_start_index: u32,
        txs: &[PendingTx],
    ) -> Result<RootTransition, WorldStateError> {
        let mut inner = self.inner.lock();
        if let Some((staged, _)) = inner.staged {
            if staged != rollup_id {
                return Err(WorldStateError::AlreadyStaged { staged });
            }
        }

        let old = inner.roots;
        let mut data = Sha256::new()
            .chain_update(old.data)
            .chain_update(data_start_index.to_be_bytes());
        let mut null = Sha256::new().chain_update(old.null);
        for tx in txs {
            let inputs = &tx.proof.public_inputs;
            data.update(inputs.new_note1);
            data.update(inputs.new_note2);
            null.update(inputs.nullifier1);
            null.update(inputs.nullifier2);
        }
        let new_data = Buf32(data.finalize().into());
        let new_null = Buf32(null.finalize().into());
        let new_data_roots = Buf32(
            Sha256::new()
                .chain_update(old.data_roots)
                .chain_update(new_data)
                .finalize()
                .into(),
        );

        let transition = RootTransition {
            old_data_root: old.data,
            new_data_root: new_data,
            old_null_root: old.null,
            new_null_root: new_null,
            old_data_roots_root: old.data_roots,
            new_data_roots_root: new_data_roots,
        };
        inner.staged = Some((rollup_id, transition));
        debug!(%rollup_id, new_data_root = %new_data, "staged rollup");
        Ok(transition)
    }

    async fn commit(&self, rollup_id: RollupId) -> Result<(), WorldStateError> {
        let mut inner = self.inner.lock();
        match inner.staged {
            Some((staged, transition)) if staged == rollup_id => {
                inner.roots = Roots {
                    data: transition.new_data_root,
                    null: transition.new_null_root,
                    data_roots: transition.new_data_roots_root,
                };
                inner.staged = None;
                Ok(())
            }
            _ => Err(WorldStateError::NotStaged(rollup_id)),
        }
    }

    async fn discard(&self, rollup_id: RollupId) -> Result<(), WorldStateError> {
        let mut inner = self.inner.lock();
        match inner.staged {
            Some((staged, _)) if staged == rollup_id => {
                inner.staged = None;
                Ok(())
            }
            _ => Err(WorldStateError::NotStaged(rollup_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::test_utils::pending;

    #[tokio::test]
    async fn test_stage_commit_chains_roots() {
        let ws = InMemoryWorldState::new();
        let txs = vec![pending(1, 0), pending(2, 0)];

        let first = ws.stage_rollup(0, 0, &txs).await.unwrap();
        assert_eq!(first.old_data_root, Buf32::zero());
        assert_ne!(first.new_data_root, first.old_data_root);
        assert_eq!(
            ws.stage_rollup(1, 8, &txs).await,
            Err(WorldStateError::AlreadyStaged { staged: 0 })
        );

        ws.commit(0).await.unwrap();
        assert_eq!(ws.data_root(), first.new_data_root);

        let second = ws.stage_rollup(1, 8, &txs).await.unwrap();
        assert_eq!(second.old_data_root, first.new_data_root);
        assert_eq!(second.old_null_root, first.new_null_root);
    }

    #[tokio::test]
    async fn test_discard_keeps_committed_roots() {
        let ws = InMemoryWorldState::new();
        let staged = ws.stage_rollup(0, 0, &[pending(1, 0)]).await.unwrap();
        ws.discard(0).await.unwrap();
        assert_eq!(ws.data_root(), Buf32::zero());
        assert_eq!(ws.commit(0).await, Err(WorldStateError::NotStaged(0)));

        // restaging the same rollup yields the same transition
        assert_eq!(ws.stage_rollup(0, 0, &[pending(1, 0)]).await.unwrap(), staged);
    }
}

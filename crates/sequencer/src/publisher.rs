//! Hand-off of finished rollups to the chain.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use rollup_primitives::{Buf32, RollupId};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::*;

/// A proven rollup ready for submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishRequest {
    pub rollup_id: RollupId,
    /// Encoded rollup public inputs.
    pub encoded_proof_data: Vec<u8>,
    /// Root proof, or root verifier proof when recursion is enabled.
    pub proof: Vec<u8>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Definitely not on chain; the batch may be proven and published again.
    #[error("rollup {rollup_id} not included: {reason}")]
    NotIncluded { rollup_id: RollupId, reason: String },

    /// May have landed on chain. Re-publishing could duplicate the rollup.
    #[error("rollup {rollup_id} publication indeterminate: {reason}")]
    Indeterminate {
        rollup_id: RollupId,
        tx_hash: Option<Buf32>,
        reason: String,
    },
}

impl PublishError {
    pub fn may_have_landed(&self) -> bool {
        matches!(self, PublishError::Indeterminate { .. })
    }

    /// Hash of the submitted transaction, when one was broadcast.
    pub fn tx_hash(&self) -> Option<Buf32> {
        match self {
            PublishError::Indeterminate { tx_hash, .. } => *tx_hash,
            PublishError::NotIncluded { .. } => None,
        }
    }
}

/// Submits rollups to the verifier contract.
#[async_trait]
pub trait Publisher: Send + Sync + fmt::Debug + 'static {
    /// Returns the hash of the transaction that included the rollup.
    async fn publish(&self, request: PublishRequest) -> Result<Buf32, PublishError>;
}

/// Publisher for local runs: logs the rollup and reports a hash of its payload.
#[derive(Debug, Default)]
pub struct LoggingPublisher {
    published: AtomicU64,
}

impl LoggingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn publish(&self, request: PublishRequest) -> Result<Buf32, PublishError> {
        let tx_hash = Buf32(
            Sha256::new()
                .chain_update(&request.encoded_proof_data)
                .chain_update(&request.proof)
                .finalize()
                .into(),
        );
        self.published.fetch_add(1, Ordering::Relaxed);
        info!(
            rollup_id = request.rollup_id,
            %tx_hash,
            payload_len = request.encoded_proof_data.len(),
            proof_len = request.proof.len(),
            "published rollup"
        );
        Ok(tx_hash)
    }
}

//! Transactions waiting to be rolled up.

use rollup_primitives::Buf32;
use rollup_proof_pipeline::TxProof;
use rollup_publish_timer::BridgeId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type TxId = Buf32;

/// What a client proof does. Only informs fee accounting and claims; the rollup circuits
/// treat every proof alike.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Deposit,
    Withdraw,
    Send,
    Account,
    DefiDeposit,
}

/// Settlement of a bridge interaction that must be proven alongside the rollup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeClaim {
    pub bridge_id: BridgeId,
    pub interaction_nonce: u32,
    pub claim_data: Vec<u8>,
}

/// A transaction as submitted by a client, before admission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSubmission {
    /// Identity the daily quota is charged to.
    pub identifier: String,
    pub kind: TxKind,
    pub fee_asset: u32,
    pub fee_amount: u64,
    pub proof: TxProof,
    #[serde(default)]
    pub claim: Option<BridgeClaim>,
}

/// An admitted transaction. Immutable once admitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTx {
    pub id: TxId,
    pub identifier: String,
    pub kind: TxKind,
    pub fee_asset: u32,
    pub fee_amount: u64,
    pub proof: TxProof,
    pub received_at_ms: u64,
    pub claim: Option<BridgeClaim>,
}

impl PendingTx {
    pub fn new(submission: TxSubmission, received_at_ms: u64) -> Self {
        Self {
            id: tx_id(&submission.proof),
            identifier: submission.identifier,
            kind: submission.kind,
            fee_asset: submission.fee_asset,
            fee_amount: submission.fee_amount,
            proof: submission.proof,
            received_at_ms,
            claim: submission.claim,
        }
    }
}

/// Ids are content addressed: the same proof resubmitted gets the same id.
pub fn tx_id(proof: &TxProof) -> TxId {
    let mut record = Vec::new();
    proof.public_inputs.write_to(&mut record);
    let digest = Sha256::new()
        .chain_update(&proof.proof_data)
        .chain_update(&record)
        .finalize();
    Buf32(digest.into())
}

//! Rollup public-input record exchanged with the verifier contract.
//!
//! Layout, all big-endian:
//!
//! ```text
//! header  := rollup_id u32 | data_start_index u32 | 6 x root (32) | num_txs u32
//! record  := public_input 32 | public_output 32 | new_note1 64 | new_note2 64
//!          | nullifier1 32 | nullifier2 32 | input_owner 32 | output_owner 32
//! rollup  := header | num_txs x record
//! ```

use rollup_primitives::{Address20, Buf32, Buf64, Nullifier, RollupId};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

fixed_layout! {
    /// Public inputs of one client transaction proof, as embedded in a rollup.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct InnerProofData {
        pub public_input: Buf32,
        pub public_output: Buf32,
        pub new_note1: Buf64,
        pub new_note2: Buf64,
        pub nullifier1: Nullifier,
        pub nullifier2: Nullifier,
        pub input_owner: Address20,
        pub output_owner: Address20,
    }
}

fixed_layout! {
    #[derive(Clone, Debug, PartialEq, Eq)]
    struct RollupHeader {
        rollup_id: u32,
        data_start_index: u32,
        old_data_root: Buf32,
        new_data_root: Buf32,
        old_null_root: Buf32,
        new_null_root: Buf32,
        old_data_roots_root: Buf32,
        new_data_roots_root: Buf32,
        num_txs: u32,
    }
}

/// Size of the fixed rollup header.
pub const ROLLUP_HEADER_SIZE: usize = RollupHeader::SIZE;

/// Size of one inner-proof record.
pub const INNER_PROOF_SIZE: usize = InnerProofData::SIZE;

/// Public inputs of a root rollup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupProofData {
    pub rollup_id: RollupId,
    pub data_start_index: u32,
    pub old_data_root: Buf32,
    pub new_data_root: Buf32,
    pub old_null_root: Buf32,
    pub new_null_root: Buf32,
    pub old_data_roots_root: Buf32,
    pub new_data_roots_root: Buf32,
    pub inner_proofs: Vec<InnerProofData>,
}

impl RollupProofData {
    pub fn num_txs(&self) -> usize {
        self.inner_proofs.len()
    }

    /// Exact encoded length for a rollup with `num_txs` inner proofs.
    pub fn encoded_len(num_txs: usize) -> Option<usize> {
        num_txs
            .checked_mul(INNER_PROOF_SIZE)?
            .checked_add(ROLLUP_HEADER_SIZE)
    }

    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let num_txs =
            u32::try_from(self.inner_proofs.len()).map_err(|_| CodecError::CountOverflow {
                what: "inner proof",
                count: self.inner_proofs.len(),
            })?;
        let len = Self::encoded_len(self.inner_proofs.len()).ok_or(
            CodecError::CountOverflow {
                what: "inner proof",
                count: self.inner_proofs.len(),
            },
        )?;

        let header = RollupHeader {
            rollup_id: self.rollup_id,
            data_start_index: self.data_start_index,
            old_data_root: self.old_data_root,
            new_data_root: self.new_data_root,
            old_null_root: self.old_null_root,
            new_null_root: self.new_null_root,
            old_data_roots_root: self.old_data_roots_root,
            new_data_roots_root: self.new_data_roots_root,
            num_txs,
        };

        let mut out = Vec::with_capacity(len);
        header.write_to(&mut out);
        for inner in &self.inner_proofs {
            inner.write_to(&mut out);
        }
        debug_assert_eq!(out.len(), len);

        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        if buf.len() < ROLLUP_HEADER_SIZE {
            return Err(CodecError::Truncated {
                what: "rollup header",
                needed: ROLLUP_HEADER_SIZE,
                available: buf.len(),
            });
        }

        let (header_bytes, body) = buf.split_at(ROLLUP_HEADER_SIZE);
        let header = RollupHeader::read_from(header_bytes)?;

        let expected = Self::encoded_len(header.num_txs as usize).ok_or(
            CodecError::CountOverflow {
                what: "inner proof",
                count: header.num_txs as usize,
            },
        )?;
        if buf.len() != expected {
            return Err(CodecError::LengthMismatch {
                num_txs: header.num_txs,
                expected,
                actual: buf.len(),
            });
        }

        let inner_proofs = body
            .chunks_exact(INNER_PROOF_SIZE)
            .map(InnerProofData::read_from)
            .collect::<CodecResult<Vec<_>>>()?;

        Ok(Self {
            rollup_id: header.rollup_id,
            data_start_index: header.data_start_index,
            old_data_root: header.old_data_root,
            new_data_root: header.new_data_root,
            old_null_root: header.old_null_root,
            new_null_root: header.new_null_root,
            old_data_roots_root: header.old_data_roots_root,
            new_data_roots_root: header.new_data_roots_root,
            inner_proofs,
        })
    }
}

//! Block distribution payload served to downstream consumers.
//!
//! ```text
//! response := latest_rollup_id i32 | count u32 | count x (len u32 | block)
//! block    := rollup_id u32 | mined_at_ms u64 | tx_hash 32 | proof_len u32 | proof
//! ```

use rollup_primitives::{Buf32, RollupId};
use serde::{Deserialize, Serialize};

use crate::{
    error::{CodecError, CodecResult},
    wire::{ByteReader, ByteWriter},
};

/// Fixed part of an encoded block: id, timestamp, tx hash and the proof length prefix.
const BLOCK_FIXED_SIZE: usize = 4 + 8 + 32 + 4;

/// A published rollup as distributed to followers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub rollup_id: RollupId,
    pub mined_at_ms: u64,
    pub tx_hash: Buf32,
    /// [`RollupProofData`](crate::RollupProofData) encoding of the rollup.
    pub encoded_proof_data: Vec<u8>,
}

impl Block {
    pub fn encoded_len(&self) -> usize {
        BLOCK_FIXED_SIZE + self.encoded_proof_data.len()
    }

    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut writer = ByteWriter::with_capacity(self.encoded_len());
        self.write(&mut writer)?;
        Ok(writer.into_vec())
    }

    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        let mut reader = ByteReader::new(buf);
        let block = Self::read(&mut reader)?;
        reader.finish("block")?;
        Ok(block)
    }

    fn write(&self, writer: &mut ByteWriter) -> CodecResult<()> {
        writer.put_u32(self.rollup_id);
        writer.put_u64(self.mined_at_ms);
        writer.put_slice(self.tx_hash.as_slice());
        writer.put_vec("encoded proof data", &self.encoded_proof_data)
    }

    fn read(reader: &mut ByteReader<'_>) -> CodecResult<Self> {
        let rollup_id = reader.read_u32("block rollup id")?;
        let mined_at_ms = reader.read_u64("block mined at")?;
        let tx_hash = Buf32(reader.read_array("block tx hash")?);
        let encoded_proof_data = reader.read_vec("encoded proof data")?.to_vec();
        Ok(Self {
            rollup_id,
            mined_at_ms,
            tx_hash,
            encoded_proof_data,
        })
    }
}

/// Response of the `getBlocks` distribution call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksResponse {
    /// Id of the newest published rollup, `-1` when nothing has been published.
    pub latest_rollup_id: i32,
    pub blocks: Vec<Block>,
}

impl GetBlocksResponse {
    pub fn empty() -> Self {
        Self {
            latest_rollup_id: -1,
            blocks: Vec::new(),
        }
    }

    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let count = u32::try_from(self.blocks.len()).map_err(|_| CodecError::CountOverflow {
            what: "block",
            count: self.blocks.len(),
        })?;

        let body: usize = self.blocks.iter().map(|b| 4 + b.encoded_len()).sum();
        let mut writer = ByteWriter::with_capacity(8 + body);
        writer.put_i32(self.latest_rollup_id);
        writer.put_u32(count);
        for block in &self.blocks {
            writer.put_vec("block", &block.encode()?)?;
        }

        Ok(writer.into_vec())
    }

    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        let mut reader = ByteReader::new(buf);
        let latest_rollup_id = reader.read_i32("latest rollup id")?;
        let count = reader.read_u32("block count")? as usize;

        // Each block carries at least its prefix and fixed part, so a count that cannot fit
        // in the remaining input is rejected before allocating.
        let min_needed = count.saturating_mul(4 + BLOCK_FIXED_SIZE);
        if min_needed > reader.remaining() {
            return Err(CodecError::Truncated {
                what: "blocks",
                needed: min_needed,
                available: reader.remaining(),
            });
        }

        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(Block::decode(reader.read_vec("block")?)?);
        }
        reader.finish("get blocks response")?;

        Ok(Self {
            latest_rollup_id,
            blocks,
        })
    }
}

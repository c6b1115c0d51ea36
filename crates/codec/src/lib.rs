//! Bit-exact binary codecs for the rollup's public inputs and the block distribution
//! payload.
//!
//! Every fixed-size record is declared once as a list of named, typed fields with
//! [`fixed_layout!`]; the encoder and decoder are both generated from that declaration so
//! offsets are never written by hand.

#[macro_use]
mod field;

mod blocks;
mod error;
mod rollup;
mod wire;

pub use blocks::{Block, GetBlocksResponse};
pub use error::{CodecError, CodecResult};
pub use field::FixedField;
pub use rollup::{InnerProofData, RollupProofData, INNER_PROOF_SIZE, ROLLUP_HEADER_SIZE};
pub use wire::{ByteReader, ByteWriter};

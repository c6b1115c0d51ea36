//! Collection of generic data types shared by the sequencer crates.

#[macro_use]
mod macros;

pub mod buf;
pub mod proof;
pub mod rollup;
pub mod time;

pub use buf::{Address20, Buf32, Buf64, Nullifier};
pub use proof::ProofKind;
pub use rollup::{RollupId, RollupSize, NOTES_PER_TX};
pub use time::{Clock, ManualClock, SystemClock};

//! Proof kinds produced by the proof-composition pipeline.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Kind of proof job handled by the prover pool.
///
/// The `u32` representation is the discriminant written on the wire in front of every
/// job request.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u32)]
pub enum ProofKind {
    /// Aggregates a fixed number of client transaction proofs.
    TxRollup = 0,
    /// Aggregates tx-rollup proofs into the published unit.
    RootRollup = 1,
    /// Settles an asynchronous bridge interaction back into a note.
    Claim = 2,
    /// Recursive compression of a root-rollup proof.
    RootVerifier = 3,
}

impl ProofKind {
    /// Wire discriminant.
    pub fn discriminant(self) -> u32 {
        self.into()
    }

    /// Short lowercase name, for logs and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ProofKind::TxRollup => "tx_rollup",
            ProofKind::RootRollup => "root_rollup",
            ProofKind::Claim => "claim",
            ProofKind::RootVerifier => "root_verifier",
        }
    }
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

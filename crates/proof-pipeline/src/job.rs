//! Proof job descriptors and their request framing.

use rollup_codec::{
    ByteReader, ByteWriter, CodecError, CodecResult, InnerProofData, RollupProofData,
    INNER_PROOF_SIZE,
};
use rollup_primitives::{Buf32, ProofKind, RollupId};
use serde::{Deserialize, Serialize};

/// An already-proven client transaction as fed into a tx rollup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxProof {
    pub proof_data: Vec<u8>,
    pub public_inputs: InnerProofData,
}

/// Aggregates one chunk of a batch's txs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxRollupJob {
    pub rollup_id: RollupId,
    /// Position of this chunk within the root rollup.
    pub inner_index: u32,
    pub data_start_index: u32,
    pub txs: Vec<TxProof>,
}

/// State roots before and after applying a rollup.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootTransition {
    pub old_data_root: Buf32,
    pub new_data_root: Buf32,
    pub old_null_root: Buf32,
    pub new_null_root: Buf32,
    pub old_data_roots_root: Buf32,
    pub new_data_roots_root: Buf32,
}

impl RootTransition {
    /// Assembles the rollup public inputs for this transition.
    pub fn to_rollup(
        &self,
        rollup_id: RollupId,
        data_start_index: u32,
        inner_proofs: Vec<InnerProofData>,
    ) -> RollupProofData {
        RollupProofData {
            rollup_id,
            data_start_index,
            old_data_root: self.old_data_root,
            new_data_root: self.new_data_root,
            old_null_root: self.old_null_root,
            new_null_root: self.new_null_root,
            old_data_roots_root: self.old_data_roots_root,
            new_data_roots_root: self.new_data_roots_root,
            inner_proofs,
        }
    }

    fn roots(&self) -> [&Buf32; 6] {
        [
            &self.old_data_root,
            &self.new_data_root,
            &self.old_null_root,
            &self.new_null_root,
            &self.old_data_roots_root,
            &self.new_data_roots_root,
        ]
    }

    fn write(&self, w: &mut ByteWriter) {
        for root in self.roots() {
            w.put_slice(root.as_slice());
        }
    }

    fn read(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            old_data_root: Buf32(r.read_array("old data root")?),
            new_data_root: Buf32(r.read_array("new data root")?),
            old_null_root: Buf32(r.read_array("old null root")?),
            new_null_root: Buf32(r.read_array("new null root")?),
            old_data_roots_root: Buf32(r.read_array("old data roots root")?),
            new_data_roots_root: Buf32(r.read_array("new data roots root")?),
        })
    }
}

/// Output of a completed tx rollup, referenced by the root rollup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerRollupProof {
    pub proof: Vec<u8>,
    /// Concatenated inner-proof records of the chunk's txs.
    pub public_inputs: Vec<u8>,
}

impl InnerRollupProof {
    /// Splits the public inputs back into per-tx records.
    pub fn inner_proofs(&self) -> CodecResult<Vec<InnerProofData>> {
        if self.public_inputs.len() % INNER_PROOF_SIZE != 0 {
            return Err(CodecError::TrailingBytes {
                what: "inner rollup public inputs",
                count: self.public_inputs.len() % INNER_PROOF_SIZE,
            });
        }
        self.public_inputs
            .chunks_exact(INNER_PROOF_SIZE)
            .map(InnerProofData::read_from)
            .collect()
    }
}

/// Aggregates the batch's tx rollups into the published proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootRollupJob {
    pub rollup_id: RollupId,
    pub data_start_index: u32,
    /// Set when the batch closed early (timeout or flush) and may hold fewer tx rollups
    /// than a full root.
    pub forced: bool,
    pub transition: RootTransition,
    pub inner_proofs: Vec<InnerRollupProof>,
}

/// Settles a bridge interaction's output back into a note.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimJob {
    pub rollup_id: RollupId,
    pub bridge_id: u64,
    pub interaction_nonce: u32,
    pub claim_data: Vec<u8>,
}

/// Recursively compresses a root rollup proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootVerifierJob {
    pub rollup_id: RollupId,
    pub root_proof: Vec<u8>,
    pub public_inputs: Vec<u8>,
}

/// A job for the prover pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofJob {
    TxRollup(TxRollupJob),
    RootRollup(RootRollupJob),
    Claim(ClaimJob),
    RootVerifier(RootVerifierJob),
}

impl ProofJob {
    pub fn kind(&self) -> ProofKind {
        match self {
            ProofJob::TxRollup(_) => ProofKind::TxRollup,
            ProofJob::RootRollup(_) => ProofKind::RootRollup,
            ProofJob::Claim(_) => ProofKind::Claim,
            ProofJob::RootVerifier(_) => ProofKind::RootVerifier,
        }
    }

    pub fn rollup_id(&self) -> RollupId {
        match self {
            ProofJob::TxRollup(j) => j.rollup_id,
            ProofJob::RootRollup(j) => j.rollup_id,
            ProofJob::Claim(j) => j.rollup_id,
            ProofJob::RootVerifier(j) => j.rollup_id,
        }
    }

    /// Encodes the request frame: kind discriminant followed by the payload.
    pub fn encode_frame(&self) -> CodecResult<Vec<u8>> {
        let mut w = ByteWriter::new();
        w.put_u32(self.kind().discriminant());

        match self {
            ProofJob::TxRollup(job) => {
                w.put_u32(job.rollup_id);
                w.put_u32(job.inner_index);
                w.put_u32(job.data_start_index);
                w.put_u32(count("tx", job.txs.len())?);
                let mut record = Vec::with_capacity(INNER_PROOF_SIZE);
                for tx in &job.txs {
                    w.put_vec("tx proof", &tx.proof_data)?;
                    record.clear();
                    tx.public_inputs.write_to(&mut record);
                    w.put_slice(&record);
                }
            }
            ProofJob::RootRollup(job) => {
                w.put_u32(job.rollup_id);
                w.put_u32(job.data_start_index);
                w.put_u32(job.forced as u32);
                job.transition.write(&mut w);
                w.put_u32(count("inner rollup", job.inner_proofs.len())?);
                for inner in &job.inner_proofs {
                    w.put_vec("inner rollup proof", &inner.proof)?;
                    w.put_vec("inner rollup public inputs", &inner.public_inputs)?;
                }
            }
            ProofJob::Claim(job) => {
                w.put_u32(job.rollup_id);
                w.put_u64(job.bridge_id);
                w.put_u32(job.interaction_nonce);
                w.put_vec("claim data", &job.claim_data)?;
            }
            ProofJob::RootVerifier(job) => {
                w.put_u32(job.rollup_id);
                w.put_vec("root proof", &job.root_proof)?;
                w.put_vec("root public inputs", &job.public_inputs)?;
            }
        }

        Ok(w.into_vec())
    }

    pub fn decode_frame(frame: &[u8]) -> CodecResult<Self> {
        let mut r = ByteReader::new(frame);
        let discriminant = r.read_u32("job kind")?;
        let kind =
            ProofKind::try_from(discriminant).map_err(|_| CodecError::UnknownDiscriminant {
                what: "proof kind",
                value: discriminant,
            })?;

        let job = match kind {
            ProofKind::TxRollup => {
                let rollup_id = r.read_u32("rollup id")?;
                let inner_index = r.read_u32("inner index")?;
                let data_start_index = r.read_u32("data start index")?;
                let n = r.read_u32("tx count")?;
                let mut txs = Vec::new();
                for _ in 0..n {
                    let proof_data = r.read_vec("tx proof")?.to_vec();
                    let public_inputs =
                        InnerProofData::read_from(r.read_bytes("tx public inputs", INNER_PROOF_SIZE)?)?;
                    txs.push(TxProof {
                        proof_data,
                        public_inputs,
                    });
                }
                ProofJob::TxRollup(TxRollupJob {
                    rollup_id,
                    inner_index,
                    data_start_index,
                    txs,
                })
            }
            ProofKind::RootRollup => {
                let rollup_id = r.read_u32("rollup id")?;
                let data_start_index = r.read_u32("data start index")?;
                let forced = match r.read_u32("forced flag")? {
                    0 => false,
                    1 => true,
                    value => {
                        return Err(CodecError::UnknownDiscriminant {
                            what: "forced flag",
                            value,
                        })
                    }
                };
                let transition = RootTransition::read(&mut r)?;
                let n = r.read_u32("inner rollup count")?;
                let mut inner_proofs = Vec::new();
                for _ in 0..n {
                    inner_proofs.push(InnerRollupProof {
                        proof: r.read_vec("inner rollup proof")?.to_vec(),
                        public_inputs: r.read_vec("inner rollup public inputs")?.to_vec(),
                    });
                }
                ProofJob::RootRollup(RootRollupJob {
                    rollup_id,
                    data_start_index,
                    forced,
                    transition,
                    inner_proofs,
                })
            }
            ProofKind::Claim => ProofJob::Claim(ClaimJob {
                rollup_id: r.read_u32("rollup id")?,
                bridge_id: r.read_u64("bridge id")?,
                interaction_nonce: r.read_u32("interaction nonce")?,
                claim_data: r.read_vec("claim data")?.to_vec(),
            }),
            ProofKind::RootVerifier => ProofJob::RootVerifier(RootVerifierJob {
                rollup_id: r.read_u32("rollup id")?,
                root_proof: r.read_vec("root proof")?.to_vec(),
                public_inputs: r.read_vec("root public inputs")?.to_vec(),
            }),
        };

        r.finish("proof job frame")?;
        Ok(job)
    }
}

fn count(what: &'static str, n: usize) -> CodecResult<u32> {
    u32::try_from(n).map_err(|_| CodecError::CountOverflow { what, count: n })
}

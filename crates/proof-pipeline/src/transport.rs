//! Message types exchanged with a prover pool.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A framed job addressed by the submitter's correlation id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProverRequest {
    pub correlation_id: u64,
    pub frame: Vec<u8>,
}

/// Proof bytes plus the public inputs they commit to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOutput {
    pub proof: Vec<u8>,
    pub public_inputs: Vec<u8>,
}

/// Result of one request, matched back by `correlation_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProverResponse {
    pub correlation_id: u64,
    pub result: Result<ProofOutput, String>,
}

/// Both ends of a prover pool as seen by the pipeline.
#[derive(Debug)]
pub struct ProverChannels {
    pub requests: mpsc::Sender<ProverRequest>,
    pub responses: mpsc::Receiver<ProverResponse>,
}

//! In-process prover pool.
//!
//! Workers decode request frames and answer with deterministic SHA-256 "proofs". Public
//! inputs are computed exactly as a real prover would expose them, so the root rollup's
//! output carries the encoded rollup public inputs.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use rollup_primitives::ProofKind;
use sha2::{Digest, Sha256};
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex},
    time,
};
use tracing::*;

use crate::{
    job::ProofJob,
    transport::{ProofOutput, ProverChannels, ProverRequest, ProverResponse},
};

#[derive(Debug, Default)]
struct Faults {
    fail_next: HashMap<ProofKind, u32>,
    delays: HashMap<ProofKind, Duration>,
}

/// Control handle over a running [`NativeProverPool`].
#[derive(Clone, Debug, Default)]
pub struct NativeProverHandle {
    faults: Arc<Mutex<Faults>>,
    proved: Arc<AtomicU64>,
}

impl NativeProverHandle {
    /// Makes the next `count` jobs of `kind` fail.
    pub fn fail_next(&self, kind: ProofKind, count: u32) {
        *self.faults.lock().fail_next.entry(kind).or_default() += count;
    }

    /// Delays every job of `kind` by `delay` before proving it.
    pub fn set_delay(&self, kind: ProofKind, delay: Duration) {
        self.faults.lock().delays.insert(kind, delay);
    }

    /// Number of jobs proved successfully so far.
    pub fn jobs_proved(&self) -> u64 {
        self.proved.load(Ordering::SeqCst)
    }

    fn delay_for(&self, kind: ProofKind) -> Option<Duration> {
        self.faults.lock().delays.get(&kind).copied()
    }

    fn take_failure(&self, kind: ProofKind) -> bool {
        let mut faults = self.faults.lock();
        match faults.fail_next.get_mut(&kind) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Worker pool proving jobs in-process.
#[derive(Clone, Debug)]
pub struct NativeProverPool {
    workers: usize,
    queue_depth: usize,
}

impl NativeProverPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_depth: 64,
        }
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth.max(1);
        self
    }

    /// Spawns the workers. The pool runs until the request sender is dropped.
    pub fn start(self) -> (NativeProverHandle, ProverChannels) {
        let (req_tx, req_rx) = mpsc::channel(self.queue_depth);
        let (resp_tx, resp_rx) = mpsc::channel(self.queue_depth);
        let req_rx = Arc::new(AsyncMutex::new(req_rx));
        let handle = NativeProverHandle::default();

        for worker in 0..self.workers {
            tokio::spawn(worker_task(
                worker,
                req_rx.clone(),
                resp_tx.clone(),
                handle.clone(),
            ));
        }
        info!(workers = self.workers, "started native prover pool");

        (
            handle,
            ProverChannels {
                requests: req_tx,
                responses: resp_rx,
            },
        )
    }
}

async fn worker_task(
    worker: usize,
    requests: Arc<AsyncMutex<mpsc::Receiver<ProverRequest>>>,
    responses: mpsc::Sender<ProverResponse>,
    handle: NativeProverHandle,
) {
    loop {
        let req = {
            let mut rx = requests.lock().await;
            rx.recv().await
        };
        let Some(req) = req else {
            debug!(%worker, "request channel closed, worker exiting");
            return;
        };

        let result = prove_request(&handle, &req.frame).await;
        if result.is_ok() {
            handle.proved.fetch_add(1, Ordering::SeqCst);
        }

        let resp = ProverResponse {
            correlation_id: req.correlation_id,
            result,
        };
        if responses.send(resp).await.is_err() {
            debug!(%worker, "response channel closed, worker exiting");
            return;
        }
    }
}

async fn prove_request(handle: &NativeProverHandle, frame: &[u8]) -> Result<ProofOutput, String> {
    let job = ProofJob::decode_frame(frame).map_err(|e| format!("invalid job frame: {e}"))?;
    let kind = job.kind();

    if let Some(delay) = handle.delay_for(kind) {
        time::sleep(delay).await;
    }
    if handle.take_failure(kind) {
        return Err(format!("injected {kind} failure"));
    }

    let output = prove(&job, frame)?;
    trace!(%kind, rollup_id = job.rollup_id(), "proved job");
    Ok(output)
}

/// Computes the stand-in proof and the real public inputs of `job`.
fn prove(job: &ProofJob, frame: &[u8]) -> Result<ProofOutput, String> {
    let public_inputs = match job {
        ProofJob::TxRollup(j) => {
            let mut out = Vec::new();
            for tx in &j.txs {
                tx.public_inputs.write_to(&mut out);
            }
            out
        }
        ProofJob::RootRollup(j) => {
            let mut inner = Vec::new();
            for proof in &j.inner_proofs {
                inner.extend(proof.inner_proofs().map_err(|e| e.to_string())?);
            }
            j.transition
                .to_rollup(j.rollup_id, j.data_start_index, inner)
                .encode()
                .map_err(|e| e.to_string())?
        }
        ProofJob::Claim(j) => {
            let mut out = Vec::with_capacity(4 + 8 + 32);
            out.extend_from_slice(&j.interaction_nonce.to_be_bytes());
            out.extend_from_slice(&j.bridge_id.to_be_bytes());
            out.extend_from_slice(&Sha256::digest(&j.claim_data));
            out
        }
        ProofJob::RootVerifier(j) => j.public_inputs.clone(),
    };

    let proof = Sha256::new()
        .chain_update(job.kind().as_str())
        .chain_update(frame)
        .finalize()
        .to_vec();

    Ok(ProofOutput {
        proof,
        public_inputs,
    })
}

//! Dependency-ordered proof job pipeline.
//!
//! Jobs are framed as `[u32 BE kind discriminant][payload]` and sent with a correlation id to
//! a prover pool over a channel pair. A dispatcher task matches responses back to the
//! waiting submitters, so independent jobs may complete in any order.
//!
//! The pieces:
//!
//! - [`ProofJob`]: tagged union of the four job kinds and their wire encoding
//! - [`ProofPipeline`]: submission, retry and in-flight bounding
//! - [`BatchJobTracker`]: per-batch dependency gate between the stages
//! - [`NativeProverPool`]: in-process pool producing hash-based stand-in proofs

mod config;
mod error;
mod job;
mod native;
mod pipeline;
mod status;
mod tracker;
mod transport;

pub use config::{PipelineConfig, RetryConfig};
pub use error::{PipelineError, PipelineResult};
pub use job::{
    ClaimJob, InnerRollupProof, ProofJob, RootRollupJob, RootTransition, RootVerifierJob,
    TxProof, TxRollupJob,
};
pub use native::{NativeProverHandle, NativeProverPool};
pub use pipeline::{ProofPipeline, ProofResult};
pub use status::{JobStatus, StatusSummary};
pub use tracker::BatchJobTracker;
pub use transport::{ProofOutput, ProverChannels, ProverRequest, ProverResponse};

//! Rollup sequencer core.
//!
//! Admits txs into a pending set, closes batches by size, publish deadline or explicit flush,
//! then proves each batch through the proof pipeline and hands it to a [`Publisher`]. Only the
//! replica holding the sequencer lock does any of this.
//!
//! [`SequencerState`] holds the batching rules and is driven synchronously;
//! [`RollupCoordinator`] runs the async proving and publishing of a single batch;
//! [`SequencerService`] ties both to the lock and exposes a [`SequencerHandle`].

mod coordinator;
mod error;
mod publisher;
mod service;
mod state;
mod tx;
mod world_state;

pub use coordinator::{BatchResult, PublishedRollup, RollupCoordinator};
pub use error::{SequencerError, SequencerResult};
pub use publisher::{LoggingPublisher, PublishError, PublishRequest, Publisher};
pub use service::{
    SequencerCommand, SequencerHandle, SequencerService, SequencerStatus, ServiceConfig,
};
pub use state::{BatchDecision, RollupBatch, SequencerState, UnconfirmedRollup};
pub use tx::{tx_id, BridgeClaim, PendingTx, TxId, TxKind, TxSubmission};
pub use world_state::{InMemoryWorldState, WorldState, WorldStateError};

//! Distributed mutual exclusion for the sequencer.
//!
//! Exactly one replica may hold the sequencer lock at a time. The holder keeps its lease
//! alive with a heartbeat task; replicas that fail to acquire poll at a fixed interval.

mod error;
mod lock;
mod store;

pub use error::{LockError, LockResult};
pub use lock::{LockConfig, LockState, SequencerLock};
pub use store::{InMemoryLockStore, LockStore};

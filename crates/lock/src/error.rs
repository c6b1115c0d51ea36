use thiserror::Error;

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    /// The lease is not (or no longer) owned by the caller.
    #[error("lock {name} not held by {owner}")]
    NotHeld { name: String, owner: String },

    #[error("lock {0} is already held by this instance")]
    AlreadyHeld(String),

    /// The backing store failed; callers treat this as transient.
    #[error("lock store: {0}")]
    Store(String),
}

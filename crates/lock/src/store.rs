use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{LockError, LockResult};

/// Backing store for named, expiring leases.
///
/// `acquire` must be atomic acquire-if-absent: of any number of concurrent callers for the
/// same free name exactly one gets `true`.
#[async_trait]
pub trait LockStore: Send + Sync + fmt::Debug + 'static {
    /// Takes the lease for `ttl` if it is free or expired. Returns whether it was taken.
    async fn acquire(&self, name: &str, owner: &str, ttl: Duration) -> LockResult<bool>;

    /// Pushes the expiry of a lease `owner` still holds to `now + ttl`.
    async fn extend(&self, name: &str, owner: &str, ttl: Duration) -> LockResult<()>;

    /// Drops the lease if `owner` holds it.
    async fn release(&self, name: &str, owner: &str) -> LockResult<()>;
}

#[derive(Clone, Debug)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

/// Process-local lock store, sufficient for single-host deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current live owner of `name`, if any.
    pub fn owner(&self, name: &str) -> Option<String> {
        let leases = self.leases.lock();
        leases
            .get(name)
            .filter(|l| l.expires_at > Instant::now())
            .map(|l| l.owner.clone())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn acquire(&self, name: &str, owner: &str, ttl: Duration) -> LockResult<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get(name) {
            if lease.expires_at > now && lease.owner != owner {
                return Ok(false);
            }
        }
        leases.insert(
            name.to_owned(),
            Lease {
                owner: owner.to_owned(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn extend(&self, name: &str, owner: &str, ttl: Duration) -> LockResult<()> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        match leases.get_mut(name) {
            Some(lease) if lease.owner == owner && lease.expires_at > now => {
                lease.expires_at = now + ttl;
                Ok(())
            }
            _ => Err(LockError::NotHeld {
                name: name.to_owned(),
                owner: owner.to_owned(),
            }),
        }
    }

    async fn release(&self, name: &str, owner: &str) -> LockResult<()> {
        let mut leases = self.leases.lock();
        if leases.get(name).is_some_and(|l| l.owner == owner) {
            leases.remove(name);
        }
        Ok(())
    }
}

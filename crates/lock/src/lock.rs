use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    error::{LockError, LockResult},
    store::LockStore,
};

/// Lease timings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LockConfig {
    /// Lease length requested on acquire and on every renewal.
    pub lease_timeout: Duration,
    /// Constant pause between failed acquire attempts.
    pub retry_interval: Duration,
    /// Pause between lease renewals. Must be shorter than `lease_timeout`.
    pub ping_interval: Duration,
    /// Waiting longer than this to acquire raises an operator alert.
    pub alert_after: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(30),
            retry_interval: Duration::from_secs(1),
            ping_interval: Duration::from_secs(10),
            alert_after: Duration::from_secs(300),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Acquiring,
    Held,
    /// The lease could not be renewed and may already belong to another replica.
    Lost,
}

#[derive(Debug)]
struct Heartbeat {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Named lease held by one sequencer replica at a time.
pub struct SequencerLock {
    name: String,
    owner: String,
    store: Arc<dyn LockStore>,
    config: LockConfig,
    state: LockState,
    generation: Arc<AtomicU64>,
    heartbeat: Option<Heartbeat>,
    lost: CancellationToken,
}

impl fmt::Debug for SequencerLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequencerLock")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("state", &self.state)
            .field("generation", &self.generation())
            .finish()
    }
}

impl SequencerLock {
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        store: Arc<dyn LockStore>,
        config: LockConfig,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            store,
            config,
            state: LockState::Unlocked,
            generation: Arc::new(AtomicU64::new(0)),
            heartbeat: None,
            lost: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn state(&self) -> LockState {
        if self.state == LockState::Held && self.lost.is_cancelled() {
            return LockState::Lost;
        }
        self.state
    }

    pub fn is_held(&self) -> bool {
        self.state() == LockState::Held
    }

    /// Cancelled once the current lease stops being renewed. Each successful [`Self::lock`]
    /// arms a new token.
    pub fn lost_token(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Bumped on every unlock; heartbeats started under an older value are stale.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Waits until the lease is acquired, then starts renewing it.
    ///
    /// Store errors while acquiring are logged and retried like a busy lock.
    #[instrument(skip(self), fields(name = %self.name, owner = %self.owner))]
    pub async fn lock(&mut self) -> LockResult<()> {
        match self.state() {
            LockState::Held => return Err(LockError::AlreadyHeld(self.name.clone())),
            LockState::Lost => self.unlock().await?,
            LockState::Unlocked | LockState::Acquiring => {}
        }

        self.state = LockState::Acquiring;
        let started = Instant::now();
        let mut next_alert = self.config.alert_after;

        let acquired_at = loop {
            let attempt = Instant::now();
            match self
                .store
                .acquire(&self.name, &self.owner, self.config.lease_timeout)
                .await
            {
                Ok(true) => break attempt,
                Ok(false) => trace!("lock busy, retrying"),
                Err(err) => warn!(%err, "lock store failed during acquire, retrying"),
            }

            let waited = started.elapsed();
            if waited >= next_alert {
                warn!(
                    waited_ms = waited.as_millis() as u64,
                    "sequencer lock unavailable for too long"
                );
                next_alert += self.config.alert_after;
            }

            time::sleep(self.config.retry_interval).await;
        };

        self.state = LockState::Held;
        self.lost = CancellationToken::new();
        let captured = self.generation.load(Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(heartbeat(
            self.store.clone(),
            Lease {
                name: self.name.clone(),
                owner: self.owner.clone(),
                config: self.config,
                expires_at: acquired_at + self.config.lease_timeout,
            },
            captured,
            self.generation.clone(),
            cancel.clone(),
            self.lost.clone(),
        ));
        self.heartbeat = Some(Heartbeat { cancel, handle });

        info!(generation = captured, "acquired sequencer lock");
        Ok(())
    }

    /// Stops renewals, invalidates any heartbeat already in flight and releases the lease.
    ///
    /// Also resets a [`LockState::Lost`] lock; the release is then a no-op unless the store
    /// still lists this owner.
    #[instrument(skip(self), fields(name = %self.name, owner = %self.owner))]
    pub async fn unlock(&mut self) -> LockResult<()> {
        let lost = match self.state() {
            LockState::Held => false,
            LockState::Lost => true,
            LockState::Unlocked | LockState::Acquiring => {
            return Err(LockError::NotHeld {
                    name: self.name.clone(),
                    owner: self.owner.clone(),
                });
            }
        };

        let heartbeat = self.heartbeat.take();
        if let Some(hb) = &heartbeat {
            hb.cancel.cancel();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        // A renewal that passed its generation check before the bump finishes before the
        // lease is released, never after.
        if let Some(hb) = heartbeat {
            if let Err(err) = hb.handle.await {
                warn!(%err, "heartbeat task ended abnormally");
            }
        }

        self.state = LockState::Unlocked;
        self.store.release(&self.name, &self.owner).await?;

        info!(generation = self.generation(), lost, "released sequencer lock");
        Ok(())
    }
}

impl Drop for SequencerLock {
    fn drop(&mut self) {
        if let Some(hb) = self.heartbeat.take() {
            hb.cancel.cancel();
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// What a heartbeat task needs to renew one acquired lease.
#[derive(Debug)]
struct Lease {
    name: String,
    owner: String,
    config: LockConfig,
    /// Latest expiry the store confirmed.
    expires_at: Instant,
}

async fn heartbeat(
    store: Arc<dyn LockStore>,
    mut lease: Lease,
    captured: u64,
    live: Arc<AtomicU64>,
    cancel: CancellationToken,
    lost: CancellationToken,
) {
    let config = lease.config;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = time::sleep(config.ping_interval) => {}
        }

        let current = live.load(Ordering::SeqCst);
        if current != captured {
            debug!(name = %lease.name, captured, current, "stale heartbeat, stopping");
            return;
        }

        let attempt = Instant::now();
        let res = store
            .extend(&lease.name, &lease.owner, config.lease_timeout)
            .await;
        let name = &lease.name;
        match res {
            Ok(()) => {
                trace!(%name, "extended lease");
                lease.expires_at = attempt + config.lease_timeout;
            }
            Err(err @ LockError::NotHeld { .. }) => {
                error!(%name, %err, "sequencer lease taken over or expired");
                lost.cancel();
                return;
            }
            // the next renewal would land after the lease runs out
            Err(err) if Instant::now() + config.ping_interval >= lease.expires_at => {
                error!(%name, %err, "sequencer lease expiring without renewal");
                lost.cancel();
                return;
            }
            Err(err) => warn!(%name, %err, "failed to extend sequencer lease, retrying"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use async_trait::async_trait;

    use super::*;
    use crate::store::InMemoryLockStore;

    /// Wraps the in-memory store and counts renewals, flagging any that land after release.
    #[derive(Debug, Default)]
    struct CountingStore {
        inner: InMemoryLockStore,
        extends: AtomicUsize,
        released: AtomicBool,
        extends_after_release: AtomicUsize,
    }

    #[async_trait]
    impl LockStore for CountingStore {
        async fn acquire(&self, name: &str, owner: &str, ttl: Duration) -> LockResult<bool> {
            let ok = self.inner.acquire(name, owner, ttl).await?;
            if ok {
                self.released.store(false, Ordering::SeqCst);
            }
            Ok(ok)
        }

        async fn extend(&self, name: &str, owner: &str, ttl: Duration) -> LockResult<()> {
            self.extends.fetch_add(1, Ordering::SeqCst);
            if self.released.load(Ordering::SeqCst) {
                self.extends_after_release.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.extend(name, owner, ttl).await
        }

        async fn release(&self, name: &str, owner: &str) -> LockResult<()> {
            self.released.store(true, Ordering::SeqCst);
            self.inner.release(name, owner).await
        }
    }

    fn config() -> LockConfig {
        LockConfig {
            lease_timeout: Duration::from_secs(30),
            retry_interval: Duration::from_secs(1),
            ping_interval: Duration::from_secs(10),
            alert_after: Duration::from_secs(60),
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_heartbeat_keeps_lease_alive() {
        let store = Arc::new(CountingStore::default());
        let mut a = SequencerLock::new("seq", "a", store.clone(), config());
        a.lock().await.unwrap();
        assert!(a.is_held());

        // several lease lengths later the lease is still ours
        time::sleep(Duration::from_secs(95)).await;
        assert_eq!(store.inner.owner("seq").as_deref(), Some("a"));
        assert_eq!(store.extends.load(Ordering::SeqCst), 9);

        a.unlock().await.unwrap();
        assert_eq!(store.inner.owner("seq"), None);
        assert_eq!(a.generation(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_no_extend_after_unlock() {
        let store = Arc::new(CountingStore::default());
        let mut a = SequencerLock::new("seq", "a", store.clone(), config());
        a.lock().await.unwrap();

        // unlock right before the first renewal is due
        time::sleep(Duration::from_millis(9_999)).await;
        a.unlock().await.unwrap();

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.extends.load(Ordering::SeqCst), 0);
        assert_eq!(store.extends_after_release.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_stale_generation_heartbeat_is_noop() {
        let store = Arc::new(CountingStore::default());
        let live = Arc::new(AtomicU64::new(5));
        let lost = CancellationToken::new();
        let lease = Lease {
            name: "seq".to_owned(),
            owner: "a".to_owned(),
            config: config(),
            expires_at: Instant::now() + config().lease_timeout,
        };
        let handle = tokio::spawn(heartbeat(
            store.clone(),
            lease,
            4,
            live,
            CancellationToken::new(),
            lost.clone(),
        ));

        time::sleep(Duration::from_secs(11)).await;
        assert!(handle.is_finished());
        assert_eq!(store.extends.load(Ordering::SeqCst), 0);
        assert!(!lost.is_cancelled());
    }

    /// Acquires through the in-memory store but never manages to renew.
    #[derive(Debug)]
    struct BrokenRenewalStore {
        inner: InMemoryLockStore,
        /// Fail renewals as a store outage instead of a lost lease.
        outage: bool,
    }

    impl BrokenRenewalStore {
        fn new(outage: bool) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryLockStore::new(),
                outage,
            })
        }
    }

    #[async_trait]
    impl LockStore for BrokenRenewalStore {
        async fn acquire(&self, name: &str, owner: &str, ttl: Duration) -> LockResult<bool> {
            self.inner.acquire(name, owner, ttl).await
        }

        async fn extend(&self, name: &str, owner: &str, _ttl: Duration) -> LockResult<()> {
            if self.outage {
                return Err(LockError::Store("connection reset".to_owned()));
            }
            Err(LockError::NotHeld {
                name: name.to_owned(),
                owner: owner.to_owned(),
            })
        }

        async fn release(&self, name: &str, owner: &str) -> LockResult<()> {
            self.inner.release(name, owner).await
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_rejected_renewal_marks_lock_lost() {
        let store = BrokenRenewalStore::new(false);
        let mut a = SequencerLock::new("seq", "a", store.clone(), config());
        let mut b = SequencerLock::new("seq", "b", store.clone(), config());

        a.lock().await.unwrap();
        let lost = a.lost_token();
        assert!(!lost.is_cancelled());

        // the first renewal is refused
        time::sleep(Duration::from_secs(11)).await;
        assert!(lost.is_cancelled());
        assert_eq!(a.state(), LockState::Lost);
        assert!(!a.is_held());

        time::sleep(Duration::from_secs(20)).await;
        b.lock().await.unwrap();
        assert!(b.is_held());
        assert!(!a.is_held());

        // resetting the lost lock leaves b's lease alone
        a.unlock().await.unwrap();
        assert_eq!(a.state(), LockState::Unlocked);
        assert_eq!(store.inner.owner("seq").as_deref(), Some("b"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_store_outage_gives_up_before_lease_expiry() {
        let store = BrokenRenewalStore::new(true);
        let mut a = SequencerLock::new("seq", "a", store.clone(), config());
        a.lock().await.unwrap();

        // first failed renewal at 10s still leaves time for another attempt
        time::sleep(Duration::from_secs(15)).await;
        assert!(a.is_held());

        // at 20s the next attempt would come too late
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(a.state(), LockState::Lost);
        assert_eq!(store.inner.owner("seq").as_deref(), Some("a"));

        // the lease still runs out in the store, and a new lock() starts over
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.inner.owner("seq"), None);
        a.lock().await.unwrap();
        assert!(a.is_held());
        assert!(!a.lost_token().is_cancelled());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_second_replica_waits_for_release() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let mut a = SequencerLock::new("seq", "a", store.clone(), config());
        let mut b = SequencerLock::new("seq", "b", store.clone(), config());

        a.lock().await.unwrap();
        let waiter = tokio::spawn(async move {
            b.lock().await.unwrap();
            b
        });

        time::sleep(Duration::from_secs(100)).await;
        assert!(!waiter.is_finished());

        a.unlock().await.unwrap();
        let b = waiter.await.unwrap();
        assert!(b.is_held());
        assert!(!a.is_held());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_concurrent_holders_never_overlap() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for owner in ["a", "b", "c"] {
            let mut lock = SequencerLock::new("seq", owner, store.clone(), config());
            let holders = holders.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..3 {
                    lock.lock().await.unwrap();
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    time::sleep(Duration::from_secs(45)).await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    lock.unlock().await.unwrap();
                    time::sleep(Duration::from_millis(500)).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_double_lock_and_stray_unlock() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let mut a = SequencerLock::new("seq", "a", store, config());
        assert!(matches!(a.unlock().await, Err(LockError::NotHeld { .. })));
        a.lock().await.unwrap();
        assert!(matches!(a.lock().await, Err(LockError::AlreadyHeld(_))));
        a.unlock().await.unwrap();
        assert_eq!(a.state(), LockState::Unlocked);
    }
}

//! Per-identity daily quota admission gate.
//!
//! Quotas are counted per UTC epoch day (`now_ms / 86_400_000`), so every identity resets at
//! UTC midnight. State lives in memory only and is lost on restart.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use rollup_primitives::{Clock, SystemClock};
use tracing::*;

/// Milliseconds in one UTC day.
pub const MILLIS_PER_DAY: u64 = 86_400_000;

/// Current UTC epoch day for a millisecond timestamp.
pub fn epoch_day(now_ms: u64) -> u64 {
    now_ms / MILLIS_PER_DAY
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct RateLimitRecord {
    day: u64,
    count: u64,
}

#[derive(Debug)]
struct LimiterState {
    limit: u64,
    /// Latest day any record was refreshed for.
    day: u64,
    records: HashMap<String, RateLimitRecord>,
}

impl LimiterState {
    /// Drops every record of an earlier day once the day rolls over.
    fn roll_over(&mut self, day: u64) {
        if day <= self.day {
            return;
        }
        let before = self.records.len();
        self.records.retain(|_, rec| rec.day >= day);
        trace!(%day, evicted = before - self.records.len(), "daily quotas rolled over");
        self.day = day;
    }

    /// Returns the identifier's record, reset if it belongs to an earlier day.
    fn refresh(&mut self, identifier: &str, day: u64) -> &mut RateLimitRecord {
        self.roll_over(day);
        let rec = self
            .records
            .entry(identifier.to_owned())
            .or_insert(RateLimitRecord { day, count: 0 });
        if rec.day != day {
            *rec = RateLimitRecord { day, count: 0 };
        }
        rec
    }
}

/// Daily per-identity quota gate.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RateLimiter")
            .field("limit", &state.limit)
            .field("identities", &state.records.len())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(limit_per_day: u64) -> Self {
        Self::with_clock(limit_per_day, Arc::new(SystemClock))
    }

    pub fn with_clock(limit_per_day: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(LimiterState {
                limit: limit_per_day,
                day: 0,
                records: HashMap::new(),
            }),
        }
    }

    /// Tries to consume `quantity` units of today's quota for `identifier`.
    ///
    /// A zero quantity is a probe: it always succeeds and touches nothing. Rejection leaves
    /// the count unchanged.
    pub fn admit(&self, identifier: &str, quantity: u64) -> bool {
        if quantity == 0 {
            return true;
        }

        let day = epoch_day(self.clock.now_millis());
        let mut state = self.state.lock();
        let limit = state.limit;
        let rec = state.refresh(identifier, day);

        match rec.count.checked_add(quantity) {
            Some(total) if total <= limit => {
                rec.count = total;
                true
            }
            _ => {
                debug!(%identifier, count = rec.count, %quantity, %limit, "rejected over daily quota");
                false
            }
        }
    }

    /// Units consumed today by `identifier`. Unknown identifiers are not recorded.
    pub fn current_value(&self, identifier: &str) -> u64 {
        let day = epoch_day(self.clock.now_millis());
        let mut state = self.state.lock();
        state.roll_over(day);
        state
            .records
            .get(identifier)
            .filter(|rec| rec.day == day)
            .map_or(0, |rec| rec.count)
    }

    /// Changes the daily limit. Counts already consumed today are kept.
    pub fn set_limit(&self, limit_per_day: u64) {
        let mut state = self.state.lock();
        info!(old = state.limit, new = limit_per_day, "updated daily tx limit");
        state.limit = limit_per_day;
    }

    pub fn limit(&self) -> u64 {
        self.state.lock().limit
    }
}

#[cfg(test)]
mod tests {
    use rollup_primitives::ManualClock;

    use super::*;

    // 2021-11-11T09:30:00Z
    const NOW: u64 = 1_636_623_000_000;

    fn limiter(limit: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        (RateLimiter::with_clock(limit, clock.clone()), clock)
    }

    #[test]
    fn test_zero_quantity_is_a_probe() {
        let (rl, _) = limiter(0);
        assert!(rl.admit("alice", 0));
        assert_eq!(rl.current_value("alice"), 0);
        assert!(!rl.admit("alice", 1));
    }

    #[test]
    fn test_first_l_admits_succeed() {
        let (rl, _) = limiter(3);
        assert!(rl.admit("alice", 1));
        assert!(rl.admit("alice", 1));
        assert!(rl.admit("alice", 1));
        assert!(!rl.admit("alice", 1));
        assert_eq!(rl.current_value("alice"), 3);

        // other identities have their own quota
        assert!(rl.admit("bob", 1));
    }

    #[test]
    fn test_rejection_does_not_mutate() {
        let (rl, _) = limiter(5);
        assert!(rl.admit("alice", 4));
        assert!(!rl.admit("alice", 2));
        assert_eq!(rl.current_value("alice"), 4);
        assert!(rl.admit("alice", 1));
    }

    #[test]
    fn test_quota_resets_on_next_utc_day() {
        let (rl, clock) = limiter(1);
        assert!(rl.admit("alice", 1));
        assert!(!rl.admit("alice", 1));

        // last millisecond of the same UTC day
        clock.set((epoch_day(NOW) + 1) * MILLIS_PER_DAY - 1);
        assert!(!rl.admit("alice", 1));

        clock.advance(1);
        assert_eq!(rl.current_value("alice"), 0);
        assert!(rl.admit("alice", 1));
    }

    #[test]
    fn test_set_limit_applies_to_existing_counts() {
        let (rl, _) = limiter(2);
        assert!(rl.admit("alice", 2));
        assert!(!rl.admit("alice", 1));

        rl.set_limit(3);
        assert_eq!(rl.limit(), 3);
        assert!(rl.admit("alice", 1));

        rl.set_limit(1);
        assert!(!rl.admit("alice", 1));
    }

    #[test]
    fn test_stale_days_are_evicted() {
        let (rl, clock) = limiter(5);
        assert!(rl.admit("alice", 1));
        assert!(rl.admit("bob", 1));
        assert_eq!(rl.current_value("carol"), 0);
        assert_eq!(rl.state.lock().records.len(), 2);

        clock.advance(MILLIS_PER_DAY);
        assert!(rl.admit("bob", 1));
        let records = rl.state.lock().records.clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records["bob"], RateLimitRecord { day: epoch_day(NOW) + 1, count: 1 });
    }

    #[test]
    fn test_huge_quantity_does_not_overflow() {
        let (rl, _) = limiter(u64::MAX);
        assert!(rl.admit("alice", u64::MAX));
        assert!(!rl.admit("alice", 1));
    }
}

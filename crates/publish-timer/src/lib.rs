//! Epoch-aligned publish deadlines.
//!
//! Deadlines are multiples of the configured interval counted from the UNIX epoch, so every
//! replica computes the same schedule from the wall clock alone.

use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use rollup_primitives::{Clock, SystemClock};
use serde::{Deserialize, Serialize};

/// Identifier of a bridge contract.
pub type BridgeId = u64;

/// A publish deadline: the `rollup_number`th multiple of the interval since the epoch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RollupTimeout {
    pub rollup_number: u64,
    /// UNIX time in milliseconds.
    pub timeout_ms: u64,
}

impl RollupTimeout {
    /// Deadline active at `now_ms` for `interval_secs`, or `None` when the interval is zero.
    pub fn last_at(now_ms: u64, interval_secs: u64) -> Option<Self> {
        if interval_secs < 1 {
            return None;
        }
        let elapsed_secs = now_ms / 1000;
        let rollup_number = elapsed_secs / interval_secs;
        Some(Self {
            rollup_number,
            timeout_ms: rollup_number
                .saturating_mul(interval_secs)
                .saturating_mul(1000),
        })
    }

    /// Deadline following the one active at `now_ms`.
    pub fn next_at(now_ms: u64, interval_secs: u64) -> Option<Self> {
        let last = Self::last_at(now_ms, interval_secs)?;
        Some(Self {
            rollup_number: last.rollup_number + 1,
            timeout_ms: last
                .timeout_ms
                .saturating_add(interval_secs.saturating_mul(1000)),
        })
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(i64::try_from(self.timeout_ms).ok()?)
    }
}

impl fmt::Display for RollupTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_datetime() {
            Some(dt) => write!(f, "#{} at {}", self.rollup_number, dt.to_rfc3339()),
            None => write!(f, "#{} at {}ms", self.rollup_number, self.timeout_ms),
        }
    }
}

/// How often a bridge forces a rollup, in multiples of the base interval.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub bridge_id: BridgeId,
    pub rollup_frequency: u64,
}

/// Computes the last and next publish deadlines for the base interval and per bridge.
#[derive(Clone)]
pub struct PublishTimeManager {
    interval_secs: u64,
    bridges: Vec<BridgeConfig>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for PublishTimeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishTimeManager")
            .field("interval_secs", &self.interval_secs)
            .field("bridges", &self.bridges)
            .finish()
    }
}

impl PublishTimeManager {
    pub fn new(interval_secs: u64) -> Self {
        Self::with_clock(interval_secs, Vec::new(), Arc::new(SystemClock))
    }

    pub fn with_clock(
        interval_secs: u64,
        bridges: Vec<BridgeConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            interval_secs,
            bridges,
            clock,
        }
    }

    pub fn with_bridges(mut self, bridges: Vec<BridgeConfig>) -> Self {
        self.bridges = bridges;
        self
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn is_enabled(&self) -> bool {
        self.interval_secs >= 1
    }

    /// Most recently crossed deadline. Pending txs older than this must be published.
    pub fn last_timeout(&self) -> Option<RollupTimeout> {
        RollupTimeout::last_at(self.clock.now_millis(), self.interval_secs)
    }

    /// Upcoming deadline, advertised to clients as the settlement bound.
    pub fn next_timeout(&self) -> Option<RollupTimeout> {
        RollupTimeout::next_at(self.clock.now_millis(), self.interval_secs)
    }

    pub fn last_bridge_timeouts(&self) -> BTreeMap<BridgeId, RollupTimeout> {
        self.bridge_timeouts(RollupTimeout::last_at)
    }

    pub fn next_bridge_timeouts(&self) -> BTreeMap<BridgeId, RollupTimeout> {
        self.bridge_timeouts(RollupTimeout::next_at)
    }

    fn bridge_timeouts(
        &self,
        compute: fn(u64, u64) -> Option<RollupTimeout>,
    ) -> BTreeMap<BridgeId, RollupTimeout> {
        if !self.is_enabled() {
            return BTreeMap::new();
        }
        let now_ms = self.clock.now_millis();
        self.bridges
            .iter()
            .filter(|b| b.rollup_frequency >= 1)
            .filter_map(|b| {
                let interval = b.rollup_frequency.saturating_mul(self.interval_secs);
                compute(now_ms, interval).map(|t| (b.bridge_id, t))
            })
            .collect()
    }
}

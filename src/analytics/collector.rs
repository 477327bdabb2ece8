use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::models::stats::StatsSnapshot;
use crate::models::verdict::ViolationKind;

/// Process-wide protection counters.
///
/// Written only by the decision engine; read through owned snapshots so
/// internal state is never handed out mutably.
pub struct StatsCollector {
    total_requests: AtomicU64,
    total_blocked: AtomicU64,
    active_bans: AtomicU64,
    pattern_violations: AtomicU64,
    method_violations: AtomicU64,
    payload_violations: AtomicU64,
    anomaly_bans: AtomicU64,
    started_at: DateTime<Utc>,
    start_instant: Instant,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_blocked: AtomicU64::new(0),
            active_bans: AtomicU64::new(0),
            pattern_violations: AtomicU64::new(0),
            method_violations: AtomicU64::new(0),
            payload_violations: AtomicU64::new(0),
            anomaly_bans: AtomicU64::new(0),
            started_at: Utc::now(),
            start_instant: Instant::now(),
        }
    }

    pub fn inc_total(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_blocked(&self) {
        self.total_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_anomaly_bans(&self) {
        self.anomaly_bans.fetch_add(1, Ordering::Relaxed);
    }

    /// Ban-set size gauge, refreshed on sweep and ban insertion.
    pub fn set_active_bans(&self, count: u64) {
        self.active_bans.store(count, Ordering::Relaxed);
    }

    pub fn record_violation(&self, kind: ViolationKind) {
        let counter = match kind {
            ViolationKind::Pattern => &self.pattern_violations,
            ViolationKind::Method => &self.method_violations,
            ViolationKind::Payload => &self.payload_violations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_blocked: self.total_blocked.load(Ordering::Relaxed),
            active_bans: self.active_bans.load(Ordering::Relaxed),
            pattern_violations: self.pattern_violations.load(Ordering::Relaxed),
            method_violations: self.method_violations.load(Ordering::Relaxed),
            payload_violations: self.payload_violations.load(Ordering::Relaxed),
            anomaly_bans: self.anomaly_bans.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: self.start_instant.elapsed().as_secs(),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = StatsCollector::new();
        stats.inc_total();
        stats.inc_total();
        stats.inc_blocked();
        stats.record_violation(ViolationKind::Pattern);
        stats.record_violation(ViolationKind::Method);
        stats.record_violation(ViolationKind::Method);
        stats.set_active_bans(4);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.total_blocked, 1);
        assert_eq!(snapshot.pattern_violations, 1);
        assert_eq!(snapshot.method_violations, 2);
        assert_eq!(snapshot.payload_violations, 0);
        assert_eq!(snapshot.active_bans, 4);
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let stats = StatsCollector::new();
        let before = stats.snapshot();
        stats.inc_total();
        assert_eq!(before.total_requests, 0);
        assert_eq!(stats.snapshot().total_requests, 1);
    }
}

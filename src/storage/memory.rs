use std::collections::VecDeque;

use dashmap::mapref::one::RefMut;
use dashmap::{DashMap, DashSet};
use tracing::{debug, info};

use crate::models::verdict::ViolationKind;

/// Request timestamps retained per profile for cadence analysis.
const MAX_HISTORY: usize = 100;

/// Mutable behavioral record for one client identity.
#[derive(Debug, Clone)]
pub struct ClientProfile {
    /// Start of the current rate-limit window.
    pub window_start_ms: u64,
    /// Requests observed within the current window.
    pub window_count: u64,
    /// Request timestamps, oldest first, capped at `MAX_HISTORY`.
    pub history: VecDeque<u64>,
    pub burst_count: u32,
    pub last_burst_ms: u64,
    /// Sum of all category counters since the last reset.
    pub violation_score: u32,
    pub pattern_violations: u32,
    pub method_violations: u32,
    pub payload_violations: u32,
    pub last_reset_ms: u64,
    /// Last time this identity produced an evaluated (non-banned) request.
    pub last_seen_ms: u64,
}

impl ClientProfile {
    fn new(now_ms: u64) -> Self {
        Self {
            window_start_ms: now_ms,
            window_count: 0,
            history: VecDeque::new(),
            burst_count: 0,
            last_burst_ms: now_ms,
            violation_score: 0,
            pattern_violations: 0,
            method_violations: 0,
            payload_violations: 0,
            last_reset_ms: now_ms,
            last_seen_ms: now_ms,
        }
    }

    /// Zero the violation counters once the reset interval has elapsed.
    pub fn maybe_reset_violations(&mut self, now_ms: u64, reset_interval_ms: u64) {
        if now_ms.saturating_sub(self.last_reset_ms) >= reset_interval_ms {
            self.pattern_violations = 0;
            self.method_violations = 0;
            self.payload_violations = 0;
            self.violation_score = 0;
            self.last_reset_ms = now_ms;
        }
    }

    pub fn record_violation(&mut self, kind: ViolationKind) {
        match kind {
            ViolationKind::Pattern => self.pattern_violations += 1,
            ViolationKind::Method => self.method_violations += 1,
            ViolationKind::Payload => self.payload_violations += 1,
        }
        self.violation_score += 1;
    }

    pub fn push_history(&mut self, now_ms: u64) {
        if self.history.len() >= MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(now_ms);
    }
}

/// Identity-keyed profile table plus the active ban set.
///
/// Both structures are only ever mutated by the decision engine; per-identity
/// serialization comes from holding the profile's map entry for the duration
/// of one evaluation.
pub struct ProfileStore {
    profiles: DashMap<String, ClientProfile>,
    bans: DashSet<String>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: DashMap::new(),
            bans: DashSet::new(),
        }
    }

    /// Fetch the profile for an identity, lazily creating a zero-state record.
    /// The returned guard serializes all mutation for this identity.
    pub fn profile_entry(&self, identity: &str, now_ms: u64) -> RefMut<'_, String, ClientProfile> {
        self.profiles
            .entry(identity.to_string())
            .or_insert_with(|| ClientProfile::new(now_ms))
    }

    pub fn is_banned(&self, identity: &str) -> bool {
        self.bans.contains(identity)
    }

    pub fn ban(&self, identity: &str) {
        self.bans.insert(identity.to_string());
    }

    pub fn ban_count(&self) -> usize {
        self.bans.len()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.profiles.contains_key(identity)
    }

    /// Evict idle profiles and expire stale bans.
    ///
    /// Bans expire once the associated profile has been inactive longer than
    /// `ban_ms`; the ban and the profile are cleared together. Unbanned
    /// profiles are evicted after `window_ms` of inactivity; banned profiles
    /// are retained so the ban's age stays measurable. Candidates are
    /// collected before any removal so no shard lock of one map is held while
    /// the other map is touched.
    pub fn sweep(&self, now_ms: u64, window_ms: u64, ban_ms: u64) {
        let banned: Vec<String> = self.bans.iter().map(|e| e.key().clone()).collect();
        for identity in banned {
            let expired = self
                .profiles
                .get(&identity)
                .map_or(true, |p| now_ms.saturating_sub(p.last_seen_ms) > ban_ms);
            if expired {
                self.bans.remove(&identity);
                self.profiles.remove(&identity);
                info!(identity = %identity, "Ban expired, identity unbanned");
            }
        }

        let stale: Vec<String> = self
            .profiles
            .iter()
            .filter(|e| now_ms.saturating_sub(e.value().last_seen_ms) > window_ms)
            .map(|e| e.key().clone())
            .collect();
        for identity in stale {
            if self.bans.contains(&identity) {
                continue;
            }
            let removed = self
                .profiles
                .remove_if(&identity, |_, p| {
                    now_ms.saturating_sub(p.last_seen_ms) > window_ms
                })
                .is_some();
            if removed {
                debug!(identity = %identity, "Idle profile evicted");
            }
        }
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

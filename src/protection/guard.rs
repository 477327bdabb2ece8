use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::analytics::collector::StatsCollector;
use crate::config::settings::{GuardSettings, SettingsUpdate};
use crate::models::request::RequestInfo;
use crate::models::stats::StatsSnapshot;
use crate::models::verdict::{Decision, DenyReason, ViolationKind};
use crate::storage::memory::ProfileStore;

use super::anomaly::AnomalyDetector;
use super::signatures::SignatureStore;

/// Settings plus the state compiled from them, swapped as one unit so an
/// evaluation never observes a half-applied reconfiguration.
struct RuntimeConfig {
    settings: GuardSettings,
    signatures: SignatureStore,
}

impl RuntimeConfig {
    fn build(settings: GuardSettings) -> Result<Self> {
        settings.validate()?;
        let signatures = SignatureStore::compile(&settings.rules)?;
        Ok(Self {
            settings,
            signatures,
        })
    }
}

/// What the profile critical section concluded.
enum Gate {
    Ban(DenyReason),
    Verdict(bool),
}

/// The request-protection engine.
///
/// One instance owns all shared state: the live configuration, the per-client
/// profile table, the ban set, and the process-wide counters. Hosts call
/// [`Guard::evaluate`] once per inbound request and act on the verdict;
/// [`Guard::process`] is the same engine fed an explicit clock reading.
pub struct Guard {
    config: ArcSwap<RuntimeConfig>,
    store: ProfileStore,
    stats: StatsCollector,
    reconfigure_lock: Mutex<()>,
}

impl Guard {
    pub fn new(settings: GuardSettings) -> Result<Self> {
        Ok(Self {
            config: ArcSwap::from_pointee(RuntimeConfig::build(settings)?),
            store: ProfileStore::new(),
            stats: StatsCollector::new(),
            reconfigure_lock: Mutex::new(()),
        })
    }

    /// Evaluate a request against the live configuration and behavioral
    /// state. Returns `true` to let the request proceed.
    pub fn evaluate(&self, req: &RequestInfo<'_>) -> bool {
        self.process(req, unix_millis()).allowed
    }

    /// Full evaluation with an explicit timestamp (milliseconds since epoch).
    ///
    /// Checks run in a fixed order and short-circuit on the first denial, but
    /// every counter mutation made along the way sticks even when a later
    /// step denies the request.
    pub fn process(&self, req: &RequestInfo<'_>, now_ms: u64) -> Decision {
        let cfg = self.config.load();
        let settings = &cfg.settings;

        self.stats.inc_total();
        self.store
            .sweep(now_ms, settings.window_ms, settings.ban_duration_ms);
        self.stats.set_active_bans(self.store.ban_count() as u64);

        if settings.allowed_identities.iter().any(|a| a == req.identity) {
            debug!(identity = %req.identity, "Allow-listed identity, bypassing checks");
            return Decision::allow();
        }

        if self.store.is_banned(req.identity) {
            self.stats.inc_blocked();
            debug!(identity = %req.identity, "Banned identity rejected");
            return Decision::deny(DenyReason::Banned);
        }

        if settings.blocked_identities.iter().any(|b| b == req.identity) {
            self.stats.inc_blocked();
            info!(identity = %req.identity, "Block-listed identity rejected");
            return Decision::deny(DenyReason::Blocklisted);
        }

        // Content checks need no profile state; run them before the
        // per-identity critical section so the regex work stays outside it.
        let method_ok = settings.allowed_methods.iter().any(|m| m == req.method);
        let size_ok = req.size == 0 || req.size <= settings.max_payload_bytes;
        let inspection = cfg.signatures.inspect(req.content);
        let detector = AnomalyDetector::new(settings.anomaly_score_multiplier);

        let gate = {
            let mut profile = self.store.profile_entry(req.identity, now_ms);
            profile.last_seen_ms = now_ms;
            profile.maybe_reset_violations(now_ms, settings.violation_reset_ms);

            if !method_ok {
                profile.record_violation(ViolationKind::Method);
                self.stats.record_violation(ViolationKind::Method);
                warn!(identity = %req.identity, method = %req.method, "Method violation");
            }

            if !size_ok {
                profile.record_violation(ViolationKind::Payload);
                self.stats.record_violation(ViolationKind::Payload);
                warn!(identity = %req.identity, size = req.size, "Payload size violation");
            }

            if !inspection.clean {
                profile.record_violation(ViolationKind::Pattern);
                self.stats.record_violation(ViolationKind::Pattern);
            }

            profile.push_history(now_ms);

            if let Some(signal) = detector.detect(profile.history.make_contiguous()) {
                warn!(identity = %req.identity, signal = %signal, "Anomalous request cadence");
                Gate::Ban(DenyReason::Anomaly)
            } else if profile.violation_score >= settings.max_violations {
                warn!(
                    identity = %req.identity,
                    score = profile.violation_score,
                    "Violation threshold reached"
                );
                Gate::Ban(DenyReason::MaxViolations)
            } else {
                let (limit, window_ms) = settings.route_limits(req.path);

                if now_ms.saturating_sub(profile.window_start_ms) > window_ms {
                    profile.window_start_ms = now_ms;
                    profile.window_count = 1;
                } else {
                    profile.window_count += 1;
                }

                if now_ms.saturating_sub(profile.last_burst_ms) <= settings.burst_window_ms {
                    profile.burst_count += 1;
                    if profile.burst_count > settings.burst_limit {
                        warn!(
                            identity = %req.identity,
                            burst = profile.burst_count,
                            "Burst threshold exceeded"
                        );
                        Gate::Ban(DenyReason::BurstLimit)
                    } else {
                        Gate::Verdict(profile.window_count <= limit)
                    }
                } else {
                    profile.burst_count = 1;
                    profile.last_burst_ms = now_ms;
                    Gate::Verdict(profile.window_count <= limit)
                }
            }
        };

        match gate {
            Gate::Ban(reason) => {
                // Profile guard is released above; inserting into the ban set
                // here keeps the lock order between the two maps one-way.
                self.store.ban(req.identity);
                self.stats.set_active_bans(self.store.ban_count() as u64);
                if reason == DenyReason::Anomaly {
                    self.stats.inc_anomaly_bans();
                }
                warn!(identity = %req.identity, reason = %reason, "Identity banned");
                Decision::deny(reason)
            }
            Gate::Verdict(true) => Decision::allow(),
            Gate::Verdict(false) => {
                debug!(identity = %req.identity, path = %req.path, "Rate limit exceeded");
                Decision::deny(DenyReason::RateLimit)
            }
        }
    }

    /// Merge a partial update into the live configuration.
    ///
    /// The merged result is validated and its rules compiled before anything
    /// is published; on error the previous configuration stays in force.
    /// In-flight evaluations observe either the old or the new configuration,
    /// never a mix.
    pub fn reconfigure(&self, update: SettingsUpdate) -> Result<()> {
        let _writer = self.reconfigure_lock.lock();
        let mut settings = self.config.load().settings.clone();
        settings.merge(update);
        let runtime = RuntimeConfig::build(settings)?;
        self.config.store(Arc::new(runtime));
        info!("Configuration updated");
        Ok(())
    }

    /// Accept a partial update as a JSON document, for hosts that relay
    /// reconfiguration requests from an admin surface.
    pub fn reconfigure_json(&self, json: &str) -> Result<()> {
        let update: SettingsUpdate =
            serde_json::from_str(json).context("Failed to parse configuration update")?;
        self.reconfigure(update)
    }

    /// Snapshot of the current configuration.
    pub fn settings(&self) -> GuardSettings {
        self.config.load().settings.clone()
    }

    /// Read-only copy of the process-wide counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::RouteLimit;

    fn guard() -> Guard {
        Guard::new(GuardSettings::default()).unwrap()
    }

    fn get<'a>(identity: &'a str, path: &'a str) -> RequestInfo<'a> {
        RequestInfo {
            identity,
            method: "GET",
            content: "",
            size: 0,
            path,
        }
    }

    #[test]
    fn test_allow_listed_identity_bypasses_everything() {
        let guard = Guard::new(GuardSettings {
            allowed_identities: vec!["10.0.0.5".to_string()],
            ..Default::default()
        })
        .unwrap();

        let req = RequestInfo {
            identity: "10.0.0.5",
            method: "TRACE",
            content: "union select * from users; <script>",
            size: u64::MAX,
            path: "/login",
        };
        for i in 0..50 {
            assert!(guard.process(&req, 1_000 + i).allowed);
        }
        assert_eq!(guard.stats().total_blocked, 0);
        assert_eq!(guard.stats().total_requests, 50);
    }

    #[test]
    fn test_block_listed_identity_denied() {
        let guard = Guard::new(GuardSettings {
            blocked_identities: vec!["6.6.6.6".to_string()],
            ..Default::default()
        })
        .unwrap();

        let decision = guard.process(&get("6.6.6.6", "/"), 1_000);
        assert_eq!(decision, Decision::deny(DenyReason::Blocklisted));
        assert_eq!(guard.stats().total_blocked, 1);
    }

    #[test]
    fn test_banned_identity_denied_and_counted_per_call() {
        let guard = guard();
        assert!(guard.process(&get("3.3.3.3", "/"), 1_000).allowed);
        guard.store.ban("3.3.3.3");

        for i in 1..=3u64 {
            let decision = guard.process(&get("3.3.3.3", "/"), 1_000 + i);
            assert_eq!(decision, Decision::deny(DenyReason::Banned));
            assert_eq!(guard.stats().total_blocked, i);
        }
        assert_eq!(guard.stats().active_bans, 1);
    }

    #[test]
    fn test_violations_accumulate_and_trigger_ban() {
        let guard = Guard::new(GuardSettings {
            max_violations: 3,
            ..Default::default()
        })
        .unwrap();

        // One call carrying a method, a payload, and a pattern violation.
        let req = RequestInfo {
            identity: "9.9.9.9",
            method: "TRACE",
            content: "id=1 union select secret",
            size: 20_000_000,
            path: "/",
        };
        let decision = guard.process(&req, 1_000);
        assert_eq!(decision, Decision::deny(DenyReason::MaxViolations));
        assert!(guard.store.is_banned("9.9.9.9"));

        let stats = guard.stats();
        assert_eq!(stats.method_violations, 1);
        assert_eq!(stats.payload_violations, 1);
        assert_eq!(stats.pattern_violations, 1);
    }

    #[test]
    fn test_each_violation_kind_adds_one_to_score() {
        let guard = guard();

        let bad_method = RequestInfo {
            identity: "8.8.8.8",
            method: "TRACE",
            content: "",
            size: 0,
            path: "/",
        };
        let oversized = RequestInfo {
            identity: "8.8.8.8",
            method: "GET",
            content: "",
            size: 20_000_000,
            path: "/",
        };

        assert!(guard.process(&bad_method, 1_000).allowed);
        assert!(guard.process(&oversized, 1_750).allowed);

        let profile = guard.store.profile_entry("8.8.8.8", 1_750);
        assert_eq!(profile.violation_score, 2);
        assert_eq!(profile.method_violations, 1);
        assert_eq!(profile.payload_violations, 1);
    }

    #[test]
    fn test_zero_size_always_passes_payload_check() {
        let guard = Guard::new(GuardSettings {
            max_payload_bytes: 10,
            ..Default::default()
        })
        .unwrap();
        assert!(guard.process(&get("2.2.2.2", "/"), 1_000).allowed);
        assert_eq!(guard.stats().payload_violations, 0);
    }

    #[test]
    fn test_route_rate_limit_two_per_window() {
        let mut settings = GuardSettings::default();
        settings.routes.insert(
            "/api".to_string(),
            RouteLimit {
                limit: 2,
                window_ms: 60_000,
            },
        );
        let guard = Guard::new(settings).unwrap();

        // Distinct gaps keep the cadence checks quiet; all three calls land
        // inside one window.
        assert!(guard.process(&get("4.4.4.4", "/api"), 1_000).allowed);
        assert!(guard.process(&get("4.4.4.4", "/api"), 1_010).allowed);
        let third = guard.process(&get("4.4.4.4", "/api"), 1_030);
        assert_eq!(third, Decision::deny(DenyReason::RateLimit));
        assert!(!guard.store.is_banned("4.4.4.4"));
    }

    #[test]
    fn test_window_resets_after_expiry() {
        // Global window kept wide so the sweep does not evict the profile
        // before the route window rolls over.
        let mut settings = GuardSettings {
            window_ms: 600_000,
            ..Default::default()
        };
        settings.routes.insert(
            "/api".to_string(),
            RouteLimit {
                limit: 2,
                window_ms: 60_000,
            },
        );
        let guard = Guard::new(settings).unwrap();

        assert!(guard.process(&get("4.4.4.5", "/api"), 1_000).allowed);
        assert!(guard.process(&get("4.4.4.5", "/api"), 1_010).allowed);
        assert!(!guard.process(&get("4.4.4.5", "/api"), 1_030).allowed);
        // Past the route window the counter restarts.
        assert!(guard.process(&get("4.4.4.5", "/api"), 62_000).allowed);
        assert!(guard.store.contains("4.4.4.5"));
    }

    #[test]
    fn test_burst_threshold_bans_eleventh_call() {
        let guard = guard();

        // Gaps vary enough to stay under every cadence signal; the whole run
        // stays inside one burst window.
        let times = [0u64, 30, 70, 120, 180, 250, 330, 420, 520, 630, 685];
        let base = 1_000_000;
        for (i, offset) in times.iter().enumerate().take(10) {
            let decision = guard.process(&get("5.5.5.5", "/"), base + offset);
            assert!(decision.allowed, "call {} should pass", i);
        }
        let last = guard.process(&get("5.5.5.5", "/"), base + times[10]);
        assert_eq!(last, Decision::deny(DenyReason::BurstLimit));
        assert!(guard.store.is_banned("5.5.5.5"));
    }

    #[test]
    fn test_robotic_cadence_triggers_anomaly_ban() {
        let guard = Guard::new(GuardSettings {
            burst_window_ms: 10,
            ..Default::default()
        })
        .unwrap();

        // Gaps cycle through 100/120/140ms: close enough to the latest gap to
        // read as a constant interval once six gaps accumulate, while three
        // distinct values keep the entropy floor and shift check quiet on the
        // earlier calls.
        let mut decision = Decision::allow();
        let mut now = 1_000u64;
        for i in 0..7u64 {
            decision = guard.process(&get("7.7.7.7", "/"), now);
            now += 100 + (i % 3) * 20;
        }
        assert_eq!(decision, Decision::deny(DenyReason::Anomaly));
        assert!(guard.store.is_banned("7.7.7.7"));
        assert_eq!(guard.stats().anomaly_bans, 1);
    }

    #[test]
    fn test_ban_expires_and_identity_is_evaluated_fresh() {
        let mut settings = GuardSettings::default();
        settings.ban_duration_ms = 10_000;
        let guard = Guard::new(settings).unwrap();

        assert!(guard.process(&get("12.0.0.1", "/"), 1_000).allowed);
        guard.store.ban("12.0.0.1");
        assert!(!guard.process(&get("12.0.0.1", "/"), 2_000).allowed);

        // Past the ban duration the sweep clears ban and profile; the same
        // request is admitted again.
        let decision = guard.process(&get("12.0.0.1", "/"), 12_001);
        assert_eq!(decision, Decision::allow());
        assert!(!guard.store.is_banned("12.0.0.1"));
        assert_eq!(guard.stats().active_bans, 0);
    }

    #[test]
    fn test_idle_profile_evicted_by_sweep() {
        let guard = guard();
        assert!(guard.process(&get("idle.client", "/"), 1_000).allowed);
        assert!(guard.store.contains("idle.client"));

        // A request from someone else more than a window later sweeps it out.
        assert!(guard.process(&get("other.client", "/"), 62_000).allowed);
        assert!(!guard.store.contains("idle.client"));
    }

    #[test]
    fn test_empty_reconfigure_is_idempotent() {
        let guard = guard();
        let before = guard.settings();
        guard.reconfigure(SettingsUpdate::default()).unwrap();
        assert_eq!(guard.settings(), before);

        assert!(guard.process(&get("1.1.1.1", "/"), 1_000).allowed);
    }

    #[test]
    fn test_reconfigure_applies_partial_update() {
        let guard = guard();
        guard
            .reconfigure(SettingsUpdate {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(guard.settings().limit, 1);
        assert_eq!(guard.settings().window_ms, 60_000);

        assert!(guard.process(&get("11.0.0.1", "/"), 1_000).allowed);
        assert!(!guard.process(&get("11.0.0.1", "/"), 1_030).allowed);
    }

    #[test]
    fn test_reconfigure_rejects_invalid_update_and_keeps_old_config() {
        let guard = guard();
        let before = guard.settings();

        assert!(guard
            .reconfigure(SettingsUpdate {
                window_ms: Some(0),
                ..Default::default()
            })
            .is_err());
        assert!(guard
            .reconfigure_json(r#"{"rules": [{"category": "broken", "pattern": "(["}]}"#)
            .is_err());

        assert_eq!(guard.settings(), before);
    }

    #[test]
    fn test_reconfigure_json_partial_update() {
        let guard = guard();
        guard
            .reconfigure_json(r#"{"blocked_identities": ["6.6.6.6"]}"#)
            .unwrap();
        assert!(!guard.process(&get("6.6.6.6", "/"), 1_000).allowed);
        assert!(guard.process(&get("6.6.6.7", "/"), 1_010).allowed);
    }

    #[test]
    fn test_denied_requests_still_count_toward_total() {
        let guard = Guard::new(GuardSettings {
            blocked_identities: vec!["6.6.6.6".to_string()],
            ..Default::default()
        })
        .unwrap();

        guard.process(&get("6.6.6.6", "/"), 1_000);
        guard.process(&get("6.6.6.6", "/"), 1_010);
        let stats = guard.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_blocked, 2);
    }

    #[test]
    fn test_violations_recorded_even_when_call_is_denied() {
        let mut settings = GuardSettings::default();
        settings.routes.insert(
            "/api".to_string(),
            RouteLimit {
                limit: 1,
                window_ms: 60_000,
            },
        );
        let guard = Guard::new(settings).unwrap();

        assert!(guard.process(&get("13.0.0.1", "/api"), 1_000).allowed);

        // Second call is rate-limited, but its method violation sticks.
        let req = RequestInfo {
            identity: "13.0.0.1",
            method: "TRACE",
            content: "",
            size: 0,
            path: "/api",
        };
        let decision = guard.process(&req, 1_030);
        assert_eq!(decision, Decision::deny(DenyReason::RateLimit));
        assert_eq!(guard.stats().method_violations, 1);
        let profile = guard.store.profile_entry("13.0.0.1", 1_030);
        assert_eq!(profile.violation_score, 1);
    }
}

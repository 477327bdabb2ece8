use std::collections::HashMap;
use std::fs;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use super::defaults;

/// Runtime configuration for the protection engine.
/// Deserializes from a TOML configuration file; unspecified fields fall back
/// to the shipped defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GuardSettings {
    /// Global rate-limit window in milliseconds.
    #[serde(default = "defaults::default_window_ms")]
    pub window_ms: u64,

    /// Requests allowed per identity per window (unless a route overrides it).
    #[serde(default = "defaults::default_limit")]
    pub limit: u64,

    /// Largest accepted payload; a declared size of zero always passes.
    #[serde(default = "defaults::default_max_payload_bytes")]
    pub max_payload_bytes: u64,

    #[serde(default = "defaults::default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    /// Content-inspection rules, evaluated in order.
    #[serde(default = "defaults::default_rules")]
    pub rules: Vec<SignatureRule>,

    /// Identities denied unconditionally.
    #[serde(default)]
    pub blocked_identities: Vec<String>,

    /// Identities that bypass every check.
    #[serde(default)]
    pub allowed_identities: Vec<String>,

    /// Per-route {limit, window} overrides keyed by exact path.
    #[serde(default = "defaults::default_routes")]
    pub routes: HashMap<String, RouteLimit>,

    /// Requests tolerated inside one burst window before banning.
    #[serde(default = "defaults::default_burst_limit")]
    pub burst_limit: u32,

    #[serde(default = "defaults::default_burst_window_ms")]
    pub burst_window_ms: u64,

    /// Standard-deviation multiplier for the sudden-shift cadence check.
    #[serde(default = "defaults::default_anomaly_score_multiplier")]
    pub anomaly_score_multiplier: f64,

    #[serde(default = "defaults::default_ban_duration_ms")]
    pub ban_duration_ms: u64,

    /// Interval after which a profile's violation counters reset to zero.
    #[serde(default = "defaults::default_violation_reset_ms")]
    pub violation_reset_ms: u64,

    /// Violation score at which an identity is banned.
    #[serde(default = "defaults::default_max_violations")]
    pub max_violations: u32,
}

impl GuardSettings {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let settings: GuardSettings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations that would disable or corrupt the engine.
    /// Rule patterns are compiled separately, when the signature store is
    /// built, so a malformed pattern also fails before it is ever matched.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.window_ms > 0, "window_ms must be positive");
        ensure!(self.limit > 0, "limit must be positive");
        ensure!(
            self.max_payload_bytes > 0,
            "max_payload_bytes must be positive"
        );
        ensure!(
            !self.allowed_methods.is_empty(),
            "allowed_methods must not be empty"
        );
        ensure!(self.burst_limit > 0, "burst_limit must be positive");
        ensure!(self.burst_window_ms > 0, "burst_window_ms must be positive");
        ensure!(
            self.anomaly_score_multiplier.is_finite() && self.anomaly_score_multiplier > 0.0,
            "anomaly_score_multiplier must be a positive finite number"
        );
        ensure!(self.ban_duration_ms > 0, "ban_duration_ms must be positive");
        ensure!(
            self.violation_reset_ms > 0,
            "violation_reset_ms must be positive"
        );
        ensure!(self.max_violations > 0, "max_violations must be positive");

        for (path, route) in &self.routes {
            ensure!(
                route.limit > 0 && route.window_ms > 0,
                "route override for {} must have positive limit and window",
                path
            );
        }

        Ok(())
    }

    /// Merge a partial update into this configuration. Only fields present in
    /// the update override; everything else keeps its current value.
    pub fn merge(&mut self, update: SettingsUpdate) {
        if let Some(v) = update.window_ms {
            self.window_ms = v;
        }
        if let Some(v) = update.limit {
            self.limit = v;
        }
        if let Some(v) = update.max_payload_bytes {
            self.max_payload_bytes = v;
        }
        if let Some(v) = update.allowed_methods {
            self.allowed_methods = v;
        }
        if let Some(v) = update.rules {
            self.rules = v;
        }
        if let Some(v) = update.blocked_identities {
            self.blocked_identities = v;
        }
        if let Some(v) = update.allowed_identities {
            self.allowed_identities = v;
        }
        if let Some(v) = update.routes {
            self.routes = v;
        }
        if let Some(v) = update.burst_limit {
            self.burst_limit = v;
        }
        if let Some(v) = update.burst_window_ms {
            self.burst_window_ms = v;
        }
        if let Some(v) = update.anomaly_score_multiplier {
            self.anomaly_score_multiplier = v;
        }
        if let Some(v) = update.ban_duration_ms {
            self.ban_duration_ms = v;
        }
        if let Some(v) = update.violation_reset_ms {
            self.violation_reset_ms = v;
        }
        if let Some(v) = update.max_violations {
            self.max_violations = v;
        }
    }

    /// Effective {limit, window} for a route: the exact-path override if one
    /// is configured, the global defaults otherwise.
    pub fn route_limits(&self, path: &str) -> (u64, u64) {
        match self.routes.get(path) {
            Some(route) => (route.limit, route.window_ms),
            None => (self.limit, self.window_ms),
        }
    }
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            window_ms: defaults::default_window_ms(),
            limit: defaults::default_limit(),
            max_payload_bytes: defaults::default_max_payload_bytes(),
            allowed_methods: defaults::default_allowed_methods(),
            rules: defaults::default_rules(),
            blocked_identities: Vec::new(),
            allowed_identities: Vec::new(),
            routes: defaults::default_routes(),
            burst_limit: defaults::default_burst_limit(),
            burst_window_ms: defaults::default_burst_window_ms(),
            anomaly_score_multiplier: defaults::default_anomaly_score_multiplier(),
            ban_duration_ms: defaults::default_ban_duration_ms(),
            violation_reset_ms: defaults::default_violation_reset_ms(),
            max_violations: defaults::default_max_violations(),
        }
    }
}

/// Per-route rate-limit override.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteLimit {
    pub limit: u64,
    pub window_ms: u64,
}

/// One content-inspection rule: a case-insensitive pattern attributed to a
/// violation category.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignatureRule {
    pub category: String,
    pub pattern: String,
}

/// Partial configuration update; absent fields leave the live value intact.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub max_payload_bytes: Option<u64>,
    #[serde(default)]
    pub allowed_methods: Option<Vec<String>>,
    #[serde(default)]
    pub rules: Option<Vec<SignatureRule>>,
    #[serde(default)]
    pub blocked_identities: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_identities: Option<Vec<String>>,
    #[serde(default)]
    pub routes: Option<HashMap<String, RouteLimit>>,
    #[serde(default)]
    pub burst_limit: Option<u32>,
    #[serde(default)]
    pub burst_window_ms: Option<u64>,
    #[serde(default)]
    pub anomaly_score_multiplier: Option<f64>,
    #[serde(default)]
    pub ban_duration_ms: Option<u64>,
    #[serde(default)]
    pub violation_reset_ms: Option<u64>,
    #[serde(default)]
    pub max_violations: Option<u32>,
}

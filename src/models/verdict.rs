use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenyReason {
    /// Identity is in the active ban set.
    Banned,
    /// Identity is on the static block list.
    Blocklisted,
    /// Request cadence flagged by the anomaly detector.
    Anomaly,
    /// Accumulated violation score reached the configured maximum.
    MaxViolations,
    /// Burst count exceeded the burst threshold.
    BurstLimit,
    /// In-window request count exceeded the route limit.
    RateLimit,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Banned => write!(f, "banned"),
            DenyReason::Blocklisted => write!(f, "blocklisted"),
            DenyReason::Anomaly => write!(f, "anomaly"),
            DenyReason::MaxViolations => write!(f, "max_violations"),
            DenyReason::BurstLimit => write!(f, "burst_limit"),
            DenyReason::RateLimit => write!(f, "rate_limit"),
        }
    }
}

/// Policy infraction categories tracked per profile and process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Content matched a signature rule or structural check.
    Pattern,
    /// HTTP method outside the allowed set.
    Method,
    /// Payload larger than the configured maximum.
    Payload,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Pattern => write!(f, "pattern"),
            ViolationKind::Method => write!(f, "method"),
            ViolationKind::Payload => write!(f, "payload"),
        }
    }
}

/// Which cadence signal the anomaly detector fired on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalySignal {
    /// Last inter-request gap deviates sharply from the mean.
    SuddenShift,
    /// Sustained near-constant interval between requests.
    RoboticCadence,
    /// Gap distribution collapses onto very few distinct values.
    LowEntropy,
}

impl fmt::Display for AnomalySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalySignal::SuddenShift => write!(f, "sudden_shift"),
            AnomalySignal::RoboticCadence => write!(f, "robotic_cadence"),
            AnomalySignal::LowEntropy => write!(f, "low_entropy"),
        }
    }
}

/// Outcome of one engine evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Read-only copy of the process-wide protection counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Requests evaluated since start, including denied ones.
    pub total_requests: u64,

    /// Requests rejected because the identity was banned or block-listed.
    pub total_blocked: u64,

    /// Identities currently in the ban set.
    pub active_bans: u64,

    /// Signature/structural content violations observed.
    pub pattern_violations: u64,

    /// Disallowed-method violations observed.
    pub method_violations: u64,

    /// Oversized-payload violations observed.
    pub payload_violations: u64,

    /// Bans triggered by the anomaly detector.
    pub anomaly_bans: u64,

    /// When this engine instance was constructed.
    pub started_at: DateTime<Utc>,

    pub uptime_secs: u64,
}

use std::collections::HashMap;

use super::settings::{RouteLimit, SignatureRule};

pub fn default_window_ms() -> u64 {
    60_000
}

pub fn default_limit() -> u64 {
    100
}

pub fn default_max_payload_bytes() -> u64 {
    10_485_760
}

pub fn default_allowed_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

/// Signatures for the common injection families. Patterns are compiled
/// case-insensitively by the signature store.
pub fn default_rules() -> Vec<SignatureRule> {
    [
        ("sql_injection", r"union.*select|insert.*into|delete.*from"),
        ("code_execution", r"eval\(|exec\(|system\("),
        ("path_traversal", r"\.\."),
        ("script_injection", "<script"),
        ("data_uri", "data:text/html"),
        ("encoded_payload", "base64"),
    ]
    .iter()
    .map(|(category, pattern)| SignatureRule {
        category: category.to_string(),
        pattern: pattern.to_string(),
    })
    .collect()
}

pub fn default_routes() -> HashMap<String, RouteLimit> {
    let mut routes = HashMap::new();
    routes.insert(
        "/api".to_string(),
        RouteLimit {
            limit: 50,
            window_ms: 60_000,
        },
    );
    routes.insert(
        "/login".to_string(),
        RouteLimit {
            limit: 10,
            window_ms: 60_000,
        },
    );
    routes
}

pub fn default_burst_limit() -> u32 {
    10
}

pub fn default_burst_window_ms() -> u64 {
    1_000
}

pub fn default_anomaly_score_multiplier() -> f64 {
    2.5
}

pub fn default_ban_duration_ms() -> u64 {
    3_600_000
}

pub fn default_violation_reset_ms() -> u64 {
    3_600_000
}

pub fn default_max_violations() -> u32 {
    5
}

//! Behavioral request-protection engine: per-identity rate limiting,
//! content-signature inspection, and request-cadence anomaly detection.

pub mod analytics;
pub mod config;
pub mod models;
pub mod protection;
pub mod storage;

pub use config::settings::{GuardSettings, RouteLimit, SettingsUpdate, SignatureRule};
pub use models::request::RequestInfo;
pub use models::stats::StatsSnapshot;
pub use models::verdict::{Decision, DenyReason};
pub use protection::guard::Guard;

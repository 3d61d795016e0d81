//! CareCompass Core Components
//!
//! This crate provides the shared building blocks of CareCompass: the
//! patient-care records, server configuration, credential helpers, request
//! metrics and the weekly log summary used for charts.

mod config;
pub mod credentials;
mod error;
mod metrics;
pub mod model;
pub mod summary;

pub use config::{BackendKind, ServerConfig};
pub use error::CoreError;
pub use metrics::Metrics;
pub use model::{
    ClinicianNote, LogEntry, Patient, PatientStatus, PublicUser, Role, Session, ShareLink, User,
};
pub use summary::{status_from_logs, weekly_summary, DaySummary, WeeklyChart, WeeklySummary};

/// Current Unix time in milliseconds, the timestamp unit used by every record.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

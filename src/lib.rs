//! Latency diagnostics for a request-serving process
//!
//! Instrumentation for the two places a request spends its time outside the
//! handler (the database and the backend API), an inbound request lifecycle
//! layer, and an offline analyzer that turns the resulting log into a report.

pub mod config;
pub mod observability;
pub mod storage;
pub mod upstream;
pub mod http;
pub mod analyzer;

pub use analyzer::{LogAnalyzer, Report};
pub use config::AppConfig;
pub use observability::Emitter;
pub use storage::Database;
pub use upstream::CallTracker;

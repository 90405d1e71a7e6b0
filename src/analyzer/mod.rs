//! Log correlation subsystem.
//!
//! # Data Flow
//! ```text
//! log stream (file or stdin)
//!     → parser.rs (timestamp + first matching tag pattern → Entry)
//!     → engine.rs (LogAnalyzer: ledgers keyed by request/call id)
//!     → report.rs (Report: aggregates, findings, Display)
//! ```
//!
//! # Design Decisions
//! - One sequential pass, no concurrency
//! - Malformed or unrelated lines are skipped silently
//! - Terminal events without a start are dropped; starts without a terminal
//!   still count toward totals

pub mod engine;
pub mod parser;
pub mod report;

pub use engine::{LogAnalyzer, Ledger};
pub use parser::{parse_line, CallFailureKind, DbIncidentKind, Entry, ParsedLine};
pub use report::{Finding, Report};

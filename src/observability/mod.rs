//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! storage::Database / upstream::CallTracker / http middleware
//!     → events.rs (typed Event, fixed tag vocabulary)
//!     → Emitter → EventSink
//!         → TracingSink → logging.rs subscriber → log stream
//!         → MemorySink  → in-process capture (tests, replay)
//!
//! log stream (after the fact, out of process)
//!     → analyzer (correlation + report)
//! ```
//!
//! # Design Decisions
//! - Events are rendered as plain text lines so the log stream stays greppable
//!   and the analyzer needs nothing but the bytes
//! - The subscriber prefix is pinned to `YYYY-MM-DD HH:MM:SS LEVEL`
//! - Sinks are injected, never global

pub mod events;
pub mod logging;

pub use events::{Emitter, Event, EventSink, MemorySink, Record, Tag, TracingSink};

//! Outbound call subsystem.
//!
//! # Data Flow
//! ```text
//! handler (RequestContext + caller!())
//!     → tracker.rs (admission: id, registry, REQ_START)
//!     → reqwest client → backend API
//!     → tracker.rs (classification: REQ_SUCCESS / REQ_SLOW / REQ_TIMEOUT /
//!                   REQ_CONN_ERROR / REQ_EXCEPTION)
//!     → InFlight guard drop (deregistration, REQ_END)
//! ```
//!
//! # Design Decisions
//! - The tracker is an owned component passed to its users, not a global
//! - Caller attribution is captured at the call site by a macro
//! - The registry size is the live concurrency count at every observation point

pub mod caller;
pub mod context;
pub mod error;
pub mod tracker;

pub use caller::Caller;
pub use context::{ApiToken, RequestContext, RequestId, X_REQUEST_ID};
pub use error::CallError;
pub use tracker::{
    CallOptions, CallRecord, CallTracker, HttpMethod, UpstreamResponse, APITOKEN_HEADER,
};

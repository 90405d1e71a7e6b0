//! Inbound HTTP instrumentation subsystem.
//!
//! # Data Flow
//! ```text
//! Client request
//!     → middleware/request_lifecycle.rs (RequestId, HTTP_START)
//!     → application router (handlers extract RequestContext, call upstream)
//!     → middleware/request_lifecycle.rs (HTTP_EXCEPTION on 5xx or drop, HTTP_END)
//!     → Send to client (x-request-id header)
//! ```

pub mod middleware;

pub use middleware::{instrument, request_lifecycle, CANCELLED_STATUS};
pub use crate::upstream::context::{RequestId, X_REQUEST_ID};

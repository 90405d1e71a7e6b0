//! Inbound request middleware.

pub mod request_lifecycle;

pub use request_lifecycle::{instrument, request_lifecycle, CANCELLED_STATUS};

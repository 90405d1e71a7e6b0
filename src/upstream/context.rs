//! Per-request context consumed by outbound calls.
//!
//! The inbound request layer attaches a `RequestId` and, once the user is
//! authenticated, an `ApiToken` to the request extensions. Handlers pull both
//! out through the `RequestContext` extractor and pass it to the tracker.

use std::convert::Infallible;
use std::fmt;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the request id on responses.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Unique id of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credential of the user on whose behalf backend calls are made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    pub name: String,
    pub sig: String,
}

impl ApiToken {
    pub fn new(name: impl Into<String>, sig: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sig: sig.into(),
        }
    }

    /// Value of the `Apitoken` header.
    pub fn header_value(&self) -> String {
        serde_json::json!({ "name": self.name, "sig": self.sig }).to_string()
    }
}

/// What a handler knows about the request it is serving.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<RequestId>,
    pub token: Option<ApiToken>,
}

impl RequestContext {
    /// Context for work that is not tied to an inbound request.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: ApiToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            request_id: parts.extensions.get::<RequestId>().cloned(),
            token: parts.extensions.get::<ApiToken>().cloned(),
        })
    }
}

//! Instrumented outbound HTTP calls.
//!
//! # Responsibilities
//! - Assign every call a process-unique, strictly increasing id
//! - Keep a registry of in-flight calls whose size is the live concurrency
//! - Emit `REQ_START` / `REQ_SUCCESS` / `REQ_SLOW` / failure / `REQ_END` events
//! - Attach the caller's `Apitoken` header
//!
//! # Design Decisions
//! - Admission hands out an `InFlight` guard; its `Drop` deregisters the call
//!   and emits `REQ_END`, so cleanup also happens when the caller's future is
//!   cancelled mid-flight
//! - Locks are held only around counter/registry updates, never across I/O
//! - Errors are classified for logging and always returned unchanged

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::UpstreamConfig;
use crate::observability::events::{thread_label, Emitter, Event};
use crate::upstream::caller::Caller;
use crate::upstream::context::RequestContext;
use crate::upstream::error::CallError;

/// Name of the credential header sent to the backend.
pub const APITOKEN_HEADER: &str = "Apitoken";

/// Default slow-call threshold.
pub const DEFAULT_SLOW_CALL: Duration = Duration::from_secs(2);

/// Methods the tracker will issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(CallError::InvalidMethod(s.to_string())),
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional parts of an outbound call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Extra headers, applied over the credential header.
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
    /// Overrides the client's request timeout for this call.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An admitted, not yet finished call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub id: u64,
    pub method: HttpMethod,
    pub url: String,
    pub caller: Caller,
    pub thread: String,
    pub started_at: Instant,
}

/// A fully read backend response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CallError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[derive(Debug, Default)]
struct Registry {
    next_id: Mutex<u64>,
    calls: Mutex<HashMap<u64, CallRecord>>,
}

impl Registry {
    fn next_id(&self) -> u64 {
        let mut counter = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        *counter += 1;
        *counter
    }

    /// Insert and return the number of calls that were already in flight.
    fn admit(&self, record: CallRecord) -> usize {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let active = calls.len();
        calls.insert(record.id, record);
        active
    }

    /// Remove and return the number of calls still in flight.
    fn release(&self, id: u64) -> usize {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.remove(&id);
        calls.len()
    }

    fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn snapshot(&self) -> Vec<CallRecord> {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<CallRecord> = calls.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

/// Guard for one admitted call. Dropping it ends the call.
#[derive(Debug)]
struct InFlight {
    id: u64,
    started_at: Instant,
    registry: Arc<Registry>,
    emitter: Emitter,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let active_count = self.registry.release(self.id);
        self.emitter.emit(Event::ReqEnd {
            id: self.id,
            elapsed: self.started_at.elapsed(),
            active_count,
        });
    }
}

/// Issues outbound HTTP calls and accounts for every one of them.
///
/// One instance is shared (behind `Arc` or by reference) by everything in the
/// process that talks to the backend; its registry is the concurrency count.
#[derive(Debug)]
pub struct CallTracker {
    client: Client,
    base_url: Option<Url>,
    slow_threshold: Duration,
    registry: Arc<Registry>,
    emitter: Emitter,
}

impl CallTracker {
    /// Tracker over an existing client. Relative targets are rejected until a
    /// base URL is set.
    pub fn new(client: Client, emitter: Emitter) -> Self {
        Self {
            client,
            base_url: None,
            slow_threshold: DEFAULT_SLOW_CALL,
            registry: Arc::new(Registry::default()),
            emitter,
        }
    }

    /// Tracker with a client built from configuration.
    pub fn from_config(config: &UpstreamConfig, emitter: Emitter) -> Result<Self, CallError> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout());
        match config.request_timeout() {
            Some(timeout) => builder = builder.timeout(timeout),
            None => tracing::warn!("Outbound calls have no request timeout"),
        }
        let client = builder.build().map_err(CallError::Request)?;

        let base_url = Url::parse(&config.base_url).map_err(|e| CallError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self::new(client, emitter)
            .with_base_url(base_url)
            .with_slow_threshold(config.slow_call_threshold()))
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// Number of calls currently in flight.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// In-flight calls ordered by id.
    pub fn in_flight(&self) -> Vec<CallRecord> {
        self.registry.snapshot()
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        caller: Caller,
        target: &str,
        options: CallOptions,
    ) -> Result<UpstreamResponse, CallError> {
        self.call(ctx, caller, HttpMethod::Get, target, options).await
    }

    pub async fn post(
        &self,
        ctx: &RequestContext,
        caller: Caller,
        target: &str,
        options: CallOptions,
    ) -> Result<UpstreamResponse, CallError> {
        self.call(ctx, caller, HttpMethod::Post, target, options).await
    }

    pub async fn put(
        &self,
        ctx: &RequestContext,
        caller: Caller,
        target: &str,
        options: CallOptions,
    ) -> Result<UpstreamResponse, CallError> {
        self.call(ctx, caller, HttpMethod::Put, target, options).await
    }

    pub async fn delete(
        &self,
        ctx: &RequestContext,
        caller: Caller,
        target: &str,
        options: CallOptions,
    ) -> Result<UpstreamResponse, CallError> {
        self.call(ctx, caller, HttpMethod::Delete, target, options).await
    }

    /// Like `call`, but with the method given by name. Unsupported names fail
    /// before anything is tracked or sent.
    pub async fn call_named(
        &self,
        ctx: &RequestContext,
        caller: Caller,
        method: &str,
        target: &str,
        options: CallOptions,
    ) -> Result<UpstreamResponse, CallError> {
        let method = method.parse::<HttpMethod>()?;
        self.call(ctx, caller, method, target, options).await
    }

    /// Issue one tracked call and read the full response.
    ///
    /// Any HTTP status counts as success; only transport failures are errors.
    pub async fn call(
        &self,
        ctx: &RequestContext,
        caller: Caller,
        method: HttpMethod,
        target: &str,
        options: CallOptions,
    ) -> Result<UpstreamResponse, CallError> {
        let guard = self.admit(method, target, &caller);
        let started_at = guard.started_at;

        let outcome = match &ctx.token {
            None => Err(CallError::NoApiToken),
            Some(token) => {
                let mut headers = options.headers;
                headers.insert(0, (APITOKEN_HEADER.to_string(), token.header_value()));
                self.send(method, target, headers, options.query, options.json, options.timeout)
                    .await
            }
        };
        let elapsed = started_at.elapsed();

        match &outcome {
            Ok(response) => {
                self.emitter.emit(Event::ReqSuccess {
                    id: guard.id,
                    method: method.to_string(),
                    url: target.to_string(),
                    status: response.status.as_u16(),
                    elapsed,
                });
                if elapsed > self.slow_threshold {
                    self.emitter.emit(Event::ReqSlow {
                        id: guard.id,
                        method: method.to_string(),
                        url: target.to_string(),
                        elapsed,
                        caller: caller.to_string(),
                    });
                }
            }
            Err(err) => {
                let (id, method, url, caller, error) = (
                    guard.id,
                    method.to_string(),
                    target.to_string(),
                    caller.to_string(),
                    err.to_string(),
                );
                let event = match err {
                    CallError::Timeout(_) => Event::ReqTimeout { id, method, url, elapsed, caller, error },
                    CallError::Connect(_) => Event::ReqConnError { id, method, url, elapsed, caller, error },
                    _ => Event::ReqException { id, method, url, elapsed, caller, error },
                };
                self.emitter.emit(event);
            }
        }

        drop(guard);
        outcome
    }

    fn admit(&self, method: HttpMethod, target: &str, caller: &Caller) -> InFlight {
        let id = self.registry.next_id();
        let started_at = Instant::now();
        let thread = thread_label();

        let active_count = self.registry.admit(CallRecord {
            id,
            method,
            url: target.to_string(),
            caller: caller.clone(),
            thread: thread.clone(),
            started_at,
        });

        self.emitter.emit(Event::ReqStart {
            id,
            method: method.to_string(),
            url: target.to_string(),
            caller: caller.to_string(),
            thread,
            active_count,
        });

        InFlight {
            id,
            started_at,
            registry: self.registry.clone(),
            emitter: self.emitter.clone(),
        }
    }

    fn resolve(&self, target: &str) -> Result<Url, CallError> {
        let invalid = |reason: String| CallError::InvalidUrl {
            url: target.to_string(),
            reason,
        };
        match Url::parse(target) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => base.join(target).map_err(|e| invalid(e.to_string())),
                None => Err(invalid("relative url without a base url".to_string())),
            },
            Err(e) => Err(invalid(e.to_string())),
        }
    }

    async fn send(
        &self,
        method: HttpMethod,
        target: &str,
        headers: Vec<(String, String)>,
        query: Vec<(String, String)>,
        json: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<UpstreamResponse, CallError> {
        let url = self.resolve(target)?;

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let invalid = |reason: String| CallError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let header_value = HeaderValue::from_str(&value).map_err(|e| invalid(e.to_string()))?;
            header_map.insert(header_name, header_value);
        }

        let mut request = self.client.request(method.to_reqwest(), url).headers(header_map);
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(body) = json {
            request = request.json(&body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(CallError::from_transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(CallError::from_transport)?;

        Ok(UpstreamResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

//! Single-pass correlation of log lines into per-request and per-call state.

use std::collections::HashMap;
use std::io::{self, BufRead};

use chrono::NaiveDateTime;

use crate::analyzer::parser::{parse_line, CallFailureKind, DbIncidentKind, Entry};
use crate::analyzer::report::Report;

/// Map that remembers first-insertion order. Re-inserting a key replaces the
/// value in place.
#[derive(Debug, Clone)]
pub struct Ledger<V> {
    index: HashMap<String, usize>,
    entries: Vec<(String, V)>,
}

impl<V> Default for Ledger<V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<V> Ledger<V> {
    pub fn upsert(&mut self, key: String, value: V) {
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.index.get(key).map(|&pos| &mut self.entries[pos].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }
}

/// An inbound request seen through `HTTP_START`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub start: NaiveDateTime,
    pub method: String,
    pub path: String,
    pub end: Option<NaiveDateTime>,
    pub status: Option<String>,
    pub elapsed: Option<f64>,
}

/// An outbound call seen through `REQ_START`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub start: NaiveDateTime,
    pub method: String,
    pub url: String,
    pub caller: String,
    pub active_count_start: usize,
    pub end: Option<NaiveDateTime>,
    pub elapsed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlowCall {
    pub id: String,
    pub timestamp: NaiveDateTime,
    pub elapsed: f64,
    pub caller: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedOutCall {
    pub id: String,
    pub timestamp: NaiveDateTime,
    pub url: String,
    pub elapsed: f64,
    pub caller: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedCall {
    pub kind: CallFailureKind,
    pub id: String,
    pub timestamp: NaiveDateTime,
    pub url: String,
    pub elapsed: f64,
    pub caller: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpFailure {
    pub timestamp: NaiveDateTime,
    pub request_id: Option<String>,
    pub method: String,
    pub path: String,
    pub elapsed: Option<f64>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbIncident {
    pub kind: DbIncidentKind,
    pub timestamp: NaiveDateTime,
    pub thread: String,
    pub sql: String,
    pub elapsed: f64,
    pub error: Option<String>,
}

/// Accumulated state of one analysis run.
///
/// Feeding the same lines to a fresh analyzer always yields the same state,
/// and reading it never mutates it.
#[derive(Debug, Clone, Default)]
pub struct LogAnalyzer {
    http_requests: Ledger<HttpRequest>,
    api_calls: Ledger<ApiCall>,
    slow_calls: Vec<SlowCall>,
    timeouts: Vec<TimedOutCall>,
    call_failures: Vec<FailedCall>,
    http_failures: Vec<HttpFailure>,
    db_incidents: Vec<DbIncident>,
    concurrency_peak: usize,
}

impl LogAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a whole stream. Invalid UTF-8 is replaced, not rejected.
    pub fn analyze_reader<R: BufRead>(&mut self, mut reader: R) -> io::Result<()> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            self.analyze_line(&String::from_utf8_lossy(&buf));
        }
    }

    pub fn analyze_str(&mut self, text: &str) {
        for line in text.lines() {
            self.analyze_line(line);
        }
    }

    /// Fold one line into the state. Unrecognised lines are ignored.
    pub fn analyze_line(&mut self, line: &str) {
        let Some(parsed) = parse_line(line) else {
            return;
        };
        let timestamp = parsed.timestamp;

        match parsed.entry {
            Entry::HttpStart { request_id, method, path } => {
                self.http_requests.upsert(
                    request_id,
                    HttpRequest {
                        start: timestamp,
                        method,
                        path,
                        end: None,
                        status: None,
                        elapsed: None,
                    },
                );
            }
            Entry::HttpEnd { request_id, status, elapsed } => {
                if let Some(req) = self.http_requests.get_mut(&request_id) {
                    req.end = Some(timestamp);
                    req.status = Some(status);
                    req.elapsed = Some(elapsed);
                }
            }
            Entry::ReqStart { id, method, url, caller, active_count } => {
                self.api_calls.upsert(
                    id,
                    ApiCall {
                        start: timestamp,
                        method,
                        url,
                        caller,
                        active_count_start: active_count,
                        end: None,
                        elapsed: None,
                    },
                );
                self.concurrency_peak = self.concurrency_peak.max(active_count);
            }
            Entry::ReqEnd { id, elapsed } => {
                if let Some(call) = self.api_calls.get_mut(&id) {
                    call.end = Some(timestamp);
                    call.elapsed = Some(elapsed);
                }
            }
            Entry::ReqSlow { id, elapsed, caller } => self.slow_calls.push(SlowCall {
                id,
                timestamp,
                elapsed,
                caller,
            }),
            Entry::ReqTimeout { id, url, elapsed, caller } => self.timeouts.push(TimedOutCall {
                id,
                timestamp,
                url,
                elapsed,
                caller,
            }),
            Entry::CallFailure { kind, id, url, elapsed, caller, error } => {
                self.call_failures.push(FailedCall {
                    kind,
                    id,
                    timestamp,
                    url,
                    elapsed,
                    caller,
                    error,
                })
            }
            Entry::HttpException { request_id, method, path, elapsed, error } => {
                self.http_failures.push(HttpFailure {
                    timestamp,
                    request_id,
                    method,
                    path,
                    elapsed,
                    error,
                })
            }
            Entry::Db { kind, thread, sql, elapsed, error } => self.db_incidents.push(DbIncident {
                kind,
                timestamp,
                thread,
                sql,
                elapsed,
                error,
            }),
        }
    }

    pub fn http_requests(&self) -> &Ledger<HttpRequest> {
        &self.http_requests
    }

    pub fn api_calls(&self) -> &Ledger<ApiCall> {
        &self.api_calls
    }

    pub fn slow_calls(&self) -> &[SlowCall] {
        &self.slow_calls
    }

    pub fn timeouts(&self) -> &[TimedOutCall] {
        &self.timeouts
    }

    pub fn call_failures(&self) -> &[FailedCall] {
        &self.call_failures
    }

    pub fn http_failures(&self) -> &[HttpFailure] {
        &self.http_failures
    }

    pub fn db_incidents(&self) -> &[DbIncident] {
        &self.db_incidents
    }

    /// Highest `active_count` observed on any `REQ_START`.
    pub fn concurrency_peak(&self) -> usize {
        self.concurrency_peak
    }

    pub fn report(&self) -> Report {
        Report::build(self)
    }
}

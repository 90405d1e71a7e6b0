//! Diagnostic event vocabulary and emission.
//!
//! # Responsibilities
//! - Define the fixed tag vocabulary shared by all instrumentation points
//! - Render each event as a single `[TAG] key=value ...` line with stable field order
//! - Hand events to a pluggable sink (tracing by default)
//!
//! # Wire Format
//! ```text
//! YYYY-MM-DD HH:MM:SS <LEVEL> [TAG] key1=val1 key2=val2 ...
//! ```
//! The timestamp and level prefix is added by the sink (the tracing subscriber
//! installed in `logging.rs`, or `Record::to_line`).

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::Level;

use crate::observability::logging::TIMESTAMP_FORMAT;

/// Maximum number of SQL characters carried by `DB_*` events.
pub const SQL_PREVIEW_CHARS: usize = 50;

/// Tag vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    HttpStart,
    HttpEnd,
    HttpException,
    ReqStart,
    ReqEnd,
    ReqSuccess,
    ReqSlow,
    ReqTimeout,
    ReqConnError,
    ReqException,
    DbSlow,
    DbReconnect,
    DbError,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::HttpStart => "HTTP_START",
            Tag::HttpEnd => "HTTP_END",
            Tag::HttpException => "HTTP_EXCEPTION",
            Tag::ReqStart => "REQ_START",
            Tag::ReqEnd => "REQ_END",
            Tag::ReqSuccess => "REQ_SUCCESS",
            Tag::ReqSlow => "REQ_SLOW",
            Tag::ReqTimeout => "REQ_TIMEOUT",
            Tag::ReqConnError => "REQ_CONN_ERROR",
            Tag::ReqException => "REQ_EXCEPTION",
            Tag::DbSlow => "DB_SLOW",
            Tag::DbReconnect => "DB_RECONNECT",
            Tag::DbError => "DB_ERROR",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single diagnostic event. Immutable once built; fields are rendered in
/// declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    HttpStart {
        request_id: String,
        method: String,
        path: String,
        remote_addr: String,
    },
    HttpEnd {
        request_id: String,
        method: String,
        path: String,
        status: u16,
        elapsed: Duration,
    },
    HttpException {
        request_id: Option<String>,
        method: String,
        path: String,
        elapsed: Option<Duration>,
        error: String,
    },
    ReqStart {
        id: u64,
        method: String,
        url: String,
        caller: String,
        thread: String,
        active_count: usize,
    },
    ReqSuccess {
        id: u64,
        method: String,
        url: String,
        status: u16,
        elapsed: Duration,
    },
    ReqSlow {
        id: u64,
        method: String,
        url: String,
        elapsed: Duration,
        caller: String,
    },
    ReqTimeout {
        id: u64,
        method: String,
        url: String,
        elapsed: Duration,
        caller: String,
        error: String,
    },
    ReqConnError {
        id: u64,
        method: String,
        url: String,
        elapsed: Duration,
        caller: String,
        error: String,
    },
    ReqException {
        id: u64,
        method: String,
        url: String,
        elapsed: Duration,
        caller: String,
        error: String,
    },
    ReqEnd {
        id: u64,
        elapsed: Duration,
        active_count: usize,
    },
    DbSlow {
        thread: String,
        sql: String,
        elapsed: Duration,
    },
    DbReconnect {
        thread: String,
        sql: String,
        elapsed: Duration,
        error: String,
    },
    DbError {
        thread: String,
        sql: String,
        elapsed: Duration,
        error: String,
    },
}

impl Event {
    pub fn tag(&self) -> Tag {
        match self {
            Event::HttpStart { .. } => Tag::HttpStart,
            Event::HttpEnd { .. } => Tag::HttpEnd,
            Event::HttpException { .. } => Tag::HttpException,
            Event::ReqStart { .. } => Tag::ReqStart,
            Event::ReqSuccess { .. } => Tag::ReqSuccess,
            Event::ReqSlow { .. } => Tag::ReqSlow,
            Event::ReqTimeout { .. } => Tag::ReqTimeout,
            Event::ReqConnError { .. } => Tag::ReqConnError,
            Event::ReqException { .. } => Tag::ReqException,
            Event::ReqEnd { .. } => Tag::ReqEnd,
            Event::DbSlow { .. } => Tag::DbSlow,
            Event::DbReconnect { .. } => Tag::DbReconnect,
            Event::DbError { .. } => Tag::DbError,
        }
    }

    /// Severity the event is logged at.
    pub fn level(&self) -> Level {
        match self.tag() {
            Tag::HttpStart
            | Tag::HttpEnd
            | Tag::ReqStart
            | Tag::ReqSuccess
            | Tag::ReqEnd
            | Tag::DbSlow => Level::WARN,
            _ => Level::ERROR,
        }
    }

    /// Call id for `REQ_*` events.
    pub fn call_id(&self) -> Option<u64> {
        match self {
            Event::ReqStart { id, .. }
            | Event::ReqSuccess { id, .. }
            | Event::ReqSlow { id, .. }
            | Event::ReqTimeout { id, .. }
            | Event::ReqConnError { id, .. }
            | Event::ReqException { id, .. }
            | Event::ReqEnd { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Elapsed time as `1.234s`.
struct Secs(Duration);

impl fmt::Display for Secs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0.as_secs_f64())
    }
}

/// Collapse whitespace runs (including newlines) so free text stays on one line.
fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Token-safe rendering for values parsed as `\S+`.
fn token(text: &str) -> String {
    if text.is_empty() {
        return "-".to_string();
    }
    text.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Name of the current thread, or its id when unnamed.
pub fn thread_label() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

/// First `SQL_PREVIEW_CHARS` characters of a statement, on one line.
pub fn sql_preview(sql: &str) -> String {
    one_line(&sql.chars().take(SQL_PREVIEW_CHARS).collect::<String>())
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.tag())?;
        match self {
            Event::HttpStart { request_id, method, path, remote_addr } => write!(
                f,
                "request_id={} method={} path={} remote_addr={}",
                token(request_id), token(method), token(path), token(remote_addr)
            ),
            Event::HttpEnd { request_id, method, path, status, elapsed } => write!(
                f,
                "request_id={} method={} path={} status={} elapsed={}",
                token(request_id), token(method), token(path), status, Secs(*elapsed)
            ),
            Event::HttpException { request_id, method, path, elapsed, error } => {
                if let Some(request_id) = request_id {
                    write!(f, "request_id={} ", token(request_id))?;
                }
                write!(f, "method={} path={}", token(method), token(path))?;
                if let Some(elapsed) = elapsed {
                    write!(f, " elapsed={}", Secs(*elapsed))?;
                }
                write!(f, " error={}", one_line(error))
            }
            Event::ReqStart { id, method, url, caller, thread, active_count } => write!(
                f,
                "id={} method={} url={} caller={} thread={} active_count={}",
                id, method, token(url), token(caller), token(thread), active_count
            ),
            Event::ReqSuccess { id, method, url, status, elapsed } => write!(
                f,
                "id={} method={} url={} status={} elapsed={}",
                id, method, token(url), status, Secs(*elapsed)
            ),
            Event::ReqSlow { id, method, url, elapsed, caller } => write!(
                f,
                "id={} method={} url={} elapsed={} caller={}",
                id, method, token(url), Secs(*elapsed), token(caller)
            ),
            Event::ReqTimeout { id, method, url, elapsed, caller, error }
            | Event::ReqConnError { id, method, url, elapsed, caller, error }
            | Event::ReqException { id, method, url, elapsed, caller, error } => write!(
                f,
                "id={} method={} url={} elapsed={} caller={} error={}",
                id, method, token(url), Secs(*elapsed), token(caller), one_line(error)
            ),
            Event::ReqEnd { id, elapsed, active_count } => write!(
                f,
                "id={} elapsed={} active_count={}",
                id, Secs(*elapsed), active_count
            ),
            Event::DbSlow { thread, sql, elapsed } => write!(
                f,
                "thread={} sql={} elapsed={}",
                token(thread), sql_preview(sql), Secs(*elapsed)
            ),
            Event::DbReconnect { thread, sql, elapsed, error }
            | Event::DbError { thread, sql, elapsed, error } => write!(
                f,
                "thread={} sql={} elapsed={} error={}",
                token(thread), sql_preview(sql), Secs(*elapsed), one_line(error)
            ),
        }
    }
}

/// An event together with the moment it was emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: NaiveDateTime,
    pub level: Level,
    pub event: Event,
}

impl Record {
    /// Render the full log line, prefix included.
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.level,
            self.event
        )
    }
}

/// Destination for emitted records.
pub trait EventSink: Send + Sync {
    fn record(&self, record: Record);
}

/// Forwards events to the installed `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, record: Record) {
        let event = &record.event;
        if record.level == Level::ERROR {
            tracing::error!(target: "latency_doctor::events", "{}", event);
        } else {
            tracing::warn!(target: "latency_doctor::events", "{}", event);
        }
    }
}

/// Keeps every record in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.records().into_iter().map(|r| r.event).collect()
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.records().iter().map(|r| r.event.tag()).collect()
    }

    /// Rendered log lines, ready to be fed to the analyzer.
    pub fn lines(&self) -> Vec<String> {
        self.records().iter().map(Record::to_line).collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, record: Record) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Cheap, cloneable handle used by every instrumentation point.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn EventSink>,
}

impl Emitter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Emitter writing through `tracing`.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    /// Emitter capturing into a fresh `MemorySink`, returned alongside it.
    pub fn memory() -> (Self, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Self::new(sink.clone()), sink)
    }

    pub fn emit(&self, event: Event) {
        let record = Record {
            timestamp: chrono::Local::now().naive_local(),
            level: event.level(),
            event,
        };
        self.sink.record(record);
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_req_start_field_order() {
        let event = Event::ReqStart {
            id: 7,
            method: "GET".into(),
            url: "http://127.0.0.1:31132/api/v1/user".into(),
            caller: "view/user.rs:42:list_users".into(),
            thread: "tokio-runtime-worker".into(),
            active_count: 3,
        };
        assert_eq!(
            event.to_string(),
            "[REQ_START] id=7 method=GET url=http://127.0.0.1:31132/api/v1/user \
             caller=view/user.rs:42:list_users thread=tokio-runtime-worker active_count=3"
        );
        assert_eq!(event.level(), Level::WARN);
    }

    #[test]
    fn test_elapsed_three_decimals() {
        let event = Event::ReqEnd {
            id: 1,
            elapsed: Duration::from_millis(3500),
            active_count: 0,
        };
        assert_eq!(event.to_string(), "[REQ_END] id=1 elapsed=3.500s active_count=0");
    }

    #[test]
    fn test_sql_truncated_and_single_line() {
        let sql = "SELECT id, name, email\nFROM user WHERE name LIKE ? AND role IN (1, 2, 3) ORDER BY id";
        let event = Event::DbSlow {
            thread: "main".into(),
            sql: sql.into(),
            elapsed: Duration::from_millis(150),
        };
        let rendered = event.to_string();
        assert!(!rendered.contains('\n'));
        let preview = sql_preview(sql);
        assert!(preview.chars().count() <= SQL_PREVIEW_CHARS);
        assert!(rendered.contains(&format!("sql={} elapsed=0.150s", preview)));
    }

    #[test]
    fn test_http_exception_optional_fields() {
        let event = Event::HttpException {
            request_id: None,
            method: "POST".into(),
            path: "/team/create".into(),
            elapsed: None,
            error: "boom\nsecond line".into(),
        };
        assert_eq!(
            event.to_string(),
            "[HTTP_EXCEPTION] method=POST path=/team/create error=boom second line"
        );
        assert_eq!(event.level(), Level::ERROR);
    }

    #[test]
    fn test_thread_names_become_single_token() {
        let event = Event::DbError {
            thread: "worker pool 2".into(),
            sql: "SELECT 1".into(),
            elapsed: Duration::ZERO,
            error: "bad".into(),
        };
        assert!(event.to_string().starts_with("[DB_ERROR] thread=worker_pool_2 sql=SELECT 1"));
    }

    #[test]
    fn test_record_line_prefix() {
        let record = Record {
            timestamp: NaiveDate::from_ymd_opt(2026, 10, 14)
                .unwrap()
                .and_hms_opt(3, 5, 9)
                .unwrap(),
            level: Level::ERROR,
            event: Event::ReqSlow {
                id: 2,
                method: "POST".into(),
                url: "/api/v1/team".into(),
                elapsed: Duration::from_millis(2100),
                caller: "unknown".into(),
            },
        };
        assert_eq!(
            record.to_line(),
            "2026-10-14 03:05:09 ERROR [REQ_SLOW] id=2 method=POST url=/api/v1/team elapsed=2.100s caller=unknown"
        );
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let (emitter, sink) = Emitter::memory();
        emitter.emit(Event::ReqStart {
            id: 1,
            method: "GET".into(),
            url: "/a".into(),
            caller: "unknown".into(),
            thread: "main".into(),
            active_count: 0,
        });
        emitter.emit(Event::ReqEnd { id: 1, elapsed: Duration::ZERO, active_count: 0 });
        assert_eq!(sink.tags(), vec![Tag::ReqStart, Tag::ReqEnd]);
        assert_eq!(sink.events()[1].call_id(), Some(1));
    }
}

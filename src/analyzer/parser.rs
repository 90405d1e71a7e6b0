//! Line recognition for the diagnostic log stream.
//!
//! A line is recognised when it starts with a `YYYY-MM-DD HH:MM:SS` timestamp
//! and contains one of the known tags. Patterns are tried in a fixed order and
//! the first match wins; anything else is skipped.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::{Captures, Regex};

use crate::observability::logging::TIMESTAMP_FORMAT;

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})").expect("Invalid timestamp regex pattern")
});

static HTTP_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[HTTP_START\] request_id=(\S+) method=(\S+) path=(\S+)")
        .expect("Invalid HTTP_START regex pattern")
});

static HTTP_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[HTTP_END\] request_id=(\S+) method=(\S+) path=(\S+) status=(\S+) elapsed=([\d.]+)s")
        .expect("Invalid HTTP_END regex pattern")
});

static REQ_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[REQ_START\] id=(\d+) method=(\S+) url=(\S+) caller=(\S+) thread=(\S+) active_count=(\d+)",
    )
    .expect("Invalid REQ_START regex pattern")
});

static REQ_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[REQ_END\] id=(\d+) elapsed=([\d.]+)s").expect("Invalid REQ_END regex pattern")
});

static REQ_SLOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[REQ_SLOW\] id=(\d+) method=(\S+) url=(\S+) elapsed=([\d.]+)s caller=(\S+)")
        .expect("Invalid REQ_SLOW regex pattern")
});

static REQ_TIMEOUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[REQ_TIMEOUT\] id=(\d+) method=(\S+) url=(\S+) elapsed=([\d.]+)s(?: caller=(\S+))?")
        .expect("Invalid REQ_TIMEOUT regex pattern")
});

static REQ_CONN_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[REQ_CONN_ERROR\] id=(\d+) method=(\S+) url=(\S+) elapsed=([\d.]+)s caller=(\S+) error=(.*)$",
    )
    .expect("Invalid REQ_CONN_ERROR regex pattern")
});

static REQ_EXCEPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[REQ_EXCEPTION\] id=(\d+) method=(\S+) url=(\S+) elapsed=([\d.]+)s caller=(\S+) error=(.*)$",
    )
    .expect("Invalid REQ_EXCEPTION regex pattern")
});

static HTTP_EXCEPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[HTTP_EXCEPTION\] (?:request_id=(\S+) )?method=(\S+) path=(\S+)(?: elapsed=([\d.]+)s)? error=(.*)$",
    )
    .expect("Invalid HTTP_EXCEPTION regex pattern")
});

static DB_SLOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[DB_SLOW\] thread=(\S+) sql=(.*) elapsed=([\d.]+)s")
        .expect("Invalid DB_SLOW regex pattern")
});

static DB_RECONNECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[DB_RECONNECT\] thread=(\S+) sql=(.*?) elapsed=([\d.]+)s error=(.*)$")
        .expect("Invalid DB_RECONNECT regex pattern")
});

static DB_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[DB_ERROR\] thread=(\S+) sql=(.*?) elapsed=([\d.]+)s error=(.*)$")
        .expect("Invalid DB_ERROR regex pattern")
});

/// Which database incident a `DB_*` line reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbIncidentKind {
    Slow,
    Reconnect,
    Error,
}

/// Which failure a `REQ_CONN_ERROR` / `REQ_EXCEPTION` line reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFailureKind {
    Connection,
    Exception,
}

/// Fields recovered from one recognised line.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    HttpStart {
        request_id: String,
        method: String,
        path: String,
    },
    HttpEnd {
        request_id: String,
        status: String,
        elapsed: f64,
    },
    ReqStart {
        id: String,
        method: String,
        url: String,
        caller: String,
        active_count: usize,
    },
    ReqEnd {
        id: String,
        elapsed: f64,
    },
    ReqSlow {
        id: String,
        elapsed: f64,
        caller: String,
    },
    ReqTimeout {
        id: String,
        url: String,
        elapsed: f64,
        caller: Option<String>,
    },
    CallFailure {
        kind: CallFailureKind,
        id: String,
        url: String,
        elapsed: f64,
        caller: String,
        error: String,
    },
    HttpException {
        request_id: Option<String>,
        method: String,
        path: String,
        elapsed: Option<f64>,
        error: String,
    },
    Db {
        kind: DbIncidentKind,
        thread: String,
        sql: String,
        elapsed: f64,
        error: Option<String>,
    },
}

/// A recognised line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub timestamp: NaiveDateTime,
    pub entry: Entry,
}

/// Leading timestamp of a line, if it has a valid one.
pub fn parse_timestamp(line: &str) -> Option<NaiveDateTime> {
    let caps = TIMESTAMP_RE.captures(line)?;
    NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok()
}

/// Recognise a line. `None` for anything that is not a well-formed event.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim_end_matches(['\n', '\r']);
    let timestamp = parse_timestamp(line)?;
    let entry = parse_entry(line)?;
    Some(ParsedLine { timestamp, entry })
}

fn text(caps: &Captures<'_>, idx: usize) -> String {
    caps.get(idx).map(|m| m.as_str().to_string()).unwrap_or_default()
}

fn seconds(caps: &Captures<'_>, idx: usize) -> Option<f64> {
    caps.get(idx)?.as_str().parse().ok()
}

/// First matching pattern decides the entry. A match whose numeric fields do
/// not parse rejects the line instead of falling through to later patterns.
fn parse_entry(line: &str) -> Option<Entry> {
    if let Some(caps) = HTTP_START_RE.captures(line) {
        return Some(Entry::HttpStart {
            request_id: text(&caps, 1),
            method: text(&caps, 2),
            path: text(&caps, 3),
        });
    }

    if let Some(caps) = HTTP_END_RE.captures(line) {
        return Some(Entry::HttpEnd {
            request_id: text(&caps, 1),
            status: text(&caps, 4),
            elapsed: seconds(&caps, 5)?,
        });
    }

    if let Some(caps) = REQ_START_RE.captures(line) {
        return Some(Entry::ReqStart {
            id: text(&caps, 1),
            method: text(&caps, 2),
            url: text(&caps, 3),
            caller: text(&caps, 4),
            active_count: caps[6].parse().ok()?,
        });
    }

    if let Some(caps) = REQ_END_RE.captures(line) {
        return Some(Entry::ReqEnd {
            id: text(&caps, 1),
            elapsed: seconds(&caps, 2)?,
        });
    }

    if let Some(caps) = REQ_SLOW_RE.captures(line) {
        return Some(Entry::ReqSlow {
            id: text(&caps, 1),
            elapsed: seconds(&caps, 4)?,
            caller: text(&caps, 5),
        });
    }

    if let Some(caps) = REQ_TIMEOUT_RE.captures(line) {
        return Some(Entry::ReqTimeout {
            id: text(&caps, 1),
            url: text(&caps, 3),
            elapsed: seconds(&caps, 4)?,
            caller: caps.get(5).map(|m| m.as_str().to_string()),
        });
    }

    for (re, kind) in [
        (&*REQ_CONN_ERROR_RE, CallFailureKind::Connection),
        (&*REQ_EXCEPTION_RE, CallFailureKind::Exception),
    ] {
        if let Some(caps) = re.captures(line) {
            return Some(Entry::CallFailure {
                kind,
                id: text(&caps, 1),
                url: text(&caps, 3),
                elapsed: seconds(&caps, 4)?,
                caller: text(&caps, 5),
                error: text(&caps, 6),
            });
        }
    }

    if let Some(caps) = HTTP_EXCEPTION_RE.captures(line) {
        let elapsed = match caps.get(4) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };
        return Some(Entry::HttpException {
            request_id: caps.get(1).map(|m| m.as_str().to_string()),
            method: text(&caps, 2),
            path: text(&caps, 3),
            elapsed,
            error: text(&caps, 5),
        });
    }

    if let Some(caps) = DB_SLOW_RE.captures(line) {
        return Some(Entry::Db {
            kind: DbIncidentKind::Slow,
            thread: text(&caps, 1),
            sql: text(&caps, 2),
            elapsed: seconds(&caps, 3)?,
            error: None,
        });
    }

    for (re, kind) in [
        (&*DB_RECONNECT_RE, DbIncidentKind::Reconnect),
        (&*DB_ERROR_RE, DbIncidentKind::Error),
    ] {
        if let Some(caps) = re.captures(line) {
            return Some(Entry::Db {
                kind,
                thread: text(&caps, 1),
                sql: text(&caps, 2),
                elapsed: seconds(&caps, 3)?,
                error: Some(text(&caps, 4)),
            });
        }
    }

    None
}

//! SQLite driver built on rusqlite.
//!
//! # Responsibilities
//! - Open connections with a busy timeout
//! - Run statements, collecting rows or change counts
//! - Map SQLite result codes onto the `DbError` taxonomy
//!
//! # Transactions
//! Write statements open a transaction lazily when none is active, so changes
//! become visible only after `commit` and can be discarded with `rollback`.
//! Read-only statements run in autocommit mode unless a transaction is open.
//! Explicit transaction statements are passed through untouched; a `BEGIN`
//! issued while a lazily opened transaction is pending fails, so commit first.

use std::time::Duration;

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, ErrorCode, ToSql};

use crate::config::DatabaseConfig;
use crate::storage::driver::{Connection, Connector, Cursor, Value};
use crate::storage::error::{DbError, DbResult};

/// Opens SQLite connections to a fixed path.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: String,
    busy_timeout: Duration,
}

impl SqliteConnector {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            path: config.path.clone(),
            busy_timeout: config.busy_timeout(),
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Connector for SqliteConnector {
    type Connection = SqliteConnection;

    fn connect(&self) -> DbResult<SqliteConnection> {
        let conn = rusqlite::Connection::open(&self.path)
            .map_err(|e| DbError::Connect(format!("{}: {}", self.path, e)))?;
        conn.busy_timeout(self.busy_timeout).map_err(classify)?;
        tracing::debug!(path = %self.path, "SQLite connection opened");
        Ok(SqliteConnection { conn })
    }
}

/// A single rusqlite connection.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<Cursor> {
        let mut stmt = self.conn.prepare(sql).map_err(classify)?;
        if !stmt.readonly() && !is_transaction_control(sql) && self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN").map_err(classify)?;
        }

        let columns = stmt.column_count();
        if columns > 0 {
            let mut rows = stmt.query(params_from_iter(params.iter())).map_err(classify)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(classify)? {
                let mut values = Vec::with_capacity(columns);
                for idx in 0..columns {
                    let value: SqlValue = row.get(idx).map_err(classify)?;
                    values.push(Value::from(value));
                }
                out.push(values);
            }
            return Ok(Cursor::with_rows(out));
        }

        let changed = stmt.execute(params_from_iter(params.iter())).map_err(classify)?;
        let last_insert_id = if changed > 0 && is_insert(sql) {
            Some(self.conn.last_insert_rowid())
        } else {
            None
        };
        Ok(Cursor::with_changes(changed as u64, last_insert_id))
    }

    fn commit(&mut self) -> DbResult<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("COMMIT").map_err(classify)
    }

    fn rollback(&mut self) -> DbResult<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK").map_err(classify)
    }

    fn close(self) -> DbResult<()> {
        self.conn.close().map_err(|(_, e)| classify(e))
    }
}

/// `BEGIN`, `COMMIT`, `END`, `ROLLBACK`, `SAVEPOINT` or `RELEASE`. These run
/// as written, outside the implicit write transaction.
fn is_transaction_control(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    matches!(
        keyword.as_str(),
        "BEGIN" | "COMMIT" | "END" | "ROLLBACK" | "SAVEPOINT" | "RELEASE"
    )
}

fn is_insert(sql: &str) -> bool {
    let head: String = sql
        .trim_start()
        .chars()
        .take(7)
        .collect::<String>()
        .to_ascii_uppercase();
    head.starts_with("INSERT") || head.starts_with("REPLACE")
}

/// Map a rusqlite error onto the data access taxonomy.
pub fn classify(err: rusqlite::Error) -> DbError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => DbError::Integrity(err.to_string()),
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::CannotOpen
            | ErrorCode::NotADatabase => DbError::Operational(err.to_string()),
            _ => DbError::Statement(err.to_string()),
        },
        rusqlite::Error::InvalidParameterCount(_, _)
        | rusqlite::Error::InvalidParameterName(_)
        | rusqlite::Error::InvalidColumnIndex(_)
        | rusqlite::Error::InvalidColumnName(_)
        | rusqlite::Error::MultipleStatement => DbError::Statement(err.to_string()),
        _ => DbError::Driver(Box::new(err)),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Integer(i),
            SqlValue::Real(f) => Value::Real(f),
            SqlValue::Text(s) => Value::Text(s),
            SqlValue::Blob(b) => Value::Blob(b),
        }
    }
}

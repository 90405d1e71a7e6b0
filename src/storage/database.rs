//! Single-connection data access with reconnect-and-retry.
//!
//! # Responsibilities
//! - Lazily establish and memoise one connection
//! - Time every statement and flag slow ones (`DB_SLOW`)
//! - Reconnect and retry once on transient failures (`DB_RECONNECT`)
//! - Propagate every other failure unchanged (`DB_ERROR`)
//! - Absorb constraint violations in `insert`/`update` with a rollback
//!
//! # Concurrency
//! A `Database` owns its connection outright. All operations take `&mut self`
//! and the type is deliberately `!Sync`:
//!
//! ```compile_fail
//! fn assert_sync<T: Sync>() {}
//! assert_sync::<latency_doctor::storage::Database<latency_doctor::storage::SqliteConnector>>();
//! ```
//!
//! Callers that share one instance across tasks must wrap it in their own
//! lock; that serialization point is what the analyzer's concurrency
//! sections make visible.

use std::cell::Cell;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use crate::config::DatabaseConfig;
use crate::observability::events::{sql_preview, thread_label, Emitter, Event};
use crate::storage::driver::{Connection, Connector, Cursor, Row, Value};
use crate::storage::error::{DbError, DbResult, ErrorKind};
use crate::storage::sqlite::SqliteConnector;

/// Default slow-statement threshold.
pub const DEFAULT_SLOW_QUERY: Duration = Duration::from_millis(100);

/// Resilient data access layer over a single connection.
pub struct Database<C: Connector> {
    connector: C,
    conn: Option<C::Connection>,
    emitter: Emitter,
    slow_threshold: Duration,
    _single_owner: PhantomData<Cell<()>>,
}

impl Database<SqliteConnector> {
    /// SQLite-backed database from configuration.
    pub fn from_config(config: &DatabaseConfig, emitter: Emitter) -> Self {
        Database::new(SqliteConnector::from_config(config), emitter)
            .with_slow_threshold(config.slow_query_threshold())
    }
}

impl<C: Connector> Database<C> {
    /// Create a database handle. No connection is opened until first use.
    pub fn new(connector: C, emitter: Emitter) -> Self {
        Self {
            connector,
            conn: None,
            emitter,
            slow_threshold: DEFAULT_SLOW_QUERY,
            _single_owner: PhantomData,
        }
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Whether a connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn connection(&mut self) -> DbResult<&mut C::Connection> {
        if self.conn.is_none() {
            self.conn = Some(self.connector.connect()?);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::Connect("connection unavailable".to_string()))
    }

    fn attempt(&mut self, sql: &str, params: &[Value]) -> DbResult<Cursor> {
        self.connection()?.execute(sql, params)
    }

    /// Close and forget the current connection.
    fn discard_connection(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close() {
                tracing::debug!(error = %e, "Closing stale connection failed");
            }
        }
    }

    fn note_slow(&self, sql: &str, elapsed: Duration) {
        if elapsed > self.slow_threshold {
            self.emitter.emit(Event::DbSlow {
                thread: thread_label(),
                sql: sql_preview(sql),
                elapsed,
            });
        }
    }

    /// Run a statement.
    ///
    /// A transient failure closes the connection, reconnects and retries
    /// once; the retry's failure is returned as-is. Any other failure is
    /// returned unchanged. `Ok` always carries the cursor of a statement
    /// that actually ran.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<Cursor> {
        let started = Instant::now();

        match self.attempt(sql, params) {
            Ok(cursor) => {
                self.note_slow(sql, started.elapsed());
                Ok(cursor)
            }
            Err(err) if err.kind() == ErrorKind::Transient => {
                self.emitter.emit(Event::DbReconnect {
                    thread: thread_label(),
                    sql: sql_preview(sql),
                    elapsed: started.elapsed(),
                    error: err.to_string(),
                });
                self.discard_connection();

                let cursor = self.attempt(sql, params)?;
                self.note_slow(sql, started.elapsed());
                Ok(cursor)
            }
            Err(err) => {
                self.emitter.emit(Event::DbError {
                    thread: thread_label(),
                    sql: sql_preview(sql),
                    elapsed: started.elapsed(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Insert in a transaction and return the generated row id (`Some(0)` when
    /// the statement generated none).
    ///
    /// `Ok(None)` means a constraint rejected the row and the transaction was
    /// rolled back; nothing was written.
    pub fn insert(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<i64>> {
        let outcome = self.execute(sql, params).and_then(|cursor| {
            self.commit()?;
            Ok(cursor.last_insert_id().unwrap_or(0))
        });
        self.absorb_conflict(sql, outcome)
    }

    /// Update in a transaction and return the affected row count.
    ///
    /// `Ok(None)` means a constraint rejected the change and the transaction
    /// was rolled back.
    pub fn update(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<u64>> {
        let outcome = self.execute(sql, params).and_then(|cursor| {
            self.commit()?;
            Ok(cursor.rows_affected())
        });
        self.absorb_conflict(sql, outcome)
    }

    fn absorb_conflict<T>(&mut self, sql: &str, outcome: DbResult<T>) -> DbResult<Option<T>> {
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::ConstraintViolation => {
                tracing::warn!(sql = %sql_preview(sql), error = %err, "Constraint violation, rolling back");
                self.rollback()?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// All rows of a query.
    pub fn query_all(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let cursor = self.execute(sql, params)?;
        Ok(cursor.fetch_all())
    }

    /// First row of a query, if any.
    pub fn query_one(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<Row>> {
        Ok(self.query_all(sql, params)?.into_iter().next())
    }

    /// First column of every row.
    pub fn query_column(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Value>> {
        Ok(self
            .query_all(sql, params)?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    /// Commit the open transaction.
    ///
    /// A transient failure is treated as connection death: the connection is
    /// dropped and the failure is not reported.
    pub fn commit(&mut self) -> DbResult<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        match conn.commit() {
            Err(err) if err.kind() == ErrorKind::Transient => {
                tracing::warn!(error = %err, "Commit failed, dropping connection");
                self.conn = None;
                Ok(())
            }
            other => other,
        }
    }

    /// Roll back the open transaction. Same failure policy as `commit`.
    pub fn rollback(&mut self) -> DbResult<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        match conn.rollback() {
            Err(err) if err.kind() == ErrorKind::Transient => {
                tracing::warn!(error = %err, "Rollback failed, dropping connection");
                self.conn = None;
                Ok(())
            }
            other => other,
        }
    }
}

impl<C: Connector + std::fmt::Debug> std::fmt::Debug for Database<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connector", &self.connector)
            .field("connected", &self.conn.is_some())
            .field("slow_threshold", &self.slow_threshold)
            .finish()
    }
}

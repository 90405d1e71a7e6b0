//! Driver seam between the data access layer and a concrete database.
//!
//! # Responsibilities
//! - `Connector` opens connections; `Connection` runs statements
//! - `Value` / `Row` / `Cursor` carry parameters and results independent of the driver

use crate::storage::error::DbResult;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row.
pub type Row = Vec<Value>;

/// Outcome of a successfully executed statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cursor {
    rows: Vec<Row>,
    rows_affected: u64,
    last_insert_id: Option<i64>,
}

impl Cursor {
    /// Result of a statement that produced rows.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Result of a statement that modified rows.
    pub fn with_changes(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
            last_insert_id,
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn fetch_all(self) -> Vec<Row> {
        self.rows
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }
}

/// Opens connections. Called lazily and again after a transient failure.
pub trait Connector {
    type Connection: Connection;

    fn connect(&self) -> DbResult<Self::Connection>;
}

/// A live connection. Implementations map their native errors onto `DbError`
/// so that `DbError::kind` classifies them correctly.
pub trait Connection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<Cursor>;

    fn commit(&mut self) -> DbResult<()>;

    fn rollback(&mut self) -> DbResult<()>;

    /// Close the connection, releasing server/file resources.
    fn close(self) -> DbResult<()>
    where
        Self: Sized;
}

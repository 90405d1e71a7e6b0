//! Resilient data access subsystem.
//!
//! # Data Flow
//! ```text
//! application code
//!     → database.rs (Database: lazy connection, timing, classification, single retry)
//!     → driver.rs   (Connector / Connection seam, Value / Cursor)
//!     → sqlite.rs   (rusqlite-backed driver)
//!
//! Side channel:
//!     → observability::events (DB_SLOW, DB_RECONNECT, DB_ERROR)
//! ```
//!
//! # Design Decisions
//! - One connection per `Database`; every operation takes `&mut self` and the
//!   type is `!Sync`, so sharing it requires an explicit external lock
//! - Errors carry an `ErrorKind`; only `Transient` is retried, exactly once
//! - Constraint violations are absorbed by `insert`/`update` only
//! - Every other failure propagates unchanged; a returned value always means
//!   the statement really ran

pub mod database;
pub mod driver;
pub mod error;
pub mod sqlite;

pub use database::Database;
pub use driver::{Connection, Connector, Cursor, Row, Value};
pub use error::{DbError, DbResult, ErrorKind};
pub use sqlite::{SqliteConnection, SqliteConnector};

//! Row Streaming Executor
//!
//! Runs one SQL statement with named parameters and exposes the result as a
//! pull-driven [`RowStream`] of [`Record`]s.
//!
//! # Resource Scoping
//! A [`Cursor`] owns the connection it was produced from. The stream drops
//! the cursor (and with it the reader, statement and connection) as soon as
//! the row limit is reached, the result is exhausted, or a fetch fails.
//! Dropping the stream early releases the same resources.
//!
//! # Stateless Design
//! Every call to [`execute`] creates and opens a fresh connection. Streams
//! are not restartable; re-running means calling [`execute`] again.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{DbDriveError, Result};
use crate::value::{NamedParam, Record, Value};

/// Default statement timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default rows fetched per round trip
pub const DEFAULT_FETCH_SIZE: usize = 50;

/// Creates unopened connections for one configured database
pub trait ConnectionFactory: Send + Sync {
    /// Provider name used in diagnostics
    fn provider(&self) -> &'static str;

    /// Create a connection without opening it
    fn create(&self) -> Result<Box<dyn Connection>>;
}

/// A single database connection
pub trait Connection {
    fn open(&mut self) -> Result<()>;

    /// Prepare and execute `statement`, handing ownership to the cursor
    fn execute(self: Box<Self>, statement: &Statement<'_>) -> Result<Box<dyn Cursor>>;
}

/// Forward-only reader over an executed statement
///
/// Dropping the cursor releases the reader and the owning connection.
pub trait Cursor {
    fn columns(&self) -> &[String];

    /// Next row, or `None` once the result is exhausted
    fn fetch(&mut self) -> Result<Option<Vec<Value>>>;
}

/// A prepared statement request
#[derive(Debug, Clone, Copy)]
pub struct Statement<'a> {
    /// SQL text with `:name` placeholders
    pub sql: &'a str,
    pub params: &'a [NamedParam],
    pub timeout: Duration,
    /// Rows per round trip
    pub fetch_size: usize,
}

/// Maximum number of rows a stream yields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowLimit {
    #[default]
    Unlimited,
    Max(usize),
}

impl RowLimit {
    /// Non-positive counts mean no limit
    #[must_use]
    pub fn from_signed(count: i64) -> Self {
        usize::try_from(count).ok().filter(|&n| n > 0).map_or(Self::Unlimited, Self::Max)
    }

    /// Whether another row may be yielded after `yielded` rows
    #[must_use]
    pub const fn allows(self, yielded: usize) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Max(max) => yielded < max,
        }
    }
}

/// Per-call execution options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub timeout: Duration,
    pub fetch_size: usize,
    pub limit: RowLimit,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT, fetch_size: DEFAULT_FETCH_SIZE, limit: RowLimit::Unlimited }
    }
}

/// Execute `sql` and stream its rows
///
/// Parameter values are already type-mapped by [`NamedParam`]; duplicate
/// parameter names are rejected here, before any connection is created.
pub fn execute(
    factory: &dyn ConnectionFactory,
    sql: &str,
    params: &[NamedParam],
    options: &QueryOptions,
) -> Result<RowStream> {
    let mut seen = HashSet::new();
    if let Some(dup) = params.iter().find(|p| !seen.insert(p.name.as_str())) {
        return Err(DbDriveError::invalid_input(format!("Parameter '{}' bound twice", dup.name)));
    }

    trace!(
        provider = factory.provider(),
        sql,
        params = ?params.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        "executing statement"
    );

    let statement = Statement {
        sql,
        params,
        timeout: options.timeout,
        fetch_size: options.fetch_size.max(1),
    };

    let mut connection = factory.create()?;
    connection.open()?;
    let cursor = connection.execute(&statement)?;

    Ok(RowStream::new(cursor, options.limit))
}

/// Lazy, one-pass sequence of records
pub struct RowStream {
    cursor: Option<Box<dyn Cursor>>,
    columns: Arc<[String]>,
    limit: RowLimit,
    yielded: usize,
}

impl RowStream {
    fn new(cursor: Box<dyn Cursor>, limit: RowLimit) -> Self {
        let columns: Arc<[String]> = cursor.columns().into();
        let mut stream = Self { cursor: Some(cursor), columns, limit, yielded: 0 };
        if !limit.allows(0) {
            stream.release();
        }
        stream
    }

    /// Column names of the result set
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// True while the underlying cursor is still held
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.cursor.is_some()
    }

    /// Rows handed out so far
    #[must_use]
    pub const fn yielded(&self) -> usize {
        self.yielded
    }

    fn release(&mut self) {
        if self.cursor.take().is_some() {
            trace!(rows = self.yielded, "cursor released");
        }
    }
}

impl Iterator for RowStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;

        let values = match cursor.fetch() {
            Ok(Some(values)) => values,
            Ok(None) => {
                self.release();
                return None;
            }
            Err(e) => {
                self.release();
                return Some(Err(e));
            }
        };

        if values.len() != self.columns.len() {
            self.release();
            return Some(Err(DbDriveError::backend(
                "executor",
                format!("row has {} values for {} columns", values.len(), self.columns.len()),
            )));
        }

        self.yielded += 1;
        if !self.limit.allows(self.yielded) {
            self.release();
        }

        Some(Ok(Record::new(Arc::clone(&self.columns), values)))
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns)
            .field("limit", &self.limit)
            .field("yielded", &self.yielded)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFactory;
    use pretty_assertions::assert_eq;

    fn ten_rows() -> Vec<Vec<Value>> {
        (1..=10).map(|i| vec![Value::Int(i), Value::Text(format!("row {i}"))]).collect()
    }

    #[test]
    fn test_row_limit_from_signed() {
        assert_eq!(RowLimit::from_signed(3), RowLimit::Max(3));
        assert_eq!(RowLimit::from_signed(0), RowLimit::Unlimited);
        assert_eq!(RowLimit::from_signed(-1), RowLimit::Unlimited);
    }

    #[test]
    fn test_limit_three_of_ten_releases_resources() {
        let factory = ScriptedFactory::new("fake").on("FROM T", &["ID", "LABEL"], ten_rows());
        let tracker = factory.tracker();

        let options = QueryOptions { limit: RowLimit::Max(3), ..QueryOptions::default() };
        let mut stream = execute(&factory, "SELECT * FROM T", &[], &options).unwrap();

        let rows: Vec<Record> = stream.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].get("ID"), Some(&Value::Int(3)));
        assert!(!stream.is_open());
        assert_eq!(tracker.created(), 1);
        assert_eq!(tracker.opened(), 1);
        assert_eq!(tracker.closed(), 1);
        assert_eq!(tracker.fetched(), 3, "reader must not be drained past the limit");
    }

    #[test]
    fn test_unlimited_stream_releases_on_exhaustion() {
        let factory = ScriptedFactory::new("fake").on("FROM T", &["ID", "LABEL"], ten_rows());
        let tracker = factory.tracker();

        let stream = execute(&factory, "SELECT * FROM T", &[], &QueryOptions::default()).unwrap();
        assert_eq!(stream.count(), 10);
        assert_eq!(tracker.closed(), 1);
    }

    #[test]
    fn test_abandoned_stream_releases_on_drop() {
        let factory = ScriptedFactory::new("fake").on("FROM T", &["ID", "LABEL"], ten_rows());
        let tracker = factory.tracker();

        let mut stream = execute(&factory, "SELECT * FROM T", &[], &QueryOptions::default()).unwrap();
        assert!(stream.next().is_some());
        assert_eq!(tracker.closed(), 0);
        drop(stream);
        assert_eq!(tracker.closed(), 1);
    }

    #[test]
    fn test_mid_stream_error_releases_and_fuses() {
        let factory = ScriptedFactory::new("fake").fail_after(
            "FROM T",
            &["ID", "LABEL"],
            ten_rows().into_iter().take(2).collect(),
            "ORA-03113: end-of-file on communication channel",
        );
        let tracker = factory.tracker();

        let mut stream = execute(&factory, "SELECT * FROM T", &[], &QueryOptions::default()).unwrap();
        assert!(stream.next().unwrap().is_ok());
        assert!(stream.next().unwrap().is_ok());
        let err = stream.next().unwrap().unwrap_err();
        assert!(err.message().contains("ORA-03113"));
        assert!(stream.next().is_none());
        assert_eq!(tracker.closed(), 1);
    }

    #[test]
    fn test_execute_failure_releases_connection() {
        let factory = ScriptedFactory::new("fake").fail("FROM T", "relation does not exist");
        let tracker = factory.tracker();

        let err = execute(&factory, "SELECT * FROM T", &[], &QueryOptions::default()).unwrap_err();
        assert!(matches!(err, DbDriveError::Backend { .. }));
        assert_eq!(tracker.created(), 1);
        assert_eq!(tracker.closed(), 1);
    }

    #[test]
    fn test_duplicate_params_rejected_before_io() {
        let factory = ScriptedFactory::new("fake");
        let tracker = factory.tracker();
        let params = [NamedParam::new("a", 1), NamedParam::new("a", 2)];

        let err = execute(&factory, "SELECT :a", &params, &QueryOptions::default()).unwrap_err();
        assert!(matches!(err, DbDriveError::InvalidInput(_)));
        assert_eq!(tracker.created(), 0);
    }

    #[test]
    fn test_statement_carries_options() {
        let factory = ScriptedFactory::new("fake").on("FROM T", &["ID"], vec![]);
        let tracker = factory.tracker();
        let options = QueryOptions {
            timeout: Duration::from_secs(5),
            fetch_size: 7,
            limit: RowLimit::Unlimited,
        };

        let params = [NamedParam::new("owner", "HR")];
        let _ = execute(&factory, "SELECT * FROM T WHERE OWNER = :owner", &params, &options)
            .unwrap()
            .count();

        let executed = tracker.statements();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].timeout, Duration::from_secs(5));
        assert_eq!(executed[0].fetch_size, 7);
        assert_eq!(executed[0].params, params.to_vec());
    }

    #[test]
    fn test_open_failure_propagates() {
        let factory = ScriptedFactory::new("fake").fail_open("listener refused the connection");
        let tracker = factory.tracker();

        let err = execute(&factory, "SELECT 1", &[], &QueryOptions::default()).unwrap_err();
        assert!(matches!(err, DbDriveError::ConnectionFailed(_)));
        assert_eq!(tracker.closed(), 1);
    }
}

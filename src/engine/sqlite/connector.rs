//! Native `SQLite` connector
//!
//! Databases are opened read-only. `:name` placeholders are bound natively
//! by `rusqlite`; `busy_timeout` carries the statement timeout.
//!
//! # Paging
//! A `rusqlite` statement borrows its connection, so a cursor cannot hold an
//! open statement. Queries (`SELECT`, `WITH`, `VALUES`) are instead wrapped as
//! `SELECT * FROM (<sql>) LIMIT :limit OFFSET :offset` and read one page of
//! `bulk_read_limit` rows at a time. Other statements (`PRAGMA`, `EXPLAIN`)
//! are read in a single batch.

use std::collections::VecDeque;

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection as SqliteConnection, OpenFlags};

use crate::error::{DbDriveError, Result};
use crate::executor::{Connection, ConnectionFactory, Cursor, Statement};
use crate::value::{NamedParam, ParamValue, Value};

const LIMIT_PARAM: &str = ":__dbdrive_limit";
const OFFSET_PARAM: &str = ":__dbdrive_offset";

fn sqlite_error(context: &str, e: &rusqlite::Error) -> DbDriveError {
    DbDriveError::backend("sqlite", format!("{context}: {e}"))
}

/// Connection factory for one `SQLite` database file
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: String,
}

impl SqliteConnector {
    /// `path` is a file path, `:memory:`, or a `file:` URI
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl ConnectionFactory for SqliteConnector {
    fn provider(&self) -> &'static str {
        "sqlite"
    }

    fn create(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(SqliteHandle { path: self.path.clone(), conn: None }))
    }
}

struct SqliteHandle {
    path: String,
    conn: Option<SqliteConnection>,
}

impl Connection for SqliteHandle {
    fn open(&mut self) -> Result<()> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = SqliteConnection::open_with_flags(&self.path, flags).map_err(|e| {
            DbDriveError::connection_failed(format!("Failed to open SQLite database: {e}"))
        })?;
        self.conn = Some(conn);
        Ok(())
    }

    fn execute(self: Box<Self>, statement: &Statement<'_>) -> Result<Box<dyn Cursor>> {
        let conn = self
            .conn
            .ok_or_else(|| DbDriveError::connection_failed("SQLite connection was not opened"))?;
        conn.busy_timeout(statement.timeout)
            .map_err(|e| sqlite_error("Failed to set timeout", &e))?;

        let sql = statement.sql.trim().trim_end_matches(';').trim_end();
        let paged = is_query(sql).then(|| {
            format!("SELECT * FROM ({sql}) LIMIT {LIMIT_PARAM} OFFSET {OFFSET_PARAM}")
        });
        let page_size = statement.fetch_size.max(1);

        let mut cursor = SqliteCursor {
            sql: paged.clone().unwrap_or_else(|| sql.to_string()),
            paged: paged.is_some(),
            params: statement.params.to_vec(),
            columns: Vec::new(),
            buffer: VecDeque::new(),
            offset: 0,
            page_size,
            exhausted: false,
            conn,
        };
        cursor.load_page()?;
        Ok(Box::new(cursor))
    }
}

/// Statements that can be wrapped in a sub-select
fn is_query(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_uppercase();
    matches!(keyword.as_str(), "SELECT" | "WITH" | "VALUES")
}

struct SqliteCursor {
    sql: String,
    paged: bool,
    params: Vec<NamedParam>,
    columns: Vec<String>,
    buffer: VecDeque<Vec<Value>>,
    offset: usize,
    page_size: usize,
    exhausted: bool,
    conn: SqliteConnection,
}

impl SqliteCursor {
    fn load_page(&mut self) -> Result<()> {
        let mut stmt =
            self.conn.prepare(&self.sql).map_err(|e| sqlite_error("Failed to prepare statement", &e))?;

        for param in &self.params {
            bind(&mut stmt, &format!(":{}", param.name), &param.value)?;
        }
        if self.paged {
            bind(&mut stmt, LIMIT_PARAM, i64::try_from(self.page_size).unwrap_or(i64::MAX))?;
            bind(&mut stmt, OFFSET_PARAM, i64::try_from(self.offset).unwrap_or(i64::MAX))?;
        }

        if self.columns.is_empty() {
            self.columns = stmt.column_names().into_iter().map(String::from).collect();
        }
        let width = stmt.column_count();

        let mut rows = stmt.raw_query();
        let mut loaded = 0;
        while let Some(row) = rows.next().map_err(|e| sqlite_error("Failed to fetch row", &e))? {
            let values = (0..width)
                .map(|idx| row.get_ref(idx).map(column_value))
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| sqlite_error("Failed to read column", &e))?;
            self.buffer.push_back(values);
            loaded += 1;
        }

        self.offset += loaded;
        self.exhausted = !self.paged || loaded < self.page_size;
        Ok(())
    }
}

fn bind<T: ToSql>(stmt: &mut rusqlite::Statement<'_>, name: &str, value: T) -> Result<()> {
    if let Some(idx) =
        stmt.parameter_index(name).map_err(|e| sqlite_error("Failed to resolve parameter", &e))?
    {
        stmt.raw_bind_parameter(idx, value)
            .map_err(|e| sqlite_error(&format!("Failed to bind {name}"), &e))?;
    }
    Ok(())
}

impl Cursor for SqliteCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch(&mut self) -> Result<Option<Vec<Value>>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.load_page()?;
        }
        Ok(self.buffer.pop_front())
    }
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => match std::str::from_utf8(t) {
            Ok(s) => Value::Text(s.to_string()),
            Err(_) => Value::Bytes(t.to_vec()),
        },
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

impl ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqlValue::Null),
            Self::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Self::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Self::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Timestamp(t) => {
                ToSqlOutput::Owned(SqlValue::Text(t.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            }
            Self::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Self::Uuid(u) => ToSqlOutput::Owned(SqlValue::Text(u.to_string())),
        })
    }
}

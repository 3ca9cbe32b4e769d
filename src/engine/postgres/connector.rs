//! Native `PostgreSQL` connector
//!
//! Wraps `tokio-postgres` behind the blocking [`Connection`] contract. Each
//! connection owns a current-thread Tokio runtime; the connection task and
//! every statement are driven through `block_on`, so no global runtime is
//! required by callers.
//!
//! # Placeholders
//! Statements are written with `:name` placeholders. They are rewritten to
//! positional `$n` before preparation, skipping quoted text, comments and
//! `::` casts. A name used twice maps to the same position.
//!
//! # Type Handling
//! Bound values are converted against the parameter types reported by the
//! prepared statement. Result columns are decoded by column type; anything
//! without a dedicated mapping is read from its binary form as UTF-8 text,
//! or bytes when it is not valid UTF-8.

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::pin::Pin;
use std::time::Duration;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row, RowStream as PgRows};
use tracing::warn;
use uuid::Uuid;

use crate::error::{DbDriveError, Result};
use crate::executor::{Connection, ConnectionFactory, Cursor, Statement, DEFAULT_TIMEOUT};
use crate::value::{ParamValue, Value};

type BoxError = Box<dyn StdError + Sync + Send>;

fn pg_error(context: &str, e: &tokio_postgres::Error) -> DbDriveError {
    DbDriveError::backend("postgres", format!("{context}: {e}"))
}

/// Connection factory for one `PostgreSQL` database
#[derive(Clone)]
pub struct PgConnector {
    config: Config,
}

impl PgConnector {
    /// Parse a libpq-style connection string (`key=value` pairs or a
    /// `postgresql://` URL)
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut config: Config = connection_string.parse().map_err(|e| {
            DbDriveError::invalid_input(format!("Invalid PostgreSQL connection string: {e}"))
        })?;
        if config.get_connect_timeout().is_none() {
            config.connect_timeout(DEFAULT_TIMEOUT);
        }
        Ok(Self { config })
    }
}

impl std::fmt::Debug for PgConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnector")
            .field("user", &self.config.get_user())
            .field("dbname", &self.config.get_dbname())
            .finish_non_exhaustive()
    }
}

impl ConnectionFactory for PgConnector {
    fn provider(&self) -> &'static str {
        "postgres"
    }

    fn create(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(PgConnection { config: self.config.clone(), session: None }))
    }
}

struct PgConnection {
    config: Config,
    session: Option<(Client, Runtime)>,
}

impl Connection for PgConnection {
    fn open(&mut self) -> Result<()> {
        let runtime = Builder::new_current_thread().enable_all().build().map_err(|e| {
            DbDriveError::connection_failed(format!("Failed to start PostgreSQL runtime: {e}"))
        })?;

        let (client, connection) = runtime.block_on(self.config.connect(NoTls)).map_err(|e| {
            DbDriveError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
        })?;

        runtime.spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection closed with error");
            }
        });

        self.session = Some((client, runtime));
        Ok(())
    }

    fn execute(self: Box<Self>, statement: &Statement<'_>) -> Result<Box<dyn Cursor>> {
        let (client, runtime) = self
            .session
            .ok_or_else(|| DbDriveError::connection_failed("PostgreSQL connection was not opened"))?;

        let (sql, order) = rewrite_placeholders(statement.sql);
        let values = order
            .iter()
            .map(|name| {
                statement
                    .params
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(name))
                    .map(|p| &p.value)
                    .ok_or_else(|| DbDriveError::invalid_input(format!("No value bound for ':{name}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        let timeout = statement.timeout;
        let started = runtime.block_on(async {
            tokio::time::timeout(timeout, async {
                let prepared = client
                    .prepare(&sql)
                    .await
                    .map_err(|e| pg_error("Failed to prepare statement", &e))?;
                let params = prepared
                    .params()
                    .iter()
                    .zip(&values)
                    .map(|(ty, value)| to_pg(value, ty))
                    .collect::<Result<Vec<_>>>()?;
                let columns: Vec<String> =
                    prepared.columns().iter().map(|c| c.name().to_string()).collect();
                let rows = client
                    .query_raw(&prepared, params)
                    .await
                    .map_err(|e| pg_error("Failed to execute statement", &e))?;
                Ok::<_, DbDriveError>((columns, rows))
            })
            .await
        });

        let (columns, rows) = started.map_err(|_| {
            DbDriveError::backend("postgres", format!("Statement exceeded timeout of {timeout:?}"))
        })??;

        Ok(Box::new(PgCursor { rows: Box::pin(rows), columns, timeout, _client: client, runtime }))
    }
}

/// Rewrite `:name` placeholders to `$n`, returning the names in position order
pub(crate) fn rewrite_placeholders(sql: &str) -> (String, Vec<String>) {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b':' if bytes.get(i + 1) == Some(&b':') => i += 2,
            b':' if bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') => {
                let end = bytes[i + 1..]
                    .iter()
                    .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
                    .map_or(bytes.len(), |p| i + 1 + p);
                let name = &sql[i + 1..end];
                let position = match names.iter().position(|n| n.eq_ignore_ascii_case(name)) {
                    Some(p) => p + 1,
                    None => {
                        names.push(name.to_string());
                        names.len()
                    }
                };
                out.push_str(&sql[copied..i]);
                let _ = write!(out, "${position}");
                copied = end;
                i = end;
            }
            _ => i += 1,
        }
    }

    out.push_str(&sql[copied..]);
    (out, names)
}

/// SQL NULL accepted for any parameter type
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(&self, _: &Type, _: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        Ok(IsNull::Yes)
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn out_of_range(value: i64, ty: &Type) -> DbDriveError {
    DbDriveError::invalid_input(format!("Value {value} is out of range for {ty}"))
}

/// Convert a bound value for a parameter of type `ty`
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn to_pg(value: &ParamValue, ty: &Type) -> Result<Box<dyn ToSql + Sync + Send>> {
    Ok(match value {
        ParamValue::Null => Box::new(SqlNull),
        ParamValue::Bool(b) => Box::new(*b),
        ParamValue::Int(i) => match *ty {
            Type::INT2 => Box::new(i16::try_from(*i).map_err(|_| out_of_range(*i, ty))?),
            Type::INT4 => Box::new(i32::try_from(*i).map_err(|_| out_of_range(*i, ty))?),
            Type::OID => Box::new(u32::try_from(*i).map_err(|_| out_of_range(*i, ty))?),
            Type::FLOAT4 => Box::new(*i as f32),
            Type::FLOAT8 => Box::new(*i as f64),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Box::new(i.to_string()),
            _ => Box::new(*i),
        },
        ParamValue::Float(f) => match *ty {
            Type::FLOAT4 => Box::new(*f as f32),
            _ => Box::new(*f),
        },
        ParamValue::Text(s) => match *ty {
            Type::UUID => Box::new(Uuid::parse_str(s).map_err(|e| {
                DbDriveError::invalid_input(format!("'{s}' is not a valid UUID: {e}"))
            })?),
            _ => Box::new(s.clone()),
        },
        ParamValue::Timestamp(t) => match *ty {
            Type::TIMESTAMPTZ => Box::new(DateTime::<Utc>::from_naive_utc_and_offset(*t, Utc)),
            Type::DATE => Box::new(t.date()),
            _ => Box::new(*t),
        },
        ParamValue::Bytes(b) => Box::new(b.clone()),
        ParamValue::Uuid(u) => match *ty {
            Type::UUID => Box::new(*u),
            _ => Box::new(u.to_string()),
        },
    })
}

// Field order matters: rows, then client, then the runtime driving both.
struct PgCursor {
    rows: Pin<Box<PgRows>>,
    columns: Vec<String>,
    timeout: Duration,
    _client: Client,
    runtime: Runtime,
}

impl Cursor for PgCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch(&mut self) -> Result<Option<Vec<Value>>> {
        let Self { rows, timeout, runtime, .. } = self;
        let next = runtime.block_on(tokio::time::timeout(*timeout, rows.next())).map_err(|_| {
            DbDriveError::backend("postgres", format!("Fetch exceeded timeout of {timeout:?}"))
        })?;

        match next {
            None => Ok(None),
            Some(Err(e)) => Err(pg_error("Failed to fetch row", &e)),
            Some(Ok(row)) => (0..row.len()).map(|idx| column_value(&row, idx)).collect::<Result<_>>().map(Some),
        }
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        DbDriveError::backend(
            "postgres",
            format!("Failed to read column '{}': {e}", row.columns()[idx].name()),
        )
    })
}

fn column_value(row: &Row, idx: usize) -> Result<Value> {
    let value = match *row.columns()[idx].type_() {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::Int),
        Type::OID => get::<u32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::Float),
        Type::NUMERIC => get::<PgNumeric>(row, idx)?.map(|n| n.0),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(Value::Timestamp),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(|v| Value::Timestamp(v.naive_utc())),
        Type::DATE => get::<NaiveDate>(row, idx)?.map(|d| Value::Timestamp(d.and_time(NaiveTime::default()))),
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        Type::UUID => get::<Uuid>(row, idx)?.map(|u| Value::Text(u.to_string())),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(|j| Value::Text(j.to_string())),
        _ => get::<RawValue>(row, idx)?.map(|r| r.0),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Binary `numeric`: integral values that fit become `Int`, the rest `Float`
struct PgNumeric(Value);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        decode_numeric(raw).map(Self)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

fn decode_numeric(raw: &[u8]) -> std::result::Result<Value, BoxError> {
    let word = |i: usize| -> std::result::Result<u16, BoxError> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };

    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);

    match sign {
        NUMERIC_NAN => return Ok(Value::Float(f64::NAN)),
        NUMERIC_PINF => return Ok(Value::Float(f64::INFINITY)),
        NUMERIC_NINF => return Ok(Value::Float(f64::NEG_INFINITY)),
        _ => {}
    }

    let digits = (0..ndigits).map(|k| word(4 + k)).collect::<std::result::Result<Vec<_>, _>>()?;
    // Digit k carries the base-10000 exponent `weight - k`
    let digit = |k: i32| usize::try_from(k).ok().and_then(|k| digits.get(k)).copied().unwrap_or(0);

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        let _ = write!(text, "{}", digit(0));
        for k in 1..=weight {
            let _ = write!(text, "{:04}", digit(k));
        }
    }

    if dscale == 0 {
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::Int(i));
        }
    } else {
        let mut fraction = String::new();
        let mut exponent = 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", digit(weight + exponent));
            exponent += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Ok(Value::Float(text.parse::<f64>()?))
}

/// Any column type, read as UTF-8 text or raw bytes
struct RawValue(Value);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(Self(match std::str::from_utf8(raw) {
            Ok(s) => Value::Text(s.to_string()),
            Err(_) => Value::Bytes(raw.to_vec()),
        }))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

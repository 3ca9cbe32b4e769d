//! Native Oracle connector
//!
//! Uses the `oracle` crate (ODPI-C). Oracle client libraries must be
//! installed at runtime. Connection strings take the form
//! `user/password@connect_identifier`, where the connect identifier is an
//! Easy Connect string or a TNS alias.
//!
//! Named `:name` placeholders are bound natively. `bulk_read_limit` becomes
//! the statement fetch array size and the timeout becomes the call timeout.

use chrono::NaiveDateTime;
use oracle::sql_type::{OracleType, ToSql};
use oracle::{Connection as OraConnection, ResultSet, Row, SqlValue};

use crate::error::{DbDriveError, Result};
use crate::executor::{Connection, ConnectionFactory, Cursor, Statement};
use crate::value::{ParamValue, Value};

fn oracle_error(context: &str, e: &oracle::Error) -> DbDriveError {
    DbDriveError::backend("oracle", format!("{context}: {e}"))
}

/// Connection factory for one Oracle database
#[derive(Clone)]
pub struct OracleConnector {
    user: String,
    password: String,
    connect_identifier: String,
}

impl OracleConnector {
    /// Parse `user/password@connect_identifier`
    pub fn parse(connection_string: &str) -> Result<Self> {
        let (credentials, connect_identifier) = connection_string.rsplit_once('@').ok_or_else(|| {
            DbDriveError::invalid_input("Oracle connection string must be user/password@connect_identifier")
        })?;
        let (user, password) = credentials.split_once('/').ok_or_else(|| {
            DbDriveError::invalid_input("Oracle connection string is missing the password")
        })?;
        if user.is_empty() || connect_identifier.is_empty() {
            return Err(DbDriveError::invalid_input(
                "Oracle connection string needs a user and a connect identifier",
            ));
        }

        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
            connect_identifier: connect_identifier.to_string(),
        })
    }
}

impl std::fmt::Debug for OracleConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the password
        f.debug_struct("OracleConnector")
            .field("user", &self.user)
            .field("connect_identifier", &self.connect_identifier)
            .finish_non_exhaustive()
    }
}

impl ConnectionFactory for OracleConnector {
    fn provider(&self) -> &'static str {
        "oracle"
    }

    fn create(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(OracleConnection { config: self.clone(), conn: None }))
    }
}

struct OracleConnection {
    config: OracleConnector,
    conn: Option<OraConnection>,
}

impl Connection for OracleConnection {
    fn open(&mut self) -> Result<()> {
        let conn = OraConnection::connect(
            &self.config.user,
            &self.config.password,
            &self.config.connect_identifier,
        )
        .map_err(|e| DbDriveError::connection_failed(format!("Failed to connect to Oracle: {e}")))?;
        self.conn = Some(conn);
        Ok(())
    }

    fn execute(self: Box<Self>, statement: &Statement<'_>) -> Result<Box<dyn Cursor>> {
        let conn = self
            .conn
            .ok_or_else(|| DbDriveError::connection_failed("Oracle connection was not opened"))?;

        conn.set_call_timeout(Some(statement.timeout))
            .map_err(|e| oracle_error("Failed to set call timeout", &e))?;

        let fetch_size = u32::try_from(statement.fetch_size).unwrap_or(u32::MAX);
        let stmt = conn
            .statement(statement.sql)
            .fetch_array_size(fetch_size)
            .build()
            .map_err(|e| oracle_error("Failed to prepare statement", &e))?;

        let values: Vec<(&str, Box<dyn ToSql>)> =
            statement.params.iter().map(|p| (p.name.as_str(), to_oracle(&p.value))).collect();
        let binds: Vec<(&str, &dyn ToSql)> =
            values.iter().map(|(name, value)| (*name, value.as_ref())).collect();

        let rows: ResultSet<'static, Row> = stmt
            .into_result_set_named(&binds)
            .map_err(|e| oracle_error("Failed to execute statement", &e))?;

        let columns = rows.column_info().iter().map(|c| c.name().to_string()).collect();

        Ok(Box::new(OracleCursor { rows, columns, _conn: conn }))
    }
}

fn to_oracle(value: &ParamValue) -> Box<dyn ToSql> {
    match value {
        ParamValue::Null => Box::new(None::<String>),
        ParamValue::Bool(b) => Box::new(i64::from(*b)),
        ParamValue::Int(i) => Box::new(*i),
        ParamValue::Float(f) => Box::new(*f),
        ParamValue::Text(s) => Box::new(s.clone()),
        ParamValue::Timestamp(t) => Box::new(*t),
        ParamValue::Bytes(b) => Box::new(b.clone()),
        ParamValue::Uuid(u) => Box::new(u.to_string()),
    }
}

// Field order matters: the result set is dropped before its connection.
struct OracleCursor {
    rows: ResultSet<'static, Row>,
    columns: Vec<String>,
    _conn: OraConnection,
}

impl Cursor for OracleCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch(&mut self) -> Result<Option<Vec<Value>>> {
        let Some(row) = self.rows.next() else {
            return Ok(None);
        };
        let row = row.map_err(|e| oracle_error("Failed to fetch row", &e))?;
        row.sql_values()
            .iter()
            .map(column_value)
            .collect::<oracle::Result<Vec<_>>>()
            .map(Some)
            .map_err(|e| oracle_error("Failed to convert column", &e))
    }
}

fn column_value(value: &SqlValue) -> oracle::Result<Value> {
    if value.is_null()? {
        return Ok(Value::Null);
    }

    Ok(match value.oracle_type()? {
        OracleType::Number(_, 0) | OracleType::Int64 => Value::Int(value.get::<i64>()?),
        OracleType::Number(..) => match value.get::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(value.get::<f64>()?),
        },
        OracleType::Float(_) | OracleType::BinaryFloat | OracleType::BinaryDouble => {
            Value::Float(value.get::<f64>()?)
        }
        OracleType::Date
        | OracleType::Timestamp(_)
        | OracleType::TimestampTZ(_)
        | OracleType::TimestampLTZ(_) => Value::Timestamp(value.get::<NaiveDateTime>()?),
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => {
            Value::Bytes(value.get::<Vec<u8>>()?)
        }
        OracleType::Boolean => Value::Bool(value.get::<bool>()?),
        _ => Value::Text(value.get::<String>()?),
    })
}

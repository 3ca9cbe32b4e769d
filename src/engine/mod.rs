//! Catalog Driver Contract and Core Types
//!
//! This module defines the abstraction every database backend implements to
//! expose its catalog as schemas, object types, tables, views and rows.
//! Each provider (`Oracle`, `PostgreSQL`, `SQLite`) implements [`CatalogDriver`].
//!
//! # Stateless Design
//! Drivers hold a connection factory and settings, never a connection.
//! Every listing opens its own connection through the row streaming
//! executor and releases it when the returned sequence ends or is dropped.
//!
//! # Engine Isolation
//! Each provider module owns its catalog SQL and record mapping.
//! The only shared pieces are the metadata types and the name matching
//! predicates below.
//!
//! # Injection Safety
//! Every value that originates from a path travels as a bound `:name`
//! parameter. The single exception is the row listing `SELECT`, where the
//! schema and object identifiers are interpolated after passing
//! [`crate::naming::ensure_valid_name`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{DbDriveError, Result};
use crate::executor::{
    execute, ConnectionFactory, QueryOptions, RowLimit, RowStream, DEFAULT_FETCH_SIZE,
};
use crate::naming::{ensure_valid_name, NameFilter};
use crate::path::ObjectType;
use crate::value::{NamedParam, Record};

pub mod oracle;
pub mod postgres;
pub mod sqlite;

/// Default number of rows listed under an object node
pub const DEFAULT_MAX_READ_RESULT: i64 = 100;

/// Default statement timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Supported database providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Oracle, catalog from the `ALL_*` views
    Oracle,
    /// `PostgreSQL`, catalog from `information_schema`
    Postgres,
    /// `SQLite`, attached databases as schemas
    Sqlite,
}

impl Provider {
    /// Get the provider name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Identifier comparison policy used when a drive does not set one
    #[must_use]
    pub const fn default_name_matching(&self) -> NameMatching {
        match self {
            Self::Oracle => NameMatching::Exact,
            Self::Postgres | Self::Sqlite => NameMatching::CaseInsensitive,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = DbDriveError;

    /// Parse a provider identifier, including the ADO.NET invariant names
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oracle" | "oracle.manageddataaccess.client" => Ok(Self::Oracle),
            "postgres" | "postgresql" | "pg" | "npgsql" => Ok(Self::Postgres),
            "sqlite" | "sqlite3" | "microsoft.data.sqlite" => Ok(Self::Sqlite),
            _ => Err(DbDriveError::unsupported_provider(s)),
        }
    }
}

/// How schema and object names from a path are compared with the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameMatching {
    Exact,
    CaseInsensitive,
}

impl NameMatching {
    /// `column = :param`, or its case-folded form
    #[must_use]
    pub fn predicate(self, column: &str, param: &str) -> String {
        match self {
            Self::Exact => format!("{column} = :{param}"),
            Self::CaseInsensitive => format!("UPPER({column}) = UPPER(:{param})"),
        }
    }

    /// `column LIKE :param ESCAPE '\'`, or its case-folded form
    #[must_use]
    pub fn like_predicate(self, column: &str, param: &str) -> String {
        match self {
            Self::Exact => format!("{column} LIKE :{param} ESCAPE '\\'"),
            Self::CaseInsensitive => format!("UPPER({column}) LIKE UPPER(:{param}) ESCAPE '\\'"),
        }
    }

    /// Whether identifiers must be quoted to preserve their exact spelling
    #[must_use]
    pub const fn quotes_identifiers(self) -> bool {
        matches!(self, Self::Exact)
    }
}

/// Per-drive tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    /// Rows listed under an object node; zero or negative means no limit
    pub max_read_result: i64,

    /// Rows fetched per round trip
    pub bulk_read_limit: usize,

    /// Timeout applied to each statement
    pub timeout_secs: u64,

    /// Overrides the provider's default name matching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_matching: Option<NameMatching>,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            max_read_result: DEFAULT_MAX_READ_RESULT,
            bulk_read_limit: DEFAULT_FETCH_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            name_matching: None,
        }
    }
}

impl DriveSettings {
    /// Row cap for object listings
    #[must_use]
    pub fn row_limit(&self) -> RowLimit {
        RowLimit::from_signed(self.max_read_result)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Effective name matching for `provider`
    #[must_use]
    pub fn matching_for(&self, provider: Provider) -> NameMatching {
        self.name_matching.unwrap_or_else(|| provider.default_name_matching())
    }

    /// Executor options for one statement
    #[must_use]
    pub fn query_options(&self, limit: RowLimit) -> QueryOptions {
        QueryOptions { timeout: self.timeout(), fetch_size: self.bulk_read_limit.max(1), limit }
    }
}

/// One schema (namespace) in the database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaInfo {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<NaiveDateTime>,

    /// Provider-specific descriptive fields
    #[serde(flatten)]
    pub details: SchemaDetails,
}

/// One table with its columns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,

    /// Row count from catalog statistics, when the provider keeps one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,

    #[serde(flatten)]
    pub details: TableDetails,
}

/// One view with its columns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewInfo {
    pub schema_name: String,
    pub view_name: String,
    pub columns: Vec<ColumnInfo>,

    #[serde(flatten)]
    pub details: ViewDetails,
}

/// One column of a table or view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub nullable: bool,

    /// Declared type as reported by the catalog
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<i64>,

    #[serde(flatten)]
    pub details: ColumnDetails,
}

/// Provider-specific schema fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum SchemaDetails {
    Oracle(oracle::OracleSchemaDetails),
    Postgres(postgres::PgSchemaDetails),
    Sqlite(sqlite::SqliteSchemaDetails),
}

/// Provider-specific table fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum TableDetails {
    Oracle(oracle::OracleTableDetails),
    Postgres(postgres::PgTableDetails),
    Sqlite(sqlite::SqliteObjectDetails),
}

/// Provider-specific view fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ViewDetails {
    Oracle(oracle::OracleViewDetails),
    Postgres(postgres::PgViewDetails),
    Sqlite(sqlite::SqliteObjectDetails),
}

/// Provider-specific column fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ColumnDetails {
    Oracle(oracle::OracleColumnDetails),
    Postgres(postgres::PgColumnDetails),
    Sqlite(sqlite::SqliteColumnDetails),
}

/// Lazy one-pass sequence backed by an open catalog query
pub type Lazy<'a, T> = Box<dyn Iterator<Item = Result<T>> + 'a>;

/// Catalog Driver Contract
///
/// Methods validate every identifier argument before building SQL and fail
/// with `NameRejected` without touching the connection factory.
pub trait CatalogDriver {
    fn provider(&self) -> Provider;

    fn settings(&self) -> &DriveSettings;

    fn list_schemas(&self) -> Result<Lazy<'_, SchemaInfo>>;

    /// Schema names, optionally filtered server-side by a wildcard
    fn list_schema_names(&self, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>>;

    fn get_schema(&self, name: &str) -> Result<Option<SchemaInfo>>;

    fn schema_exists(&self, name: &str) -> Result<bool>;

    /// Object types worth showing under `schema`
    fn supported_object_types(&self, schema: &str) -> Result<Vec<ObjectType>>;

    /// Tables of `schema`, each with columns loaded by a follow-up query
    fn list_tables(&self, schema: &str) -> Result<Lazy<'_, TableInfo>>;

    fn get_table(&self, schema: &str, table: &str) -> Result<Option<TableInfo>>;

    fn list_table_names(&self, schema: &str, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>>;

    fn list_views(&self, schema: &str) -> Result<Lazy<'_, ViewInfo>>;

    fn get_view(&self, schema: &str, view: &str) -> Result<Option<ViewInfo>>;

    fn list_view_names(&self, schema: &str, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>>;

    /// Existence of the object named by `object_path[0]`
    ///
    /// Row paths (`object_path.len() > 1`) are never addressable and report
    /// false.
    fn object_exists(&self, schema: &str, object_type: ObjectType, object_path: &[String]) -> Result<bool>;

    /// Rows of a table or view, stopping after `limit`
    fn stream_rows(&self, schema: &str, object: &str, limit: RowLimit) -> Result<RowStream>;
}

/// Connection factory plus settings, shared by a driver's queries
#[derive(Clone)]
pub(crate) struct CatalogSession {
    factory: Arc<dyn ConnectionFactory>,
    settings: DriveSettings,
}

/// `"schema"."object"` from names that already passed validation
pub(crate) fn quoted_relation(schema: &str, object: &str) -> Result<String> {
    ensure_valid_name("schema", schema)?;
    ensure_valid_name("object", object)?;
    Ok(format!("\"{schema}\".\"{object}\""))
}

impl CatalogSession {
    pub(crate) fn new(factory: Arc<dyn ConnectionFactory>, settings: DriveSettings) -> Self {
        Self { factory, settings }
    }

    pub(crate) const fn settings(&self) -> &DriveSettings {
        &self.settings
    }

    pub(crate) fn query(&self, sql: &str, params: &[NamedParam]) -> Result<RowStream> {
        self.query_limited(sql, params, RowLimit::Unlimited)
    }

    pub(crate) fn query_limited(
        &self,
        sql: &str,
        params: &[NamedParam],
        limit: RowLimit,
    ) -> Result<RowStream> {
        execute(self.factory.as_ref(), sql, params, &self.settings.query_options(limit))
    }

    /// First row only; the cursor is released right after it
    pub(crate) fn first(&self, sql: &str, params: &[NamedParam]) -> Result<Option<Record>> {
        self.query_limited(sql, params, RowLimit::Max(1))?.next().transpose()
    }

    pub(crate) fn exists(&self, sql: &str, params: &[NamedParam]) -> Result<bool> {
        Ok(self.first(sql, params)?.is_some())
    }
}

/// Build the driver for `provider` over an existing connection factory
#[must_use]
pub fn driver_for(
    provider: Provider,
    factory: Arc<dyn ConnectionFactory>,
    settings: DriveSettings,
) -> Box<dyn CatalogDriver> {
    match provider {
        Provider::Oracle => Box::new(oracle::OracleCatalog::new(factory, settings)),
        Provider::Postgres => Box::new(postgres::PgCatalog::new(factory, settings)),
        Provider::Sqlite => Box::new(sqlite::SqliteCatalog::new(factory, settings)),
    }
}

/// Select and build a driver from a provider identifier and connection string
///
/// Unknown identifiers fail with `UnsupportedProvider` before any
/// connection is attempted. Connection strings are never logged.
pub fn open_driver(
    provider_id: &str,
    connection_string: &str,
    settings: DriveSettings,
) -> Result<Box<dyn CatalogDriver>> {
    let provider: Provider = provider_id.parse()?;
    let factory = connector_for(provider, connection_string)?;
    tracing::debug!(%provider, "driver opened");
    Ok(driver_for(provider, factory, settings))
}

/// Native connection factory for `provider`, if compiled in
#[allow(unused_variables)]
pub fn connector_for(provider: Provider, connection_string: &str) -> Result<Arc<dyn ConnectionFactory>> {
    match provider {
        #[cfg(feature = "oracle")]
        Provider::Oracle => Ok(Arc::new(oracle::connector::OracleConnector::parse(connection_string)?)),
        #[cfg(feature = "postgres")]
        Provider::Postgres => Ok(Arc::new(postgres::connector::PgConnector::parse(connection_string)?)),
        #[cfg(feature = "sqlite")]
        Provider::Sqlite => Ok(Arc::new(sqlite::connector::SqliteConnector::new(connection_string))),
        #[allow(unreachable_patterns)]
        other => Err(DbDriveError::unsupported_provider(format!(
            "{other} (connector not compiled in, enable the '{other}' feature)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_provider_aliases() {
        assert_eq!("oracle".parse::<Provider>().unwrap(), Provider::Oracle);
        assert_eq!("Oracle.ManagedDataAccess.Client".parse::<Provider>().unwrap(), Provider::Oracle);
        assert_eq!("PostgreSQL".parse::<Provider>().unwrap(), Provider::Postgres);
        assert_eq!("Npgsql".parse::<Provider>().unwrap(), Provider::Postgres);
        assert_eq!("sqlite".parse::<Provider>().unwrap(), Provider::Sqlite);
        assert_eq!("Microsoft.Data.Sqlite".parse::<Provider>().unwrap(), Provider::Sqlite);
    }

    #[test]
    fn test_unknown_provider_fails_without_connecting() {
        let err = open_driver("NOPE", "anything", DriveSettings::default()).err().unwrap();
        assert!(matches!(err, DbDriveError::UnsupportedProvider(ref p) if p == "NOPE"));
    }

    #[test]
    fn test_provider_serialization() {
        assert_eq!(serde_json::to_string(&Provider::Oracle).unwrap(), r#""oracle""#);
        assert_eq!(serde_json::to_string(&Provider::Postgres).unwrap(), r#""postgres""#);
        assert_eq!(serde_json::to_string(&Provider::Sqlite).unwrap(), r#""sqlite""#);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = DriveSettings::default();
        assert_eq!(settings.max_read_result, 100);
        assert_eq!(settings.bulk_read_limit, 50);
        assert_eq!(settings.timeout(), Duration::from_secs(60));
        assert_eq!(settings.row_limit(), RowLimit::Max(100));
        assert_eq!(settings.matching_for(Provider::Oracle), NameMatching::Exact);
        assert_eq!(settings.matching_for(Provider::Postgres), NameMatching::CaseInsensitive);
    }

    #[test]
    fn test_non_positive_max_read_result_is_unlimited() {
        let settings = DriveSettings { max_read_result: 0, ..DriveSettings::default() };
        assert_eq!(settings.row_limit(), RowLimit::Unlimited);
        let settings = DriveSettings { max_read_result: -5, ..DriveSettings::default() };
        assert_eq!(settings.row_limit(), RowLimit::Unlimited);
    }

    #[test]
    fn test_settings_deserialize_partial() {
        let settings: DriveSettings =
            serde_json::from_str(r#"{"max_read_result": 10, "name_matching": "exact"}"#).unwrap();
        assert_eq!(settings.max_read_result, 10);
        assert_eq!(settings.bulk_read_limit, 50);
        assert_eq!(settings.name_matching, Some(NameMatching::Exact));
    }

    #[test]
    fn test_name_matching_predicates() {
        assert_eq!(NameMatching::Exact.predicate("OWNER", "schemaname"), "OWNER = :schemaname");
        assert_eq!(
            NameMatching::CaseInsensitive.predicate("table_schema", "schemaname"),
            "UPPER(table_schema) = UPPER(:schemaname)"
        );
        assert_eq!(
            NameMatching::Exact.like_predicate("TABLE_NAME", "pattern"),
            "TABLE_NAME LIKE :pattern ESCAPE '\\'"
        );
    }
}

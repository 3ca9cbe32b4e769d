//! Oracle Catalog Driver
//!
//! Maps the catalog contract onto Oracle's data dictionary.
//!
//! # Catalog Sources
//! - Schemas: database users from `ALL_USERS`
//! - Tables: `ALL_TABLES` filtered by `OWNER`, row counts from `NUM_ROWS`
//!   (optimizer statistics, absent until the table is analyzed)
//! - Views: `ALL_VIEWS`
//! - Columns: `ALL_TAB_COLUMNS`, one follow-up query per table or view
//!
//! # Implementation Notes
//! - Identifiers are uppercase by convention, so exact matching is the
//!   default; rows are always selected through quoted identifiers, using the
//!   catalog spelling from `ALL_OBJECTS` when matching case-insensitively
//! - The native connector lives in [`connector`] behind the `oracle` feature

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

use crate::engine::{
    quoted_relation, CatalogDriver, CatalogSession, ColumnDetails, ColumnInfo, DriveSettings, Lazy, NameMatching,
    Provider, SchemaDetails, SchemaInfo, TableDetails, TableInfo, ViewDetails, ViewInfo,
};
use crate::error::{DbDriveError, Result};
use crate::executor::{ConnectionFactory, RowLimit, RowStream};
use crate::naming::{ensure_valid_name, NameFilter};
use crate::path::ObjectType;
use crate::value::{NamedParam, Record};

#[cfg(feature = "oracle")]
pub mod connector;

const SELECT_USERS: &str = "SELECT USER_ID, USERNAME, CREATED FROM ALL_USERS";

const SELECT_TABLES: &str = "SELECT OWNER, TABLE_NAME, TABLESPACE_NAME, STATUS, NUM_ROWS, \
     BLOCKS, AVG_ROW_LEN, LAST_ANALYZED, LOGGING, PARTITIONED, TEMPORARY, NESTED \
     FROM ALL_TABLES";

const SELECT_VIEWS: &str = "SELECT OWNER, VIEW_NAME, TEXT_LENGTH, TEXT, VIEW_TYPE_OWNER, \
     VIEW_TYPE, SUPERVIEW_NAME FROM ALL_VIEWS";

const SELECT_COLUMNS: &str = "SELECT OWNER, TABLE_NAME, COLUMN_NAME, DATA_TYPE, DATA_LENGTH, \
     DATA_PRECISION, DATA_SCALE, NULLABLE, COLUMN_ID, DATA_DEFAULT, NUM_DISTINCT, NUM_NULLS, \
     CHAR_LENGTH, CHAR_USED, HISTOGRAM FROM ALL_TAB_COLUMNS \
     WHERE OWNER = :schemaname AND TABLE_NAME = :tablename ORDER BY COLUMN_ID";

/// Oracle-specific schema fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleSchemaDetails {
    pub user_id: Option<i64>,
}

/// Oracle-specific table fields from `ALL_TABLES`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleTableDetails {
    pub tablespace_name: Option<String>,
    pub status: Option<String>,
    pub blocks: Option<i64>,
    pub avg_row_len: Option<i64>,
    pub last_analyzed: Option<NaiveDateTime>,
    pub logging: Option<String>,
    pub partitioned: Option<bool>,
    pub temporary: Option<bool>,
    pub nested: Option<bool>,
}

/// Oracle-specific view fields from `ALL_VIEWS`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleViewDetails {
    pub text_length: Option<i64>,
    pub text: Option<String>,
    pub view_type_owner: Option<String>,
    pub view_type: Option<String>,
    pub superview_name: Option<String>,
}

/// Oracle-specific column fields from `ALL_TAB_COLUMNS`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleColumnDetails {
    pub column_id: Option<i64>,
    pub data_default: Option<String>,
    pub num_distinct: Option<i64>,
    pub num_nulls: Option<i64>,
    pub char_length: Option<i64>,
    pub char_used: Option<String>,
    pub histogram: Option<String>,
}

/// Oracle implementation of [`CatalogDriver`]
pub struct OracleCatalog {
    session: CatalogSession,
    matching: NameMatching,
}

impl OracleCatalog {
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectionFactory>, settings: DriveSettings) -> Self {
        let matching = settings.matching_for(Provider::Oracle);
        Self { session: CatalogSession::new(factory, settings), matching }
    }

    fn resolve_relation(&self, schema: &str, object: &str) -> Result<(String, String)> {
        let sql = format!(
            "SELECT OWNER, OBJECT_NAME FROM ALL_OBJECTS WHERE OBJECT_TYPE IN ('TABLE', 'VIEW') \
             AND {} AND {}",
            self.matching.predicate("OWNER", "schemaname"),
            self.matching.predicate("OBJECT_NAME", "objectname")
        );
        let params = [NamedParam::new("schemaname", schema), NamedParam::new("objectname", object)];
        let record = self
            .session
            .first(&sql, &params)?
            .ok_or_else(|| DbDriveError::not_found("object", format!("{schema}.{object}")))?;
        Ok((record.text("OWNER")?, record.text("OBJECT_NAME")?))
    }

    fn columns(&self, owner: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let params = [NamedParam::new("schemaname", owner), NamedParam::new("tablename", table)];
        self.session
            .query(SELECT_COLUMNS, &params)?
            .map(|row| row.and_then(|r| column_from_record(&r)))
            .collect()
    }

    fn table_with_columns(&self, record: &Record) -> Result<TableInfo> {
        let mut table = table_from_record(record)?;
        table.columns = self.columns(&table.schema_name, &table.table_name)?;
        Ok(table)
    }

    fn view_with_columns(&self, record: &Record) -> Result<ViewInfo> {
        let mut view = view_from_record(record)?;
        view.columns = self.columns(&view.schema_name, &view.view_name)?;
        Ok(view)
    }

    fn names(
        &self,
        source: &str,
        column: &str,
        schema: &str,
        filter: Option<&NameFilter>,
    ) -> Result<Lazy<'_, String>> {
        ensure_valid_name("schema", schema)?;
        let mut sql = format!(
            "SELECT {column} FROM {source} WHERE {}",
            self.matching.predicate("OWNER", "schemaname")
        );
        let mut params = vec![NamedParam::new("schemaname", schema)];
        if let Some(filter) = filter {
            sql.push_str(" AND ");
            sql.push_str(&self.matching.like_predicate(column, "pattern"));
            params.push(NamedParam::new("pattern", filter.like_pattern()));
        }

        let column = column.to_string();
        let rows = self.session.query(&sql, &params)?;
        Ok(Box::new(rows.map(move |row| row.and_then(|r| r.text(&column)))))
    }
}

impl CatalogDriver for OracleCatalog {
    fn provider(&self) -> Provider {
        Provider::Oracle
    }

    fn settings(&self) -> &DriveSettings {
        self.session.settings()
    }

    fn list_schemas(&self) -> Result<Lazy<'_, SchemaInfo>> {
        let rows = self.session.query(SELECT_USERS, &[])?;
        Ok(Box::new(rows.map(|row| row.and_then(|r| schema_from_record(&r)))))
    }

    fn list_schema_names(&self, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>> {
        let mut sql = String::from("SELECT USERNAME FROM ALL_USERS");
        let mut params = Vec::new();
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.matching.like_predicate("USERNAME", "pattern"));
            params.push(NamedParam::new("pattern", filter.like_pattern()));
        }
        let rows = self.session.query(&sql, &params)?;
        Ok(Box::new(rows.map(|row| row.and_then(|r| r.text("USERNAME")))))
    }

    fn get_schema(&self, name: &str) -> Result<Option<SchemaInfo>> {
        ensure_valid_name("schema", name)?;
        let sql = format!("{SELECT_USERS} WHERE {}", self.matching.predicate("USERNAME", "schemaname"));
        self.session
            .first(&sql, &[NamedParam::new("schemaname", name)])?
            .map(|r| schema_from_record(&r))
            .transpose()
    }

    fn schema_exists(&self, name: &str) -> Result<bool> {
        ensure_valid_name("schema", name)?;
        let sql = format!(
            "SELECT 1 FROM ALL_USERS WHERE {}",
            self.matching.predicate("USERNAME", "schemaname")
        );
        self.session.exists(&sql, &[NamedParam::new("schemaname", name)])
    }

    fn supported_object_types(&self, schema: &str) -> Result<Vec<ObjectType>> {
        ensure_valid_name("schema", schema)?;
        Ok(ObjectType::ALL.to_vec())
    }

    fn list_tables(&self, schema: &str) -> Result<Lazy<'_, TableInfo>> {
        ensure_valid_name("schema", schema)?;
        debug!(schema, "listing oracle tables");
        let sql = format!("{SELECT_TABLES} WHERE {}", self.matching.predicate("OWNER", "schemaname"));
        let rows = self.session.query(&sql, &[NamedParam::new("schemaname", schema)])?;
        Ok(Box::new(rows.map(move |row| row.and_then(|r| self.table_with_columns(&r)))))
    }

    fn get_table(&self, schema: &str, table: &str) -> Result<Option<TableInfo>> {
        ensure_valid_name("schema", schema)?;
        ensure_valid_name("table", table)?;
        let sql = format!(
            "{SELECT_TABLES} WHERE {} AND {}",
            self.matching.predicate("OWNER", "schemaname"),
            self.matching.predicate("TABLE_NAME", "tablename")
        );
        let params = [NamedParam::new("schemaname", schema), NamedParam::new("tablename", table)];
        self.session.first(&sql, &params)?.map(|r| self.table_with_columns(&r)).transpose()
    }

    fn list_table_names(&self, schema: &str, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>> {
        self.names("ALL_TABLES", "TABLE_NAME", schema, filter)
    }

    fn list_views(&self, schema: &str) -> Result<Lazy<'_, ViewInfo>> {
        ensure_valid_name("schema", schema)?;
        let sql = format!("{SELECT_VIEWS} WHERE {}", self.matching.predicate("OWNER", "schemaname"));
        let rows = self.session.query(&sql, &[NamedParam::new("schemaname", schema)])?;
        Ok(Box::new(rows.map(move |row| row.and_then(|r| self.view_with_columns(&r)))))
    }

    fn get_view(&self, schema: &str, view: &str) -> Result<Option<ViewInfo>> {
        ensure_valid_name("schema", schema)?;
        ensure_valid_name("view", view)?;
        let sql = format!(
            "{SELECT_VIEWS} WHERE {} AND {}",
            self.matching.predicate("OWNER", "schemaname"),
            self.matching.predicate("VIEW_NAME", "viewname")
        );
        let params = [NamedParam::new("schemaname", schema), NamedParam::new("viewname", view)];
        self.session.first(&sql, &params)?.map(|r| self.view_with_columns(&r)).transpose()
    }

    fn list_view_names(&self, schema: &str, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>> {
        self.names("ALL_VIEWS", "VIEW_NAME", schema, filter)
    }

    fn object_exists(&self, schema: &str, object_type: ObjectType, object_path: &[String]) -> Result<bool> {
        let name = match object_path {
            [name] => name,
            [] => return Err(DbDriveError::invalid_input("object path is empty")),
            _ => return Ok(false),
        };
        ensure_valid_name("schema", schema)?;
        ensure_valid_name("object", name)?;

        let (source, column) = match object_type {
            ObjectType::Table => ("ALL_TABLES", "TABLE_NAME"),
            ObjectType::View => ("ALL_VIEWS", "VIEW_NAME"),
        };
        let sql = format!(
            "SELECT 1 FROM {source} WHERE {} AND {}",
            self.matching.predicate("OWNER", "schemaname"),
            self.matching.predicate(column, "objectname")
        );
        let params = [NamedParam::new("schemaname", schema), NamedParam::new("objectname", name.as_str())];
        self.session.exists(&sql, &params)
    }

    fn stream_rows(&self, schema: &str, object: &str, limit: RowLimit) -> Result<RowStream> {
        ensure_valid_name("schema", schema)?;
        ensure_valid_name("object", object)?;
        let relation = if self.matching.quotes_identifiers() {
            quoted_relation(schema, object)?
        } else {
            let (schema, object) = self.resolve_relation(schema, object)?;
            quoted_relation(&schema, &object)?
        };
        self.session.query_limited(&format!("SELECT * FROM {relation}"), &[], limit)
    }
}

fn schema_from_record(r: &Record) -> Result<SchemaInfo> {
    let name = r.text("USERNAME")?;
    Ok(SchemaInfo {
        owner: Some(name.clone()),
        name,
        created: r.opt_timestamp("CREATED")?,
        details: SchemaDetails::Oracle(OracleSchemaDetails { user_id: r.opt_i64("USER_ID")? }),
    })
}

fn table_from_record(r: &Record) -> Result<TableInfo> {
    Ok(TableInfo {
        schema_name: r.text("OWNER")?,
        table_name: r.text("TABLE_NAME")?,
        columns: Vec::new(),
        row_count: r.opt_count("NUM_ROWS")?,
        details: TableDetails::Oracle(OracleTableDetails {
            tablespace_name: r.opt_text("TABLESPACE_NAME")?,
            status: r.opt_text("STATUS")?,
            blocks: r.opt_i64("BLOCKS")?,
            avg_row_len: r.opt_i64("AVG_ROW_LEN")?,
            last_analyzed: r.opt_timestamp("LAST_ANALYZED")?,
            logging: r.opt_text("LOGGING")?,
            partitioned: r.opt_flag("PARTITIONED")?,
            temporary: r.opt_flag("TEMPORARY")?,
            nested: r.opt_flag("NESTED")?,
        }),
    })
}

fn view_from_record(r: &Record) -> Result<ViewInfo> {
    Ok(ViewInfo {
        schema_name: r.text("OWNER")?,
        view_name: r.text("VIEW_NAME")?,
        columns: Vec::new(),
        details: ViewDetails::Oracle(OracleViewDetails {
            text_length: r.opt_i64("TEXT_LENGTH")?,
            text: r.opt_text("TEXT")?,
            view_type_owner: r.opt_text("VIEW_TYPE_OWNER")?,
            view_type: r.opt_text("VIEW_TYPE")?,
            superview_name: r.opt_text("SUPERVIEW_NAME")?,
        }),
    })
}

fn column_from_record(r: &Record) -> Result<ColumnInfo> {
    Ok(ColumnInfo {
        schema_name: r.text("OWNER")?,
        table_name: r.text("TABLE_NAME")?,
        column_name: r.text("COLUMN_NAME")?,
        nullable: r.opt_flag("NULLABLE")?.unwrap_or(true),
        data_type: r.opt_text("DATA_TYPE")?,
        length: r.opt_i64("DATA_LENGTH")?,
        precision: r.opt_i64("DATA_PRECISION")?,
        scale: r.opt_i64("DATA_SCALE")?,
        details: ColumnDetails::Oracle(OracleColumnDetails {
            column_id: r.opt_i64("COLUMN_ID")?,
            // LONG column, usually padded with a trailing newline
            data_default: r.opt_text("DATA_DEFAULT")?.map(|d| d.trim().to_string()),
            num_distinct: r.opt_i64("NUM_DISTINCT")?,
            num_nulls: r.opt_i64("NUM_NULLS")?,
            char_length: r.opt_i64("CHAR_LENGTH")?,
            char_used: r.opt_text("CHAR_USED")?,
            histogram: r.opt_text("HISTOGRAM")?,
        }),
    })
}

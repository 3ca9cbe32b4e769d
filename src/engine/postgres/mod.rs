//! `PostgreSQL` Catalog Driver
//!
//! Maps the catalog contract onto `information_schema`.
//!
//! # Catalog Sources
//! - Schemas: `information_schema.schemata`
//! - Tables: `information_schema.tables` (`BASE TABLE` only), with the
//!   planner estimate `pg_class.reltuples` as row count
//! - Views: `information_schema.views`
//! - Columns: `information_schema.columns`
//!
//! # Implementation Notes
//! - `information_schema` columns are domain types; every selected column is
//!   cast to `text` or `bigint` so the connector sees plain base types
//! - Case-insensitive matching is the default; rows are selected through the
//!   quoted catalog spelling of the schema and relation
//! - The native connector lives in [`connector`] behind the `postgres` feature

use std::sync::Arc;

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

#[cfg(feature = "postgres")]
pub mod connector;

const SELECT_SCHEMAS: &str = "SELECT CAST(catalog_name AS text) AS catalog_name, \
     CAST(schema_name AS text) AS schema_name, CAST(schema_owner AS text) AS schema_owner \
     FROM information_schema.schemata";

const SELECT_TABLES: &str = "SELECT CAST(t.table_catalog AS text) AS table_catalog, \
     CAST(t.table_schema AS text) AS table_schema, CAST(t.table_name AS text) AS table_name, \
     CAST(t.table_type AS text) AS table_type, \
     CAST(t.is_insertable_into AS text) AS is_insertable_into, \
     CAST(t.is_typed AS text) AS is_typed, CAST(t.commit_action AS text) AS commit_action, \
     CAST(c.reltuples AS bigint) AS row_count \
     FROM information_schema.tables t \
     LEFT JOIN pg_catalog.pg_namespace n ON n.nspname = t.table_schema \
     LEFT JOIN pg_catalog.pg_class c ON c.relnamespace = n.oid AND c.relname = t.table_name \
     WHERE t.table_type = 'BASE TABLE'";

const SELECT_RELATION: &str = "SELECT CAST(table_schema AS text) AS table_schema, \
     CAST(table_name AS text) AS table_name FROM information_schema.tables";

const SELECT_VIEWS: &str = "SELECT CAST(table_catalog AS text) AS table_catalog, \
     CAST(table_schema AS text) AS table_schema, CAST(table_name AS text) AS table_name, \
     CAST(view_definition AS text) AS view_definition, \
     CAST(check_option AS text) AS check_option, CAST(is_updatable AS text) AS is_updatable, \
     CAST(is_insertable_into AS text) AS is_insertable_into \
     FROM information_schema.views";

const SELECT_COLUMNS: &str = "SELECT CAST(table_schema AS text) AS table_schema, \
     CAST(table_name AS text) AS table_name, CAST(column_name AS text) AS column_name, \
     CAST(ordinal_position AS bigint) AS ordinal_position, \
     CAST(column_default AS text) AS column_default, CAST(is_nullable AS text) AS is_nullable, \
     CAST(data_type AS text) AS data_type, \
     CAST(character_maximum_length AS bigint) AS character_maximum_length, \
     CAST(numeric_precision AS bigint) AS numeric_precision, \
     CAST(numeric_scale AS bigint) AS numeric_scale, CAST(udt_name AS text) AS udt_name, \
     CAST(collation_name AS text) AS collation_name, CAST(is_identity AS text) AS is_identity, \
     CAST(is_updatable AS text) AS is_updatable \
     FROM information_schema.columns \
     WHERE table_schema = :schemaname AND table_name = :tablename \
     ORDER BY ordinal_position";

/// `PostgreSQL`-specific schema fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PgSchemaDetails {
    pub catalog: Option<String>,
}

/// `PostgreSQL`-specific table fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PgTableDetails {
    pub catalog: Option<String>,
    pub table_type: Option<String>,
    pub is_insertable_into: Option<bool>,
    pub is_typed: Option<bool>,
    pub commit_action: Option<String>,
}

/// `PostgreSQL`-specific view fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PgViewDetails {
    pub catalog: Option<String>,
    pub view_definition: Option<String>,
    pub check_option: Option<String>,
    pub is_updatable: Option<bool>,
    pub is_insertable_into: Option<bool>,
}

/// `PostgreSQL`-specific column fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PgColumnDetails {
    pub ordinal_position: Option<i64>,
    pub column_default: Option<String>,
    pub udt_name: Option<String>,
    pub collation_name: Option<String>,
    pub is_identity: Option<bool>,
    pub is_updatable: Option<bool>,
}

/// `PostgreSQL` implementation of [`CatalogDriver`]
pub struct PgCatalog {
    session: CatalogSession,
    matching: NameMatching,
}

impl PgCatalog {
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectionFactory>, settings: DriveSettings) -> Self {
        let matching = settings.matching_for(Provider::Postgres);
        Self { session: CatalogSession::new(factory, settings), matching }
    }

    fn columns(&self, schema: &str, relation: &str) -> Result<Vec<ColumnInfo>> {
        let params = [NamedParam::new("schemaname", schema), NamedParam::new("tablename", relation)];
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

    /// Catalog spelling of a table or view matched under the drive's rules
    fn resolve_relation(&self, schema: &str, object: &str) -> Result<(String, String)> {
        let sql = format!(
            "{SELECT_RELATION} WHERE {} AND {}",
            self.matching.predicate("table_schema", "schemaname"),
            self.matching.predicate("table_name", "objectname")
        );
        let params = [NamedParam::new("schemaname", schema), NamedParam::new("objectname", object)];
        let record = self
            .session
            .first(&sql, &params)?
            .ok_or_else(|| DbDriveError::not_found("object", format!("{schema}.{object}")))?;
        Ok((record.text("table_schema")?, record.text("table_name")?))
    }

    fn relation_names(
        &self,
        object_type: ObjectType,
        schema: &str,
        filter: Option<&NameFilter>,
    ) -> Result<Lazy<'_, String>> {
        ensure_valid_name("schema", schema)?;
        let mut sql = format!(
            "SELECT CAST(table_name AS text) AS table_name FROM {} {}",
            relation_source(object_type),
            self.matching.predicate("table_schema", "schemaname")
        );
        let mut params = vec![NamedParam::new("schemaname", schema)];
        if let Some(filter) = filter {
            sql.push_str(" AND ");
            sql.push_str(&self.matching.like_predicate("table_name", "pattern"));
            params.push(NamedParam::new("pattern", filter.like_pattern()));
        }

        let rows = self.session.query(&sql, &params)?;
        Ok(Box::new(rows.map(|row| row.and_then(|r| r.text("table_name")))))
    }
}

impl CatalogDriver for PgCatalog {
    fn provider(&self) -> Provider {
        Provider::Postgres
    }

    fn settings(&self) -> &DriveSettings {
        self.session.settings()
    }

    fn list_schemas(&self) -> Result<Lazy<'_, SchemaInfo>> {
        let rows = self.session.query(SELECT_SCHEMAS, &[])?;
        Ok(Box::new(rows.map(|row| row.and_then(|r| schema_from_record(&r)))))
    }

    fn list_schema_names(&self, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>> {
        let mut sql = String::from(
            "SELECT CAST(schema_name AS text) AS schema_name FROM information_schema.schemata",
        );
        let mut params = Vec::new();
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.matching.like_predicate("schema_name", "pattern"));
            params.push(NamedParam::new("pattern", filter.like_pattern()));
        }
        let rows = self.session.query(&sql, &params)?;
        Ok(Box::new(rows.map(|row| row.and_then(|r| r.text("schema_name")))))
    }

    fn get_schema(&self, name: &str) -> Result<Option<SchemaInfo>> {
        ensure_valid_name("schema", name)?;
        let sql = format!("{SELECT_SCHEMAS} WHERE {}", self.matching.predicate("schema_name", "schemaname"));
        self.session
            .first(&sql, &[NamedParam::new("schemaname", name)])?
            .map(|r| schema_from_record(&r))
            .transpose()
    }

    fn schema_exists(&self, name: &str) -> Result<bool> {
        ensure_valid_name("schema", name)?;
        let sql = format!(
            "SELECT 1 FROM information_schema.schemata WHERE {}",
            self.matching.predicate("schema_name", "schemaname")
        );
        self.session.exists(&sql, &[NamedParam::new("schemaname", name)])
    }

    fn supported_object_types(&self, schema: &str) -> Result<Vec<ObjectType>> {
        ensure_valid_name("schema", schema)?;
        Ok(ObjectType::ALL.to_vec())
    }

    fn list_tables(&self, schema: &str) -> Result<Lazy<'_, TableInfo>> {
        ensure_valid_name("schema", schema)?;
        debug!(schema, "listing postgres tables");
        let sql = format!("{SELECT_TABLES} AND {}", self.matching.predicate("t.table_schema", "schemaname"));
        let rows = self.session.query(&sql, &[NamedParam::new("schemaname", schema)])?;
        Ok(Box::new(rows.map(move |row| row.and_then(|r| self.table_with_columns(&r)))))
    }

    fn get_table(&self, schema: &str, table: &str) -> Result<Option<TableInfo>> {
        ensure_valid_name("schema", schema)?;
        ensure_valid_name("table", table)?;
        let sql = format!(
            "{SELECT_TABLES} AND {} AND {}",
            self.matching.predicate("t.table_schema", "schemaname"),
            self.matching.predicate("t.table_name", "tablename")
        );
        let params = [NamedParam::new("schemaname", schema), NamedParam::new("tablename", table)];
        self.session.first(&sql, &params)?.map(|r| self.table_with_columns(&r)).transpose()
    }

    fn list_table_names(&self, schema: &str, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>> {
        self.relation_names(ObjectType::Table, schema, filter)
    }

    fn list_views(&self, schema: &str) -> Result<Lazy<'_, ViewInfo>> {
        ensure_valid_name("schema", schema)?;
        let sql = format!("{SELECT_VIEWS} WHERE {}", self.matching.predicate("table_schema", "schemaname"));
        let rows = self.session.query(&sql, &[NamedParam::new("schemaname", schema)])?;
        Ok(Box::new(rows.map(move |row| row.and_then(|r| self.view_with_columns(&r)))))
    }

    fn get_view(&self, schema: &str, view: &str) -> Result<Option<ViewInfo>> {
        ensure_valid_name("schema", schema)?;
        ensure_valid_name("view", view)?;
        let sql = format!(
            "{SELECT_VIEWS} WHERE {} AND {}",
            self.matching.predicate("table_schema", "schemaname"),
            self.matching.predicate("table_name", "viewname")
        );
        let params = [NamedParam::new("schemaname", schema), NamedParam::new("viewname", view)];
        self.session.first(&sql, &params)?.map(|r| self.view_with_columns(&r)).transpose()
    }

    fn list_view_names(&self, schema: &str, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>> {
        self.relation_names(ObjectType::View, schema, filter)
    }

    fn object_exists(&self, schema: &str, object_type: ObjectType, object_path: &[String]) -> Result<bool> {
        let name = match object_path {
            [name] => name,
            [] => return Err(DbDriveError::invalid_input("object path is empty")),
            _ => return Ok(false),
        };
        ensure_valid_name("schema", schema)?;
        ensure_valid_name("object", name)?;

        let sql = format!(
            "SELECT 1 FROM {} {} AND {}",
            relation_source(object_type),
            self.matching.predicate("table_schema", "schemaname"),
            self.matching.predicate("table_name", "objectname")
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

/// Relation view plus the start of its `WHERE` clause
const fn relation_source(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::Table => "information_schema.tables WHERE table_type = 'BASE TABLE' AND",
        ObjectType::View => "information_schema.views WHERE",
    }
}

fn schema_from_record(r: &Record) -> Result<SchemaInfo> {
    Ok(SchemaInfo {
        name: r.text("schema_name")?,
        owner: r.opt_text("schema_owner")?,
        created: None,
        details: SchemaDetails::Postgres(PgSchemaDetails { catalog: r.opt_text("catalog_name")? }),
    })
}

fn table_from_record(r: &Record) -> Result<TableInfo> {
    Ok(TableInfo {
        schema_name: r.text("table_schema")?,
        table_name: r.text("table_name")?,
        columns: Vec::new(),
        row_count: r.opt_count("row_count")?,
        details: TableDetails::Postgres(PgTableDetails {
            catalog: r.opt_text("table_catalog")?,
            table_type: r.opt_text("table_type")?,
            is_insertable_into: r.opt_flag("is_insertable_into")?,
            is_typed: r.opt_flag("is_typed")?,
            commit_action: r.opt_text("commit_action")?,
        }),
    })
}

fn view_from_record(r: &Record) -> Result<ViewInfo> {
    Ok(ViewInfo {
        schema_name: r.text("table_schema")?,
        view_name: r.text("table_name")?,
        columns: Vec::new(),
        details: ViewDetails::Postgres(PgViewDetails {
            catalog: r.opt_text("table_catalog")?,
            view_definition: r.opt_text("view_definition")?,
            check_option: r.opt_text("check_option")?,
            is_updatable: r.opt_flag("is_updatable")?,
            is_insertable_into: r.opt_flag("is_insertable_into")?,
        }),
    })
}

fn column_from_record(r: &Record) -> Result<ColumnInfo> {
    Ok(ColumnInfo {
        schema_name: r.text("table_schema")?,
        table_name: r.text("table_name")?,
        column_name: r.text("column_name")?,
        nullable: r.opt_flag("is_nullable")?.unwrap_or(true),
        data_type: r.opt_text("data_type")?,
        length: r.opt_i64("character_maximum_length")?,
        precision: r.opt_i64("numeric_precision")?,
        scale: r.opt_i64("numeric_scale")?,
        details: ColumnDetails::Postgres(PgColumnDetails {
            ordinal_position: r.opt_i64("ordinal_position")?,
            column_default: r.opt_text("column_default")?,
            udt_name: r.opt_text("udt_name")?,
            collation_name: r.opt_text("collation_name")?,
            is_identity: r.opt_flag("is_identity")?,
            is_updatable: r.opt_flag("is_updatable")?,
        }),
    })
}

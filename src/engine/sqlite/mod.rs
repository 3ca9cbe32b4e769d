//! `SQLite` Catalog Driver
//!
//! Schemas are the attached databases (`main`, `temp`, and any `ATTACH`ed
//! file), read from `pragma_database_list`. Tables and views come from each
//! schema's `sqlite_master`, columns from `pragma_table_info`.
//!
//! # Implementation Notes
//! - Internal `sqlite_*` tables are never listed
//! - `sqlite_master` cannot be addressed through a bound parameter, so the
//!   schema is first resolved to its attached name, validated, and only then
//!   interpolated as a quoted identifier
//! - A schema that is not attached behaves like an empty one
//! - `SQLite` keeps no row statistics; `row_count` is always absent

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::engine::{
    CatalogDriver, CatalogSession, ColumnDetails, ColumnInfo, DriveSettings, Lazy, NameMatching,
    Provider, SchemaDetails, SchemaInfo, TableDetails, TableInfo, ViewDetails, ViewInfo,
};
use crate::error::{DbDriveError, Result};
use crate::executor::{ConnectionFactory, RowLimit, RowStream};
use crate::naming::{ensure_valid_name, NameFilter};
use crate::path::ObjectType;
use crate::value::{NamedParam, Record};

#[cfg(feature = "sqlite")]
pub mod connector;

const SELECT_DATABASES: &str = "SELECT seq, name, file FROM pragma_database_list";

const SELECT_COLUMNS: &str = "SELECT :schemaname AS schema_name, :tablename AS table_name, \
     cid, name, type, \"notnull\", dflt_value, pk \
     FROM pragma_table_info(:tablename, :schemaname) ORDER BY cid";

/// `SQLite`-specific schema fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqliteSchemaDetails {
    pub seq: Option<i64>,

    /// Backing file; empty for in-memory and temporary databases
    pub file: Option<String>,
}

/// `SQLite`-specific table and view fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqliteObjectDetails {
    /// `CREATE` statement as stored in `sqlite_master`
    pub sql: Option<String>,
}

/// `SQLite`-specific column fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqliteColumnDetails {
    pub cid: Option<i64>,
    pub default_value: Option<String>,

    /// 1-based position within the primary key
    pub primary_key_position: Option<i64>,
}

/// `SQLite` implementation of [`CatalogDriver`]
pub struct SqliteCatalog {
    session: CatalogSession,
    matching: NameMatching,
}

impl SqliteCatalog {
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectionFactory>, settings: DriveSettings) -> Self {
        let matching = settings.matching_for(Provider::Sqlite);
        Self { session: CatalogSession::new(factory, settings), matching }
    }

    /// Attached name of `schema`, or `None` when nothing by that name is attached
    fn resolve_schema(&self, schema: &str) -> Result<Option<String>> {
        ensure_valid_name("schema", schema)?;
        let sql = format!(
            "SELECT name FROM pragma_database_list WHERE {}",
            self.matching.predicate("name", "schemaname")
        );
        let Some(record) = self.session.first(&sql, &[NamedParam::new("schemaname", schema)])? else {
            return Ok(None);
        };
        let attached = record.text("name")?;
        ensure_valid_name("schema", &attached)?;
        Ok(Some(attached))
    }

    fn objects(
        &self,
        schema: &str,
        object_type: ObjectType,
        columns: &str,
        name: Option<String>,
        filter: Option<&NameFilter>,
    ) -> Result<Option<RowStream>> {
        let Some(attached) = self.resolve_schema(schema)? else {
            return Ok(None);
        };

        let mut sql = format!(
            "SELECT {columns} FROM \"{attached}\".sqlite_master \
             WHERE type = '{}' AND name NOT LIKE 'sqlite_%'",
            master_type(object_type)
        );
        let mut params = Vec::new();
        if columns.contains(":schemaname") {
            params.push(NamedParam::new("schemaname", attached.as_str()));
        }
        if let Some(name) = name {
            sql.push_str(" AND ");
            sql.push_str(&self.matching.predicate("name", "objectname"));
            params.push(NamedParam::new("objectname", name));
        }
        if let Some(filter) = filter {
            sql.push_str(" AND ");
            sql.push_str(&self.matching.like_predicate("name", "pattern"));
            params.push(NamedParam::new("pattern", filter.like_pattern()));
        }
        sql.push_str(" ORDER BY name");

        self.session.query(&sql, &params).map(Some)
    }

    fn columns(&self, schema: &str, relation: &str) -> Result<Vec<ColumnInfo>> {
        let params = [NamedParam::new("schemaname", schema), NamedParam::new("tablename", relation)];
        self.session
            .query(SELECT_COLUMNS, &params)?
            .map(|row| row.and_then(|r| column_from_record(&r)))
            .collect()
    }

    fn table_with_columns(&self, record: &Record) -> Result<TableInfo> {
        let schema_name = record.text("schema_name")?;
        let table_name = record.text("name")?;
        let columns = self.columns(&schema_name, &table_name)?;
        Ok(TableInfo {
            schema_name,
            table_name,
            columns,
            row_count: None,
            details: TableDetails::Sqlite(SqliteObjectDetails { sql: record.opt_text("sql")? }),
        })
    }

    fn view_with_columns(&self, record: &Record) -> Result<ViewInfo> {
        let schema_name = record.text("schema_name")?;
        let view_name = record.text("name")?;
        let columns = self.columns(&schema_name, &view_name)?;
        Ok(ViewInfo {
            schema_name,
            view_name,
            columns,
            details: ViewDetails::Sqlite(SqliteObjectDetails { sql: record.opt_text("sql")? }),
        })
    }

    fn names(&self, schema: &str, object_type: ObjectType, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>> {
        Ok(match self.objects(schema, object_type, "name", None, filter)? {
            Some(rows) => Box::new(rows.map(|row| row.and_then(|r| r.text("name")))),
            None => Box::new(std::iter::empty()),
        })
    }
}

const DETAIL_COLUMNS: &str = ":schemaname AS schema_name, name, sql";

const fn master_type(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::Table => "table",
        ObjectType::View => "view",
    }
}

impl CatalogDriver for SqliteCatalog {
    fn provider(&self) -> Provider {
        Provider::Sqlite
    }

    fn settings(&self) -> &DriveSettings {
        self.session.settings()
    }

    fn list_schemas(&self) -> Result<Lazy<'_, SchemaInfo>> {
        let rows = self.session.query(SELECT_DATABASES, &[])?;
        Ok(Box::new(rows.map(|row| row.and_then(|r| schema_from_record(&r)))))
    }

    fn list_schema_names(&self, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>> {
        let mut sql = String::from("SELECT name FROM pragma_database_list");
        let mut params = Vec::new();
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.matching.like_predicate("name", "pattern"));
            params.push(NamedParam::new("pattern", filter.like_pattern()));
        }
        let rows = self.session.query(&sql, &params)?;
        Ok(Box::new(rows.map(|row| row.and_then(|r| r.text("name")))))
    }

    fn get_schema(&self, name: &str) -> Result<Option<SchemaInfo>> {
        ensure_valid_name("schema", name)?;
        let sql = format!("{SELECT_DATABASES} WHERE {}", self.matching.predicate("name", "schemaname"));
        self.session
            .first(&sql, &[NamedParam::new("schemaname", name)])?
            .map(|r| schema_from_record(&r))
            .transpose()
    }

    fn schema_exists(&self, name: &str) -> Result<bool> {
        Ok(self.resolve_schema(name)?.is_some())
    }

    fn supported_object_types(&self, schema: &str) -> Result<Vec<ObjectType>> {
        ensure_valid_name("schema", schema)?;
        Ok(ObjectType::ALL.to_vec())
    }

    fn list_tables(&self, schema: &str) -> Result<Lazy<'_, TableInfo>> {
        debug!(schema, "listing sqlite tables");
        Ok(match self.objects(schema, ObjectType::Table, DETAIL_COLUMNS, None, None)? {
            Some(rows) => Box::new(rows.map(move |row| row.and_then(|r| self.table_with_columns(&r)))),
            None => Box::new(std::iter::empty()),
        })
    }

    fn get_table(&self, schema: &str, table: &str) -> Result<Option<TableInfo>> {
        ensure_valid_name("table", table)?;
        let Some(mut rows) =
            self.objects(schema, ObjectType::Table, DETAIL_COLUMNS, Some(table.to_string()), None)?
        else {
            return Ok(None);
        };
        rows.next().transpose()?.map(|r| self.table_with_columns(&r)).transpose()
    }

    fn list_table_names(&self, schema: &str, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>> {
        self.names(schema, ObjectType::Table, filter)
    }

    fn list_views(&self, schema: &str) -> Result<Lazy<'_, ViewInfo>> {
        Ok(match self.objects(schema, ObjectType::View, DETAIL_COLUMNS, None, None)? {
            Some(rows) => Box::new(rows.map(move |row| row.and_then(|r| self.view_with_columns(&r)))),
            None => Box::new(std::iter::empty()),
        })
    }

    fn get_view(&self, schema: &str, view: &str) -> Result<Option<ViewInfo>> {
        ensure_valid_name("view", view)?;
        let Some(mut rows) =
            self.objects(schema, ObjectType::View, DETAIL_COLUMNS, Some(view.to_string()), None)?
        else {
            return Ok(None);
        };
        rows.next().transpose()?.map(|r| self.view_with_columns(&r)).transpose()
    }

    fn list_view_names(&self, schema: &str, filter: Option<&NameFilter>) -> Result<Lazy<'_, String>> {
        self.names(schema, ObjectType::View, filter)
    }

    fn object_exists(&self, schema: &str, object_type: ObjectType, object_path: &[String]) -> Result<bool> {
        let name = match object_path {
            [name] => name,
            [] => return Err(DbDriveError::invalid_input("object path is empty")),
            _ => return Ok(false),
        };
        ensure_valid_name("object", name)?;
        match self.objects(schema, object_type, "1", Some(name.clone()), None)? {
            Some(mut rows) => Ok(rows.next().transpose()?.is_some()),
            None => Ok(false),
        }
    }

    fn stream_rows(&self, schema: &str, object: &str, limit: RowLimit) -> Result<RowStream> {
        ensure_valid_name("schema", schema)?;
        ensure_valid_name("object", object)?;
        let sql = if self.matching.quotes_identifiers() {
            format!("SELECT * FROM \"{schema}\".\"{object}\"")
        } else {
            format!("SELECT * FROM {schema}.{object}")
        };
        self.session.query_limited(&sql, &[], limit)
    }
}

fn schema_from_record(r: &Record) -> Result<SchemaInfo> {
    Ok(SchemaInfo {
        name: r.text("name")?,
        owner: None,
        created: None,
        details: SchemaDetails::Sqlite(SqliteSchemaDetails {
            seq: r.opt_i64("seq")?,
            file: r.opt_text("file")?.filter(|f| !f.is_empty()),
        }),
    })
}

fn column_from_record(r: &Record) -> Result<ColumnInfo> {
    let declared = r.opt_text("type")?.filter(|t| !t.is_empty());
    let (length, precision, scale) = declared.as_deref().map_or((None, None, None), type_modifiers);
    let pk = r.opt_i64("pk")?.filter(|p| *p > 0);

    Ok(ColumnInfo {
        schema_name: r.text("schema_name")?,
        table_name: r.text("table_name")?,
        column_name: r.text("name")?,
        nullable: !r.opt_flag("notnull")?.unwrap_or(false),
        data_type: declared,
        length,
        precision,
        scale,
        details: ColumnDetails::Sqlite(SqliteColumnDetails {
            cid: r.opt_i64("cid")?,
            default_value: r.opt_text("dflt_value")?,
            primary_key_position: pk,
        }),
    })
}

/// Length, precision and scale from a declared type such as `VARCHAR(30)`
/// or `DECIMAL(10,2)`
fn type_modifiers(declared: &str) -> (Option<i64>, Option<i64>, Option<i64>) {
    let Some((base, rest)) = declared.split_once('(') else {
        return (None, None, None);
    };
    let Some(inner) = rest.strip_suffix(')') else {
        return (None, None, None);
    };

    let mut parts = inner.split(',').map(|p| p.trim().parse::<i64>().ok());
    let first = parts.next().flatten();
    let second = parts.next().flatten();

    let base = base.trim().to_ascii_uppercase();
    if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") || base.contains("BINARY") {
        (first, None, None)
    } else {
        (None, first, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFactory;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_type_modifiers() {
        assert_eq!(type_modifiers("VARCHAR(30)"), (Some(30), None, None));
        assert_eq!(type_modifiers("decimal(10, 2)"), (None, Some(10), Some(2)));
        assert_eq!(type_modifiers("NUMERIC(8)"), (None, Some(8), None));
        assert_eq!(type_modifiers("INTEGER"), (None, None, None));
        assert_eq!(type_modifiers("TEXT(oops"), (None, None, None));
    }

    #[test]
    fn test_unattached_schema_is_empty() {
        let factory = ScriptedFactory::new("sqlite");
        let tracker = factory.tracker();
        let driver = SqliteCatalog::new(Arc::new(factory), DriveSettings::default());

        assert_eq!(driver.list_tables("aux").unwrap().count(), 0);
        assert!(driver.get_view("aux", "v").unwrap().is_none());
        assert!(!driver.object_exists("aux", ObjectType::Table, &["t".to_string()]).unwrap());
        assert!(tracker.executed_sql().iter().all(|sql| !sql.contains("sqlite_master")));
    }

    #[test]
    fn test_schema_resolved_before_interpolation() {
        let factory = ScriptedFactory::new("sqlite")
            .on("FROM pragma_database_list", &["name"], vec![vec!["main".into()]])
            .on(
                "FROM \"main\".sqlite_master",
                &["schema_name", "name", "sql"],
                vec![vec!["main".into(), "users".into(), "CREATE TABLE users(id)".into()]],
            )
            .on(
                "pragma_table_info",
                &["schema_name", "table_name", "cid", "name", "type", "notnull", "dflt_value", "pk"],
                vec![vec![
                    "main".into(),
                    "users".into(),
                    Value::Int(0),
                    "id".into(),
                    "INTEGER".into(),
                    Value::Int(1),
                    Value::Null,
                    Value::Int(1),
                ]],
            );
        let tracker = factory.tracker();
        let driver = SqliteCatalog::new(Arc::new(factory), DriveSettings::default());

        let table = driver.get_table("MAIN", "USERS").unwrap().unwrap();
        assert_eq!(table.schema_name, "main");
        assert_eq!(table.table_name, "users");
        assert_eq!(table.row_count, None);
        assert_eq!(table.columns.len(), 1);
        assert!(!table.columns[0].nullable);
        let ColumnDetails::Sqlite(details) = &table.columns[0].details else {
            panic!("expected sqlite details");
        };
        assert_eq!(details.primary_key_position, Some(1));

        let sql = tracker.executed_sql();
        assert!(sql[1].starts_with("SELECT :schemaname AS schema_name, name, sql FROM \"main\".sqlite_master"));
        assert!(sql[1].contains("UPPER(name) = UPPER(:objectname)"));
    }

    #[test]
    fn test_rejected_schema_never_queries() {
        let factory = ScriptedFactory::new("sqlite");
        let tracker = factory.tracker();
        let driver = SqliteCatalog::new(Arc::new(factory), DriveSettings::default());

        let err = driver.list_table_names("main\"; DROP", None).err().unwrap();
        assert_eq!(err.error_code(), "NAME_REJECTED");
        assert_eq!(tracker.created(), 0);
    }

    #[test]
    fn test_schema_details() {
        let factory = ScriptedFactory::new("sqlite").on(
            "pragma_database_list",
            &["seq", "name", "file"],
            vec![
                vec![Value::Int(0), "main".into(), "/tmp/app.db".into()],
                vec![Value::Int(1), "temp".into(), "".into()],
            ],
        );
        let driver = SqliteCatalog::new(Arc::new(factory), DriveSettings::default());

        let schemas: Vec<SchemaInfo> = driver.list_schemas().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(schemas.len(), 2);
        assert_eq!(
            schemas[1].details,
            SchemaDetails::Sqlite(SqliteSchemaDetails { seq: Some(1), file: None })
        );
    }
}

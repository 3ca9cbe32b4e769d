//! Navigation Engine
//!
//! Filesystem-style operations over a drive: item lookup, existence checks,
//! child enumeration, wildcard expansion and path arithmetic. Every call
//! classifies its path first and only then dispatches to the active
//! [`CatalogDriver`].
//!
//! # Stateless Design
//! A [`Navigator`] holds only the driver and the drive root. Nothing is
//! cached between calls; each call is a function of the path and whatever
//! the database reports at that moment.
//!
//! # Recursion
//! Recursive listings descend Database → Schema → ObjectType → rows. Each
//! branch is opened lazily when the consumer reaches it. A branch that fails
//! yields its error as one item and the walk continues with the next
//! sibling.

use std::iter;

use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::{CatalogDriver, Lazy, SchemaInfo, TableInfo, ViewInfo};
use crate::error::{DbDriveError, Result};
use crate::executor::RowLimit;
use crate::naming::{ensure_valid_name, NameFilter};
use crate::path::{self, ObjectType, PathDescriptor, PathType, PATH_SEPARATOR};
use crate::value::Record;

/// A node of the drive tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "item", rename_all = "snake_case")]
pub enum Item {
    Drive { root: String },
    Schema(SchemaInfo),
    ObjectType(ObjectType),
    Table(TableInfo),
    View(ViewInfo),
    Row(Record),
}

/// One entry of a child listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildItem {
    /// Full path of the entry; rows carry the path of their object
    pub path: String,
    pub container: bool,
    #[serde(flatten)]
    pub item: Item,
}

/// Navigation over one drive
pub struct Navigator {
    driver: Box<dyn CatalogDriver>,
    root: String,
}

impl Navigator {
    /// Navigator for drive `name`, rooted at `name:\`
    pub fn new(name: &str, driver: Box<dyn CatalogDriver>) -> Result<Self> {
        ensure_valid_name("drive", name)?;
        Ok(Self { driver, root: format!("{name}:{PATH_SEPARATOR}") })
    }

    /// Drive root, e.g. `db:\`
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    #[must_use]
    pub fn driver(&self) -> &dyn CatalogDriver {
        self.driver.as_ref()
    }

    fn descriptor(&self, path: &str) -> Result<PathDescriptor> {
        PathDescriptor::parse(&path::normalize_path(path))
    }

    /// Outgoing path for catalog-sourced segments; each one is validated
    fn node_path(&self, segments: &[&str]) -> Result<String> {
        segments.iter().enumerate().try_fold(self.root.clone(), |parent, (position, segment)| {
            ensure_valid_name(path::segment_kind(position), segment)?;
            Ok(path::make_path(&parent, segment))
        })
    }

    /// Look up the item a path names
    ///
    /// Rows are recognized but never returned. Missing schemas and objects
    /// are `NotFound`.
    pub fn get_item(&self, path: &str) -> Result<Option<Item>> {
        debug!(path, "get_item <-");
        let d = self.descriptor(path)?;

        let item = match (d.path_type, d.schema(), d.object_type, d.object_name()) {
            (PathType::Database, ..) => Some(Item::Drive { root: self.root.clone() }),
            (PathType::Schema, Some(schema), ..) => {
                let info = self
                    .driver
                    .get_schema(schema)?
                    .ok_or_else(|| DbDriveError::not_found("schema", schema))?;
                Some(Item::Schema(info))
            }
            (PathType::ObjectType, _, Some(object_type), _) => Some(Item::ObjectType(object_type)),
            (PathType::Object, Some(schema), Some(ObjectType::Table), Some(name)) => {
                let table = self
                    .driver
                    .get_table(schema, name)?
                    .ok_or_else(|| DbDriveError::not_found("table", format!("{schema}.{name}")))?;
                Some(Item::Table(table))
            }
            (PathType::Object, Some(schema), Some(ObjectType::View), Some(name)) => {
                let view = self
                    .driver
                    .get_view(schema, name)?
                    .ok_or_else(|| DbDriveError::not_found("view", format!("{schema}.{name}")))?;
                Some(Item::View(view))
            }
            (PathType::Row, ..) => None,
            _ => return Err(DbDriveError::invalid_path(path, "path cannot be resolved")),
        };

        debug!(path, path_type = ?d.path_type, found = item.is_some(), "get_item ->");
        Ok(item)
    }

    /// Whether the item a path names exists; unparsable paths do not
    pub fn item_exists(&self, path: &str) -> Result<bool> {
        debug!(path, "item_exists <-");
        let Ok(d) = self.descriptor(path) else {
            debug!(path, "item_exists -> false (invalid)");
            return Ok(false);
        };

        let exists = match (d.path_type, d.schema(), d.object_type) {
            (PathType::Database, ..) => true,
            (PathType::Schema, Some(schema), _) => self.driver.schema_exists(schema)?,
            (PathType::ObjectType, Some(schema), Some(object_type)) => {
                self.driver.schema_exists(schema)?
                    && self.driver.supported_object_types(schema)?.contains(&object_type)
            }
            (PathType::Object, Some(schema), Some(object_type)) => {
                self.driver.object_exists(schema, object_type, &d.object_path)?
            }
            _ => false,
        };

        debug!(path, exists, "item_exists ->");
        Ok(exists)
    }

    /// Children of a path, rows capped by the drive's `max_read_result`
    pub fn get_child_items(&self, path: &str, recurse: bool) -> Result<Lazy<'_, ChildItem>> {
        self.get_child_items_limited(path, recurse, self.driver.settings().row_limit())
    }

    /// Children of a path with an explicit row cap
    pub fn get_child_items_limited(
        &self,
        path: &str,
        recurse: bool,
        limit: RowLimit,
    ) -> Result<Lazy<'_, ChildItem>> {
        debug!(path, recurse, ?limit, "get_child_items <-");
        let d = self.descriptor(path)?;
        self.children(&d, recurse, limit)
    }

    fn children(&self, d: &PathDescriptor, recurse: bool, limit: RowLimit) -> Result<Lazy<'_, ChildItem>> {
        match (d.path_type, d.schema(), d.object_type, d.object_name()) {
            (PathType::Database, ..) => {
                let schemas = self.driver.list_schemas()?;
                Ok(Box::new(schemas.flat_map(move |schema| {
                    self.with_subtree(schema, recurse, limit, |schema: SchemaInfo| {
                        let path = self.node_path(&[&schema.name])?;
                        Ok((path, Item::Schema(schema)))
                    })
                })))
            }
            (PathType::Schema, Some(schema), ..) => {
                if !self.driver.schema_exists(schema)? {
                    return Err(DbDriveError::not_found("schema", schema));
                }
                let schema = schema.to_string();
                let types = self.driver.supported_object_types(&schema)?;
                Ok(Box::new(types.into_iter().flat_map(move |object_type| {
                    self.with_subtree(Ok(object_type), recurse, limit, |object_type: ObjectType| {
                        let path = self.node_path(&[&schema, object_type.as_str()])?;
                        Ok((path, Item::ObjectType(object_type)))
                    })
                })))
            }
            (PathType::ObjectType, Some(schema), Some(ObjectType::Table), _) => {
                let tables = self.driver.list_tables(schema)?;
                Ok(Box::new(tables.flat_map(move |table| {
                    self.with_subtree(table, recurse, limit, |table: TableInfo| {
                        let path = self.node_path(&[
                            &table.schema_name,
                            ObjectType::Table.as_str(),
                            &table.table_name,
                        ])?;
                        Ok((path, Item::Table(table)))
                    })
                })))
            }
            (PathType::ObjectType, Some(schema), Some(ObjectType::View), _) => {
                let views = self.driver.list_views(schema)?;
                Ok(Box::new(views.flat_map(move |view| {
                    self.with_subtree(view, recurse, limit, |view: ViewInfo| {
                        let path = self.node_path(&[
                            &view.schema_name,
                            ObjectType::View.as_str(),
                            &view.view_name,
                        ])?;
                        Ok((path, Item::View(view)))
                    })
                })))
            }
            (PathType::Object, Some(schema), Some(object_type), Some(name)) => {
                let path = self.node_path(&[schema, object_type.as_str(), name])?;
                let rows = self.driver.stream_rows(schema, name, limit)?;
                Ok(Box::new(rows.map(move |row| {
                    row.map(|record| ChildItem {
                        path: path.clone(),
                        container: false,
                        item: Item::Row(record),
                    })
                })))
            }
            (PathType::Row, ..) => Ok(Box::new(iter::empty())),
            _ => Err(DbDriveError::invalid_path(descriptor_display(d), "path cannot be listed")),
        }
    }

    /// Emit one container node, followed by its subtree when recursing
    fn with_subtree<T, F>(
        &self,
        node: Result<T>,
        recurse: bool,
        limit: RowLimit,
        build: F,
    ) -> Lazy<'_, ChildItem>
    where
        T: 'static,
        F: FnOnce(T) -> Result<(String, Item)>,
    {
        let (path, item) = match node.and_then(build) {
            Ok(entry) => entry,
            Err(e) => {
                if matches!(e, DbDriveError::NameRejected { .. }) {
                    warn!(error = %e, "catalog name cannot be addressed");
                }
                return Box::new(iter::once(Err(e)));
            }
        };

        let entry = iter::once(Ok(ChildItem { path: path.clone(), container: true, item }));
        if !recurse {
            return Box::new(entry);
        }
        Box::new(entry.chain(iter::once_with(move || self.branch(&path, limit)).flatten()))
    }

    fn branch(&self, path: &str, limit: RowLimit) -> Lazy<'_, ChildItem> {
        let opened = self.descriptor(path).and_then(|d| self.children(&d, true, limit));
        match opened {
            Ok(items) => {
                let path = path.to_string();
                Box::new(items.inspect(move |item| {
                    if let Err(e) = item {
                        warn!(path = %path, error = %e, "branch failed mid-listing");
                    }
                }))
            }
            Err(e) => {
                warn!(path, error = %e, "skipping branch");
                Box::new(iter::once(Err(e)))
            }
        }
    }

    /// Names of the children of a path, without metadata
    pub fn get_child_names(&self, path: &str) -> Result<Lazy<'_, String>> {
        debug!(path, "get_child_names <-");
        let d = self.descriptor(path)?;

        match (d.path_type, d.schema(), d.object_type) {
            (PathType::Database, ..) => Ok(checked_names(self.driver.list_schema_names(None)?, "schema")),
            (PathType::Schema, Some(schema), _) => {
                if !self.driver.schema_exists(schema)? {
                    return Err(DbDriveError::not_found("schema", schema));
                }
                let names = self.driver.supported_object_types(schema)?;
                Ok(Box::new(names.into_iter().map(|t| Ok(t.as_str().to_string()))))
            }
            (PathType::ObjectType, Some(schema), Some(ObjectType::Table)) => {
                Ok(checked_names(self.driver.list_table_names(schema, None)?, "table"))
            }
            (PathType::ObjectType, Some(schema), Some(ObjectType::View)) => {
                Ok(checked_names(self.driver.list_view_names(schema, None)?, "view"))
            }
            (PathType::Object | PathType::Row, ..) => Ok(Box::new(iter::empty())),
            _ => Err(DbDriveError::invalid_path(path, "path cannot be listed")),
        }
    }

    /// Whether a path can have children; no I/O
    #[must_use]
    pub fn has_child_items(&self, path: &str) -> bool {
        let d = path::classify(Some(path::normalize_path(path).as_str()));
        matches!(
            d.path_type,
            PathType::Database | PathType::Schema | PathType::ObjectType | PathType::Object
        )
    }

    /// Everything except rows is a container
    #[must_use]
    pub fn is_item_container(&self, path: &str) -> bool {
        let d = path::classify(Some(path::normalize_path(path).as_str()));
        !matches!(d.path_type, PathType::Row | PathType::Invalid)
    }

    /// Grammar check only; the path must already use the canonical separator
    #[must_use]
    pub fn is_valid_path(&self, path: &str) -> bool {
        path::is_valid_path(path)
    }

    /// Leaf name of a path, with the object type in canonical spelling
    #[must_use]
    pub fn get_child_name(&self, path: &str) -> String {
        let normalized = path::normalize_path(path);
        let d = path::classify(Some(normalized.as_str()));
        match (d.path_type, d.object_type) {
            (PathType::Database, _) => self.root.clone(),
            (PathType::ObjectType, Some(object_type)) => object_type.as_str().to_string(),
            _ => path::child_name(&normalized),
        }
    }

    /// Expand `*` and `?` in the last segment of `pattern` into full paths
    ///
    /// Server-side filters are used for schema and object names. A pattern
    /// without wildcards yields itself when the item exists.
    pub fn expand_path(&self, pattern: &str) -> Result<Lazy<'_, String>> {
        debug!(pattern, "expand_path <-");
        let normalized = path::normalize_path(pattern);
        let trimmed = normalized.trim_end_matches(PATH_SEPARATOR);
        let (parent, leaf) = trimmed.rsplit_once(PATH_SEPARATOR).unwrap_or(("", trimmed));

        if !leaf.contains(['*', '?']) {
            return Ok(if self.item_exists(&normalized)? {
                Box::new(iter::once(Ok(normalized)))
            } else {
                Box::new(iter::empty())
            });
        }

        let filter = NameFilter::parse(leaf)?;
        let d = self.descriptor(parent)?;
        match (d.path_type, d.schema(), d.object_type) {
            (PathType::Database, ..) => {
                let names = self.driver.list_schema_names(Some(&filter))?;
                Ok(Box::new(names.map(move |name| name.and_then(|n| self.node_path(&[&n])))))
            }
            (PathType::Schema, Some(schema), _) => {
                let schema = schema.to_string();
                let types = self.driver.supported_object_types(&schema)?;
                Ok(Box::new(
                    types
                        .into_iter()
                        .filter(move |t| filter.matches(t.as_str()))
                        .map(move |t| self.node_path(&[&schema, t.as_str()])),
                ))
            }
            (PathType::ObjectType, Some(schema), Some(object_type)) => {
                let names = match object_type {
                    ObjectType::Table => self.driver.list_table_names(schema, Some(&filter))?,
                    ObjectType::View => self.driver.list_view_names(schema, Some(&filter))?,
                };
                let schema = schema.to_string();
                Ok(Box::new(names.map(move |name| {
                    name.and_then(|n| self.node_path(&[&schema, object_type.as_str(), &n]))
                })))
            }
            _ => Ok(Box::new(iter::empty())),
        }
    }

    #[must_use]
    pub fn make_path(&self, parent: &str, child: &str) -> String {
        path::make_path(parent, child)
    }

    /// Parent of `path`; an empty `root` means the drive root
    #[must_use]
    pub fn get_parent_path(&self, path: &str, root: &str) -> String {
        let floor = if root.is_empty() { self.root.as_str() } else { root };
        let parent = path::get_parent_path(path, floor);
        debug!(path, root = floor, parent = %parent, "get_parent_path");
        parent
    }

    /// `path` relative to `base`; an empty `base` means the drive root
    #[must_use]
    pub fn normalize_relative_path(&self, path: &str, base: &str) -> String {
        let base = if base.is_empty() { self.root.as_str() } else { base };
        path::normalize_relative_path(path, base)
    }
}

fn checked_names<'a>(names: Lazy<'a, String>, kind: &'static str) -> Lazy<'a, String> {
    Box::new(names.map(move |name| {
        let name = name?;
        if let Err(e) = ensure_valid_name(kind, &name) {
            warn!(error = %e, "catalog name cannot be addressed");
            return Err(e);
        }
        Ok(name)
    }))
}

fn descriptor_display(d: &PathDescriptor) -> String {
    let mut segments: Vec<&str> = Vec::new();
    segments.extend(d.schema());
    segments.extend(d.object_type.map(ObjectType::as_str));
    segments.extend(d.object_path.iter().map(String::as_str));
    segments.join(&PATH_SEPARATOR.to_string())
}

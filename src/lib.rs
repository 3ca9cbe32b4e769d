//! dbdrive - Relational Database Catalogs as a Drive
//!
//! dbdrive exposes the metadata and contents of a relational database as a
//! filesystem-like tree rooted at `<drive>:\`:
//!
//! ```text
//! db:\                      database
//! db:\SALES                 schema
//! db:\SALES\Tables          object type (Tables, Views)
//! db:\SALES\Tables\ORDERS   table; children are its rows
//! ```
//!
//! # Core Principles
//! - Stateless: every call classifies its path and queries the database again
//! - Lazy: listings are one-pass sequences backed by open cursors
//! - Injection safe: path values are bound parameters, and the few
//!   interpolated identifiers pass the name validator first
//! - Read-only: nothing writes to the database
//!
//! # Module Organization
//! - [`path`] and [`naming`] - path grammar, classification and name validation
//! - [`executor`] and [`value`] - row streaming over a connection contract
//! - [`engine`] - catalog driver contract and the Oracle, `PostgreSQL` and `SQLite` drivers
//! - [`navigate`] - filesystem-style navigation over a driver
//! - [`capability`] - read-only guard for ad-hoc queries
//! - [`config`], [`output`], [`logging`] - CLI support

pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod naming;
pub mod navigate;
pub mod output;
pub mod path;
pub mod value;

#[cfg(test)]
mod testing;

pub use capability::validate_query;
pub use config::{ConfigLocation, DriveConfig, DriveRegistry, StoredDrive};
pub use engine::{
    open_driver, CatalogDriver, ColumnInfo, DriveSettings, NameMatching, Provider, SchemaInfo,
    TableInfo, ViewInfo,
};
pub use error::{DbDriveError, Result};
pub use executor::{execute, ConnectionFactory, QueryOptions, RowLimit, RowStream};
pub use naming::{is_valid_name, NameFilter};
pub use navigate::{ChildItem, Item, Navigator};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use path::{ObjectType, PathDescriptor, PathType};
pub use value::{NamedParam, ParamValue, Record, Value};

/// Open the driver for a configured drive and wrap it in a [`Navigator`]
pub fn open_drive(drive: &DriveConfig) -> Result<Navigator> {
    let driver = open_driver(drive.provider.as_str(), &drive.connection_string, drive.settings.clone())?;
    Navigator::new(&drive.name, driver)
}

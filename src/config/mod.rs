//! Drive Registry
//!
//! Named drives are stored as JSON: provider identifier, connection string
//! (or the environment variable holding it) and per-drive tunables.
//!
//! # Configuration Locations
//! - Local: `.dbdrive/config.json` (per project)
//! - Global: `<config_dir>/dbdrive/drives.json` (per user)
//!
//! # Resolution Precedence
//! Both files are merged. A drive defined in both is taken from the local
//! file, and a local default pointer replaces the global one.
//!
//! # Secrets
//! Connection strings can be kept out of the files with
//! `connection_string_env`. They are never logged and never listed.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::{DriveSettings, Provider};
use crate::error::{DbDriveError, Result};
use crate::naming::ensure_valid_name;

/// All drives of one config file, plus the default pointer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveRegistry {
    #[serde(default)]
    pub drives: BTreeMap<String, StoredDrive>,

    /// Drive used when none is named (must exist in `drives`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// One drive as written in a config file
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDrive {
    /// Provider identifier, e.g. `postgres` or `Oracle.ManagedDataAccess.Client`
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    /// Environment variable holding the connection string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string_env: Option<String>,

    #[serde(flatten)]
    pub settings: DriveSettings,
}

impl fmt::Debug for StoredDrive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredDrive")
            .field("provider", &self.provider)
            .field("connection_string", &self.connection_string.as_ref().map(|_| "<redacted>"))
            .field("connection_string_env", &self.connection_string_env)
            .field("settings", &self.settings)
            .finish()
    }
}

/// A drive ready to open
#[derive(Clone)]
pub struct DriveConfig {
    /// Drive name; the root is `<name>:\`
    pub name: String,
    pub provider: Provider,
    pub connection_string: String,
    pub settings: DriveSettings,
}

impl fmt::Debug for DriveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveConfig")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Listing entry; carries no connection details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveSummary {
    pub name: String,
    pub provider: String,
    pub is_default: bool,
}

impl StoredDrive {
    #[must_use]
    pub fn new(provider: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            connection_string: Some(connection_string.into()),
            connection_string_env: None,
            settings: DriveSettings::default(),
        }
    }

    /// Parse the provider and look up the connection string
    ///
    /// `connection_string_env` wins over an inline connection string.
    pub fn resolve(&self, name: &str) -> Result<DriveConfig> {
        let provider: Provider = self.provider.parse()?;

        let connection_string = match (&self.connection_string_env, &self.connection_string) {
            (Some(var), _) => std::env::var(var).map_err(|_| {
                DbDriveError::config_error(format!(
                    "Environment variable {var} not found for drive '{name}'"
                ))
            })?,
            (None, Some(inline)) => inline.clone(),
            (None, None) => {
                return Err(DbDriveError::config_error(format!(
                    "Drive '{name}' has neither connection_string nor connection_string_env"
                )))
            }
        };

        Ok(DriveConfig {
            name: name.to_string(),
            provider,
            connection_string,
            settings: self.settings.clone(),
        })
    }
}

impl DriveRegistry {
    /// Resolve `name`, or the default drive when `name` is `None`
    pub fn resolve(&self, name: Option<&str>) -> Result<DriveConfig> {
        let name = match name {
            Some(n) => n,
            None => self.default.as_deref().ok_or_else(|| {
                DbDriveError::config_error("No drive named and no default drive configured")
            })?,
        };

        let stored = self
            .drives
            .get(name)
            .ok_or_else(|| DbDriveError::config_error(format!("Drive '{name}' not found")))?;
        stored.resolve(name)
    }

    /// Add or replace a drive; the first drive becomes the default
    pub fn insert(&mut self, name: &str, drive: StoredDrive) -> Result<()> {
        ensure_valid_name("drive", name)?;
        drive.provider.parse::<Provider>()?;

        if self.drives.is_empty() {
            self.default = Some(name.to_string());
        }
        self.drives.insert(name.to_string(), drive);
        Ok(())
    }

    /// Remove a drive, clearing the default pointer if it named it
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.drives.remove(name).is_some();
        if removed && self.default.as_deref() == Some(name) {
            self.default = None;
        }
        removed
    }

    /// Overlay `local` on `self`
    #[must_use]
    pub fn merge(mut self, local: Self) -> Self {
        self.drives.extend(local.drives);
        if local.default.is_some() {
            self.default = local.default;
        }
        self
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<DriveSummary> {
        self.drives
            .iter()
            .map(|(name, drive)| DriveSummary {
                name: name.clone(),
                provider: drive.provider.clone(),
                is_default: self.default.as_deref() == Some(name.as_str()),
            })
            .collect()
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// `.dbdrive/config.json` in the current directory
    Local,
    /// `<config_dir>/dbdrive/drives.json`
    Global,
}

impl ConfigLocation {
    pub fn path(self) -> Result<PathBuf> {
        match self {
            Self::Local => local_config_path(),
            Self::Global => global_config_path(),
        }
    }
}

/// Path to `.dbdrive/config.json` under the current directory
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        DbDriveError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".dbdrive").join("config.json"))
}

/// Path to the per-user drive file
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| DbDriveError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("dbdrive").join("drives.json"))
}

/// Load a registry file; a missing file is an empty registry
pub fn load_registry(path: &Path) -> Result<DriveRegistry> {
    if !path.exists() {
        return Ok(DriveRegistry::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| DbDriveError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str(&contents).map_err(|e| {
        DbDriveError::config_error(format!("Invalid config file {}: {e}", path.display()))
    })
}

pub fn save_registry(path: &Path, registry: &DriveRegistry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            DbDriveError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(registry)
        .map_err(|e| DbDriveError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| DbDriveError::config_error(format!("Could not write config file: {e}")))?;

    debug!(path = %path.display(), drives = registry.drives.len(), "registry saved");
    Ok(())
}

/// Global registry with the local one merged over it
pub fn load_with_precedence() -> Result<DriveRegistry> {
    let global = load_registry(&global_config_path()?)?;
    let local = load_registry(&local_config_path()?)?;
    Ok(global.merge(local))
}

/// Resolve a drive from the merged registry
pub fn resolve_drive(name: Option<&str>) -> Result<DriveConfig> {
    load_with_precedence()?.resolve(name)
}

/// Add or replace a drive in the file at `location`
pub fn save_drive(name: &str, drive: StoredDrive, location: ConfigLocation) -> Result<()> {
    let path = location.path()?;
    let mut registry = load_registry(&path)?;
    registry.insert(name, drive)?;
    save_registry(&path, &registry)
}

/// Remove a drive from the file at `location`; false if it was not there
pub fn remove_drive(name: &str, location: ConfigLocation) -> Result<bool> {
    let path = location.path()?;
    let mut registry = load_registry(&path)?;
    if !registry.remove(name) {
        warn!(drive = name, "drive not present in {}", path.display());
        return Ok(false);
    }
    save_registry(&path, &registry)?;
    Ok(true)
}

/// Drives of the merged registry
pub fn list_drives() -> Result<Vec<DriveSummary>> {
    Ok(load_with_precedence()?.summaries())
}

/// Ask for a provider interactively
pub fn prompt_provider() -> Result<String> {
    let labels = [Provider::Postgres, Provider::Sqlite, Provider::Oracle].map(|p| p.as_str());
    let idx = dialoguer::Select::new()
        .with_prompt("Provider")
        .items(&labels)
        .default(0)
        .interact()
        .map_err(|e| DbDriveError::config_error(format!("Prompt failed: {e}")))?;
    Ok(labels[idx].to_string())
}

/// Ask for a connection string interactively
pub fn prompt_connection_string() -> Result<String> {
    dialoguer::Input::<String>::new()
        .with_prompt("Connection string")
        .interact_text()
        .map_err(|e| DbDriveError::config_error(format!("Prompt failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NameMatching;
    use pretty_assertions::assert_eq;

    fn temp_config(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dbdrive_config_{name}"));
        let _ = fs::remove_dir_all(&dir);
        dir.join("drives.json")
    }

    #[test]
    fn test_registry_deserializes_settings_inline() {
        let json = r#"{
            "drives": {
                "hr": {
                    "provider": "Oracle.ManagedDataAccess.Client",
                    "connection_string": "hr/secret@//db:1521/XE",
                    "max_read_result": 25,
                    "name_matching": "case-insensitive"
                }
            },
            "default": "hr"
        }"#;
        let registry: DriveRegistry = serde_json::from_str(json).unwrap();

        let drive = registry.resolve(None).unwrap();
        assert_eq!(drive.name, "hr");
        assert_eq!(drive.provider, Provider::Oracle);
        assert_eq!(drive.settings.max_read_result, 25);
        assert_eq!(drive.settings.timeout_secs, DriveSettings::default().timeout_secs);
        assert_eq!(drive.settings.name_matching, Some(NameMatching::CaseInsensitive));
    }

    #[test]
    fn test_connection_string_from_env() {
        std::env::set_var("DBDRIVE_TEST_CS_PRESENT", "host=localhost user=app");
        let drive = StoredDrive {
            connection_string: None,
            connection_string_env: Some("DBDRIVE_TEST_CS_PRESENT".into()),
            ..StoredDrive::new("postgres", "")
        };

        let resolved = drive.resolve("app").unwrap();
        assert_eq!(resolved.connection_string, "host=localhost user=app");
    }

    #[test]
    fn test_missing_env_var_is_config_error() {
        let drive = StoredDrive {
            connection_string_env: Some("DBDRIVE_TEST_CS_ABSENT".into()),
            ..StoredDrive::new("sqlite", "ignored.db")
        };

        let err = drive.resolve("app").unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.message().contains("DBDRIVE_TEST_CS_ABSENT"));
    }

    #[test]
    fn test_unknown_provider_rejected_on_insert() {
        let mut registry = DriveRegistry::default();
        let err = registry.insert("x", StoredDrive::new("mssql", "server=.")).unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_PROVIDER");
        assert!(registry.drives.is_empty());
    }

    #[test]
    fn test_drive_name_validated_on_insert() {
        let mut registry = DriveRegistry::default();
        let err = registry.insert("my drive", StoredDrive::new("sqlite", "a.db")).unwrap_err();
        assert_eq!(err.error_code(), "NAME_REJECTED");
    }

    #[test]
    fn test_first_drive_becomes_default_and_remove_clears_it() {
        let mut registry = DriveRegistry::default();
        registry.insert("a", StoredDrive::new("sqlite", "a.db")).unwrap();
        registry.insert("b", StoredDrive::new("sqlite", "b.db")).unwrap();
        assert_eq!(registry.default.as_deref(), Some("a"));

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert_eq!(registry.default, None);
        assert_eq!(registry.resolve(None).unwrap_err().error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_local_overrides_global() {
        let mut global = DriveRegistry::default();
        global.insert("shared", StoredDrive::new("postgres", "host=global")).unwrap();
        global.insert("only_global", StoredDrive::new("sqlite", "g.db")).unwrap();

        let mut local = DriveRegistry::default();
        local.insert("shared", StoredDrive::new("postgres", "host=local")).unwrap();

        let merged = global.merge(local);
        assert_eq!(merged.drives.len(), 2);
        assert_eq!(merged.default.as_deref(), Some("shared"));
        assert_eq!(merged.resolve(Some("shared")).unwrap().connection_string, "host=local");
        assert!(merged.resolve(Some("only_global")).is_ok());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_config("roundtrip");
        assert_eq!(load_registry(&path).unwrap(), DriveRegistry::default());

        let mut registry = DriveRegistry::default();
        registry.insert("lite", StoredDrive::new("sqlite", "/tmp/x.db")).unwrap();
        save_registry(&path, &registry).unwrap();

        assert_eq!(load_registry(&path).unwrap(), registry);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let path = temp_config("invalid");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_registry(&path).unwrap_err().error_code(), "CONFIG_ERROR");
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_summaries_hide_connection_strings() {
        let mut registry = DriveRegistry::default();
        registry.insert("pg", StoredDrive::new("postgres", "password=hunter2")).unwrap();

        let json = serde_json::to_string(&registry.summaries()).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!format!("{:?}", registry.drives["pg"]).contains("hunter2"));
        assert!(!format!("{:?}", registry.resolve(None).unwrap()).contains("hunter2"));
    }
}

//! dbdrive CLI Entry Point
//!
//! Subcommands:
//! - `drive add|list|remove` - manage the drive registry
//! - `get-item`, `children`, `names`, `exists`, `expand` - navigate a drive
//! - `query` - run a read-only statement with named parameters
//!
//! Every command prints one JSON envelope on stdout. Logs go to stderr.

use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, error};

use dbdrive::config::{self, ConfigLocation, DriveConfig, StoredDrive};
use dbdrive::engine::connector_for;
use dbdrive::{
    execute, logging, open_drive, validate_query, DbDriveError, ErrorEnvelope, ErrorInfo, Metadata,
    NamedParam, Record, Result, RowLimit, SuccessEnvelope,
};

/// Browse a relational database catalog as a drive
#[derive(Parser)]
#[command(name = "dbdrive")]
#[command(about = "Navigate database schemas, tables, views and rows as a drive")]
#[command(version)]
struct Cli {
    /// Drive to use instead of the configured default
    #[arg(long, global = true)]
    drive: Option<String>,

    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Errors only on stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configured drives
    Drive {
        #[command(subcommand)]
        action: DriveAction,
    },

    /// Show the item at a path
    GetItem { path: String },

    /// List the children of a path
    Children {
        path: String,

        /// Descend into schemas, object types and objects
        #[arg(long)]
        recurse: bool,

        /// Row cap under object nodes; zero or negative means no limit
        #[arg(long, allow_negative_numbers = true)]
        max_rows: Option<i64>,
    },

    /// List child names only
    Names { path: String },

    /// Check whether a path exists
    Exists { path: String },

    /// Expand `*` and `?` in the last path segment
    Expand { pattern: String },

    /// Run a read-only statement
    Query {
        #[arg(long)]
        sql: String,

        /// Named parameter as `name=value`; the value is read as JSON, else as text
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,

        /// Row cap; zero or negative means no limit
        #[arg(long, allow_negative_numbers = true)]
        max_rows: Option<i64>,

        /// Statement timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum DriveAction {
    /// Add or replace a drive (prompts for missing values)
    Add {
        name: String,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        connection_string: Option<String>,

        /// Read the connection string from this environment variable
        #[arg(long)]
        connection_string_env: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        max_read_result: Option<i64>,

        /// Write to the per-user file instead of `.dbdrive/config.json`
        #[arg(long)]
        global: bool,
    },

    /// List configured drives
    List,

    /// Remove a drive
    Remove {
        name: String,

        #[arg(long)]
        global: bool,
    },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Drive { action: DriveAction::Add { .. } } => "drive-add",
            Self::Drive { action: DriveAction::List } => "drive-list",
            Self::Drive { action: DriveAction::Remove { .. } } => "drive-remove",
            Self::GetItem { .. } => "get-item",
            Self::Children { .. } => "children",
            Self::Names { .. } => "names",
            Self::Exists { .. } => "exists",
            Self::Expand { .. } => "expand",
            Self::Query { .. } => "query",
        }
    }
}

/// Result of one command before it is wrapped in an envelope
struct Outcome {
    data: serde_json::Value,
    item_count: Option<usize>,
    errors: Vec<ErrorInfo>,
}

impl Outcome {
    fn single(data: impl Serialize) -> Result<Self> {
        Ok(Self { data: to_json(&data)?, item_count: None, errors: Vec::new() })
    }

    fn listing<T: Serialize>(items: &[T]) -> Result<Self> {
        Ok(Self { data: to_json(items)?, item_count: Some(items.len()), errors: Vec::new() })
    }
}

fn to_json<T: Serialize + ?Sized>(data: &T) -> Result<serde_json::Value> {
    serde_json::to_value(data)
        .map_err(|e| DbDriveError::invalid_input(format!("Failed to encode output: {e}")))
}

fn parse_param(raw: &str) -> std::result::Result<(String, serde_json::Value), String> {
    let (name, value) =
        raw.split_once('=').ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim().trim_start_matches(':');
    if name.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet).context("Failed to initialize logging")?;

    let command = cli.command.name();
    let started = Instant::now();
    let mut provider = String::new();

    let result = run(&cli, &mut provider);
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (json, code) = match result {
        Ok(outcome) => {
            let meta = match outcome.item_count {
                Some(count) => Metadata::with_items(elapsed_ms, count),
                None => Metadata::new(elapsed_ms),
            }
            .with_errors(outcome.errors);
            let envelope = SuccessEnvelope::new(provider, command, outcome.data, meta);
            (serde_json::to_string(&envelope), ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(code = e.error_code(), "{e}");
            let envelope = ErrorEnvelope::from_error(provider, command, &e);
            (serde_json::to_string(&envelope), ExitCode::FAILURE)
        }
    };

    println!("{}", json.context("Failed to encode envelope")?);
    Ok(code)
}

fn run(cli: &Cli, provider: &mut String) -> Result<Outcome> {
    if let Commands::Drive { action } = &cli.command {
        return run_drive(action);
    }

    let drive = config::resolve_drive(cli.drive.as_deref())?;
    provider.push_str(drive.provider.as_str());
    debug!(drive = %drive.name, %provider, command = cli.command.name(), "dispatch");

    if let Commands::Query { sql, params, max_rows, timeout } = &cli.command {
        return run_query(&drive, sql, params, *max_rows, *timeout);
    }

    let nav = open_drive(&drive)?;
    match &cli.command {
        Commands::GetItem { path } => Outcome::single(nav.get_item(path)?),
        Commands::Children { path, recurse, max_rows } => {
            let limit = max_rows.map_or_else(|| drive.settings.row_limit(), RowLimit::from_signed);
            let mut items = Vec::new();
            let mut errors = Vec::new();
            for item in nav.get_child_items_limited(path, *recurse, limit)? {
                match item {
                    Ok(item) => items.push(item),
                    Err(e) if *recurse || matches!(e, DbDriveError::NameRejected { .. }) => {
                        errors.push(ErrorInfo::from(&e));
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(Outcome { errors, ..Outcome::listing(&items)? })
        }
        Commands::Names { path } => {
            let names = nav.get_child_names(path)?.collect::<Result<Vec<_>>>()?;
            Outcome::listing(&names)
        }
        Commands::Exists { path } => Outcome::single(nav.item_exists(path)?),
        Commands::Expand { pattern } => {
            let paths = nav.expand_path(pattern)?.collect::<Result<Vec<_>>>()?;
            Outcome::listing(&paths)
        }
        Commands::Drive { .. } | Commands::Query { .. } => {
            Err(DbDriveError::invalid_input("command dispatched twice"))
        }
    }
}

fn run_query(
    drive: &DriveConfig,
    sql: &str,
    params: &[(String, serde_json::Value)],
    max_rows: Option<i64>,
    timeout: Option<u64>,
) -> Result<Outcome> {
    validate_query(sql, drive.provider)?;

    let params = params
        .iter()
        .map(|(name, value)| NamedParam::from_json(name, value))
        .collect::<Result<Vec<_>>>()?;

    let limit = max_rows.map_or_else(|| drive.settings.row_limit(), RowLimit::from_signed);
    let mut options = drive.settings.query_options(limit);
    if let Some(secs) = timeout {
        options.timeout = Duration::from_secs(secs);
    }

    let factory = connector_for(drive.provider, &drive.connection_string)?;
    let rows = execute(factory.as_ref(), sql, &params, &options)?.collect::<Result<Vec<Record>>>()?;
    Outcome::listing(&rows)
}

fn run_drive(action: &DriveAction) -> Result<Outcome> {
    match action {
        DriveAction::Add {
            name,
            provider,
            connection_string,
            connection_string_env,
            max_read_result,
            global,
        } => {
            let provider = match provider {
                Some(p) => p.clone(),
                None => config::prompt_provider()?,
            };
            let connection_string = match (connection_string, connection_string_env) {
                (Some(cs), _) => Some(cs.clone()),
                (None, Some(_)) => None,
                (None, None) => Some(config::prompt_connection_string()?),
            };

            let mut drive = StoredDrive {
                connection_string,
                connection_string_env: connection_string_env.clone(),
                ..StoredDrive::new(provider, String::new())
            };
            if let Some(max) = max_read_result {
                drive.settings.max_read_result = *max;
            }

            config::save_drive(name, drive, location(*global))?;
            Outcome::single(serde_json::json!({ "name": name, "saved": true }))
        }
        DriveAction::List => Outcome::listing(&config::list_drives()?),
        DriveAction::Remove { name, global } => {
            let removed = config::remove_drive(name, location(*global))?;
            Outcome::single(serde_json::json!({ "name": name, "removed": removed }))
        }
    }
}

const fn location(global: bool) -> ConfigLocation {
    if global {
        ConfigLocation::Global
    } else {
        ConfigLocation::Local
    }
}

//! Scripted in-memory connections for unit tests
//!
//! A [`ScriptedFactory`] answers statements by SQL substring (and optionally
//! by one bound parameter), counting every connection it creates, opens and
//! releases so tests can assert on resource scoping.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{DbDriveError, Result};
use crate::executor::{Connection, ConnectionFactory, Cursor, Statement};
use crate::value::{NamedParam, ParamValue, Value};

#[derive(Debug, Clone)]
pub(crate) struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<NamedParam>,
    pub timeout: Duration,
    pub fetch_size: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Tracker {
    created: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    fetched: AtomicUsize,
    statements: Mutex<Vec<ExecutedStatement>>,
}

impl Tracker {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Connections created but not yet released
    pub fn live(&self) -> usize {
        self.created() - self.closed()
    }

    /// Rows pulled from cursors
    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.statements.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Rows { columns: Vec<String>, rows: Vec<Vec<Value>>, then_fail: Option<String> },
    Fail(String),
}

#[derive(Debug, Clone)]
struct Script {
    sql_contains: String,
    param: Option<(String, ParamValue)>,
    outcome: Outcome,
}

impl Script {
    fn matches(&self, statement: &Statement<'_>) -> bool {
        statement.sql.contains(&self.sql_contains)
            && self.param.as_ref().map_or(true, |(name, value)| {
                statement.params.iter().any(|p| &p.name == name && &p.value == value)
            })
    }
}

/// Connection factory answering from a script; unmatched SQL yields no rows
#[derive(Debug, Clone)]
pub(crate) struct ScriptedFactory {
    provider: &'static str,
    scripts: Vec<Script>,
    open_failure: Option<String>,
    tracker: Arc<Tracker>,
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| (*c).to_string()).collect()
}

impl ScriptedFactory {
    pub fn new(provider: &'static str) -> Self {
        Self { provider, scripts: Vec::new(), open_failure: None, tracker: Arc::default() }
    }

    pub fn tracker(&self) -> Arc<Tracker> {
        Arc::clone(&self.tracker)
    }

    /// Answer any statement containing `sql_contains`
    pub fn on(mut self, sql_contains: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.scripts.push(Script {
            sql_contains: sql_contains.to_string(),
            param: None,
            outcome: Outcome::Rows { columns: owned(columns), rows, then_fail: None },
        });
        self
    }

    /// Answer statements containing `sql_contains` bound with `name = value`
    pub fn on_param(
        mut self,
        sql_contains: &str,
        name: &str,
        value: impl Into<ParamValue>,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Self {
        self.scripts.push(Script {
            sql_contains: sql_contains.to_string(),
            param: Some((name.to_string(), value.into())),
            outcome: Outcome::Rows { columns: owned(columns), rows, then_fail: None },
        });
        self
    }

    /// Fail at execution time
    pub fn fail(mut self, sql_contains: &str, message: &str) -> Self {
        self.scripts.push(Script {
            sql_contains: sql_contains.to_string(),
            param: None,
            outcome: Outcome::Fail(message.to_string()),
        });
        self
    }

    /// Fail at execution time when bound with `name = value`
    pub fn fail_param(
        mut self,
        sql_contains: &str,
        name: &str,
        value: impl Into<ParamValue>,
        message: &str,
    ) -> Self {
        self.scripts.push(Script {
            sql_contains: sql_contains.to_string(),
            param: Some((name.to_string(), value.into())),
            outcome: Outcome::Fail(message.to_string()),
        });
        self
    }

    /// Yield `rows`, then fail on the next fetch
    pub fn fail_after(
        mut self,
        sql_contains: &str,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
        message: &str,
    ) -> Self {
        self.scripts.push(Script {
            sql_contains: sql_contains.to_string(),
            param: None,
            outcome: Outcome::Rows {
                columns: owned(columns),
                rows,
                then_fail: Some(message.to_string()),
            },
        });
        self
    }

    /// Fail every `open`
    pub fn fail_open(mut self, message: &str) -> Self {
        self.open_failure = Some(message.to_string());
        self
    }
}

impl ConnectionFactory for ScriptedFactory {
    fn provider(&self) -> &'static str {
        self.provider
    }

    fn create(&self) -> Result<Box<dyn Connection>> {
        self.tracker.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            provider: self.provider,
            scripts: self.scripts.clone(),
            open_failure: self.open_failure.clone(),
            tracker: Arc::clone(&self.tracker),
        }))
    }
}

struct ScriptedConnection {
    provider: &'static str,
    scripts: Vec<Script>,
    open_failure: Option<String>,
    tracker: Arc<Tracker>,
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.tracker.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Connection for ScriptedConnection {
    fn open(&mut self) -> Result<()> {
        if let Some(message) = &self.open_failure {
            return Err(DbDriveError::connection_failed(message.clone()));
        }
        self.tracker.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn execute(self: Box<Self>, statement: &Statement<'_>) -> Result<Box<dyn Cursor>> {
        if let Ok(mut log) = self.tracker.statements.lock() {
            log.push(ExecutedStatement {
                sql: statement.sql.to_string(),
                params: statement.params.to_vec(),
                timeout: statement.timeout,
                fetch_size: statement.fetch_size,
            });
        }

        let outcome = self
            .scripts
            .iter()
            .find(|s| s.matches(statement))
            .map(|s| s.outcome.clone())
            .unwrap_or(Outcome::Rows { columns: Vec::new(), rows: Vec::new(), then_fail: None });

        match outcome {
            Outcome::Fail(message) => Err(DbDriveError::backend(self.provider, message)),
            Outcome::Rows { columns, rows, then_fail } => Ok(Box::new(ScriptedCursor {
                columns,
                rows: rows.into(),
                then_fail,
                connection: self,
            })),
        }
    }
}

struct ScriptedCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    then_fail: Option<String>,
    connection: Box<ScriptedConnection>,
}

impl Cursor for ScriptedCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch(&mut self) -> Result<Option<Vec<Value>>> {
        match self.rows.pop_front() {
            Some(row) => {
                self.connection.tracker.fetched.fetch_add(1, Ordering::SeqCst);
                Ok(Some(row))
            }
            None => match self.then_fail.take() {
                Some(message) => Err(DbDriveError::backend(self.connection.provider, message)),
                None => Ok(None),
            },
        }
    }
}

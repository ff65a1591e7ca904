//! Init script loading, cleaning and execution.
//!
//! Scripts are plain text: lines starting with `--` are comments and `;`
//! ends a statement. A `;` inside a string literal is not supported.

use crate::descriptor::ConnectionDescriptor;
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use sqlx::{Connection, Executor, MySqlConnection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const COMMENT_MARKER: &str = "--";
const STATEMENT_TERMINATOR: char = ';';

/// Resolves a script reference to its text.
pub trait ScriptLoader: Send + Sync {
    /// `Ok(None)` when no script with that name exists.
    fn load(&self, name: &str) -> Result<Option<String>>;
}

/// Loads scripts from files below a root directory.
#[derive(Debug, Clone)]
pub struct DirScriptLoader {
    root: PathBuf,
}

impl DirScriptLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ScriptLoader for DirScriptLoader {
    fn load(&self, name: &str) -> Result<Option<String>> {
        let path = self.root.join(name);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory scripts keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemoryScriptLoader {
    scripts: HashMap<String, String>,
}

impl MemoryScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.scripts.insert(name.into(), text.into());
        self
    }
}

impl ScriptLoader for MemoryScriptLoader {
    fn load(&self, name: &str) -> Result<Option<String>> {
        Ok(self.scripts.get(name).cloned())
    }
}

/// Drop comment lines and blank lines, trimming the rest.
///
/// Every kept line is newline-terminated, so cleaning cleaned text is a no-op.
pub fn clean_script(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(COMMENT_MARKER) {
            continue;
        }
        cleaned.push_str(line);
        cleaned.push('\n');
    }
    cleaned
}

/// Split cleaned text into trimmed, non-empty statements.
///
/// A comment trailing a terminator on the same line starts the next segment,
/// so each segment is cleaned again before it is kept.
pub fn split_statements(cleaned: &str) -> Vec<String> {
    cleaned
        .split(STATEMENT_TERMINATOR)
        .map(|segment| clean_script(segment).trim().to_string())
        .filter(|stmt| !stmt.is_empty())
        .collect()
}

/// A single connection that can run statements one after another.
#[async_trait]
pub trait StatementExecutor: Send {
    async fn execute_statement(&mut self, sql: &str) -> std::result::Result<(), sqlx::Error>;
}

#[async_trait]
impl StatementExecutor for MySqlConnection {
    async fn execute_statement(&mut self, sql: &str) -> std::result::Result<(), sqlx::Error> {
        // Raw text protocol: DDL and admin statements are not preparable on every engine.
        self.execute(sql).await?;
        Ok(())
    }
}

/// Run `statements` in order, stopping at the first failure.
pub async fn execute_statements<E>(executor: &mut E, script: &str, statements: &[String]) -> Result<()>
where
    E: StatementExecutor + ?Sized,
{
    for (index, statement) in statements.iter().enumerate() {
        debug!(script, index, %statement, "Executing statement");
        executor
            .execute_statement(statement)
            .await
            .map_err(|source| HarnessError::ScriptExecution {
                script: script.to_string(),
                index,
                statement: statement.clone(),
                source,
            })?;
    }
    Ok(())
}

/// Shared init-script helper used by every controller.
#[derive(Clone)]
pub struct ScriptRunner {
    loader: Arc<dyn ScriptLoader>,
}

impl ScriptRunner {
    pub fn new(loader: Arc<dyn ScriptLoader>) -> Self {
        Self { loader }
    }

    /// Load, clean and split a script.
    pub fn prepare(&self, script: &str) -> Result<Vec<String>> {
        let text = self
            .loader
            .load(script)?
            .ok_or_else(|| HarnessError::ScriptNotFound(script.to_string()))?;
        Ok(split_statements(&clean_script(&text)))
    }

    /// Execute `script` against `descriptor` over one connection.
    ///
    /// Returns the number of statements executed. Blank references and
    /// scripts without statements are skipped.
    pub async fn run(&self, descriptor: &ConnectionDescriptor, script: &str) -> Result<usize> {
        if script.trim().is_empty() {
            return Ok(0);
        }

        info!(backend = %descriptor.backend(), script, "Executing init script");
        let statements = self.prepare(script)?;
        if statements.is_empty() {
            info!(script, "Init script is empty, skipping");
            return Ok(0);
        }

        let mut conn = MySqlConnection::connect_with(&descriptor.connect_options()?).await?;
        let result = execute_statements(&mut conn, script, &statements).await;
        let closed = conn.close().await;
        result?;
        closed?;

        info!(script, statements = statements.len(), "Init script completed");
        Ok(statements.len())
    }
}

pub mod export;
pub mod gate;
pub mod llm;
pub mod prompts;
pub mod sqlite;

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::{MeasureConfig, ResultSet};
use crate::sql::ValidatedSql;

pub use export::{CsvExporter, ExportError, default_export_path};
pub use gate::TerminalGate;
pub use llm::LlmClient;
pub use sqlite::SqliteExecutor;

/// Failure reported by an external collaborator. The variant names the
/// stage that was talking to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("interpretation failed: {0}")]
    Interpretation(String),

    #[error("rewrite failed: {0}")]
    Rewrite(String),

    #[error("confirmation gate failed: {0}")]
    Gate(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

impl CollaboratorError {
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Interpretation(detail)
            | Self::Rewrite(detail)
            | Self::Gate(detail)
            | Self::Execution(detail) => detail,
        }
    }
}

/// Measure candidates, grouping dimensions and extra predicates pulled out of
/// a natural-language request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpretation {
    pub measures: Vec<String>,
    pub dimensions: Vec<String>,

    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RewriteRequest<'a> {
    pub raw_query: &'a str,
    pub interpretation: &'a Interpretation,
    /// Configs of the candidates that already match a known alias.
    pub known_measures: &'a [MeasureConfig],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Rewrite,
    Sql,
}

impl GateKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rewrite => "rewrite",
            Self::Sql => "sql",
        }
    }
}

impl Display for GateKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "text", rename_all = "snake_case")]
pub enum GateDecision {
    Confirm,
    ConfirmEdited(String),
    Cancel,
}

pub trait Interpreter {
    fn interpret(
        &self,
        query: &str,
        schema_description: &str,
    ) -> Result<Interpretation, CollaboratorError>;
}

pub trait Rewriter {
    fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String, CollaboratorError>;
}

/// Blocks until a human confirms, edits or cancels `payload`.
pub trait ConfirmationGate {
    fn confirm(&self, kind: GateKind, payload: &str) -> Result<GateDecision, CollaboratorError>;
}

pub trait Executor {
    fn execute(&self, sql: &ValidatedSql) -> Result<ResultSet, CollaboratorError>;
}

pub trait Exporter {
    fn export(&self, result: &ResultSet, destination: &Path) -> Result<PathBuf, ExportError>;
}

pub mod controller;
pub mod session;

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::collaborators::GateKind;
use crate::models::{MeasureConfig, ResultSet};
use crate::sql::SqlRule;

pub use controller::{Collaborators, WorkflowController};
pub use session::{SessionError, SessionStore};

/// Workflow stages in their only legal order. `Aborted` and `Rejected` are
/// terminal and reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    MeasuresIdentified,
    QueryRewritten,
    AwaitingRewriteConfirmation,
    MeasuresResolved,
    SqlGenerated,
    AwaitingSqlConfirmation,
    Executed,
    Aborted,
    Rejected,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::MeasuresIdentified => "measures_identified",
            Self::QueryRewritten => "query_rewritten",
            Self::AwaitingRewriteConfirmation => "awaiting_rewrite_confirmation",
            Self::MeasuresResolved => "measures_resolved",
            Self::SqlGenerated => "sql_generated",
            Self::AwaitingSqlConfirmation => "awaiting_sql_confirmation",
            Self::Executed => "executed",
            Self::Aborted => "aborted",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Aborted | Self::Rejected)
    }

    #[must_use]
    pub const fn gate(self) -> Option<GateKind> {
        match self {
            Self::AwaitingRewriteConfirmation => Some(GateKind::Rewrite),
            Self::AwaitingSqlConfirmation => Some(GateKind::Sql),
            _ => None,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationKind {
    InterpretationFailed,
    RewriteFailed,
    GateFailed,
    UserCancelled,
    UnresolvedMeasures,
    UnresolvedDimensions,
    AssemblyFailed,
    UnsafeSql,
    ExecutionFailed,
    ExportFailed,
}

impl TerminationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InterpretationFailed => "interpretation_failed",
            Self::RewriteFailed => "rewrite_failed",
            Self::GateFailed => "gate_failed",
            Self::UserCancelled => "user_cancelled",
            Self::UnresolvedMeasures => "unresolved_measures",
            Self::UnresolvedDimensions => "unresolved_dimensions",
            Self::AssemblyFailed => "assembly_failed",
            Self::UnsafeSql => "unsafe_sql",
            Self::ExecutionFailed => "execution_failed",
            Self::ExportFailed => "export_failed",
        }
    }

    /// Failures of an external service rather than of the query itself.
    #[must_use]
    pub const fn is_external_failure(self) -> bool {
        matches!(
            self,
            Self::InterpretationFailed
                | Self::RewriteFailed
                | Self::GateFailed
                | Self::ExecutionFailed
                | Self::ExportFailed
        )
    }
}

impl Display for TerminationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a workflow stopped short of `Executed`. `offending` carries the data
/// the user needs to self-correct (unmatched terms, the triggering keyword).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationReason {
    pub kind: TerminationKind,
    pub stage: Stage,
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offending: Vec<String>,
}

/// Verdict of the SQL validator on `generated_sql`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub accepted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<SqlRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Where the executed result went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub row_count: usize,
    pub truncated: bool,
    pub columns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
}

/// Everything one query session knows. Each transition consumes a state and
/// returns the next one; no two sessions share an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub raw_query: String,
    pub sql_review_enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,

    #[serde(default)]
    pub candidates: Vec<String>,

    #[serde(default)]
    pub dimensions: Vec<String>,

    #[serde(default)]
    pub filters: Vec<String>,

    #[serde(default)]
    pub rewritten_query: Option<String>,

    #[serde(default)]
    pub rewrite_edited: bool,

    #[serde(default)]
    pub resolved_measures: Vec<MeasureConfig>,

    #[serde(default)]
    pub group_by: Vec<String>,

    #[serde(default)]
    pub unresolved_candidates: Vec<String>,

    #[serde(default)]
    pub generated_sql: Option<String>,

    #[serde(default)]
    pub sql_edited: bool,

    #[serde(default)]
    pub validation: Option<ValidationOutcome>,

    pub stage: Stage,

    #[serde(default)]
    pub termination: Option<TerminationReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSummary>,

    /// Rows are handed to the exporter and the caller, never persisted.
    #[serde(skip)]
    pub result: Option<ResultSet>,
}

impl WorkflowState {
    #[must_use]
    pub fn new(raw_query: impl Into<String>, sql_review_enabled: bool) -> Self {
        Self {
            raw_query: raw_query.into(),
            sql_review_enabled,
            export_path: None,
            candidates: Vec::new(),
            dimensions: Vec::new(),
            filters: Vec::new(),
            rewritten_query: None,
            rewrite_edited: false,
            resolved_measures: Vec::new(),
            group_by: Vec::new(),
            unresolved_candidates: Vec::new(),
            generated_sql: None,
            sql_edited: false,
            validation: None,
            stage: Stage::Input,
            termination: None,
            execution: None,
            result: None,
        }
    }

    #[must_use]
    pub fn with_export_path(mut self, export_path: Option<PathBuf>) -> Self {
        self.export_path = export_path;
        self
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Text presented at the current gate, if the workflow is suspended.
    #[must_use]
    pub fn gate_payload(&self) -> Option<(GateKind, &str)> {
        match self.stage.gate()? {
            GateKind::Rewrite => self
                .rewritten_query
                .as_deref()
                .map(|text| (GateKind::Rewrite, text)),
            GateKind::Sql => self
                .generated_sql
                .as_deref()
                .map(|text| (GateKind::Sql, text)),
        }
    }

    /// Codes of the resolved measures, in resolution order.
    #[must_use]
    pub fn measure_codes(&self) -> Vec<&str> {
        self.resolved_measures
            .iter()
            .map(|measure| measure.code.as_str())
            .collect()
    }
}

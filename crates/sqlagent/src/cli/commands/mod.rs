pub mod ask;
pub mod measures;
pub mod resume;
pub mod sql;

use std::path::{Path, PathBuf};

use anyhow::{Error, Result, bail};
use serde_json::json;
use tracing::warn;

use crate::collaborators::{
    CollaboratorError, CsvExporter, Executor, Interpretation, Interpreter, LlmClient,
    RewriteRequest, Rewriter, SqliteExecutor, default_export_path,
};
use crate::config::{API_KEY_ENV, AgentSettings, RuntimePaths};
use crate::measures::{ConfigError, MeasureStore, write_index_cache};
use crate::models::{QueryEnvelope, QueryEnvelopeCommandFailure, ResultSet};
use crate::sql::ValidatedSql;
use crate::utils::time::{format_unix_ms, unix_timestamp_ms};
use crate::workflow::{Collaborators, SessionStore, Stage, WorkflowState};

const PREVIEW_ROWS: usize = 20;

/// Resolved runtime paths and settings shared by every command.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub paths: RuntimePaths,
    pub settings: AgentSettings,
}

pub(crate) fn emit(command: &str, envelope: &QueryEnvelope) -> Result<()> {
    let encoded = serde_json::to_string(envelope).map_err(|error| {
        Error::new(QueryEnvelopeCommandFailure::new(
            QueryEnvelope::error(
                command,
                "response_encode_failed",
                "failed to encode command response",
            )
            .with_error_details(json!({ "cause": format!("{error:#}") })),
        ))
    })?;
    println!("{encoded}");
    Ok(())
}

pub(crate) fn config_failure(command: &str, error: &ConfigError) -> Error {
    Error::new(QueryEnvelopeCommandFailure::config(
        QueryEnvelope::error(command, "measure_config_invalid", error.to_string())
            .with_error_details(json!({
                "kind": error.kind,
                "detail": error.detail,
                "path": error.path.as_ref().map(|path| path.display().to_string()),
            })),
    ))
}

pub(crate) fn open_store(command: &str, settings: &AgentSettings) -> Result<MeasureStore> {
    MeasureStore::open(&settings.measures_dir).map_err(|error| config_failure(command, &error))
}

/// Rewrites the derived alias cache. Failure only produces a warning.
pub(crate) fn refresh_index_cache(store: &MeasureStore, settings: &AgentSettings) -> Option<String> {
    let generated_at_utc = format_unix_ms(unix_timestamp_ms());
    match write_index_cache(
        &settings.measure_index_file,
        &store.snapshot(),
        &generated_at_utc,
    ) {
        Ok(()) => None,
        Err(error) => {
            warn!(%error, "measure index cache not written");
            Some(error.to_string())
        }
    }
}

pub(crate) fn export_destination(
    context: &CommandContext,
    requested: Option<&Path>,
) -> Result<PathBuf> {
    match requested {
        Some(path) => context.paths.resolve(path),
        None => Ok(default_export_path(
            &context.settings.export_dir,
            unix_timestamp_ms(),
        )),
    }
}

/// The chat-completions client, or the reason it cannot be built.
pub(crate) enum LanguageModel {
    Client(LlmClient),
    Unavailable(String),
}

impl LanguageModel {
    /// With `required`, a missing API key is a configuration failure.
    pub(crate) fn from_env(command: &str, settings: &AgentSettings, required: bool) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        match api_key {
            Some(api_key) => {
                let client = LlmClient::new(api_key, settings.llm.clone()).map_err(|error| {
                    Error::new(QueryEnvelopeCommandFailure::new(
                        QueryEnvelope::error(
                            command,
                            "llm_client_unavailable",
                            "failed to build the LLM HTTP client",
                        )
                        .with_error_details(json!({ "cause": error.to_string() })),
                    ))
                })?;
                Ok(Self::Client(client))
            }
            None if required => Err(Error::new(QueryEnvelopeCommandFailure::config(
                QueryEnvelope::error(
                    command,
                    "llm_api_key_missing",
                    format!("{API_KEY_ENV} is not set"),
                )
                .with_error_details(json!({ "env": API_KEY_ENV })),
            ))),
            None => Ok(Self::Unavailable(format!("{API_KEY_ENV} is not set"))),
        }
    }
}

impl Interpreter for LanguageModel {
    fn interpret(
        &self,
        query: &str,
        schema_description: &str,
    ) -> Result<Interpretation, CollaboratorError> {
        match self {
            Self::Client(client) => client.interpret(query, schema_description),
            Self::Unavailable(reason) => Err(CollaboratorError::Interpretation(reason.clone())),
        }
    }
}

impl Rewriter for LanguageModel {
    fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String, CollaboratorError> {
        match self {
            Self::Client(client) => client.rewrite(request),
            Self::Unavailable(reason) => Err(CollaboratorError::Rewrite(reason.clone())),
        }
    }
}

pub(crate) enum Database {
    Sqlite(SqliteExecutor),
    Unavailable(String),
}

impl Database {
    pub(crate) fn from_settings(command: &str, settings: &AgentSettings, required: bool) -> Result<Self> {
        match &settings.database_path {
            Some(path) => Ok(Self::Sqlite(SqliteExecutor::new(path, settings.row_cap))),
            None if required => Err(Error::new(QueryEnvelopeCommandFailure::config(
                QueryEnvelope::error(
                    command,
                    "database_path_missing",
                    "no database configured; set database_path or SQLAGENT_DB_PATH",
                ),
            ))),
            None => Ok(Self::Unavailable("no database configured".to_string())),
        }
    }
}

impl Executor for Database {
    fn execute(&self, sql: &ValidatedSql) -> Result<ResultSet, CollaboratorError> {
        match self {
            Self::Sqlite(executor) => executor.execute(sql),
            Self::Unavailable(reason) => Err(CollaboratorError::Execution(reason.clone())),
        }
    }
}

/// Live collaborators for the workflow commands.
pub(crate) struct LiveCollaborators {
    language_model: LanguageModel,
    database: Database,
    exporter: CsvExporter,
}

impl LiveCollaborators {
    pub(crate) fn new(language_model: LanguageModel, database: Database) -> Self {
        Self {
            language_model,
            database,
            exporter: CsvExporter,
        }
    }

    pub(crate) fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            interpreter: &self.language_model,
            rewriter: &self.language_model,
            executor: &self.database,
            exporter: &self.exporter,
        }
    }
}

/// Prints the outcome of a workflow run. Suspended states are persisted
/// under `token` (or a new one); terminal states discard the session.
pub(crate) fn report_workflow(
    command: &str,
    state: &WorkflowState,
    sessions: &SessionStore,
    token: Option<&str>,
    warnings: &[String],
) -> Result<()> {
    if let Some((gate, payload)) = state.gate_payload() {
        let token = match token {
            Some(token) => {
                sessions.save(token, state)?;
                token.to_string()
            }
            None => sessions.create(state)?,
        };
        println!("{command}: suspended gate={gate} token={token}");

        let envelope = QueryEnvelope::ok(
            command,
            json!({
                "status": "awaiting_confirmation",
                "stage": state.stage,
                "gate": gate,
                "token": token,
                "payload": payload,
                "measures": state.candidates,
                "dimensions": state.dimensions,
                "filters": state.filters,
                "next": format!("sqlagent resume {token} --confirm | --edit <TEXT> | --cancel"),
            }),
        )
        .with_meta("session_dir", json!(sessions.dir().display().to_string()));
        return emit(command, &with_warnings(envelope, warnings));
    }

    if let Some(token) = token {
        sessions.remove(token)?;
    }

    match state.stage {
        Stage::Executed => {
            let execution = state.execution.as_ref();
            let rows = state
                .result
                .as_ref()
                .map(|result| result.records(PREVIEW_ROWS))
                .unwrap_or_default();
            let export_path = execution
                .and_then(|execution| execution.export_path.as_ref())
                .map(|path| path.display().to_string());
            println!(
                "{command}: complete rows={} export={}",
                execution.map_or(0, |execution| execution.row_count),
                export_path.as_deref().unwrap_or("none")
            );

            let envelope = QueryEnvelope::ok(
                command,
                json!({
                    "status": "executed",
                    "sql": state.generated_sql,
                    "sql_edited": state.sql_edited,
                    "rewritten_query": state.rewritten_query,
                    "measures": state.measure_codes(),
                    "group_by": state.group_by,
                    "row_count": execution.map_or(0, |execution| execution.row_count),
                    "truncated": execution.is_some_and(|execution| execution.truncated),
                    "columns": execution.map(|execution| execution.columns.clone()).unwrap_or_default(),
                    "rows": rows,
                    "export_path": export_path,
                }),
            )
            .with_meta("preview_row_limit", json!(PREVIEW_ROWS));
            emit(command, &with_warnings(envelope, warnings))
        }
        Stage::Aborted => {
            println!("{command}: aborted by user");
            let envelope = QueryEnvelope::ok(
                command,
                json!({
                    "status": "aborted",
                    "stage": state.stage,
                    "reason": state.termination,
                }),
            );
            emit(command, &with_warnings(envelope, warnings))
        }
        Stage::Rejected => Err(rejection_failure(command, state)),
        stage => bail!("workflow stopped at non-terminal stage `{stage}`"),
    }
}

fn rejection_failure(command: &str, state: &WorkflowState) -> Error {
    let Some(termination) = state.termination.as_ref() else {
        return Error::new(QueryEnvelopeCommandFailure::new(QueryEnvelope::error(
            command,
            "workflow_rejected",
            "workflow rejected without a recorded reason",
        )));
    };

    let envelope = QueryEnvelope::error(
        command,
        format!("workflow_{}", termination.kind),
        termination.message.clone(),
    )
    .with_error_details(json!({
        "reason": termination.kind,
        "stage": termination.stage,
        "offending": termination.offending,
        "sql": state.generated_sql,
        "validation": state.validation,
    }));

    if termination.kind.is_external_failure() {
        Error::new(QueryEnvelopeCommandFailure::new(envelope))
    } else {
        Error::new(QueryEnvelopeCommandFailure::rejected(envelope))
    }
}

fn with_warnings(envelope: QueryEnvelope, warnings: &[String]) -> QueryEnvelope {
    warnings.iter().fold(envelope, |envelope, warning| {
        envelope.with_warning("measure_index_cache_unwritten", warning.clone())
    })
}

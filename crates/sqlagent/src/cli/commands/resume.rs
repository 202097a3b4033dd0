use std::path::PathBuf;

use anyhow::{Error, Result};
use clap::{ArgGroup, Args};
use serde_json::json;

use super::{
    CommandContext, Database, LanguageModel, LiveCollaborators, open_store, report_workflow,
};
use crate::collaborators::GateDecision;
use crate::models::{QueryEnvelope, QueryEnvelopeCommandFailure};
use crate::workflow::{SessionError, SessionStore, WorkflowController};

#[derive(Debug, Clone, Args)]
#[command(group(
    ArgGroup::new("decision")
        .required(true)
        .args(["confirm", "edit", "cancel"])
))]
pub struct ResumeArgs {
    #[arg(value_name = "TOKEN")]
    pub token: String,

    /// Accept the presented text unchanged.
    #[arg(long, default_value_t = false)]
    pub confirm: bool,

    /// Accept with replacement text.
    #[arg(long, value_name = "TEXT")]
    pub edit: Option<String>,

    #[arg(long, default_value_t = false)]
    pub cancel: bool,

    /// Override the CSV destination chosen when the query was asked.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,
}

impl ResumeArgs {
    fn decision(&self) -> GateDecision {
        if self.cancel {
            GateDecision::Cancel
        } else if let Some(text) = &self.edit {
            GateDecision::ConfirmEdited(text.clone())
        } else {
            GateDecision::Confirm
        }
    }
}

pub fn run(args: &ResumeArgs, context: &CommandContext) -> Result<()> {
    let sessions = SessionStore::new(&context.paths.out_dir);
    let mut state = sessions
        .load(&args.token)
        .map_err(|error| session_failure(&args.token, &error))?;
    if let Some(export) = &args.export {
        state.export_path = Some(context.paths.resolve(export)?);
    }
    println!(
        "resume: start token={} stage={} decision={}",
        args.token.trim(),
        state.stage,
        decision_key(&args.decision())
    );

    let settings = &context.settings;
    let store = open_store("resume", settings)?;
    let live = LiveCollaborators::new(
        LanguageModel::from_env("resume", settings, false)?,
        Database::from_settings("resume", settings, false)?,
    );
    let controller = WorkflowController::new(&store, &settings.schema, live.collaborators());

    let state = controller.apply_decision(state, args.decision())?;
    let state = controller.advance(state);
    report_workflow("resume", &state, &sessions, Some(args.token.trim()), &[])
}

fn decision_key(decision: &GateDecision) -> &'static str {
    match decision {
        GateDecision::Confirm => "confirm",
        GateDecision::ConfirmEdited(_) => "edit",
        GateDecision::Cancel => "cancel",
    }
}

fn session_failure(token: &str, error: &SessionError) -> Error {
    let code = match error {
        SessionError::InvalidToken(_) => "session_token_invalid",
        SessionError::NotFound(_) => "session_not_found",
        SessionError::NotAtGate { .. } => "session_not_at_gate",
        SessionError::Io { .. } | SessionError::Decode { .. } => "session_unreadable",
    };
    Error::new(QueryEnvelopeCommandFailure::new(
        QueryEnvelope::error("resume", code, error.to_string())
            .with_error_details(json!({ "token": token })),
    ))
}

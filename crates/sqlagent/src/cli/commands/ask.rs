use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::{
    CommandContext, Database, LanguageModel, LiveCollaborators, export_destination, open_store,
    refresh_index_cache, report_workflow,
};
use crate::collaborators::TerminalGate;
use crate::workflow::{SessionStore, WorkflowController, WorkflowState};

#[derive(Debug, Clone, Args)]
pub struct AskArgs {
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Answer both confirmation gates on this terminal instead of suspending.
    #[arg(long, default_value_t = false)]
    pub interactive: bool,

    /// Skip the SQL confirmation gate for this query.
    #[arg(long, default_value_t = false)]
    pub no_sql_review: bool,

    /// CSV destination; defaults to a timestamped file in the export dir.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,
}

pub fn run(args: &AskArgs, context: &CommandContext) -> Result<()> {
    let settings = &context.settings;
    let sql_review_enabled = settings.sql_review_enabled && !args.no_sql_review;
    println!(
        "ask: start interactive={} sql_review={} measures_dir={}",
        args.interactive,
        sql_review_enabled,
        settings.measures_dir.display()
    );

    let store = open_store("ask", settings)?;
    let warnings = refresh_index_cache(&store, settings)
        .into_iter()
        .collect::<Vec<_>>();
    println!("ask: stage measures_loaded count={}", store.snapshot().len());

    let live = LiveCollaborators::new(
        LanguageModel::from_env("ask", settings, true)?,
        Database::from_settings("ask", settings, true)?,
    );
    let controller = WorkflowController::new(&store, &settings.schema, live.collaborators());

    let export_path = export_destination(context, args.export.as_deref())?;
    let state = WorkflowState::new(args.query.as_str(), sql_review_enabled)
        .with_export_path(Some(export_path));
    let state = if args.interactive {
        controller.run_to_completion(state, &TerminalGate::stdio())
    } else {
        controller.advance(state)
    };

    let sessions = SessionStore::new(&context.paths.out_dir);
    report_workflow("ask", &state, &sessions, None, &warnings)
}

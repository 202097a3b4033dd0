use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use super::{CommandContext, config_failure, emit, open_store, refresh_index_cache};
use crate::models::{QueryEnvelope, json_schema};

#[derive(Debug, Clone, Args)]
pub struct MeasuresArgs {
    #[command(subcommand)]
    pub command: MeasuresCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum MeasuresCommand {
    /// List every configured measure.
    List,
    /// Load the measures directory and rewrite the alias index cache.
    Scan,
    /// Copy a new measure config into the measures directory.
    Add(MeasuresAddArgs),
    /// Print the JSON schema of a measure config file.
    Schema,
}

#[derive(Debug, Clone, Args)]
pub struct MeasuresAddArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

pub fn run(args: &MeasuresArgs, context: &CommandContext) -> Result<()> {
    match &args.command {
        MeasuresCommand::List => run_list(context),
        MeasuresCommand::Scan => run_scan(context),
        MeasuresCommand::Add(add_args) => run_add(add_args, context),
        MeasuresCommand::Schema => emit(
            "measures.schema",
            &QueryEnvelope::ok("measures.schema", json_schema()),
        ),
    }
}

fn run_list(context: &CommandContext) -> Result<()> {
    let store = open_store("measures.list", &context.settings)?;
    let measures = store.list();
    let envelope = QueryEnvelope::ok("measures.list", json!({ "measures": measures }))
        .with_meta("measure_count", json!(measures.len()))
        .with_meta(
            "measures_dir",
            json!(store.measures_dir().display().to_string()),
        );
    emit("measures.list", &envelope)
}

fn run_scan(context: &CommandContext) -> Result<()> {
    let settings = &context.settings;
    println!("measures: scan dir={}", settings.measures_dir.display());
    let store = open_store("measures.scan", settings)?;
    let index = store.snapshot();

    let mut envelope = QueryEnvelope::ok(
        "measures.scan",
        json!({
            "measure_count": index.len(),
            "alias_count": index.aliases().len(),
            "codes": index.configs().map(|config| config.code.clone()).collect::<Vec<_>>(),
            "index_file": settings.measure_index_file.display().to_string(),
        }),
    );
    if let Some(warning) = refresh_index_cache(&store, settings) {
        envelope = envelope.with_warning("measure_index_cache_unwritten", warning);
    }
    emit("measures.scan", &envelope)
}

fn run_add(args: &MeasuresAddArgs, context: &CommandContext) -> Result<()> {
    let settings = &context.settings;
    let source = context.paths.resolve(&args.file)?;
    println!("measures: add file={}", source.display());

    let store = open_store("measures.add", settings)?;
    let target = store
        .add_config(&source)
        .map_err(|error| config_failure("measures.add", &error))?;

    let mut envelope = QueryEnvelope::ok(
        "measures.add",
        json!({
            "added": target.display().to_string(),
            "measure_count": store.snapshot().len(),
        }),
    );
    if let Some(warning) = refresh_index_cache(&store, settings) {
        envelope = envelope.with_warning("measure_index_cache_unwritten", warning);
    }
    emit("measures.add", &envelope)
}

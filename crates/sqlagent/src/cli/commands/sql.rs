use anyhow::{Error, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use super::{CommandContext, emit, open_store};
use crate::measures::resolve;
use crate::models::{QueryEnvelope, QueryEnvelopeCommandFailure};
use crate::sql::{SqlRejection, assemble, validate};

#[derive(Debug, Clone, Args)]
pub struct SqlArgs {
    #[command(subcommand)]
    pub command: SqlCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum SqlCommand {
    /// Check a statement against the read-only guardrail.
    Validate(SqlValidateArgs),
    /// Build the statement for known measures without the language model.
    Assemble(SqlAssembleArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SqlValidateArgs {
    #[arg(value_name = "SQL")]
    pub sql: String,
}

#[derive(Debug, Clone, Args)]
pub struct SqlAssembleArgs {
    /// Measure code or alias; repeatable.
    #[arg(long = "measure", value_name = "MEASURE", required = true)]
    pub measures: Vec<String>,

    /// Grouping column or column alias; repeatable.
    #[arg(long = "group-by", value_name = "COLUMN")]
    pub group_by: Vec<String>,

    /// Extra WHERE predicate; repeatable.
    #[arg(long = "filter", value_name = "PREDICATE")]
    pub filters: Vec<String>,
}

/// `sql validate` needs no settings.
pub fn run_validate(args: &SqlValidateArgs) -> Result<()> {
    let validated = validate(&args.sql)
        .map_err(|rejection| rejection_failure("sql.validate", &rejection))?;
    emit(
        "sql.validate",
        &QueryEnvelope::ok(
            "sql.validate",
            json!({ "valid": true, "sql": validated.as_str() }),
        )
        .with_meta("guardrail_checked", json!(true)),
    )
}

pub fn run_assemble(args: &SqlAssembleArgs, context: &CommandContext) -> Result<()> {
    let settings = &context.settings;
    let store = open_store("sql.assemble", settings)?;

    let resolution = resolve(&args.measures, &store.snapshot());
    if !resolution.is_complete() {
        return Err(rejected(
            QueryEnvelope::error(
                "sql.assemble",
                "measures_unresolved",
                format!("unknown measure(s): {}", resolution.unmatched.join(", ")),
            )
            .with_error_details(json!({ "unmatched": resolution.unmatched })),
        ));
    }

    let dimensions = settings.schema.resolve_dimensions(&args.group_by);
    if !dimensions.unmatched.is_empty() {
        return Err(rejected(
            QueryEnvelope::error(
                "sql.assemble",
                "dimensions_unresolved",
                format!("unknown dimension(s): {}", dimensions.unmatched.join(", ")),
            )
            .with_error_details(json!({ "unmatched": dimensions.unmatched })),
        ));
    }

    let query = assemble(
        &settings.schema.table,
        &resolution.matched,
        &dimensions.columns,
        &args.filters,
    )
    .map_err(|error| {
        rejected(QueryEnvelope::error(
            "sql.assemble",
            "assembly_failed",
            error.to_string(),
        ))
    })?;
    let sql = query.to_sql();
    let validated =
        validate(&sql).map_err(|rejection| rejection_failure("sql.assemble", &rejection))?;

    let envelope = QueryEnvelope::ok(
        "sql.assemble",
        json!({
            "sql": validated.as_str(),
            "measures": resolution.matched.iter().map(|measure| measure.code.clone()).collect::<Vec<_>>(),
            "group_by": query.group_by,
            "predicates": query.predicates,
        }),
    )
    .with_meta("table", json!(settings.schema.table))
    .with_meta("guardrail_checked", json!(true));
    emit("sql.assemble", &envelope)
}

fn rejected(envelope: QueryEnvelope) -> Error {
    Error::new(QueryEnvelopeCommandFailure::rejected(envelope))
}

fn rejection_failure(command: &str, rejection: &SqlRejection) -> Error {
    rejected(
        QueryEnvelope::error(command, "sql_guardrail_violation", rejection.to_string())
            .with_meta("guardrail_checked", json!(true))
            .with_error_details(rejection.details()),
    )
}

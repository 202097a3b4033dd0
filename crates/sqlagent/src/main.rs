#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Error, Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use serde_json::json;
use sqlagent::cli::app::{Cli, Command, RuntimeArgs};
use sqlagent::cli::commands::{self, CommandContext, sql::SqlCommand};
use sqlagent::config::{DB_PATH_ENV, RuntimePaths, SettingsError, load_settings};
use sqlagent::models::{FailureClass, QueryEnvelope, QueryEnvelopeCommandFailure};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_REJECTED: i32 = 2;
const EXIT_CONFIG_FAILURE: i32 = 3;
const EXIT_USAGE_ERROR: i32 = 64;

const LOG_ENV: &str = "SQLAGENT_LOG";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    dotenv::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    init_tracing(cli.runtime.log_level.as_deref());

    let command_name = command_name(&cli.command);
    println!("sqlagent: starting `{command_name}`");

    match execute(cli) {
        Ok(()) => {
            println!("sqlagent: completed `{command_name}` (exit_code={EXIT_SUCCESS})");
            EXIT_SUCCESS
        }
        Err(error) => {
            let exit_code = classify_runtime_error(&error);
            if let Some(failure) = error.downcast_ref::<QueryEnvelopeCommandFailure>() {
                println!("{failure}");
            }
            eprintln!("sqlagent: failed `{command_name}` (exit_code={exit_code})");
            eprintln!("{error:#}");
            exit_code
        }
    }
}

fn init_tracing(log_level: Option<&str>) {
    let directive = log_level
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_ENV).ok())
        .unwrap_or_else(|| "warn".to_string());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Sql(args) => match &args.command {
            SqlCommand::Validate(validate_args) => commands::sql::run_validate(validate_args),
            SqlCommand::Assemble(assemble_args) => {
                let context = command_context(&cli.runtime, "sql.assemble")?;
                commands::sql::run_assemble(assemble_args, &context)
            }
        },
        Command::Ask(args) => {
            let context = command_context(&cli.runtime, "ask")?;
            commands::ask::run(&args, &context)
        }
        Command::Resume(args) => {
            let context = command_context(&cli.runtime, "resume")?;
            commands::resume::run(&args, &context)
        }
        Command::Measures(args) => {
            let context = command_context(&cli.runtime, "measures")?;
            commands::measures::run(&args, &context)
        }
    }
}

fn command_context(args: &RuntimeArgs, command: &str) -> Result<CommandContext> {
    let paths = resolve_runtime_paths(args)?;
    let database_override = std::env::var_os(DB_PATH_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    let settings = load_settings(&paths, args.config.as_deref(), database_override.as_deref())
        .map_err(|error| settings_failure(command, &error))?;
    Ok(CommandContext { paths, settings })
}

fn settings_failure(command: &str, error: &SettingsError) -> Error {
    Error::new(QueryEnvelopeCommandFailure::config(
        QueryEnvelope::error(command, "settings_invalid", error.to_string()).with_error_details(
            json!({
                "path": error.path.as_ref().map(|path| path.display().to_string()),
                "detail": error.detail,
            }),
        ),
    ))
}

fn classify_runtime_error(error: &Error) -> i32 {
    match error.downcast_ref::<QueryEnvelopeCommandFailure>() {
        Some(failure) => match failure.class() {
            FailureClass::Runtime => EXIT_RUNTIME_FAILURE,
            FailureClass::Rejected => EXIT_REJECTED,
            FailureClass::Config => EXIT_CONFIG_FAILURE,
        },
        None => EXIT_RUNTIME_FAILURE,
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    let _ = error.print();
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
        _ => EXIT_USAGE_ERROR,
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Ask(_) => "ask",
        Command::Resume(_) => "resume",
        Command::Measures(_) => "measures",
        Command::Sql(_) => "sql",
    }
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    sqlagent::config::resolve_runtime_paths(&home_dir, &cwd, args.out_dir.as_deref())
}

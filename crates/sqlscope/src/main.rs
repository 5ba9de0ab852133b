#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use sqlscope::cli::app::{Cli, Command, RuntimeArgs};
use sqlscope::cli::commands;
use sqlscope::config::RuntimePaths;
use sqlscope::models::{FailureClass, QueryEnvelope, QueryEnvelopeCommandFailure};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_REJECTED: i32 = 2;
const EXIT_USAGE_ERROR: i32 = 64;

const LOG_ENV: &str = "SQLSCOPE_LOG";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    init_tracing();

    let command_name = cli.command.name();
    info!(command = command_name, "starting");

    match execute(cli) {
        Ok(()) => {
            info!(command = command_name, exit_code = EXIT_SUCCESS, "completed");
            EXIT_SUCCESS
        }
        Err(error) => {
            let exit_code = report_failure(command_name, &error);
            error!(command = command_name, exit_code, error = %format!("{error:#}"), "failed");
            exit_code
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::init::run(&args, &runtime_paths)
        }
        Command::Ask(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::ask::run(&args, &runtime_paths)
        }
        Command::Validate(args) => commands::validate::run(&args),
        Command::Schema(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::schema::run(&args, &runtime_paths)
        }
        Command::History(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::history::run(&args, &runtime_paths)
        }
        Command::DescriptionSchema => commands::description_schema::run(),
    }
}

fn report_failure(command_name: &str, error: &anyhow::Error) -> i32 {
    let (envelope, exit_code) = match error.downcast_ref::<QueryEnvelopeCommandFailure>() {
        Some(failure) => {
            let exit_code = match failure.class() {
                FailureClass::Rejected => EXIT_REJECTED,
                FailureClass::Runtime => EXIT_RUNTIME_FAILURE,
            };
            (failure.envelope().clone(), exit_code)
        }
        None => (
            QueryEnvelope::error(command_name, "runtime_error", format!("{error:#}")),
            EXIT_RUNTIME_FAILURE,
        ),
    };

    match envelope.to_json_line() {
        Ok(line) => println!("{line}"),
        Err(render_error) => eprintln!("failed to render error envelope: {render_error:#}"),
    }
    exit_code
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
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

    sqlscope::config::resolve_runtime_paths(&home_dir, &cwd, args.config.as_deref())
}

use std::{ffi::OsString, path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use error_stack::Result;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use yieldline_ingest::{
    initialize, load_environment_variables, yieldline_cli_style, AggregatorOptions,
    CursorStoreOptions, IngestError, ReportExt, SourcesOptions,
};

mod cursor;
mod run;
mod sink;
mod sources;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, styles = yieldline_cli_style())]
struct Cli {
    /// Load environment variables from this file before parsing the options.
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every source on its poll interval until interrupted.
    Run(run::RunArgs),
    /// Run every source once and exit.
    Once(run::RunArgs),
    /// Inspect or change the checkpoint of a source.
    #[command(subcommand)]
    Cursor(cursor::CursorCommand),
    /// List the configured sources.
    Sources(sources::SourcesArgs),
}

/// Options shared by all commands that read the sources file.
#[derive(Args, Debug)]
pub struct CommonArgs {
    #[command(flatten)]
    pub sources: SourcesOptions,
    #[command(flatten)]
    pub aggregator: AggregatorOptions,
    #[command(flatten)]
    pub cursor: CursorStoreOptions,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Options can be read from the environment, so the file must be loaded before parsing.
    if let Some(path) = dotenv_path(std::env::args_os()) {
        let loaded = load_environment_variables(&path);
        if loaded.is_err() {
            return loaded.to_exit_code();
        }
    }

    let args = Cli::parse();
    run_with_args(args).await.to_exit_code()
}

async fn run_with_args(args: Cli) -> Result<(), IngestError> {
    let ct = CancellationToken::new();
    initialize(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), ct.clone())?;

    if let Some(path) = &args.dotenv {
        debug!(path = ?path, "environment loaded from file");
    }

    match args.command {
        Command::Run(args) => run::run(args, ct).await,
        Command::Once(args) => run::once(args, ct).await,
        Command::Cursor(command) => cursor::run(command).await,
        Command::Sources(args) => sources::run(args),
    }
}

fn dotenv_path(args: impl IntoIterator<Item = OsString>) -> Option<PathBuf> {
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--dotenv" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.to_str().and_then(|arg| arg.strip_prefix("--dotenv=")) {
            return Some(PathBuf::from(path));
        }
    }
    None
}

use std::sync::Arc;

use clap::Args;
use colored::*;
use error_stack::Result;
use tokio_util::sync::CancellationToken;
use yieldline_ingest::{
    ChainOptions, ChainOracle, IngestError, IngestionEngine, Persistence, RunOutcome, Scheduler,
    SeriesAggregator,
};

use crate::{sink::SinkArgs, CommonArgs};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only run these sources. Defaults to all of them.
    #[arg(long = "source", value_name = "KEY")]
    pub selection: Vec<String>,
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub chain: ChainOptions,
    #[command(flatten)]
    pub sink: SinkArgs,
}

pub async fn run(args: RunArgs, ct: CancellationToken) -> Result<(), IngestError> {
    let selection = args.selection.clone();
    let scheduler = build_scheduler(args).await?;
    Arc::new(scheduler).run_forever(&selection, ct).await
}

pub async fn once(args: RunArgs, ct: CancellationToken) -> Result<(), IngestError> {
    let selection = args.selection.clone();
    let scheduler = build_scheduler(args).await?;
    let outcomes = scheduler.run_once(&selection, &ct).await?;

    let mut first_error = None;
    for (key, outcome) in outcomes {
        match outcome {
            RunOutcome::Completed { .. } => println!("{} {}", key.green(), outcome),
            RunOutcome::SkippedNoWork => println!("{} {}", key.yellow(), outcome),
            RunOutcome::Aborted(err) => {
                println!("{} aborted: {}", key.red(), err.current_context());
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

async fn build_scheduler(args: RunArgs) -> Result<Scheduler, IngestError> {
    let aggregator = args
        .common
        .aggregator
        .to_aggregator()?
        .map(|aggregator| Arc::new(aggregator) as Arc<dyn SeriesAggregator>);

    let configuration = args
        .common
        .sources
        .load()?
        .into_configuration(aggregator.is_some())?;

    for key in &args.selection {
        configuration.source(key)?;
    }

    let oracle: Arc<dyn ChainOracle> = Arc::new(args.chain.to_oracle()?);
    let client = Persistence::new_from_options(args.common.cursor)
        .connect()
        .await?;
    let cursors = Arc::new(configuration.cursor_store(client));
    let sinks = args.sink.into_factory(&configuration.measurement)?;

    let engine = IngestionEngine::new(oracle, aggregator, cursors);
    Ok(Scheduler::new(engine, configuration.sources, sinks))
}

use clap::{Args, Subcommand};
use colored::*;
use error_stack::Result;
use yieldline_ingest::{Configuration, CursorStore, IngestError, Persistence};

use crate::CommonArgs;

#[derive(Subcommand, Debug)]
pub enum CursorCommand {
    /// Print the checkpoint of a source, or its genesis value if none is stored.
    Get(SourceArgs),
    /// Overwrite the checkpoint of a source. This can move it backwards.
    Set(SetArgs),
    /// Delete the checkpoint of a source, so that the next run starts from genesis.
    Delete(SourceArgs),
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Key of the source.
    #[arg(long)]
    pub source: String,
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Key of the source.
    #[arg(long)]
    pub source: String,
    /// New checkpoint: a unix timestamp, or a block number for event sources.
    #[arg(long)]
    pub value: u64,
    #[command(flatten)]
    pub common: CommonArgs,
}

pub async fn run(command: CursorCommand) -> Result<(), IngestError> {
    match command {
        CursorCommand::Get(args) => {
            let (configuration, store) = open(args.common).await?;
            let source = configuration.source(&args.source)?;

            match store.stored(&source.key).await? {
                Some(value) => println!("{} {} {}", source.key, source.cursor_unit(), value),
                None => println!(
                    "{} {} {} {}",
                    source.key,
                    source.cursor_unit(),
                    source.genesis,
                    "(genesis)".dimmed()
                ),
            }
        }
        CursorCommand::Set(args) => {
            let (configuration, store) = open(args.common).await?;
            let source = configuration.source(&args.source)?;

            let previous = store.get(&source.key).await?;
            store.set(&source.key, args.value).await?;
            if args.value < previous {
                eprintln!(
                    "{} {} moved back from {} to {}",
                    "warning:".yellow(),
                    source.key,
                    previous,
                    args.value
                );
            }
            println!("{} {} {}", source.key, source.cursor_unit(), args.value);
        }
        CursorCommand::Delete(args) => {
            let (configuration, store) = open(args.common).await?;
            let source = configuration.source(&args.source)?;

            store.delete(&source.key).await?;
            println!(
                "{} reset to genesis {} {}",
                source.key,
                source.cursor_unit(),
                source.genesis
            );
        }
    }

    Ok(())
}

async fn open(common: CommonArgs) -> Result<(Configuration, CursorStore), IngestError> {
    let has_aggregator = common.aggregator.aggregator_url.is_some();
    let configuration = common.sources.load()?.into_configuration(has_aggregator)?;
    let client = Persistence::new_from_options(common.cursor).connect().await?;
    let store = configuration.cursor_store(client);
    Ok((configuration, store))
}

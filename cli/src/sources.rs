use clap::Args;
use error_stack::Result;
use tabled::{settings::Style, Table, Tabled};
use yieldline_ingest::{IngestError, Source};

use crate::CommonArgs;

#[derive(Args, Debug)]
pub struct SourcesArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Tabled)]
#[tabled(rename_all = "SCREAMING_SNAKE_CASE")]
struct SourceInfo {
    key: String,
    kind: &'static str,
    weight: f64,
    unit: String,
    interval: String,
    poll: String,
    genesis: u64,
}

impl From<&Source> for SourceInfo {
    fn from(source: &Source) -> Self {
        Self {
            key: source.key.clone(),
            kind: source.adapter.kind(),
            weight: source.weight,
            unit: source.cursor_unit().to_string(),
            interval: format!("{}s", source.adapter.interval_seconds()),
            poll: format!("{}s", source.poll_interval.as_secs()),
            genesis: source.genesis,
        }
    }
}

pub fn run(args: SourcesArgs) -> Result<(), IngestError> {
    let has_aggregator = args.common.aggregator.aggregator_url.is_some();
    let configuration = args
        .common
        .sources
        .load()?
        .into_configuration(has_aggregator)?;

    let rows = configuration
        .sources
        .iter()
        .map(SourceInfo::from)
        .collect::<Vec<_>>();

    println!("measurement: {}", configuration.measurement);
    println!("{}", Table::new(rows).with(Style::rounded()));

    Ok(())
}

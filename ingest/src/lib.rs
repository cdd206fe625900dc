//! Incremental ingestion of protocol yields into a time series.
//!
//! Each run reads the checkpoint of a source, derives the samples of every interval (or event)
//! since then, flushes them to a [TimeSeriesSink] and only then advances the checkpoint.
pub mod adapter;
pub mod aggregator;
pub mod chain;
pub mod cli;
pub mod configuration;
pub mod cursor;
pub mod engine;
mod error;
mod metrics;
pub mod plan;
pub mod resolver;
pub mod scheduler;
pub mod sink;
pub mod types;

pub use self::adapter::{Derivation, ProtocolAdapter, ProtocolState, Window, Windowing};
pub use self::aggregator::{GraphQlAggregator, SeriesAggregator, SeriesPoint};
pub use self::chain::{ChainOracle, JsonRpcOracle};
pub use self::cli::{initialize, load_environment_variables, yieldline_cli_style};
pub use self::configuration::{
    AggregatorOptions, ChainOptions, Configuration, SourcesFile, SourcesOptions,
};
pub use self::cursor::{CursorStore, CursorStoreOptions, Persistence};
pub use self::engine::{IngestionEngine, RunOutcome, Source};
pub use self::error::{IngestError, IngestErrorReportExt, IngestErrorResultExt, ReportExt};
pub use self::metrics::RunMetrics;
pub use self::plan::IntervalPlan;
pub use self::resolver::BlockResolver;
pub use self::scheduler::{Scheduler, SourceLocks};
pub use self::sink::{ConsoleSink, InMemorySink, SinkFactory, TimeSeriesSink};
pub use self::types::{BlockRef, Checkpoint, CursorUnit, Sample, SECONDS_PER_YEAR};

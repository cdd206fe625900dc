//! Sources file and connection options.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use alloy_primitives::Address;
use clap::Args;
use error_stack::{Result, ResultExt};
use serde::Deserialize;
use tracing::info;

use crate::{
    adapter::{
        CompoundingRateAdapter, EventScaledAdapter, MultiplierRatioAdapter, ProtocolAdapter,
        SeriesPassthroughAdapter,
    },
    aggregator::{GraphQlAggregator, GraphQlAggregatorOptions},
    chain::{
        parse_selector, parse_topic, ContractCall, JsonRpcOracle, JsonRpcOracleOptions, LogFilter,
    },
    cursor::{CursorStore, PersistenceClient},
    engine::Source,
    error::{IngestError, IngestErrorResultExt},
};

const DEFAULT_MEASUREMENT: &str = "apy";
const MAX_POLL_INTERVAL_SECONDS: u64 = 3_600;

/// Where the sources are declared.
#[derive(Args, Debug, Clone)]
pub struct SourcesOptions {
    /// Path to the JSON file declaring the sources.
    #[arg(long, env = "YIELDLINE_SOURCES")]
    pub sources: PathBuf,
}

/// Chain node connection.
#[derive(Args, Debug, Clone)]
pub struct ChainOptions {
    /// URL of the Ethereum JSON-RPC endpoint.
    #[arg(long, env)]
    pub rpc_url: String,
    /// Timeout of a single JSON-RPC call, retries included.
    #[arg(long, env, default_value = "30")]
    pub rpc_timeout_seconds: u64,
    /// Maximum number of JSON-RPC requests per second.
    #[arg(long, env, default_value = "50")]
    pub rpc_rate_limit: u32,
}

/// External series aggregator connection.
#[derive(Args, Debug, Clone, Default)]
pub struct AggregatorOptions {
    /// URL of the GraphQL aggregator.
    #[arg(long, env)]
    pub aggregator_url: Option<String>,
    /// GraphQL document used to query a series.
    #[arg(long, env)]
    pub aggregator_query: Option<String>,
    /// Field of the response data holding the series.
    #[arg(long, env)]
    pub aggregator_field: Option<String>,
}

/// The content of the sources file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesFile {
    #[serde(default = "default_measurement")]
    pub measurement: String,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub key: String,
    pub weight: f64,
    /// Checkpoint used before the first run: a timestamp, or a block number for event sources.
    pub genesis: u64,
    pub interval_seconds: u64,
    pub poll_interval_seconds: Option<u64>,
    pub max_intervals_per_run: Option<u64>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SourceKind {
    #[serde(rename_all = "camelCase")]
    CompoundingRate {
        address: String,
        rate: String,
        #[serde(default = "default_rate_decimals")]
        decimals: u8,
    },
    #[serde(rename_all = "camelCase")]
    MultiplierRatio {
        address: String,
        multiplier: String,
        #[serde(default = "default_multiplier_decimals")]
        decimals: u8,
    },
    #[serde(rename_all = "camelCase")]
    EventScaled {
        address: String,
        event: String,
        #[serde(default)]
        amount_word: usize,
        total_base: ContractConfig,
        #[serde(default = "default_periods_per_year")]
        periods_per_year: u64,
        #[serde(default = "default_max_block_range")]
        max_block_range: u64,
    },
    #[serde(rename_all = "camelCase")]
    SeriesPassthrough { address: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    pub address: String,
    pub function: String,
}

/// Validated sources, ready to run.
pub struct Configuration {
    pub measurement: String,
    pub sources: Vec<Source>,
}

fn default_measurement() -> String {
    DEFAULT_MEASUREMENT.to_string()
}

fn default_rate_decimals() -> u8 {
    27
}

fn default_multiplier_decimals() -> u8 {
    18
}

fn default_periods_per_year() -> u64 {
    3 * 365
}

fn default_max_block_range() -> u64 {
    10_000
}

impl ChainOptions {
    pub fn to_oracle(&self) -> Result<JsonRpcOracle, IngestError> {
        let options = JsonRpcOracleOptions {
            timeout: Duration::from_secs(self.rpc_timeout_seconds),
            rate_limit: self.rpc_rate_limit,
            ..JsonRpcOracleOptions::default()
        };
        JsonRpcOracle::new(&self.rpc_url, options)
    }
}

impl AggregatorOptions {
    pub fn to_aggregator(&self) -> Result<Option<GraphQlAggregator>, IngestError> {
        let Some(url) = &self.aggregator_url else {
            return Ok(None);
        };

        let mut options = GraphQlAggregatorOptions::default();
        if let Some(query) = &self.aggregator_query {
            options.query = query.clone();
        }
        if let Some(field) = &self.aggregator_field {
            options.field = field.clone();
        }

        GraphQlAggregator::new(url, options).map(Some)
    }
}

impl SourcesOptions {
    pub fn load(&self) -> Result<SourcesFile, IngestError> {
        SourcesFile::from_path(&self.sources)
    }
}

impl SourcesFile {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let content = fs::read_to_string(path)
            .configuration("failed to read sources file")
            .attach_printable_lazy(|| format!("path: {:?}", path))?;

        content
            .parse::<Self>()
            .attach_printable_lazy(|| format!("path: {:?}", path))
    }

    /// Validates every source and builds its adapter.
    pub fn into_configuration(self, has_aggregator: bool) -> Result<Configuration, IngestError> {
        let mut keys = HashSet::new();
        let mut sources = Vec::with_capacity(self.sources.len());

        for config in self.sources {
            if !keys.insert(config.key.clone()) {
                return Err(IngestError::configuration(&format!(
                    "duplicate source key: {}",
                    config.key
                )));
            }

            let source = config
                .into_source(has_aggregator)
                .attach_printable("invalid source")?;
            sources.push(source);
        }

        info!(measurement = %self.measurement, sources = sources.len(), "loaded sources");

        Ok(Configuration {
            measurement: self.measurement,
            sources,
        })
    }
}

impl FromStr for SourcesFile {
    type Err = error_stack::Report<IngestError>;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_json::from_str(s).configuration("failed to parse sources file")
    }
}

impl SourceConfig {
    fn into_source(self, has_aggregator: bool) -> Result<Source, IngestError> {
        let key = self.key;
        check_key(&key)?;

        if !self.weight.is_finite() {
            return Err(IngestError::configuration("weight must be finite"))
                .attach_printable_lazy(|| format!("source: {key}"));
        }

        if self.interval_seconds == 0 {
            return Err(IngestError::configuration("intervalSeconds must be positive"))
                .attach_printable_lazy(|| format!("source: {key}"));
        }

        if self.max_intervals_per_run == Some(0) {
            return Err(IngestError::configuration("maxIntervalsPerRun must be positive"))
                .attach_printable_lazy(|| format!("source: {key}"));
        }

        let adapter: Arc<dyn ProtocolAdapter> = match self.kind {
            SourceKind::CompoundingRate {
                address,
                rate,
                decimals,
            } => Arc::new(CompoundingRateAdapter::new(
                contract_call(&address, &rate)?,
                decimals,
                self.interval_seconds,
            )),
            SourceKind::MultiplierRatio {
                address,
                multiplier,
                decimals,
            } => Arc::new(MultiplierRatioAdapter::new(
                contract_call(&address, &multiplier)?,
                decimals,
                self.interval_seconds,
            )),
            SourceKind::EventScaled {
                address,
                event,
                amount_word,
                total_base,
                periods_per_year,
                max_block_range,
            } => {
                if periods_per_year == 0 {
                    return Err(IngestError::configuration("periodsPerYear must be positive"))
                        .attach_printable_lazy(|| format!("source: {key}"));
                }
                if max_block_range == 0 {
                    return Err(IngestError::configuration("maxBlockRange must be positive"))
                        .attach_printable_lazy(|| format!("source: {key}"));
                }

                let filter = LogFilter {
                    address: parse_address(&address)?,
                    topic: parse_topic(&event)?,
                };
                Arc::new(EventScaledAdapter::new(
                    filter,
                    amount_word,
                    contract_call(&total_base.address, &total_base.function)?,
                    periods_per_year,
                    max_block_range,
                    self.interval_seconds,
                ))
            }
            SourceKind::SeriesPassthrough { address } => {
                if !has_aggregator {
                    return Err(IngestError::configuration(
                        "seriesPassthrough sources require an aggregator url",
                    ))
                    .attach_printable_lazy(|| format!("source: {key}"));
                }
                Arc::new(SeriesPassthroughAdapter::new(
                    parse_address(&address)?,
                    self.interval_seconds,
                ))
            }
        };

        let poll_interval_seconds = self
            .poll_interval_seconds
            .unwrap_or_else(|| self.interval_seconds.min(MAX_POLL_INTERVAL_SECONDS))
            .max(1);

        Ok(Source {
            key,
            weight: self.weight,
            genesis: self.genesis,
            adapter,
            poll_interval: Duration::from_secs(poll_interval_seconds),
            max_intervals: self.max_intervals_per_run,
        })
    }
}

impl Configuration {
    /// Creates the cursor store, registering each source's genesis checkpoint.
    pub fn cursor_store(&self, client: PersistenceClient) -> CursorStore {
        self.sources
            .iter()
            .fold(CursorStore::new(client), |store, source| {
                store.with_genesis(source.key.clone(), source.genesis)
            })
    }

    pub fn source(&self, key: &str) -> Result<&Source, IngestError> {
        self.sources
            .iter()
            .find(|source| source.key == key)
            .ok_or_else(|| IngestError::configuration(&format!("unknown source: {key}")))
    }
}

fn check_key(key: &str) -> Result<(), IngestError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if !valid {
        return Err(IngestError::configuration(&format!(
            "source key must be made of letters, digits, '-', '_' or '.': {key:?}"
        )));
    }

    Ok(())
}

fn parse_address(address: &str) -> Result<Address, IngestError> {
    Address::from_str(address.trim())
        .configuration("invalid address")
        .attach_printable_lazy(|| format!("address: {address}"))
}

fn contract_call(address: &str, function: &str) -> Result<ContractCall, IngestError> {
    Ok(ContractCall {
        address: parse_address(address)?,
        selector: parse_selector(function)?,
    })
}

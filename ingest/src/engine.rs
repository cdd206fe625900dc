//! One ingestion run for one source.

use std::{fmt, sync::Arc, time::Duration};

use alloy_primitives::Address;
use error_stack::{Report, Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    adapter::{AdapterContext, Derivation, ProtocolAdapter, ProtocolState, Window, Windowing},
    aggregator::SeriesAggregator,
    chain::{ChainOracle, LogFilter},
    cursor::CursorStore,
    error::IngestError,
    metrics::RunMetrics,
    plan::IntervalPlan,
    resolver::BlockResolver,
    sink::TimeSeriesSink,
    types::{BlockRef, CursorUnit},
};

/// A configured data source.
#[derive(Debug, Clone)]
pub struct Source {
    pub key: String,
    pub weight: f64,
    /// Checkpoint used before the first successful run.
    pub genesis: u64,
    pub adapter: Arc<dyn ProtocolAdapter>,
    /// Time between two scheduled runs.
    pub poll_interval: Duration,
    /// Caps the number of intervals processed by one run.
    pub max_intervals: Option<u64>,
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum RunOutcome {
    /// The samples were flushed and the checkpoint advanced.
    Completed {
        samples_written: usize,
        checkpoint: u64,
    },
    /// Nothing to do. Neither the sink nor the checkpoint were touched.
    SkippedNoWork,
    /// The run failed or was cancelled. The checkpoint did not move.
    Aborted(Report<IngestError>),
}

/// Result of the cancellable part of a run.
enum Collected {
    NoWork,
    Ready { end: u64 },
}

#[derive(Debug, Default)]
struct RunProgress {
    checkpoint: Option<u64>,
    range: Option<(u64, u64)>,
    skipped: u64,
}

/// Drives the adapters of all sources against shared chain, aggregator and cursor clients.
#[derive(Clone)]
pub struct IngestionEngine {
    oracle: Arc<dyn ChainOracle>,
    resolver: BlockResolver,
    aggregator: Option<Arc<dyn SeriesAggregator>>,
    cursors: Arc<CursorStore>,
    metrics: RunMetrics,
}

impl IngestionEngine {
    pub fn new(
        oracle: Arc<dyn ChainOracle>,
        aggregator: Option<Arc<dyn SeriesAggregator>>,
        cursors: Arc<CursorStore>,
    ) -> Self {
        Self {
            resolver: BlockResolver::new(oracle.clone()),
            oracle,
            aggregator,
            cursors,
            metrics: RunMetrics::default(),
        }
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    /// Runs one ingestion round for `source`, as of the unix timestamp `now`.
    ///
    /// Cancellation is observed while samples are being collected. Once the batch is complete,
    /// the flush and the checkpoint update always run to completion.
    #[instrument(skip_all, fields(source = %source.key))]
    pub async fn run(
        &self,
        source: &Source,
        sink: &mut dyn TimeSeriesSink,
        now: u64,
        ct: &CancellationToken,
    ) -> RunOutcome {
        let mut progress = RunProgress::default();
        let outcome = self.run_inner(source, sink, now, ct, &mut progress).await;
        self.report(source, &progress, &outcome);
        outcome
    }

    async fn run_inner(
        &self,
        source: &Source,
        sink: &mut dyn TimeSeriesSink,
        now: u64,
        ct: &CancellationToken,
        progress: &mut RunProgress,
    ) -> RunOutcome {
        let checkpoint = match self.cursors.get(&source.key).await {
            Ok(checkpoint) => checkpoint,
            Err(err) => return RunOutcome::Aborted(err),
        };
        progress.checkpoint = Some(checkpoint);

        let collected = tokio::select! {
            biased;
            _ = ct.cancelled() => {
                Err(Report::new(IngestError::Cancelled).attach_printable("run cancelled"))
            }
            collected = self.collect(source, sink, checkpoint, now, progress) => collected,
        };

        let end = match collected {
            Ok(Collected::NoWork) => {
                sink.discard();
                return RunOutcome::SkippedNoWork;
            }
            Ok(Collected::Ready { end }) => end,
            Err(err) => {
                sink.discard();
                return RunOutcome::Aborted(err);
            }
        };

        let samples_written = match sink.flush().await {
            Ok(samples_written) => samples_written,
            Err(err) => return RunOutcome::Aborted(err),
        };

        if let Err(err) = self.cursors.set(&source.key, end).await {
            return RunOutcome::Aborted(err);
        }

        RunOutcome::Completed {
            samples_written,
            checkpoint: end,
        }
    }

    /// Derives all pending samples into `sink`, returning the checkpoint they lead to.
    async fn collect(
        &self,
        source: &Source,
        sink: &mut dyn TimeSeriesSink,
        checkpoint: u64,
        now: u64,
        progress: &mut RunProgress,
    ) -> Result<Collected, IngestError> {
        let adapter = source.adapter.as_ref();
        let ctx = AdapterContext {
            source_key: &source.key,
            weight: source.weight,
            oracle: self.oracle.as_ref(),
        };

        match adapter.windowing() {
            Windowing::Intervals => {
                self.collect_intervals(source, &ctx, sink, checkpoint, now, progress)
                    .await
            }
            Windowing::Events {
                filter,
                max_block_range,
            } => {
                self.collect_events(
                    adapter,
                    &ctx,
                    sink,
                    &filter,
                    max_block_range,
                    checkpoint,
                    progress,
                )
                .await
            }
            Windowing::Series { address } => {
                self.collect_series(source, &ctx, sink, &address, checkpoint, now, progress)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn collect_series(
        &self,
        source: &Source,
        ctx: &AdapterContext<'_>,
        sink: &mut dyn TimeSeriesSink,
        address: &Address,
        checkpoint: u64,
        now: u64,
        progress: &mut RunProgress,
    ) -> Result<Collected, IngestError> {
        let adapter = source.adapter.as_ref();
        let plan = IntervalPlan::new(checkpoint, now, adapter.interval_seconds())
            .with_max_intervals(source.max_intervals);
        if plan.is_empty() {
            return Ok(Collected::NoWork);
        }

        let aggregator = self
            .aggregator
            .as_ref()
            .ok_or_else(|| IngestError::configuration("series source requires an aggregator"))?;

        let (from, to) = (checkpoint + 1, plan.end());
        progress.range = Some((from, to));

        let points = aggregator
            .series(address, from, to)
            .await
            .attach_printable_lazy(|| format!("range: [{from}, {to}]"))?;

        let Some(end) = points
            .iter()
            .map(|point| point.timestamp)
            .filter(|timestamp| *timestamp > checkpoint)
            .max()
        else {
            debug!(from, to, "no new series points");
            return Ok(Collected::NoWork);
        };

        let mut state = ProtocolState::Empty;
        for point in points {
            if point.timestamp <= checkpoint {
                continue;
            }
            let window = Window::Point(point);
            self.derive(adapter, ctx, &mut state, &window, sink, progress)
                .await?;
        }

        Ok(Collected::Ready { end })
    }

    async fn collect_intervals(
        &self,
        source: &Source,
        ctx: &AdapterContext<'_>,
        sink: &mut dyn TimeSeriesSink,
        checkpoint: u64,
        now: u64,
        progress: &mut RunProgress,
    ) -> Result<Collected, IngestError> {
        let adapter = source.adapter.as_ref();
        let plan = IntervalPlan::new(checkpoint, now, adapter.interval_seconds())
            .with_max_intervals(source.max_intervals);

        if plan.is_empty() {
            return Ok(Collected::NoWork);
        }
        progress.range = Some((plan.start(), plan.end()));

        debug!(intervals = plan.len(), start = plan.start(), end = plan.end(), "interval plan");

        let mut state = if adapter.is_stateful() {
            match self.resolver.resolve_block(checkpoint).await? {
                Some(block) => adapter.seed(ctx, block).await?,
                None => ProtocolState::Empty,
            }
        } else {
            ProtocolState::Empty
        };

        for target in plan.targets() {
            let Some(block) = self
                .resolver
                .resolve_block(target)
                .await
                .attach_printable_lazy(|| format!("target: {target}"))?
            else {
                warn!(target, "no block for interval. skipping");
                progress.skipped += 1;
                continue;
            };
            let window = Window::Interval { target, block };
            self.derive(adapter, ctx, &mut state, &window, sink, progress)
                .await?;
        }

        Ok(Collected::Ready { end: plan.end() })
    }

    #[allow(clippy::too_many_arguments)]
    async fn collect_events(
        &self,
        adapter: &dyn ProtocolAdapter,
        ctx: &AdapterContext<'_>,
        sink: &mut dyn TimeSeriesSink,
        filter: &LogFilter,
        max_block_range: u64,
        checkpoint: u64,
        progress: &mut RunProgress,
    ) -> Result<Collected, IngestError> {
        let latest = self.oracle.latest_block_number().await?;
        if latest <= checkpoint {
            return Ok(Collected::NoWork);
        }

        let from = checkpoint + 1;
        progress.range = Some((from, latest));

        let chunk_size = max_block_range.max(1);
        let mut state = ProtocolState::Empty;
        let mut chunk_start = from;

        while chunk_start <= latest {
            let chunk_end = chunk_start.saturating_add(chunk_size - 1).min(latest);

            let logs = self
                .oracle
                .logs(filter, chunk_start, chunk_end)
                .await
                .attach_printable_lazy(|| {
                    format!("block range: [{chunk_start}, {chunk_end}]")
                })?;

            debug!(from_block = chunk_start, to_block = chunk_end, logs = logs.len(), "scanned logs");

            for log in logs {
                let Some(timestamp) = self.oracle.block_timestamp(log.block_number).await? else {
                    warn!(block = log.block_number, "event block not available. skipping");
                    progress.skipped += 1;
                    continue;
                };

                let window = Window::Event {
                    block: BlockRef {
                        number: log.block_number,
                        timestamp,
                    },
                    log,
                };
                self.derive(adapter, ctx, &mut state, &window, sink, progress)
                    .await?;
            }

            chunk_start = chunk_end + 1;
        }

        Ok(Collected::Ready { end: latest })
    }

    async fn derive(
        &self,
        adapter: &dyn ProtocolAdapter,
        ctx: &AdapterContext<'_>,
        state: &mut ProtocolState,
        window: &Window,
        sink: &mut dyn TimeSeriesSink,
        progress: &mut RunProgress,
    ) -> Result<(), IngestError> {
        match adapter.derive_sample(ctx, state, window).await? {
            Derivation::Sample(sample, next) => {
                debug!(window = %window, apy = sample.apy_percent, "derived sample");
                sink.write(sample).await?;
                *state = next;
            }
            Derivation::Baseline(next) => {
                debug!(window = %window, "baseline reading");
                *state = next;
            }
            Derivation::Skipped(reason) => {
                warn!(window = %window, reason = %reason, "unusable reading. skipping");
                progress.skipped += 1;
            }
        }

        Ok(())
    }

    fn report(&self, source: &Source, progress: &RunProgress, outcome: &RunOutcome) {
        let unit = source.adapter.cursor_unit();
        let range = DisplayRange(progress.range);

        match outcome {
            RunOutcome::Completed {
                samples_written,
                checkpoint,
            } => {
                info!(
                    source = %source.key,
                    samples = samples_written,
                    skipped = progress.skipped,
                    checkpoint,
                    %unit,
                    "Completed"
                );
                self.metrics
                    .record_samples(&source.key, *samples_written as u64, progress.skipped);
            }
            RunOutcome::SkippedNoWork => {
                info!(
                    source = %source.key,
                    checkpoint = ?progress.checkpoint,
                    %unit,
                    "SkippedNoWork"
                );
            }
            RunOutcome::Aborted(err) => {
                warn!(
                    source = %source.key,
                    checkpoint = ?progress.checkpoint,
                    %range,
                    %unit,
                    err = ?err,
                    "Aborted"
                );
            }
        }

        self.metrics.record_run(&source.key, outcome.label());
    }
}

impl RunOutcome {
    /// Short name used as metric attribute.
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::SkippedNoWork => "skipped_no_work",
            RunOutcome::Aborted(err) if *err.current_context() == IngestError::Cancelled => {
                "cancelled"
            }
            RunOutcome::Aborted(_) => "aborted",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed {
                samples_written,
                checkpoint,
            } => write!(f, "Completed({samples_written}, {checkpoint})"),
            RunOutcome::SkippedNoWork => f.write_str("SkippedNoWork"),
            RunOutcome::Aborted(err) => write!(f, "Aborted({})", err.current_context()),
        }
    }
}

struct DisplayRange(Option<(u64, u64)>);

impl fmt::Display for DisplayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some((from, to)) => write!(f, "[{from}, {to}]"),
            None => f.write_str("none"),
        }
    }
}

impl Source {
    pub fn cursor_unit(&self) -> CursorUnit {
        self.adapter.cursor_unit()
    }
}

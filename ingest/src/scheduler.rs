//! Triggering of ingestion runs.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use error_stack::Result;
use futures::future;
use tokio::{sync::OwnedMutexGuard, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    engine::{IngestionEngine, RunOutcome, Source},
    error::IngestError,
    sink::SinkFactory,
};

/// One run lock per source key.
///
/// Runs of the same source are serialized, runs of different sources never contend.
#[derive(Default)]
pub struct SourceLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SourceLocks {
    /// Waits until no other run of `source_key` is in flight.
    pub async fn lock(&self, source_key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.entry(source_key.to_string()).or_default().clone()
        };

        lock.lock_owned().await
    }
}

/// Runs the configured sources, either once or on their own cadence.
pub struct Scheduler {
    engine: IngestionEngine,
    sources: Vec<Arc<Source>>,
    sinks: Arc<dyn SinkFactory>,
    locks: Arc<SourceLocks>,
    clock: fn() -> u64,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

impl Scheduler {
    pub fn new(engine: IngestionEngine, sources: Vec<Source>, sinks: Arc<dyn SinkFactory>) -> Self {
        Self {
            engine,
            sources: sources.into_iter().map(Arc::new).collect(),
            sinks,
            locks: Arc::default(),
            clock: unix_now,
        }
    }

    /// Replaces the wall clock used to plan runs.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter().map(|source| source.as_ref())
    }

    /// Runs `source` once, waiting for any in-flight run of the same source.
    pub async fn run_source(&self, source: &Source, ct: &CancellationToken) -> RunOutcome {
        let _guard = self.locks.lock(&source.key).await;
        let mut sink = self.sinks.create_sink();
        let now = (self.clock)();
        self.engine.run(source, sink.as_mut(), now, ct).await
    }

    /// Runs the selected sources (all of them if `selection` is empty) concurrently, once.
    pub async fn run_once(
        &self,
        selection: &[String],
        ct: &CancellationToken,
    ) -> Result<Vec<(String, RunOutcome)>, IngestError> {
        let sources = self.select(selection)?;

        let runs = sources.iter().map(|source| async move {
            let outcome = self.run_source(source, ct).await;
            (source.key.clone(), outcome)
        });

        Ok(future::join_all(runs).await)
    }

    /// Runs every selected source on its poll interval until `ct` is cancelled.
    ///
    /// An aborted run is retried on the next tick, from the unmoved checkpoint.
    pub async fn run_forever(
        self: Arc<Self>,
        selection: &[String],
        ct: CancellationToken,
    ) -> Result<(), IngestError> {
        let sources = self.select(selection)?;
        let mut tasks = JoinSet::new();

        for source in sources {
            let scheduler = self.clone();
            let ct = ct.clone();
            tasks.spawn(async move {
                info!(source = %source.key, poll_interval = ?source.poll_interval, "starting source loop");
                loop {
                    let outcome = scheduler.run_source(&source, &ct).await;
                    debug!(source = %source.key, outcome = %outcome, "run finished");

                    tokio::select! {
                        _ = ct.cancelled() => break,
                        _ = tokio::time::sleep(source.poll_interval) => {}
                    }
                }
                info!(source = %source.key, "source loop stopped");
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                warn!(err = ?err, "source loop panicked");
                ct.cancel();
            }
        }

        Ok(())
    }

    fn select(&self, selection: &[String]) -> Result<Vec<Arc<Source>>, IngestError> {
        if selection.is_empty() {
            return Ok(self.sources.clone());
        }

        selection
            .iter()
            .map(|key| {
                self.sources
                    .iter()
                    .find(|source| &source.key == key)
                    .cloned()
                    .ok_or_else(|| IngestError::configuration(&format!("unknown source: {key}")))
            })
            .collect()
    }
}

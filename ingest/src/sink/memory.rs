use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use error_stack::Result;

use crate::{error::IngestError, types::Sample};

use super::{SinkFactory, TimeSeriesSink};

/// A sink that commits samples to a shared in-memory series.
///
/// Clones share the committed series but each has its own buffer.
#[derive(Debug, Default)]
pub struct InMemorySink {
    committed: Arc<Mutex<Vec<Sample>>>,
    fail_flush: Arc<AtomicBool>,
    buffer: Vec<Sample>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following flush fail (or succeed again).
    pub fn set_fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of the committed samples.
    pub fn committed(&self) -> Vec<Sample> {
        match self.committed.lock() {
            Ok(committed) => committed.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Clone for InMemorySink {
    fn clone(&self) -> Self {
        Self {
            committed: self.committed.clone(),
            fail_flush: self.fail_flush.clone(),
            buffer: Vec::new(),
        }
    }
}

#[async_trait]
impl TimeSeriesSink for InMemorySink {
    async fn write(&mut self, sample: Sample) -> Result<(), IngestError> {
        self.buffer.push(sample);
        Ok(())
    }

    async fn flush(&mut self) -> Result<usize, IngestError> {
        let samples = std::mem::take(&mut self.buffer);

        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(IngestError::flush("in memory sink configured to fail"));
        }

        let mut committed = self
            .committed
            .lock()
            .map_err(|_| IngestError::flush("in memory sink lock poisoned"))?;
        committed.extend_from_slice(&samples);

        Ok(samples.len())
    }

    fn discard(&mut self) {
        self.buffer.clear();
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl SinkFactory for InMemorySink {
    fn create_sink(&self) -> Box<dyn TimeSeriesSink> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::InMemorySink;
    use crate::{
        error::IngestError,
        sink::{SinkFactory, TimeSeriesSink},
        types::Sample,
    };

    fn sample(timestamp_seconds: u64) -> Sample {
        Sample {
            source_key: "lido".to_string(),
            timestamp_seconds,
            apy_percent: 3.5,
            weight: 1.0,
        }
    }

    #[tokio::test]
    async fn test_flush_commits_all_or_nothing() {
        let sink = InMemorySink::new();
        let mut run = sink.create_sink();

        run.write(sample(1)).await.unwrap();
        run.write(sample(2)).await.unwrap();
        assert_eq!(run.pending(), 2);
        assert!(sink.committed().is_empty());

        sink.set_fail_flush(true);
        let err = run.flush().await.unwrap_err();
        assert_matches!(err.current_context(), IngestError::Flush);
        assert_eq!(run.pending(), 0);
        assert!(sink.committed().is_empty());

        sink.set_fail_flush(false);
        run.write(sample(3)).await.unwrap();
        assert_eq!(run.flush().await.unwrap(), 1);
        assert_eq!(sink.committed(), vec![sample(3)]);
    }

    #[tokio::test]
    async fn test_discard() {
        let sink = InMemorySink::new();
        let mut run = sink.create_sink();

        run.write(sample(1)).await.unwrap();
        run.discard();
        assert_eq!(run.flush().await.unwrap(), 0);
        assert!(sink.committed().is_empty());
    }
}

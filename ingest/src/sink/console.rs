use async_trait::async_trait;
use error_stack::Result;
use serde_json::json;
use tracing::{info, instrument};

use crate::{
    error::{IngestError, IngestErrorResultExt},
    types::Sample,
};

use super::{SinkFactory, TimeSeriesSink};

/// Logs flushed samples as JSON lines. Used for dry runs.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    measurement: String,
    buffer: Vec<Sample>,
}

impl ConsoleSink {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            buffer: Vec::new(),
        }
    }
}

#[async_trait]
impl TimeSeriesSink for ConsoleSink {
    async fn write(&mut self, sample: Sample) -> Result<(), IngestError> {
        self.buffer.push(sample);
        Ok(())
    }

    #[instrument(skip(self), err(Debug), level = "DEBUG")]
    async fn flush(&mut self) -> Result<usize, IngestError> {
        let samples = std::mem::take(&mut self.buffer);

        let mut lines = Vec::with_capacity(samples.len());
        for sample in &samples {
            let line = serde_json::to_string(&json!({
                "measurement": self.measurement,
                "sample": sample,
            }))
            .flush("failed to serialize sample")?;
            lines.push(line);
        }

        for line in lines {
            info!("{}", line);
        }

        Ok(samples.len())
    }

    fn discard(&mut self) {
        self.buffer.clear();
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl SinkFactory for ConsoleSink {
    fn create_sink(&self) -> Box<dyn TimeSeriesSink> {
        Box::new(ConsoleSink::new(self.measurement.clone()))
    }
}

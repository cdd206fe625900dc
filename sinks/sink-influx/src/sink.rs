use std::time::Duration;

use async_trait::async_trait;
use error_stack::Result;
use reqwest::{header, Client};
use tracing::{debug, instrument};
use yieldline_ingest::{
    IngestError, IngestErrorResultExt, Sample, SinkFactory, TimeSeriesSink,
};

use crate::{configuration::SinkInfluxConfiguration, line::to_line_protocol};

const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Writes samples to an InfluxDB v2 bucket.
///
/// Every flush is a single write request, so either all buffered points are accepted or none.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: Client,
    config: SinkInfluxConfiguration,
    buffer: Vec<Sample>,
}

impl InfluxSink {
    pub fn new(config: SinkInfluxConfiguration) -> Self {
        Self {
            client: Client::new(),
            config,
            buffer: Vec::new(),
        }
    }

    #[instrument(skip(self, body), err(Debug))]
    async fn send(&self, body: String) -> Result<(), IngestError> {
        let mut request = self
            .client
            .post(self.config.write_url.clone())
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .timeout(WRITE_TIMEOUT)
            .body(body);

        if let Some(token) = &self.config.token {
            request = request.header(header::AUTHORIZATION, format!("Token {token}"));
        }

        let response = request.send().await.flush("failed to POST line protocol")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read response body".to_string());
            return Err(IngestError::flush(&format!(
                "influx write failed with status {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl TimeSeriesSink for InfluxSink {
    async fn write(&mut self, sample: Sample) -> Result<(), IngestError> {
        self.buffer.push(sample);
        Ok(())
    }

    #[instrument(skip(self), err(Debug), level = "DEBUG")]
    async fn flush(&mut self) -> Result<usize, IngestError> {
        let samples = std::mem::take(&mut self.buffer);
        if samples.is_empty() {
            return Ok(0);
        }

        let body = samples
            .iter()
            .map(|sample| to_line_protocol(&self.config.measurement, sample))
            .collect::<Vec<_>>()
            .join("\n");

        self.send(body).await?;
        debug!(points = samples.len(), "influx write accepted");

        Ok(samples.len())
    }

    fn discard(&mut self) {
        self.buffer.clear();
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl SinkFactory for InfluxSink {
    fn create_sink(&self) -> Box<dyn TimeSeriesSink> {
        Box::new(InfluxSink {
            client: self.client.clone(),
            config: self.config.clone(),
            buffer: Vec::new(),
        })
    }
}

use yieldline_observability::{Counter, KeyValue};

/// Counters updated once per ingestion run.
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub runs: Counter<u64>,
    pub samples: Counter<u64>,
    pub skipped: Counter<u64>,
}

impl Default for RunMetrics {
    fn default() -> Self {
        let meter = yieldline_observability::meter("yieldline_ingest");

        Self {
            runs: meter
                .u64_counter("yieldline.ingest.runs")
                .with_description("number of ingestion runs, by outcome")
                .build(),
            samples: meter
                .u64_counter("yieldline.ingest.samples")
                .with_description("number of samples committed to the sink")
                .build(),
            skipped: meter
                .u64_counter("yieldline.ingest.skipped")
                .with_description("number of windows skipped because of unusable readings")
                .build(),
        }
    }
}

impl RunMetrics {
    pub fn record_run(&self, source_key: &str, outcome: &'static str) {
        self.runs.add(
            1,
            &[
                KeyValue::new("source", source_key.to_string()),
                KeyValue::new("outcome", outcome),
            ],
        );
    }

    pub fn record_samples(&self, source_key: &str, samples: u64, skipped: u64) {
        let attributes = [KeyValue::new("source", source_key.to_string())];
        self.samples.add(samples, &attributes);
        self.skipped.add(skipped, &attributes);
    }
}

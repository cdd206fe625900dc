use std::sync::Arc;

use clap::{Args, ValueEnum};
use error_stack::Result;
use yieldline_ingest::{ConsoleSink, IngestError, SinkFactory};
use yieldline_sink_influx::{InfluxSink, SinkInfluxOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkType {
    /// Print the samples.
    Console,
    /// Write the samples to InfluxDB.
    Influx,
}

#[derive(Args, Debug)]
pub struct SinkArgs {
    /// Where the samples are written.
    #[arg(long, env = "YIELDLINE_SINK", value_enum, default_value_t = SinkType::Console)]
    pub sink: SinkType,
    #[command(flatten)]
    pub influx: SinkInfluxOptions,
}

impl SinkArgs {
    pub fn into_factory(self, measurement: &str) -> Result<Arc<dyn SinkFactory>, IngestError> {
        match self.sink {
            SinkType::Console => Ok(Arc::new(ConsoleSink::new(measurement))),
            SinkType::Influx => {
                let config = self.influx.to_influx_configuration(measurement)?;
                Ok(Arc::new(InfluxSink::new(config)))
            }
        }
    }
}

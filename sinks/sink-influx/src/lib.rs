mod configuration;
mod line;
mod sink;

pub use self::configuration::{SinkInfluxConfiguration, SinkInfluxOptions};
pub use self::line::to_line_protocol;
pub use self::sink::InfluxSink;

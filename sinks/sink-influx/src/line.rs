//! InfluxDB line protocol.

use yieldline_ingest::Sample;

/// Renders `sample` as `<measurement>,protocol=<key> apy=<apy>,weight=<weight> <timestamp>`.
pub fn to_line_protocol(measurement: &str, sample: &Sample) -> String {
    format!(
        "{},protocol={} apy={},weight={} {}",
        escape(measurement, &[',', ' ']),
        escape(&sample.source_key, &[',', '=', ' ']),
        sample.apy_percent,
        sample.weight,
        sample.timestamp_seconds
    )
}

fn escape(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

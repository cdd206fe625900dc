use clap::Args;
use error_stack::{Result, ResultExt};
use serde::Deserialize;
use url::Url;
use yieldline_ingest::{IngestError, IngestErrorResultExt};

#[derive(Debug, Clone)]
pub struct SinkInfluxConfiguration {
    /// The `/api/v2/write` url, with org, bucket and precision set.
    pub write_url: Url,
    pub token: Option<String>,
    pub measurement: String,
}

#[derive(Debug, Clone, Args, Default, Deserialize)]
pub struct SinkInfluxOptions {
    /// InfluxDB server url.
    #[arg(long, env = "INFLUX_URL")]
    pub influx_url: Option<String>,

    /// Organization owning the bucket.
    #[arg(long, env = "INFLUX_ORG")]
    pub influx_org: Option<String>,

    /// Bucket the samples are written to.
    #[arg(long, env = "INFLUX_BUCKET")]
    pub influx_bucket: Option<String>,

    /// API token.
    #[arg(long, env = "INFLUX_TOKEN")]
    pub influx_token: Option<String>,
}

impl SinkInfluxOptions {
    pub fn to_influx_configuration(
        self,
        measurement: impl Into<String>,
    ) -> Result<SinkInfluxConfiguration, IngestError> {
        let Some(url) = self.influx_url else {
            return Err(IngestError::configuration("missing influx url"));
        };
        let Some(org) = self.influx_org else {
            return Err(IngestError::configuration("missing influx org"));
        };
        let Some(bucket) = self.influx_bucket else {
            return Err(IngestError::configuration("missing influx bucket"));
        };

        let mut write_url = Url::parse(&url)
            .configuration("malformed influx url")
            .attach_printable_lazy(|| format!("url: {url}"))?
            .join("api/v2/write")
            .configuration("malformed influx url")?;

        write_url
            .query_pairs_mut()
            .append_pair("org", &org)
            .append_pair("bucket", &bucket)
            .append_pair("precision", "s");

        Ok(SinkInfluxConfiguration {
            write_url,
            token: self.influx_token,
            measurement: measurement.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use yieldline_ingest::IngestError;

    use super::SinkInfluxOptions;

    #[test]
    fn test_write_url() {
        let options = SinkInfluxOptions {
            influx_url: Some("http://localhost:8086".to_string()),
            influx_org: Some("defi research".to_string()),
            influx_bucket: Some("yields".to_string()),
            influx_token: Some("secret".to_string()),
        };

        let config = options.to_influx_configuration("apy").unwrap();
        assert_eq!(
            config.write_url.as_str(),
            "http://localhost:8086/api/v2/write?org=defi+research&bucket=yields&precision=s"
        );
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.measurement, "apy");
    }

    #[test]
    fn test_missing_options() {
        let err = SinkInfluxOptions::default()
            .to_influx_configuration("apy")
            .unwrap_err();
        assert_matches!(err.current_context(), IngestError::Configuration);
    }
}

//! External aggregator of pre-computed yield series.

use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use error_stack::{Result, ResultExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{instrument, warn};
use url::Url;
use yieldline_observability::{KeyValue, RecordRequest, RequestMetrics};

use crate::error::{IngestError, IngestErrorResultExt};

pub const DEFAULT_SERIES_FIELD: &str = "dailySeries";

pub const DEFAULT_SERIES_QUERY: &str = r#"query Series($address: String!, $from: Int!, $to: Int!) {
  dailySeries(address: $address, from: $from, to: $to) {
    timestamp
    value
  }
}"#;

/// One point of an external series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: u64,
    /// Fractional yield. `None` if the aggregator returned something that is not a number.
    pub value: Option<f64>,
}

#[async_trait]
pub trait SeriesAggregator: Send + Sync {
    /// Returns the points of the series of `address` in `[from, to]`, ordered by timestamp.
    async fn series(
        &self,
        address: &Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<SeriesPoint>, IngestError>;
}

#[derive(Debug, Clone)]
pub struct GraphQlAggregatorOptions {
    pub query: String,
    /// Field of `data` holding the series.
    pub field: String,
    pub timeout: Duration,
    pub backoff: ExponentialBuilder,
}

/// A [SeriesAggregator] that queries a GraphQL endpoint.
#[derive(Clone)]
pub struct GraphQlAggregator {
    client: Client,
    url: Url,
    options: GraphQlAggregatorOptions,
    metrics: RequestMetrics,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl Default for GraphQlAggregatorOptions {
    fn default() -> Self {
        Self {
            query: DEFAULT_SERIES_QUERY.to_string(),
            field: DEFAULT_SERIES_FIELD.to_string(),
            timeout: Duration::from_secs(30),
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(250))
                .with_max_delay(Duration::from_secs(5))
                .with_max_times(3),
        }
    }
}

impl GraphQlAggregator {
    pub fn new(url: &str, options: GraphQlAggregatorOptions) -> Result<Self, IngestError> {
        let url = Url::parse(url)
            .configuration("failed to parse aggregator url")
            .attach_printable_lazy(|| format!("url: {url}"))?;

        Ok(Self {
            client: Client::new(),
            url,
            options,
            metrics: RequestMetrics::new("yieldline_ingest", "yieldline.aggregator"),
        })
    }

    async fn query(&self, variables: Value) -> Result<Value, IngestError> {
        let body = json!({
            "query": self.options.query,
            "variables": variables,
        });

        let send = || async {
            let response = self
                .client
                .post(self.url.clone())
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            response.json::<GraphQlResponse>().await
        };

        let request = send
            .retry(self.options.backoff)
            .notify(|err, delay| {
                warn!(err = %err, delay = ?delay, "aggregator request failed. retrying");
            })
            .record_request(
                self.metrics.clone(),
                [KeyValue::new("field", self.options.field.clone())],
            );

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(IngestError::connectivity("aggregator request timed out"));
        };

        let response = response.connectivity("aggregator request failed")?;

        if let Some(errors) = response.errors.filter(|errors| !errors.is_empty()) {
            let messages = errors
                .into_iter()
                .map(|err| err.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(IngestError::connectivity("aggregator returned errors"))
                .attach_printable(messages);
        }

        response
            .data
            .ok_or_else(|| IngestError::connectivity("aggregator response has no data"))
    }
}

#[async_trait]
impl SeriesAggregator for GraphQlAggregator {
    #[instrument(skip(self), err(Debug), level = "DEBUG")]
    async fn series(
        &self,
        address: &Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<SeriesPoint>, IngestError> {
        let data = self
            .query(json!({
                "address": address.to_string().to_lowercase(),
                "from": from,
                "to": to,
            }))
            .await?;

        let Some(items) = data.get(&self.options.field).and_then(Value::as_array) else {
            return Err(IngestError::connectivity("aggregator response has no series"))
                .attach_printable_lazy(|| format!("field: {}", self.options.field));
        };

        let mut points = Vec::with_capacity(items.len());
        for item in items {
            let Some(timestamp) = item.get("timestamp").and_then(parse_u64) else {
                warn!(item = %item, "series point without timestamp");
                continue;
            };

            if timestamp < from || timestamp > to {
                continue;
            }

            let value = item.get("value").and_then(parse_f64);
            points.push(SeriesPoint { timestamp, value });
        }

        points.sort_by_key(|point| point.timestamp);

        Ok(points)
    }
}

fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn parse_f64(value: &Value) -> Option<f64> {
    let value = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }?;

    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::Address;
    use assert_matches::assert_matches;
    use backon::ExponentialBuilder;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method},
        Mock, MockServer, ResponseTemplate,
    };

    use super::{GraphQlAggregator, GraphQlAggregatorOptions, SeriesAggregator, SeriesPoint};
    use crate::error::IngestError;

    fn options() -> GraphQlAggregatorOptions {
        GraphQlAggregatorOptions {
            timeout: Duration::from_secs(5),
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(1))
                .with_max_times(1),
            ..GraphQlAggregatorOptions::default()
        }
    }

    #[tokio::test]
    async fn test_series_numbers_and_strings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "variables": { "from": 100, "to": 400 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "dailySeries": [
                        { "timestamp": "300", "value": "0.041" },
                        { "timestamp": 200, "value": 0.045 },
                        { "timestamp": 250, "value": "n/a" },
                        { "timestamp": 900, "value": 0.01 },
                        { "value": 0.02 }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let aggregator = GraphQlAggregator::new(&server.uri(), options()).unwrap();
        let points = aggregator.series(&Address::ZERO, 100, 400).await.unwrap();

        assert_eq!(
            points,
            vec![
                SeriesPoint {
                    timestamp: 200,
                    value: Some(0.045)
                },
                SeriesPoint {
                    timestamp: 250,
                    value: None
                },
                SeriesPoint {
                    timestamp: 300,
                    value: Some(0.041)
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_graphql_errors_are_connectivity_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{ "message": "unknown field dailySeries" }]
            })))
            .mount(&server)
            .await;

        let aggregator = GraphQlAggregator::new(&server.uri(), options()).unwrap();
        let err = aggregator
            .series(&Address::ZERO, 100, 400)
            .await
            .unwrap_err();
        assert_matches!(err.current_context(), IngestError::Connectivity);
    }

    #[tokio::test]
    async fn test_unreachable_aggregator() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let aggregator = GraphQlAggregator::new(&server.uri(), options()).unwrap();
        let err = aggregator
            .series(&Address::ZERO, 100, 400)
            .await
            .unwrap_err();
        assert_matches!(err.current_context(), IngestError::Connectivity);
    }
}

//! Chain oracle backed by an Ethereum JSON-RPC endpoint.

use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use alloy_primitives::Bytes;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use error_stack::{Result, ResultExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};
use url::Url;
use yieldline_observability::{KeyValue, RecordRequest, RequestMetrics};

use crate::error::{IngestError, IngestErrorResultExt};

use super::{ChainOracle, ContractCall, LogEntry, LogFilter};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RATE_LIMIT: u32 = 50;
/// JSON-RPC error code of a reverted `eth_call`.
const EXECUTION_REVERTED: i64 = 3;

#[derive(Debug, Clone)]
pub struct JsonRpcOracleOptions {
    /// Timeout of a single call, retries included.
    pub timeout: Duration,
    /// Maximum number of requests per second, shared by all users of the oracle.
    pub rate_limit: u32,
    /// Backoff between retries of failed HTTP requests.
    pub backoff: ExponentialBuilder,
}

/// A [ChainOracle] that talks to an Ethereum node over HTTP.
///
/// Cloning is cheap and clones share the HTTP connection pool and the rate limiter.
#[derive(Clone)]
pub struct JsonRpcOracle {
    client: Client,
    url: Url,
    options: JsonRpcOracleOptions,
    limiter: Arc<DefaultDirectRateLimiter>,
    metrics: RequestMetrics,
    next_id: Arc<AtomicU64>,
}

#[derive(Debug, Deserialize)]
struct Envelope<R> {
    result: Option<R>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlockHeader {
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    block_number: Option<String>,
    data: String,
    #[serde(default)]
    removed: bool,
}

impl Default for JsonRpcOracleOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            rate_limit: DEFAULT_RATE_LIMIT,
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(250))
                .with_max_delay(Duration::from_secs(5))
                .with_max_times(4),
        }
    }
}

impl JsonRpcOracle {
    pub fn new(url: &str, options: JsonRpcOracleOptions) -> Result<Self, IngestError> {
        let url = Url::parse(url)
            .configuration("failed to parse rpc url")
            .attach_printable_lazy(|| format!("url: {url}"))?;

        let quota = NonZeroU32::new(options.rate_limit).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_second(quota));

        Ok(Self {
            client: Client::new(),
            url,
            options,
            limiter: Arc::new(limiter),
            metrics: RequestMetrics::new("yieldline_ingest", "yieldline.rpc"),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn request<P, R>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<std::result::Result<Option<R>, RpcErrorObject>, IngestError>
    where
        P: Serialize + Send,
        R: DeserializeOwned + Send,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let send = || async {
            self.limiter.until_ready().await;
            let response = self
                .client
                .post(self.url.clone())
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            response.json::<Envelope<R>>().await
        };

        let request = send
            .retry(self.options.backoff)
            .notify(|err, delay| {
                warn!(method, err = %err, delay = ?delay, "rpc request failed. retrying");
            })
            .record_request(self.metrics.clone(), [KeyValue::new("method", method)]);

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(IngestError::connectivity("rpc request timed out"))
                .attach_printable_lazy(|| format!("method: {method}"));
        };

        let envelope = response
            .connectivity("rpc request failed")
            .attach_printable_lazy(|| format!("method: {method}"))?;

        match envelope.error {
            Some(error) => Ok(Err(error)),
            None => Ok(Ok(envelope.result)),
        }
    }
}

#[async_trait]
impl ChainOracle for JsonRpcOracle {
    #[instrument(skip(self), err(Debug), level = "DEBUG")]
    async fn latest_block_number(&self) -> Result<u64, IngestError> {
        let response = self
            .request::<_, String>("eth_blockNumber", json!([]))
            .await?;

        match response {
            Ok(Some(number)) => parse_quantity(&number).ok_or_else(|| {
                IngestError::connectivity(&format!("malformed block number: {number}"))
            }),
            Ok(None) => Err(IngestError::connectivity("missing block number in response")),
            Err(error) => Err(IngestError::connectivity(&format!(
                "eth_blockNumber failed: {error}"
            ))),
        }
    }

    #[instrument(skip(self), err(Debug), level = "DEBUG")]
    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>, IngestError> {
        let response = self
            .request::<_, RpcBlockHeader>(
                "eth_getBlockByNumber",
                json!([format!("{block_number:#x}"), false]),
            )
            .await?;

        match response {
            Ok(Some(header)) => Ok(parse_quantity(&header.timestamp)),
            Ok(None) => Ok(None),
            Err(error) => Err(IngestError::connectivity(&format!(
                "eth_getBlockByNumber failed: {error}"
            )))
            .attach_printable_lazy(|| format!("block: {block_number}")),
        }
    }

    #[instrument(skip(self, call), fields(call = %call), err(Debug), level = "DEBUG")]
    async fn call(
        &self,
        call: &ContractCall,
        block_number: u64,
    ) -> Result<Option<Bytes>, IngestError> {
        let transaction = json!({
            "to": format!("0x{}", hex::encode(call.address)),
            "data": format!("0x{}", hex::encode(call.selector)),
        });

        let response = self
            .request::<_, String>(
                "eth_call",
                json!([transaction, format!("{block_number:#x}")]),
            )
            .await?;

        match response {
            Ok(Some(data)) => Ok(parse_data(&data).filter(|data| !data.is_empty())),
            Ok(None) => Ok(None),
            Err(error) if error.is_revert() => {
                debug!(block_number, error = %error, "contract call reverted");
                Ok(None)
            }
            Err(error) => Err(IngestError::connectivity(&format!("eth_call failed: {error}")))
                .attach_printable_lazy(|| format!("block: {block_number}")),
        }
    }

    #[instrument(skip(self), err(Debug), level = "DEBUG")]
    async fn logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, IngestError> {
        let params = json!([{
            "address": format!("0x{}", hex::encode(filter.address)),
            "topics": [format!("0x{}", hex::encode(filter.topic))],
            "fromBlock": format!("{from_block:#x}"),
            "toBlock": format!("{to_block:#x}"),
        }]);

        let response = self.request::<_, Vec<RpcLog>>("eth_getLogs", params).await?;

        let logs = match response {
            Ok(logs) => logs.unwrap_or_default(),
            Err(error) => {
                return Err(IngestError::connectivity(&format!("eth_getLogs failed: {error}")))
                    .attach_printable_lazy(|| format!("range: {from_block}..={to_block}"));
            }
        };

        let mut entries = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed {
                continue;
            }

            let block_number = log.block_number.as_deref().and_then(parse_quantity);
            let (Some(block_number), Some(data)) = (block_number, parse_data(&log.data)) else {
                warn!(log = ?log, "ignoring malformed log");
                continue;
            };

            entries.push(LogEntry { block_number, data });
        }

        entries.sort_by_key(|entry| entry.block_number);

        Ok(entries)
    }
}

impl RpcErrorObject {
    /// Reverts mean the contract has no usable value at that block. Any other error is the node's.
    fn is_revert(&self) -> bool {
        self.code == EXECUTION_REVERTED || self.message.to_ascii_lowercase().contains("revert")
    }
}

impl std::fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

fn parse_quantity(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}

fn parse_data(value: &str) -> Option<Bytes> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).ok().map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, time::Duration};

    use alloy_primitives::{Address, Selector, B256};
    use backon::ExponentialBuilder;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method},
        Mock, MockServer, ResponseTemplate,
    };

    use super::{JsonRpcOracle, JsonRpcOracleOptions};
    use crate::{
        chain::{ChainOracle, ContractCall, LogFilter},
        error::IngestError,
    };

    fn options() -> JsonRpcOracleOptions {
        JsonRpcOracleOptions {
            timeout: Duration::from_secs(5),
            rate_limit: 1_000,
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5))
                .with_max_times(1),
        }
    }

    async fn respond(server: &MockServer, rpc_method: &str, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_latest_block_number() {
        let server = MockServer::start().await;
        respond(
            &server,
            "eth_blockNumber",
            json!({ "jsonrpc": "2.0", "id": 1, "result": "0x12d687" }),
        )
        .await;

        let oracle = JsonRpcOracle::new(&server.uri(), options()).unwrap();
        assert_eq!(oracle.latest_block_number().await.unwrap(), 1_234_567);
    }

    #[tokio::test]
    async fn test_missing_block_is_absent() {
        let server = MockServer::start().await;
        respond(
            &server,
            "eth_getBlockByNumber",
            json!({ "jsonrpc": "2.0", "id": 1, "result": null }),
        )
        .await;

        let oracle = JsonRpcOracle::new(&server.uri(), options()).unwrap();
        assert_eq!(oracle.block_timestamp(42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_block_timestamp() {
        let server = MockServer::start().await;
        respond(
            &server,
            "eth_getBlockByNumber",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "number": "0x2a", "timestamp": "0x65a0bc00" }
            }),
        )
        .await;

        let oracle = JsonRpcOracle::new(&server.uri(), options()).unwrap();
        assert_eq!(oracle.block_timestamp(42).await.unwrap(), Some(0x65a0bc00));
    }

    #[tokio::test]
    async fn test_reverted_call_is_absent() {
        let server = MockServer::start().await;
        respond(
            &server,
            "eth_call",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": 3, "message": "execution reverted" }
            }),
        )
        .await;

        let oracle = JsonRpcOracle::new(&server.uri(), options()).unwrap();
        let call = ContractCall {
            address: Address::ZERO,
            selector: Selector::from_str("0x18160ddd").unwrap(),
        };
        assert_eq!(oracle.call(&call, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_node_error_on_call_is_connectivity_error() {
        let server = MockServer::start().await;
        respond(
            &server,
            "eth_call",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32005, "message": "request rate limit exceeded" }
            }),
        )
        .await;

        let oracle = JsonRpcOracle::new(&server.uri(), options()).unwrap();
        let call = ContractCall {
            address: Address::ZERO,
            selector: Selector::from_str("0x18160ddd").unwrap(),
        };
        let err = oracle.call(&call, 1).await.unwrap_err();
        assert_eq!(*err.current_context(), IngestError::Connectivity);
    }

    #[tokio::test]
    async fn test_revert_message_without_code_is_absent() {
        let server = MockServer::start().await;
        respond(
            &server,
            "eth_call",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "Execution Reverted: paused" }
            }),
        )
        .await;

        let oracle = JsonRpcOracle::new(&server.uri(), options()).unwrap();
        let call = ContractCall {
            address: Address::ZERO,
            selector: Selector::from_str("0x18160ddd").unwrap(),
        };
        assert_eq!(oracle.call(&call, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_call_data_is_absent() {
        let server = MockServer::start().await;
        respond(
            &server,
            "eth_call",
            json!({ "jsonrpc": "2.0", "id": 1, "result": "0x" }),
        )
        .await;

        let oracle = JsonRpcOracle::new(&server.uri(), options()).unwrap();
        let call = ContractCall {
            address: Address::ZERO,
            selector: Selector::from_str("0x18160ddd").unwrap(),
        };
        assert_eq!(oracle.call(&call, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_node_error_on_block_is_connectivity_error() {
        let server = MockServer::start().await;
        respond(
            &server,
            "eth_getBlockByNumber",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "header not found" }
            }),
        )
        .await;

        let oracle = JsonRpcOracle::new(&server.uri(), options()).unwrap();
        let err = oracle.block_timestamp(42).await.unwrap_err();
        assert_eq!(*err.current_context(), IngestError::Connectivity);
    }

    #[tokio::test]
    async fn test_logs_are_parsed_and_ordered() {
        let server = MockServer::start().await;
        respond(
            &server,
            "eth_getLogs",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": [
                    { "blockNumber": "0x20", "data": "0x01", "removed": false },
                    { "blockNumber": "0x10", "data": "0x02" },
                    { "blockNumber": "0x30", "data": "0x03", "removed": true },
                ]
            }),
        )
        .await;

        let oracle = JsonRpcOracle::new(&server.uri(), options()).unwrap();
        let filter = LogFilter {
            address: Address::ZERO,
            topic: B256::ZERO,
        };
        let logs = oracle.logs(&filter, 0, 100).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].block_number, 0x10);
        assert_eq!(logs[0].data.to_vec(), vec![0x02]);
        assert_eq!(logs[1].block_number, 0x20);
    }

    #[tokio::test]
    async fn test_http_failure_is_connectivity_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let oracle = JsonRpcOracle::new(&server.uri(), options()).unwrap();
        let err = oracle.latest_block_number().await.unwrap_err();
        assert_eq!(*err.current_context(), IngestError::Connectivity);
    }
}

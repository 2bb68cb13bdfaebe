//! JSON-RPC client for a Starknet node

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::felt::{parse_felt, Felt, FeltError};
use crate::tracing_logger::log_external_call;
use crate::types::{Call, TransactionReceipt};

/// `TXN_HASH_NOT_FOUND` error code of the Starknet JSON-RPC API
const TXN_HASH_NOT_FOUND: i64 = 29;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Node returned HTTP {0}")]
    Status(u16),

    #[error("JSON-RPC error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("Malformed JSON-RPC response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Felt(#[from] FeltError),
}

/// Read and receipt access to the chain. Implemented by [`StarknetRpcClient`]
/// and by in-memory fakes in tests.
#[async_trait]
pub trait StarknetProvider: Send + Sync {
    /// Run a view call against the latest block
    async fn call(&self, call: &Call) -> Result<Vec<Felt>, RpcError>;

    /// `None` while the node does not know the transaction yet
    async fn get_transaction_receipt(
        &self,
        transaction_hash: &str,
    ) -> Result<Option<TransactionReceipt>, RpcError>;

    async fn chain_id(&self) -> Result<String, RpcError>;
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

pub struct StarknetRpcClient {
    client: Client,
    node_url: String,
    next_id: AtomicU64,
}

impl StarknetRpcClient {
    pub fn new(node_url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("bitusd-api/0.1")
            .build()?;

        Ok(Self {
            client,
            node_url: node_url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!(method, id, "Starknet RPC request");

        let started = Instant::now();
        let result = self.send(&body).await;
        let error = result.as_ref().err().map(|e| e.to_string());
        log_external_call("starknet", method, started.elapsed(), error.as_deref());
        result
    }

    async fn send(&self, body: &JsonRpcRequest<'_>) -> Result<Value, RpcError> {
        let response = self.client.post(&self.node_url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(RpcError::Status(response.status().as_u16()));
        }

        let parsed: JsonRpcResponse = response.json().await?;
        if let Some(err) = parsed.error {
            return Err(RpcError::Node {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| RpcError::Malformed(format!("{} returned neither result nor error", body.method)))
    }
}

#[async_trait]
impl StarknetProvider for StarknetRpcClient {
    async fn call(&self, call: &Call) -> Result<Vec<Felt>, RpcError> {
        let params = json!({
            "request": call.to_rpc_request(),
            "block_id": "latest",
        });
        let result = self.request("starknet_call", params).await?;
        parse_felt_array(&result)
    }

    async fn get_transaction_receipt(
        &self,
        transaction_hash: &str,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        let params = json!({ "transaction_hash": transaction_hash });
        match self.request("starknet_getTransactionReceipt", params).await {
            Ok(value) => {
                let receipt = serde_json::from_value(value)
                    .map_err(|e| RpcError::Malformed(format!("receipt: {}", e)))?;
                Ok(Some(receipt))
            }
            Err(RpcError::Node { code, .. }) if code == TXN_HASH_NOT_FOUND => Ok(None),
            Err(e) => {
                warn!(transaction_hash, error = %e, "Receipt lookup failed");
                Err(e)
            }
        }
    }

    async fn chain_id(&self) -> Result<String, RpcError> {
        let result = self.request("starknet_chainId", json!([])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Malformed("chain id is not a string".to_string()))
    }
}

fn parse_felt_array(value: &Value) -> Result<Vec<Felt>, RpcError> {
    let items = value
        .as_array()
        .ok_or_else(|| RpcError::Malformed("starknet_call result is not an array".to_string()))?;

    items
        .iter()
        .map(|item| {
            let s = item
                .as_str()
                .ok_or_else(|| RpcError::Malformed(format!("felt is not a string: {}", item)))?;
            Ok(parse_felt(s)?)
        })
        .collect()
}

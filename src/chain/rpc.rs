//! HTTP JSON-RPC read client for the order-book contract.
//!
//! One `eth_call` per read, bounded by a shared semaphore. The client never
//! retries application-level errors; transport errors surface with their
//! transient classification and the caller decides.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use super::codec::{
    decode_trade_result, decode_u32_result, decode_u8_result, encode_call, encode_call_u32,
    GET_TRADE_SELECTOR, NEXT_ID_SELECTOR, STATE_OF_SELECTOR,
};
use super::{ChainError, ChainReader, Trade};

/// Read client over HTTP JSON-RPC.
pub struct RpcClient {
    client: Client,
    url: String,
    contract: String,
    permits: Arc<Semaphore>,
    req_id: AtomicU64,
}

impl RpcClient {
    /// Create a client against an HTTP endpoint and contract address.
    ///
    /// `max_in_flight` bounds concurrent calls across all users of this
    /// client (the reconciler's chain-read semaphore).
    pub fn new(url: String, contract: String, max_in_flight: usize) -> Self {
        Self {
            client: Client::new(),
            url,
            contract,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            req_id: AtomicU64::new(1),
        }
    }

    async fn eth_call(&self, calldata: String) -> Result<String, ChainError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ChainError::Transport("rpc semaphore closed".to_string()))?;

        let id = self.req_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "eth_call",
            "params": [{"to": self.contract, "data": calldata}, "latest"],
        });

        debug!(url = %self.url, id, "eth_call");

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ChainError::Transport(format!("http {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(ChainError::Rpc {
                code: status.as_u16() as i64,
                message: "http client error".to_string(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;

        if let Some(err) = body.get("error") {
            return Err(ChainError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        body.get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChainError::Decode("missing result field".to_string()))
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn get_trade(&self, id: u32) -> Result<Trade, ChainError> {
        let result = self
            .eth_call(encode_call_u32(GET_TRADE_SELECTOR, id))
            .await?;
        decode_trade_result(&result)
    }

    async fn state_of(&self, id: u32) -> Result<u8, ChainError> {
        let result = self
            .eth_call(encode_call_u32(STATE_OF_SELECTOR, id))
            .await?;
        decode_u8_result(&result)
    }

    async fn next_id(&self) -> Result<u32, ChainError> {
        let result = self.eth_call(encode_call(NEXT_ID_SELECTOR)).await?;
        decode_u32_result(&result)
    }
}

//! Chain submission client
//!
//! The manager only needs a handful of calls: nonce, gas, broadcast,
//! receipts and block heights. [`JsonRpcChainClient`] speaks plain
//! Ethereum JSON-RPC and lets the node sign (`eth_sendTransaction`).

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::types::to_hex;

/// Chain client errors
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type ChainResult<T> = Result<T, ChainError>;

/// Block selector for header lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Latest,
    /// Committed (sequenced batch posted to L1)
    Safe,
    /// Verified
    Finalized,
}

impl BlockTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockTag::Latest => "latest",
            BlockTag::Safe => "safe",
            BlockTag::Finalized => "finalized",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
}

/// Transaction to estimate or broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub nonce: Option<u64>,
    pub gas: Option<u64>,
    pub gas_price: Option<U256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub block_number: u64,
    /// Depth of the receipt's block, 1 when it is the head
    pub confirmations: u64,
    pub reverted: bool,
}

/// Calls the claim manager and progress poller make against a chain
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn pending_nonce(&self, from: Address) -> ChainResult<u64>;

    async fn estimate_gas(&self, tx: &TxRequest) -> ChainResult<u64>;

    async fn gas_price(&self) -> ChainResult<U256>;

    async fn broadcast(&self, tx: &TxRequest) -> ChainResult<B256>;

    /// `None` while the transaction is unknown or pending
    async fn receipt(&self, hash: B256) -> ChainResult<Option<TxReceipt>>;

    async fn block_number(&self) -> ChainResult<u64>;

    async fn block_header(&self, tag: BlockTag) -> ChainResult<Option<BlockHeader>>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Ethereum JSON-RPC client
#[derive(Debug, Clone)]
pub struct JsonRpcChainClient {
    client: Client,
    url: String,
}

impl JsonRpcChainClient {
    pub fn new(url: &str, timeout: Duration) -> ChainResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> ChainResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = resp.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(resp.result)
    }

    fn tx_object(tx: &TxRequest) -> Value {
        let mut obj = json!({
            "from": to_hex(tx.from.as_slice()),
            "to": to_hex(tx.to.as_slice()),
            "value": format!("{:#x}", tx.value),
            "data": to_hex(&tx.data),
        });
        if let Some(nonce) = tx.nonce {
            obj["nonce"] = json!(format!("{:#x}", nonce));
        }
        if let Some(gas) = tx.gas {
            obj["gas"] = json!(format!("{:#x}", gas));
        }
        if let Some(price) = tx.gas_price {
            obj["gasPrice"] = json!(format!("{:#x}", price));
        }
        obj
    }
}

fn quantity_str(value: &Value, what: &str) -> ChainResult<String> {
    value
        .as_str()
        .map(|s| s.trim_start_matches("0x").to_string())
        .ok_or_else(|| ChainError::InvalidResponse(format!("{}: expected hex string", what)))
}

pub(crate) fn parse_u64(value: &Value, what: &str) -> ChainResult<u64> {
    let raw = quantity_str(value, what)?;
    u64::from_str_radix(if raw.is_empty() { "0" } else { &raw }, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("{}: {}", what, e)))
}

pub(crate) fn parse_u256(value: &Value, what: &str) -> ChainResult<U256> {
    let raw = quantity_str(value, what)?;
    U256::from_str_radix(if raw.is_empty() { "0" } else { &raw }, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("{}: {}", what, e)))
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn pending_nonce(&self, from: Address) -> ChainResult<u64> {
        let result = self
            .call(
                "eth_getTransactionCount",
                json!([to_hex(from.as_slice()), "pending"]),
            )
            .await?;
        parse_u64(&result, "nonce")
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> ChainResult<u64> {
        let result = self
            .call("eth_estimateGas", json!([Self::tx_object(tx)]))
            .await?;
        parse_u64(&result, "gas")
    }

    async fn gas_price(&self) -> ChainResult<U256> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        parse_u256(&result, "gasPrice")
    }

    async fn broadcast(&self, tx: &TxRequest) -> ChainResult<B256> {
        let result = self
            .call("eth_sendTransaction", json!([Self::tx_object(tx)]))
            .await?;
        result
            .as_str()
            .and_then(|s| s.parse::<B256>().ok())
            .ok_or_else(|| ChainError::InvalidResponse(format!("tx hash: {}", result)))
    }

    async fn receipt(&self, hash: B256) -> ChainResult<Option<TxReceipt>> {
        let result = self
            .call(
                "eth_getTransactionReceipt",
                json!([to_hex(hash.as_slice())]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }

        let block_number = parse_u64(&result["blockNumber"], "receipt.blockNumber")?;
        let reverted = parse_u64(&result["status"], "receipt.status")? == 0;
        let head = self.block_number().await?;

        Ok(Some(TxReceipt {
            block_number,
            confirmations: head.saturating_sub(block_number) + 1,
            reverted,
        }))
    }

    async fn block_number(&self) -> ChainResult<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_u64(&result, "blockNumber")
    }

    async fn block_header(&self, tag: BlockTag) -> ChainResult<Option<BlockHeader>> {
        let result = self
            .call("eth_getBlockByNumber", json!([tag.as_str(), false]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(BlockHeader {
            number: parse_u64(&result["number"], "block.number")?,
            timestamp: parse_u64(&result["timestamp"], "block.timestamp")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantities() {
        assert_eq!(parse_u64(&json!("0x1a"), "n").unwrap(), 26);
        assert_eq!(parse_u64(&json!("0x"), "n").unwrap(), 0);
        assert_eq!(
            parse_u256(&json!("0x3b9aca00"), "p").unwrap(),
            U256::from(1_000_000_000u64)
        );
        assert!(matches!(
            parse_u64(&json!(12), "n"),
            Err(ChainError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_tx_object_hex_fields() {
        let tx = TxRequest {
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            value: U256::ZERO,
            data: vec![0xab, 0xcd],
            nonce: Some(7),
            gas: Some(21_000),
            gas_price: Some(U256::from(255u64)),
        };
        let obj = JsonRpcChainClient::tx_object(&tx);
        assert_eq!(obj["nonce"], "0x7");
        assert_eq!(obj["gas"], "0x5208");
        assert_eq!(obj["gasPrice"], "0xff");
        assert_eq!(obj["data"], "0xabcd");
        assert_eq!(obj["value"], "0x0");
    }

    #[test]
    fn test_client_trims_url() {
        let client = JsonRpcChainClient::new("http://localhost:8545/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url(), "http://localhost:8545");
    }
}

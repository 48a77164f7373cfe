//! EVM JSON-RPC client for the escrow contract.
//!
//! ## Resilience
//!
//! * Exponential back-off is applied when the RPC returns a transient error or
//!   rate-limit response, up to [`MAX_BACKOFF_SECS`] seconds.
//! * Invalid-request / method-not-found / invalid-params errors are hard
//!   failures and are returned immediately.
//!
//! Only read methods are used, so retrying never duplicates a transaction.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::{CoordinatorError, Result};

use super::abi;
use super::{ConfirmedTx, EscrowLedger, OnChainBounty, TxStatus};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
const HARD_ERROR_CODES: [i64; 3] = [-32600, -32601, -32602];

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    status: Option<String>,
    block_number: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    from: String,
    to: Option<String>,
    value: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    timestamp: String,
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

pub struct JsonRpcLedger {
    client: Client,
    rpc_url: String,
    escrow_address: String,
    required_confirmations: u64,
}

impl JsonRpcLedger {
    pub fn new(
        client: Client,
        rpc_url: impl Into<String>,
        escrow_address: impl Into<String>,
        required_confirmations: u64,
    ) -> Self {
        JsonRpcLedger {
            client,
            rpc_url: rpc_url.into(),
            escrow_address: escrow_address.into().to_ascii_lowercase(),
            required_confirmations: required_confirmations.max(1),
        }
    }

    /// Issue one JSON-RPC call, retrying transient failures with back-off.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut backoff = INITIAL_BACKOFF_SECS;

        loop {
            let response = self
                .client
                .post(&self.rpc_url)
                .json(&json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": method,
                    "params": params,
                }))
                .send()
                .await;

            match response {
                Err(e) => {
                    warn!("RPC {method} failed (will retry in {backoff}s): {e}");
                }
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    warn!("Rate-limited by RPC on {method} (will retry in {backoff}s)");
                }
                Ok(resp) => {
                    let body: RpcResponse = resp.json().await?;

                    match body.error {
                        Some(err) if HARD_ERROR_CODES.contains(&err.code) => {
                            return Err(CoordinatorError::Rpc(format!(
                                "{method} hard error {}: {}",
                                err.code, err.message
                            )));
                        }
                        Some(err) => {
                            warn!(
                                "RPC soft error on {method} (will retry in {backoff}s): {} {}",
                                err.code, err.message
                            );
                        }
                        None => {
                            debug!("RPC {method} ok");
                            return Ok(body.result.unwrap_or(Value::Null));
                        }
                    }
                }
            }

            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
        }
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let value = self.call(method, params).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    async fn block_number(&self) -> Result<u64> {
        let value = self.call("eth_blockNumber", json!([])).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| CoordinatorError::Rpc("eth_blockNumber returned no quantity".into()))?;
        Ok(abi::quantity(raw)? as u64)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<i64> {
        let block: RpcBlock = self
            .call_as(
                "eth_getBlockByNumber",
                json!([abi::to_quantity(block_number as u128), false]),
            )
            .await?
            .ok_or_else(|| CoordinatorError::Rpc(format!("block {block_number} not found")))?;
        Ok(abi::quantity(&block.timestamp)? as i64)
    }
}

impl EscrowLedger for JsonRpcLedger {
    async fn tx_status(&self, tx_hash: &str) -> Result<TxStatus> {
        let Some(receipt) = self
            .call_as::<RpcReceipt>("eth_getTransactionReceipt", json!([tx_hash]))
            .await?
        else {
            return Ok(TxStatus::Pending);
        };
        let Some(block_hex) = receipt.block_number.as_deref() else {
            return Ok(TxStatus::Pending);
        };
        let block_number = abi::quantity(block_hex)? as u64;

        if receipt.status.as_deref() == Some("0x0") {
            return Ok(TxStatus::Failed(format!(
                "transaction reverted in block {block_number}"
            )));
        }

        if self.required_confirmations > 1 {
            let head = self.block_number().await?;
            let depth = head.saturating_sub(block_number) + 1;
            if depth < self.required_confirmations {
                debug!(
                    "{tx_hash} has {depth}/{} confirmations",
                    self.required_confirmations
                );
                return Ok(TxStatus::Pending);
            }
        }

        let tx: RpcTransaction = self
            .call_as("eth_getTransactionByHash", json!([tx_hash]))
            .await?
            .ok_or_else(|| CoordinatorError::Rpc(format!("{tx_hash} has a receipt but no body")))?;

        let to = tx.to.unwrap_or_default().to_ascii_lowercase();
        if to != self.escrow_address {
            return Ok(TxStatus::Failed(format!(
                "transaction is addressed to {to}, not the escrow contract"
            )));
        }
        let call = match abi::decode_call(&abi::from_hex(&tx.input)?) {
            Ok(call) => call,
            Err(e) => return Ok(TxStatus::Failed(format!("not an escrow call: {e}"))),
        };

        let mut events = Vec::new();
        for log in receipt
            .logs
            .iter()
            .filter(|l| l.address.eq_ignore_ascii_case(&self.escrow_address))
        {
            if let Some(event) = abi::decode_log(&log.topics, &log.data)? {
                events.push(event);
            }
        }

        Ok(TxStatus::Confirmed(ConfirmedTx {
            hash: tx_hash.to_ascii_lowercase(),
            from: tx.from.to_ascii_lowercase(),
            to,
            value: crate::amount::Wei(abi::quantity(&tx.value)?),
            call,
            block_number,
            block_timestamp: self.block_timestamp(block_number).await?,
            events,
        }))
    }

    async fn bounty(&self, onchain_id: u64) -> Result<OnChainBounty> {
        let data = abi::to_hex(&abi::encode_get_bounty(onchain_id));
        let value = self
            .call(
                "eth_call",
                json!([{ "to": self.escrow_address, "data": data }, "latest"]),
            )
            .await?;
        let raw = value
            .as_str()
            .ok_or_else(|| CoordinatorError::Rpc("eth_call returned no data".into()))?;
        abi::decode_bounty(&abi::from_hex(raw)?)
    }

    fn escrow_address(&self) -> &str {
        &self.escrow_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_shape_deserializes() {
        let receipt: RpcReceipt = serde_json::from_value(json!({
            "status": "0x1",
            "blockNumber": "0x10",
            "logs": [{
                "address": "0xEscrow",
                "topics": [abi::TOPIC_WINNER_SELECTED],
                "data": "0x"
            }],
            "gasUsed": "0x5208"
        }))
        .unwrap();
        assert_eq!(receipt.status.as_deref(), Some("0x1"));
        assert_eq!(receipt.block_number.as_deref(), Some("0x10"));
        assert_eq!(receipt.logs.len(), 1);
    }

    #[test]
    fn pending_receipt_has_no_block() {
        let receipt: RpcReceipt =
            serde_json::from_value(json!({ "status": null, "blockNumber": null })).unwrap();
        assert!(receipt.block_number.is_none());
        assert!(receipt.logs.is_empty());
    }

    #[test]
    fn transaction_shape_deserializes() {
        let tx: RpcTransaction = serde_json::from_value(json!({
            "from": "0xAA",
            "to": null,
            "value": "0x0",
            "input": "0x",
            "nonce": "0x1"
        }))
        .unwrap();
        assert!(tx.to.is_none());
        assert_eq!(tx.from, "0xAA");
    }

    #[test]
    fn escrow_address_is_normalized() {
        let ledger = JsonRpcLedger::new(Client::new(), "http://localhost:8545", "0xABCDEF", 0);
        assert_eq!(ledger.escrow_address(), "0xabcdef");
        assert_eq!(ledger.required_confirmations, 1);
    }
}

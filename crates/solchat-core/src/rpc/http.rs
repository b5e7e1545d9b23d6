//! JSON-RPC 2.0 over HTTP.

use std::str::FromStr;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::types::{Blockhash, Pubkey, Signature};

use super::{pubsub, ChainRpc, LogSubscription, SignatureInfo, TransactionRecord, TxStatus};

/// Production [`ChainRpc`] over HTTP + WebSocket endpoints.
pub struct HttpRpc {
    client: reqwest::Client,
    url: String,
    ws_url: String,
}

impl HttpRpc {
    /// Build a gateway for `rpc_url`. The WebSocket endpoint defaults to
    /// `rpc_url` with its scheme rewritten (`https→wss`, `http→ws`).
    pub fn new(rpc_url: &str, ws_url: Option<String>) -> ChatResult<Self> {
        let ws_url = match ws_url {
            Some(url) => url,
            None => derive_ws_url(rpc_url)?,
        };
        Ok(Self {
            client: reqwest::Client::new(),
            url: rpc_url.to_string(),
            ws_url,
        })
    }

    async fn call(&self, method: &str, params: Value) -> ChatResult<Value> {
        debug!(method, "rpc request");
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Rpc(format!("{}: {}", method, e)))?;

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Rpc(format!("{}: invalid response body: {}", method, e)))?;

        if let Some(err) = envelope.get("error") {
            return Err(ChatError::Rpc(format!("{}: {}", method, err)));
        }

        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| ChatError::Rpc(format!("{}: response carries no result", method)))
    }
}

/// Rewrite an HTTP RPC endpoint into its WebSocket counterpart.
pub fn derive_ws_url(rpc_url: &str) -> ChatResult<String> {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else {
        Err(ChatError::Config(format!(
            "rpc_url must start with http:// or https://, got '{}'",
            rpc_url
        )))
    }
}

fn parse_str_field<T: FromStr<Err = ChatError>>(value: &Value, context: &str) -> ChatResult<T> {
    value
        .as_str()
        .ok_or_else(|| ChatError::Rpc(format!("{}: expected string", context)))?
        .parse()
}

#[async_trait]
impl ChainRpc for HttpRpc {
    async fn latest_blockhash(&self) -> ChatResult<Blockhash> {
        let result = self
            .call("getLatestBlockhash", json!([{"commitment": "confirmed"}]))
            .await?;
        parse_str_field(&result["value"]["blockhash"], "getLatestBlockhash")
    }

    async fn send_transaction(&self, tx_bytes: &[u8]) -> ChatResult<Signature> {
        let encoded = BASE64.encode(tx_bytes);
        let result = self
            .call(
                "sendTransaction",
                json!([encoded, {"encoding": "base64"}]),
            )
            .await?;
        parse_str_field(&result, "sendTransaction")
    }

    async fn signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> ChatResult<Vec<Option<TxStatus>>> {
        let sigs: Vec<String> = signatures.iter().map(|s| s.to_string()).collect();
        let result = self
            .call(
                "getSignatureStatuses",
                json!([sigs, {"searchTransactionHistory": true}]),
            )
            .await?;

        let values = result["value"]
            .as_array()
            .ok_or_else(|| ChatError::Rpc("getSignatureStatuses: missing value".to_string()))?;

        Ok(values
            .iter()
            .map(|entry| {
                if entry.is_null() {
                    None
                } else {
                    Some(TxStatus {
                        confirmation_status: entry["confirmationStatus"]
                            .as_str()
                            .map(str::to_string),
                        err: !entry["err"].is_null(),
                    })
                }
            })
            .collect())
    }

    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<&Signature>,
        limit: usize,
    ) -> ChatResult<Vec<SignatureInfo>> {
        let mut options = json!({"limit": limit, "commitment": "confirmed"});
        if let Some(before) = before {
            options["before"] = json!(before.to_string());
        }
        let result = self
            .call(
                "getSignaturesForAddress",
                json!([address.to_string(), options]),
            )
            .await?;

        let entries = result
            .as_array()
            .ok_or_else(|| ChatError::Rpc("getSignaturesForAddress: expected array".to_string()))?;

        entries
            .iter()
            .map(|entry| {
                Ok(SignatureInfo {
                    signature: parse_str_field(&entry["signature"], "getSignaturesForAddress")?,
                    block_time: entry["blockTime"].as_i64(),
                    err: !entry["err"].is_null(),
                })
            })
            .collect()
    }

    async fn transaction(&self, signature: &Signature) -> ChatResult<Option<TransactionRecord>> {
        let result = self
            .call(
                "getTransaction",
                json!([signature.to_string(), {
                    "encoding": "json",
                    "commitment": "confirmed",
                    "maxSupportedTransactionVersion": 0,
                }]),
            )
            .await?;

        if result.is_null() {
            return Ok(None);
        }

        let logs = result["meta"]["logMessages"]
            .as_array()
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(|l| l.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(TransactionRecord {
            logs,
            block_time: result["blockTime"].as_i64(),
        }))
    }

    async fn account_data(&self, address: &Pubkey) -> ChatResult<Option<Vec<u8>>> {
        let result = self
            .call(
                "getAccountInfo",
                json!([address.to_string(), {
                    "encoding": "base64",
                    "commitment": "confirmed",
                }]),
            )
            .await?;

        let value = &result["value"];
        if value.is_null() {
            return Ok(None);
        }

        let encoded = value["data"][0]
            .as_str()
            .ok_or_else(|| ChatError::Rpc("getAccountInfo: missing data".to_string()))?;
        let data = BASE64
            .decode(encoded)
            .map_err(|e| ChatError::Rpc(format!("getAccountInfo: invalid base64: {}", e)))?;
        Ok(Some(data))
    }

    async fn subscribe_logs(&self, mentions: &Pubkey) -> ChatResult<LogSubscription> {
        pubsub::subscribe(&self.ws_url, mentions).await
    }
}

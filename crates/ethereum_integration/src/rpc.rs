//! JSON-RPC 2.0 transport over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("node rejected {method}: {message} (code {code})")]
    Node {
        method: String,
        code: i64,
        message: String,
    },
    #[error("malformed response for {method}: missing result")]
    MissingResult { method: String },
    #[error("invalid endpoint url: {0}")]
    Endpoint(#[from] url::ParseError),
}

pub struct JsonRpcClient {
    http: Client,
    endpoint: Url,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(endpoint: &str) -> Result<Self, RpcError> {
        Ok(Self {
            http: Client::new(),
            endpoint: Url::parse(endpoint)?,
            next_id: AtomicU64::new(1),
        })
    }

    /// Issues one request and unwraps the JSON-RPC envelope. A `null` result
    /// is passed through as-is (e.g. a pending transaction has no receipt
    /// yet); only an absent `result` field is an error.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let envelope: Value = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(RpcError::Node {
                method: method.to_string(),
                code,
                message,
            });
        }

        match envelope.get("result") {
            Some(result) => Ok(result.clone()),
            None => Err(RpcError::MissingResult {
                method: method.to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;

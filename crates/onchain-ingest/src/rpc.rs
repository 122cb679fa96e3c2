//! JSON-RPC client for a Bitcoin-Core-compatible node.
//!
//! Implements [`ChainSource`] over `getblockhash`, `getblock <hash> 2` and
//! `getblockcount`. Each call is retried per the client's [`RetryPolicy`].

use std::time::Duration;

use async_trait::async_trait;
use onchain_core::constants::FULL_BLOCK_VERBOSITY;
use onchain_core::error::SourceError;
use onchain_core::raw::RawBlock;
use onchain_core::traits::ChainSource;
use onchain_core::types::BlockHash;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::trace;

use crate::config::{RpcConfig, RpcCredentials};
use crate::error::ConfigError;
use crate::retry::{RetryPolicy, with_retry};

const REQUEST_ID: &str = "onchain-ingest";

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Only the error half of a response; the result is decoded separately so
/// block payloads are parsed straight from the response text.
#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct ResultEnvelope<T> {
    result: Option<T>,
}

pub struct RpcClient {
    client: Client,
    url: String,
    credentials: Option<RpcCredentials>,
    retry: RetryPolicy,
}

impl RpcClient {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        credentials: Option<RpcCredentials>,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self { client, url: url.into(), credentials, retry })
    }

    /// Client for `config`, with the default backoff schedule and the
    /// configured attempt budget.
    pub fn from_config(
        config: &RpcConfig,
        credentials: Option<RpcCredentials>,
    ) -> Result<Self, ConfigError> {
        let retry = RetryPolicy { max_attempts: config.max_attempts, ..RetryPolicy::default() };
        Self::new(&config.url, Duration::from_secs(config.timeout_secs), credentials, retry)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One HTTP round trip. Returns the response text when it carries no
    /// RPC error and the HTTP status is a success.
    async fn call_once(&self, method: &str, params: &Value) -> Result<String, SourceError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": REQUEST_ID,
            "method": method,
            "params": params,
        });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.user, Some(&creds.password));
        }

        let transport = |e: reqwest::Error| SourceError::Transport {
            method: method.to_owned(),
            message: e.to_string(),
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;

        // The node answers RPC errors with HTTP 500 and a JSON body; the body
        // decides the classification.
        match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(ErrorEnvelope { error: Some(err) }) => Err(SourceError::Rpc {
                method: method.to_owned(),
                code: err.code,
                message: err.message,
            }),
            _ if !status.is_success() => Err(SourceError::Transport {
                method: method.to_owned(),
                message: format!("HTTP {status}"),
            }),
            Ok(_) => Ok(text),
            Err(e) => Err(SourceError::Malformed { method: method.to_owned(), message: e.to_string() }),
        }
    }

    /// Call `method` with retries and decode its `result`.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SourceError> {
        trace!(method, %params, "rpc call");
        let text = with_retry(&self.retry, method, || self.call_once(method, &params)).await?;
        let malformed = |message: String| SourceError::Malformed { method: method.to_owned(), message };
        serde_json::from_str::<ResultEnvelope<T>>(&text)
            .map_err(|e| malformed(e.to_string()))?
            .result
            .ok_or_else(|| malformed("null result".to_owned()))
    }
}

#[async_trait]
impl ChainSource for RpcClient {
    async fn hash_at(&self, height: u64) -> Result<BlockHash, SourceError> {
        self.call::<String>("getblockhash", json!([height])).await.map(BlockHash::from)
    }

    async fn block_at(&self, hash: &BlockHash) -> Result<RawBlock, SourceError> {
        self.call("getblock", json!([hash.as_str(), FULL_BLOCK_VERBOSITY])).await
    }

    async fn tip_height(&self) -> Result<u64, SourceError> {
        self.call("getblockcount", json!([])).await
    }
}

//! Anthropic Messages API transport: `x-api-key`/`anthropic-version`
//! headers against `/v1/messages`. Request building and response parsing
//! live in `relaygate_adapters::anthropic`; this client only moves bytes.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use relaygate_core::schema::ClientFormat;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::client::{ProviderClient, ProviderError, ProviderResult};
use crate::streaming::spawn_json_decode;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    models: Vec<String>,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            models: vec![],
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    async fn post(&self, body: &Value) -> ProviderResult<reqwest::Response> {
        self.http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Connection(e.to_string())
                }
            })
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    // Anthropic speaks exactly one wire format, so `wire` is not consulted:
    // `select_path`/the adapter layer only ever hand this client
    // messages-shaped bodies.
    async fn send(&self, body: Value, _wire: ClientFormat) -> ProviderResult<Value> {
        let resp = self.post(&body).await?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        if status >= 400 {
            return Err(ProviderError::Http { status, body: text });
        }

        serde_json::from_str(&text)
            .map_err(|e| ProviderError::StreamBroken(format!("invalid JSON body: {e}")))
    }

    async fn stream(
        &self,
        body: Value,
        wire: ClientFormat,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<Value>>> {
        Ok(spawn_json_decode(self.stream_bytes(body, wire).await?))
    }

    async fn stream_bytes(
        &self,
        mut body: Value,
        _wire: ClientFormat,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<Bytes>>> {
        body["stream"] = Value::Bool(true);

        let resp = self.post(&body).await?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status, body: text });
        }

        // Capacity 1: a stalled consumer pauses the upstream read rather
        // than queueing chunks.
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut byte_stream = resp.bytes_stream();
            while let Some(chunk) = byte_stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        if tx.send(Ok(bytes)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "anthropic stream read error");
                        let _ = tx.send(Err(ProviderError::Connection(e.to_string()))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let resp = self
            .http
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::Http {
                status: resp.status().as_u16(),
                body: String::new(),
            })
        }
    }
}

//! OpenAI-compatible transport, parameterized over base URL and provider
//! name so one client covers OpenAI, xAI (Grok), and OpenRouter — all
//! speak the same wire shapes with a different base URL, auth header, and
//! (OpenRouter only) a couple of extra attribution headers.
//!
//! These vendors expose more than one endpoint side by side
//! (`/chat/completions`, `/responses` on OpenAI, `/messages` on xAI), so
//! the request's wire format picks the path.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use relaygate_core::schema::ClientFormat;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::client::{ProviderClient, ProviderError, ProviderResult};
use crate::streaming::spawn_json_decode;

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
    models: Vec<String>,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiCompatibleClient {
    pub fn new(provider_name: impl Into<String>, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            provider_name: provider_name.into(),
            models: vec![],
            extra_headers: vec![],
        }
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", api_key, "https://api.openai.com/v1")
    }

    pub fn xai(api_key: impl Into<String>) -> Self {
        Self::new("xai", api_key, "https://api.x.ai/v1")
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", api_key, "https://openrouter.ai/api/v1").with_header(
            "HTTP-Referer",
            "https://github.com/props-nothing/relaygate",
        )
    }

    pub fn ollama(base_url: impl Into<String>) -> Self {
        Self::new("ollama", String::new(), base_url)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((key.into(), value.into()));
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    fn endpoint(&self, wire: ClientFormat) -> String {
        let path = match wire {
            ClientFormat::OpenAiChat => "/chat/completions",
            ClientFormat::OpenAiResponses => "/responses",
            // xAI's Anthropic-compatible endpoint; `select_path` only pairs
            // messages-shaped bodies with providers that accept them.
            ClientFormat::AnthropicMessages => "/messages",
        };
        format!("{}{}", self.base_url, path)
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        for (k, v) in &self.extra_headers {
            req = req.header(k, v);
        }
        req
    }

    async fn post(&self, body: &Value, wire: ClientFormat) -> ProviderResult<reqwest::Response> {
        let req = self.http.post(self.endpoint(wire)).json(body);
        self.apply_headers(req).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Connection(e.to_string())
            }
        })
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn send(&self, body: Value, wire: ClientFormat) -> ProviderResult<Value> {
        let resp = self.post(&body, wire).await?;

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
        wire: ClientFormat,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<Bytes>>> {
        body["stream"] = Value::Bool(true);

        let resp = self.post(&body, wire).await?;

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
                        warn!(error = %e, "openai-compatible stream read error");
                        let _ = tx.send(Err(ProviderError::Connection(e.to_string()))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let req = self.http.get(format!("{}/models", self.base_url));
        let resp = self
            .apply_headers(req)
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

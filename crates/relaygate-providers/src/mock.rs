//! Deterministic test double for `ProviderClient`: queued responses popped
//! in order, every request body recorded for assertions. Operates on raw
//! wire-format `Value` bodies, since a `ProviderClient` never sees the
//! canonical schema.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use relaygate_core::schema::ClientFormat;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::client::{ProviderClient, ProviderError, ProviderResult};

pub struct MockProviderClient {
    name: String,
    responses: Mutex<Vec<ProviderResult<Value>>>,
    /// When set, every call fails with this error regardless of the queue —
    /// for circuit-breaker tests that need repeated failures.
    persistent_error: Option<ProviderError>,
    pub requests: Mutex<Vec<Value>>,
}

impl MockProviderClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(vec![]),
            persistent_error: None,
            requests: Mutex::new(vec![]),
        }
    }

    pub fn with_response(self, body: Value) -> Self {
        self.responses.lock().unwrap().push(Ok(body));
        self
    }

    pub fn with_error(self, err: ProviderError) -> Self {
        self.responses.lock().unwrap().push(Err(err));
        self
    }

    /// Every call returns `err`, forever — useful for circuit-breaker tests
    /// where one queued failure would be followed by default successes.
    pub fn failing_with(mut self, err: ProviderError) -> Self {
        self.persistent_error = Some(err);
        self
    }

    fn next_response(&self) -> ProviderResult<Value> {
        if let Some(err) = &self.persistent_error {
            return Err(err.clone());
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(serde_json::json!({"mock": "no response queued"}))
        } else {
            responses.remove(0)
        }
    }

    pub fn recorded_requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    async fn send(&self, body: Value, _wire: ClientFormat) -> ProviderResult<Value> {
        self.requests.lock().unwrap().push(body);
        self.next_response()
    }

    /// A queued `Value::Array` is delivered as one stream event per
    /// element, so tests can script a whole SSE transcript in a single
    /// queued response.
    async fn stream(
        &self,
        body: Value,
        _wire: ClientFormat,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<Value>>> {
        self.requests.lock().unwrap().push(body);
        let next = self.next_response();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            match next {
                Ok(Value::Array(events)) => {
                    for event in events {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                other => {
                    let _ = tx.send(other).await;
                }
            }
        });
        Ok(rx)
    }

    /// Frames the queued events the way a provider would put them on the
    /// wire, one `data:` line per event.
    async fn stream_bytes(
        &self,
        body: Value,
        wire: ClientFormat,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<Bytes>>> {
        let mut events_rx = self.stream(body, wire).await?;
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(item) = events_rx.recv().await {
                let framed = match item {
                    Ok(Value::String(s)) if s == "[DONE]" => Ok(Bytes::from_static(b"data: [DONE]\n\n")),
                    Ok(event) => Ok(Bytes::from(format!("data: {event}\n\n"))),
                    Err(e) => Err(e),
                };
                if tx.send(framed).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn health_check(&self) -> ProviderResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_responses_pop_in_order() {
        let client = MockProviderClient::new("mock")
            .with_response(serde_json::json!({"n": 1}))
            .with_response(serde_json::json!({"n": 2}));

        let r1 = client.send(serde_json::json!({}), ClientFormat::OpenAiChat).await.unwrap();
        let r2 = client.send(serde_json::json!({}), ClientFormat::OpenAiChat).await.unwrap();
        assert_eq!(r1["n"], 1);
        assert_eq!(r2["n"], 2);
        assert_eq!(client.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn queued_error_is_returned() {
        let client = MockProviderClient::new("mock").with_error(ProviderError::Http {
            status: 429,
            body: "rate limited".into(),
        });
        let result = client.send(serde_json::json!({}), ClientFormat::OpenAiChat).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn persistent_failure_repeats_across_calls() {
        let client = MockProviderClient::new("mock").failing_with(ProviderError::Http {
            status: 400,
            body: "boom".into(),
        });
        for _ in 0..3 {
            assert!(client.send(serde_json::json!({}), ClientFormat::OpenAiChat).await.is_err());
        }
    }

    #[tokio::test]
    async fn queued_array_streams_one_event_per_element() {
        let client = MockProviderClient::new("mock").with_response(serde_json::json!([
            {"type": "message_start"},
            {"type": "message_stop"},
        ]));
        let mut rx = client.stream(serde_json::json!({}), ClientFormat::AnthropicMessages).await.unwrap();
        let first = rx.recv().await.unwrap().unwrap();
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(first["type"], "message_start");
        assert_eq!(second["type"], "message_stop");
        assert!(rx.recv().await.is_none());
    }
}

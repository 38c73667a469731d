//! The chat pipeline — orchestrates format adapters, routing, provider
//! transport, streaming, and usage accounting for one inbound request:
//! decode the client body, pick a provider, choose the passthrough or
//! adapter path via `select_path`, dispatch, render the reply in the
//! client's dialect, and record what the call cost.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relaygate_adapters::anthropic::AnthropicAdapter;
use relaygate_adapters::openai_chat::OpenAiChatAdapter;
use relaygate_adapters::openai_responses::OpenAiResponsesAdapter;
use relaygate_adapters::{select_path, FormatAdapter, Path as RoutePath, StreamProcessor};
use relaygate_core::schema::ClientFormat;
use relaygate_core::stream::StreamEventKind;
use relaygate_core::{CanonicalResponse, GatewayError};
use relaygate_providers::passthrough::{PassthroughSniffer, UsageAccumulator};
use relaygate_providers::streaming::ClientStreamRenderer;
use relaygate_providers::{ModelRouter, PricingCatalog};
use relaygate_store::{BudgetStore, UsageStore};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// `CANONICAL_MODE=1` forces every request onto the adapter path, even
/// native client/provider pairs that would otherwise take the passthrough
/// fast path, so the two outputs can be diffed in development.
fn canonical_mode_enabled() -> bool {
    std::env::var("CANONICAL_MODE").map(|v| v == "1").unwrap_or(false)
}

/// The handful of components every pipeline run needs: the router to pick
/// a provider, the pricing catalog to cost the usage it reports, and the
/// usage/budget stores to record the result. Held by `AppState` and passed
/// through by reference — the pipeline itself is stateless.
pub struct PipelineContext {
    pub router: ModelRouter,
    pub pricing: PricingCatalog,
    pub usage: UsageStore,
    pub budget: BudgetStore,
}

#[derive(Debug)]
pub struct PipelineResult {
    pub body: Value,
    pub status: u16,
}

/// Non-streaming request: decode in `client_format`, route, dispatch, cost,
/// record, re-encode in `client_format`.
pub async fn run_non_streaming(
    ctx: &PipelineContext,
    client_format: ClientFormat,
    client_body: &Value,
    client_hint: Option<&str>,
) -> Result<PipelineResult, GatewayError> {
    let request_id = format!("req_{}", Uuid::new_v4().simple());
    let span = info_span!("chat_request", request_id = %request_id, client_format = client_format.as_str());

    async {
        let canonical_req = client_to_canonical(client_format, client_body)?;
        let provider = ctx.router.resolve(&canonical_req, client_hint, &ctx.pricing)?;
        let provider_name = provider.name().to_string();
        let path = select_path(client_format, &provider_name, canonical_mode_enabled());
        let model = canonical_req.bare_model().to_string();

        let (client_response, usage) = match path {
            RoutePath::Passthrough => {
                let wire_body = native_wire_body(client_body, &model);
                let raw = ctx
                    .router
                    .send(&provider, wire_body, client_format)
                    .await
                    .map_err(GatewayError::from)?;
                let usage = extract_usage_passthrough(client_format, &raw);
                (raw, usage)
            }
            RoutePath::Adapter => {
                let wire = provider_wire_format(&provider_name, client_format);
                let provider_adapter = adapter_for(wire);
                let provider_body = canonical_to_provider(&provider_adapter, &canonical_req);
                let raw = ctx
                    .router
                    .send(&provider, provider_body, wire)
                    .await
                    .map_err(GatewayError::from)?;
                let canonical_resp = provider_to_canonical(&provider_adapter, &raw)?;
                let usage = Some(canonical_resp.usage);
                let client_resp = canonical_to_client(client_format, &canonical_resp);
                if canonical_mode_enabled()
                    && select_path(client_format, &provider_name, false) == RoutePath::Passthrough
                {
                    log_canonical_diff(&raw, &client_resp);
                }
                (client_resp, usage)
            }
        };

        if let Some(usage) = usage {
            record_usage(ctx, &request_id, &provider_name, &model, usage);
        }

        Ok(PipelineResult { body: client_response, status: 200 })
    }
    .instrument(span)
    .await
}

/// How a streaming request begins. `Failed` means nothing has been sent —
/// the caller still owes the client a structured error body. The other two
/// arms carry a channel that is already being pumped by a background task
/// which owns usage recording for the request.
pub enum StreamStart {
    /// Passthrough: raw upstream bytes, forwarded as received.
    Passthrough { rx: mpsc::Receiver<Bytes> },
    /// Adapter: client-format SSE payloads, one JSON value per event, with
    /// OpenAI's literal `[DONE]` sentinel as `Value::String` when the
    /// client format expects it.
    Adapter { rx: mpsc::Receiver<Value> },
    Failed(GatewayError),
}

/// Streaming request: decode, route, dispatch, and hand back a channel the
/// HTTP layer drains into the response body. The upstream connection is
/// established before this returns, so every `Failed` is a pre-header
/// error; anything later is a mid-stream failure handled by closing the
/// stream without a JSON body. `deadline` bounds the whole pump.
pub async fn start_streaming(
    ctx: Arc<PipelineContext>,
    client_format: ClientFormat,
    client_body: Value,
    client_hint: Option<String>,
    deadline: Duration,
) -> StreamStart {
    let request_id = format!("req_{}", Uuid::new_v4().simple());
    let span = info_span!("chat_stream", request_id = %request_id, client_format = client_format.as_str());

    let setup = async {
        let canonical_req = client_to_canonical(client_format, &client_body)?;
        let provider = ctx.router.resolve(&canonical_req, client_hint.as_deref(), &ctx.pricing)?;
        let provider_name = provider.name().to_string();
        let path = select_path(client_format, &provider_name, canonical_mode_enabled());
        let model = canonical_req.bare_model().to_string();
        Ok::<_, GatewayError>((canonical_req, provider, provider_name, path, model))
    };
    let (canonical_req, provider, provider_name, path, model) =
        match setup.instrument(span.clone()).await {
            Ok(parts) => parts,
            Err(e) => return StreamStart::Failed(e),
        };

    match path {
        RoutePath::Passthrough => {
            let wire_body = native_wire_body(&client_body, &model);
            let upstream = match ctx.router.stream_bytes(&provider, wire_body, client_format).await {
                Ok(rx) => rx,
                Err(e) => return StreamStart::Failed(e.into()),
            };

            // Capacity 1 end to end: a stalled client pauses the upstream
            // read instead of queueing chunks.
            let (tx, rx) = mpsc::channel::<Bytes>(1);
            let sniffer = PassthroughSniffer::new(stream_processor_for(client_format));
            tokio::spawn(
                pump_passthrough(ctx, upstream, tx, sniffer, request_id, provider_name, model, deadline)
                    .instrument(span),
            );
            StreamStart::Passthrough { rx }
        }
        RoutePath::Adapter => {
            let wire = provider_wire_format(&provider_name, client_format);
            let provider_body = canonical_to_provider(&adapter_for(wire), &canonical_req);
            let upstream = match ctx.router.stream(&provider, provider_body, wire).await {
                Ok(rx) => rx,
                Err(e) => return StreamStart::Failed(e.into()),
            };

            let (tx, rx) = mpsc::channel::<Value>(16);
            let processor = stream_processor_for(wire);
            let renderer = ClientStreamRenderer::new(
                client_format,
                format!("resp_{}", Uuid::new_v4().simple()),
                model.clone(),
            );
            tokio::spawn(
                pump_adapter(
                    ctx, upstream, tx, processor, renderer, client_format, request_id, provider_name,
                    model, deadline,
                )
                .instrument(span),
            );
            StreamStart::Adapter { rx }
        }
    }
}

/// Forward raw upstream bytes to the client while the sniffer watches the
/// same sequence. Analyzer work happens strictly after each chunk's write
/// enqueue, and the forwarded stream is never blocked or modified on the
/// sniffer's account.
#[allow(clippy::too_many_arguments)]
async fn pump_passthrough(
    ctx: Arc<PipelineContext>,
    mut upstream: mpsc::Receiver<relaygate_providers::client::ProviderResult<Bytes>>,
    tx: mpsc::Sender<Bytes>,
    mut sniffer: PassthroughSniffer,
    request_id: String,
    provider_name: String,
    model: String,
    deadline: Duration,
) {
    let pump = async {
        while let Some(item) = upstream.recv().await {
            match item {
                Ok(chunk) => {
                    if tx.send(chunk.clone()).await.is_err() {
                        // Client went away: stop reading upstream. Any usage
                        // already observed still gets recorded below.
                        break;
                    }
                    sniffer.feed(&chunk);
                }
                Err(e) => {
                    // Headers are long gone — close the stream, no JSON body.
                    warn!(error = %e, "upstream broke mid-stream");
                    break;
                }
            }
        }
    };
    if tokio::time::timeout(deadline, pump).await.is_err() {
        warn!(timeout_secs = deadline.as_secs(), "streaming deadline exceeded — closing socket");
    }

    if let Some(usage) = sniffer.finish() {
        record_usage(&ctx, &request_id, &provider_name, &model, usage);
    }
}

/// Fold provider events through the stream processor, render each
/// canonical event in the client's wire format, and tap usage-bearing
/// events for the ledger on the way past.
#[allow(clippy::too_many_arguments)]
async fn pump_adapter(
    ctx: Arc<PipelineContext>,
    mut upstream: mpsc::Receiver<relaygate_providers::client::ProviderResult<Value>>,
    tx: mpsc::Sender<Value>,
    mut processor: Box<dyn StreamProcessor>,
    mut renderer: ClientStreamRenderer,
    client_format: ClientFormat,
    request_id: String,
    provider_name: String,
    model: String,
    deadline: Duration,
) {
    let mut usage_acc = UsageAccumulator::default();

    let pump = async {
        while let Some(item) = upstream.recv().await {
            let raw = match item {
                Ok(v) => v,
                Err(e) => {
                    // Mid-stream upstream failure: close without a JSON body.
                    warn!(error = %e, "upstream broke mid-stream");
                    return;
                }
            };

            // The chat-completions `[DONE]` sentinel drives the processor's
            // final flush; other formats' processors ignore it.
            let done = raw.as_str() == Some("[DONE]");
            let canonical_events = match processor.process(&raw) {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "stream translation failed for an event");
                    continue;
                }
            };
            for event in &canonical_events {
                match &event.kind {
                    StreamEventKind::Usage { usage } => usage_acc.observe(*usage),
                    StreamEventKind::MessageDelta { usage, .. } => usage_acc.observe(*usage),
                    _ => {}
                }
                for payload in renderer.render(event) {
                    if tx.send(payload).await.is_err() {
                        return;
                    }
                }
            }
            if done {
                break;
            }
        }

        // The terminating `[DONE]` frame is an OpenAI chat convention; the
        // other client formats end with their own terminal events.
        if client_format == ClientFormat::OpenAiChat {
            let _ = tx.send(Value::String("[DONE]".to_string())).await;
        }
    };
    if tokio::time::timeout(deadline, pump).await.is_err() {
        warn!(timeout_secs = deadline.as_secs(), "streaming deadline exceeded — closing socket");
    }

    if let Some(usage) = usage_acc.finish() {
        record_usage(&ctx, &request_id, &provider_name, &model, usage);
    }
}

fn record_usage(ctx: &PipelineContext, request_id: &str, provider: &str, model: &str, usage: relaygate_core::schema::Usage) {
    let cost = ctx.pricing.compute_cost(provider, model, &usage);

    // Advisory budget check: never blocks the request, only emits a
    // structured warning when a hard (non-alert-only) limit is crossed.
    match ctx.budget.status(&ctx.usage) {
        Ok(status) => {
            if !status.settings.alert_only
                && ctx.budget.would_cross_limit(&status.settings, status.spent_month_to_date, cost.total_cost)
            {
                warn!(
                    target: "relaygate::budget",
                    limit_usd = status.settings.amount_usd,
                    spent_month_to_date = status.spent_month_to_date,
                    request_cost = cost.total_cost,
                    provider,
                    model,
                    "monthly budget limit crossed"
                );
            }
        }
        Err(e) => warn!(error = %e, "budget status unavailable during accounting"),
    }

    let tokens = relaygate_store::TokenCounts {
        input_tokens: usage.input_tokens as i64,
        cache_write_input_tokens: usage.cache_write_tokens as i64,
        cache_read_input_tokens: usage.cached_tokens as i64,
        output_tokens: usage.output_tokens as i64,
    };
    let cost_amounts = relaygate_store::CostAmounts {
        input_cost: cost.input_cost,
        cache_write_cost: cost.cache_write_cost,
        cache_read_cost: cost.cache_read_cost,
        output_cost: cost.output_cost,
        total_cost: cost.total_cost,
        currency: cost.currency,
    };
    if let Err(e) = ctx.usage.record(request_id, provider, model, chrono::Utc::now(), tokens, cost_amounts) {
        warn!(error = %e, request_id, "failed to record usage");
    }
}

fn client_to_canonical(format: ClientFormat, body: &Value) -> Result<relaygate_core::CanonicalRequest, GatewayError> {
    let result = match format {
        ClientFormat::OpenAiChat => OpenAiChatAdapter.client_to_canonical(body),
        ClientFormat::OpenAiResponses => OpenAiResponsesAdapter.client_to_canonical(body),
        ClientFormat::AnthropicMessages => AnthropicAdapter.client_to_canonical(body),
    };
    let req = result.map_err(GatewayError::from)?;
    // Checked, not enforced: a version drift is a logging matter, never a
    // reason to reject a request the adapter could still translate.
    if req.schema_version != relaygate_core::CANONICAL_SCHEMA_VERSION {
        warn!(version = %req.schema_version, "canonical schema version mismatch");
    }
    Ok(req)
}

/// The wire format a provider natively accepts on the adapter path. xAI,
/// OpenRouter, and Ollama speak OpenAI-chat-shaped JSON; OpenAI keeps the
/// responses dialect when the client already speaks it (same endpoint
/// family, no information lost in between).
fn provider_wire_format(provider_name: &str, client_format: ClientFormat) -> ClientFormat {
    match provider_name {
        "anthropic" => ClientFormat::AnthropicMessages,
        "openai" if client_format == ClientFormat::OpenAiResponses => ClientFormat::OpenAiResponses,
        _ => ClientFormat::OpenAiChat,
    }
}

/// Closed adapter enum rather than `Box<dyn FormatAdapter>`: the trait
/// carries an associated stream type and isn't object-safe.
enum AnyAdapter {
    OpenAiChat(OpenAiChatAdapter),
    OpenAiResponses(OpenAiResponsesAdapter),
    Anthropic(AnthropicAdapter),
}

fn adapter_for(wire: ClientFormat) -> AnyAdapter {
    match wire {
        ClientFormat::OpenAiChat => AnyAdapter::OpenAiChat(OpenAiChatAdapter),
        ClientFormat::OpenAiResponses => AnyAdapter::OpenAiResponses(OpenAiResponsesAdapter),
        ClientFormat::AnthropicMessages => AnyAdapter::Anthropic(AnthropicAdapter),
    }
}

fn canonical_to_provider(adapter: &AnyAdapter, req: &relaygate_core::CanonicalRequest) -> Value {
    match adapter {
        AnyAdapter::OpenAiChat(a) => a.canonical_to_provider(req),
        AnyAdapter::OpenAiResponses(a) => a.canonical_to_provider(req),
        AnyAdapter::Anthropic(a) => a.canonical_to_provider(req),
    }
}

fn provider_to_canonical(adapter: &AnyAdapter, raw: &Value) -> Result<CanonicalResponse, GatewayError> {
    let result = match adapter {
        AnyAdapter::OpenAiChat(a) => a.provider_to_canonical(raw),
        AnyAdapter::OpenAiResponses(a) => a.provider_to_canonical(raw),
        AnyAdapter::Anthropic(a) => a.provider_to_canonical(raw),
    };
    result.map_err(Into::into)
}

fn canonical_to_client(format: ClientFormat, resp: &CanonicalResponse) -> Value {
    match format {
        ClientFormat::OpenAiChat => OpenAiChatAdapter.canonical_to_client(resp),
        ClientFormat::OpenAiResponses => OpenAiResponsesAdapter.canonical_to_client(resp),
        ClientFormat::AnthropicMessages => AnthropicAdapter.canonical_to_client(resp),
    }
}

/// A fresh per-request stream processor for the named wire format — the
/// provider's native format on the adapter path, the (identical) client
/// format on the passthrough path.
fn stream_processor_for(wire: ClientFormat) -> Box<dyn StreamProcessor> {
    match wire {
        ClientFormat::OpenAiChat => Box::new(OpenAiChatAdapter.new_stream_processor()),
        ClientFormat::OpenAiResponses => Box::new(OpenAiResponsesAdapter.new_stream_processor()),
        ClientFormat::AnthropicMessages => Box::new(AnthropicAdapter.new_stream_processor()),
    }
}

/// Passthrough path: the client body is already in the provider's native
/// wire format (that's what made it eligible for passthrough), modulo the
/// provider-qualified model prefix, which must be stripped before
/// forwarding.
fn native_wire_body(body: &Value, bare_model: &str) -> Value {
    let mut body = body.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("model".to_string(), Value::String(bare_model.to_string()));
    }
    body
}

/// Passthrough usage extraction for the non-streaming path: the full
/// response JSON carries a `usage` field directly (no SSE folding needed).
fn extract_usage_passthrough(format: ClientFormat, raw: &Value) -> Option<relaygate_core::schema::Usage> {
    match format {
        ClientFormat::AnthropicMessages => {
            let usage = raw.get("usage")?;
            Some(relaygate_core::schema::Usage {
                input_tokens: usage.get("input_tokens")?.as_u64().unwrap_or(0),
                output_tokens: usage.get("output_tokens")?.as_u64().unwrap_or(0),
                cached_tokens: usage.get("cache_read_input_tokens").and_then(Value::as_u64).unwrap_or(0),
                cache_write_tokens: usage.get("cache_creation_input_tokens").and_then(Value::as_u64).unwrap_or(0),
                ..Default::default()
            })
        }
        ClientFormat::OpenAiResponses => {
            let usage = raw.get("usage")?;
            let raw_input = usage.get("input_tokens")?.as_u64().unwrap_or(0);
            let cached = usage["input_tokens_details"]["cached_tokens"].as_u64().unwrap_or(0);
            Some(relaygate_core::schema::Usage {
                input_tokens: raw_input.saturating_sub(cached),
                output_tokens: usage.get("output_tokens")?.as_u64().unwrap_or(0),
                cached_tokens: cached,
                prompt_tokens: Some(raw_input),
                ..Default::default()
            })
        }
        ClientFormat::OpenAiChat => None,
    }
}

/// `CANONICAL_MODE` debug comparison: the adapter-path rendering vs. what
/// passthrough would have forwarded verbatim. Logged, never surfaced.
fn log_canonical_diff(passthrough_output: &Value, adapter_output: &Value) {
    let (Some(a), Some(b)) = (passthrough_output.as_object(), adapter_output.as_object()) else {
        debug!("canonical-mode diff: non-object output, skipping field comparison");
        return;
    };
    let mut differing: Vec<&str> = Vec::new();
    for (key, value) in a {
        if b.get(key) != Some(value) {
            differing.push(key);
        }
    }
    for key in b.keys() {
        if !a.contains_key(key) {
            differing.push(key);
        }
    }
    if differing.is_empty() {
        debug!("canonical-mode diff: adapter output matches passthrough");
    } else {
        debug!(fields = ?differing, "canonical-mode diff: adapter output differs from passthrough");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_providers::mock::MockProviderClient;
    use relaygate_providers::{PricingEntry, ProviderClient};
    use serde_json::json;

    fn flat_entry() -> PricingEntry {
        PricingEntry {
            input: 1.0,
            output: 2.0,
            cache_write: None,
            cache_read: None,
            currency: "USD".into(),
        }
    }

    fn context_with_provider(client: MockProviderClient) -> Arc<PipelineContext> {
        let name = client.name().to_string();
        let mut router = ModelRouter::new();
        router.add_provider(Arc::new(client));
        let pricing = PricingCatalog::new();
        pricing.insert(&name, "gpt-4o", flat_entry());
        pricing.insert(&name, "claude-sonnet-4", flat_entry());
        Arc::new(PipelineContext {
            router,
            pricing,
            usage: UsageStore::open_in_memory().unwrap(),
            budget: BudgetStore::open_in_memory().unwrap(),
        })
    }

    #[tokio::test]
    async fn openai_chat_non_streaming_records_usage() {
        let ctx = context_with_provider(MockProviderClient::new("openai").with_response(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "created": 1,
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
        })));
        let body = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let result = run_non_streaming(&ctx, ClientFormat::OpenAiChat, &body, None).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.body["choices"][0]["message"]["content"], "hi");

        let summary = ctx
            .usage
            .query(chrono::Utc::now() - chrono::Duration::days(1), chrono::Utc::now() + chrono::Duration::days(1), None)
            .unwrap();
        assert_eq!(summary.total_requests, 1);
        assert_eq!(summary.total_tokens, 15);
    }

    #[tokio::test]
    async fn no_configured_providers_yields_no_providers_configured_error() {
        let ctx = PipelineContext {
            router: ModelRouter::new(),
            pricing: PricingCatalog::new(),
            usage: UsageStore::open_in_memory().unwrap(),
            budget: BudgetStore::open_in_memory().unwrap(),
        };
        let body = json!({"model": "gpt-4o", "messages": []});
        let err = run_non_streaming(&ctx, ClientFormat::OpenAiChat, &body, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoProvidersConfigured));
    }

    #[tokio::test]
    async fn anthropic_passthrough_stream_records_sniffed_usage() {
        let ctx = context_with_provider(MockProviderClient::new("anthropic").with_response(json!([
            {"type": "message_start", "message": {"id": "msg_1", "model": "claude-sonnet-4",
             "usage": {"input_tokens": 100, "cache_read_input_tokens": 20}}},
            {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "hi"}},
            {"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 42}},
            {"type": "message_stop"},
        ])));
        let body = json!({
            "model": "claude-sonnet-4",
            "max_tokens": 100,
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
        });

        let start = start_streaming(ctx.clone(), ClientFormat::AnthropicMessages, body, None, Duration::from_secs(5)).await;
        let StreamStart::Passthrough { mut rx } = start else {
            panic!("anthropic client + anthropic provider should take the passthrough path");
        };

        let mut forwarded = Vec::new();
        while let Some(chunk) = rx.recv().await {
            forwarded.extend_from_slice(&chunk);
        }
        let text = String::from_utf8(forwarded).unwrap();
        assert!(text.contains("message_start"), "raw bytes forwarded as received: {text}");

        let summary = ctx
            .usage
            .query(chrono::Utc::now() - chrono::Duration::days(1), chrono::Utc::now() + chrono::Duration::days(1), None)
            .unwrap();
        assert_eq!(summary.total_requests, 1, "exactly one usage record for the stream");
        let record = &summary.records[0];
        assert_eq!(record.tokens.input_tokens, 100);
        assert_eq!(record.tokens.cache_read_input_tokens, 20);
        assert_eq!(record.tokens.output_tokens, 42);
    }

    #[tokio::test]
    async fn openai_chat_adapter_stream_ends_with_done_sentinel() {
        let ctx = context_with_provider(MockProviderClient::new("openai").with_response(json!([
            {"id": "chatcmpl-1", "model": "gpt-4o",
             "choices": [{"delta": {"content": "hel"}}]},
            {"choices": [{"delta": {"content": "lo"}, "finish_reason": "stop"}],
             "usage": {"prompt_tokens": 7, "completion_tokens": 2}},
            "[DONE]",
        ])));
        let body = json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
        });

        let start = start_streaming(ctx.clone(), ClientFormat::OpenAiChat, body, None, Duration::from_secs(5)).await;
        let StreamStart::Adapter { mut rx } = start else {
            panic!("openai chat clients always take the adapter path");
        };

        let mut payloads = Vec::new();
        while let Some(p) = rx.recv().await {
            payloads.push(p);
        }
        assert_eq!(payloads.last().unwrap(), &Value::String("[DONE]".into()));
        let text: String = payloads
            .iter()
            .filter_map(|p| p["choices"][0]["delta"]["content"].as_str())
            .collect();
        assert_eq!(text, "hello");

        let summary = ctx
            .usage
            .query(chrono::Utc::now() - chrono::Duration::days(1), chrono::Utc::now() + chrono::Duration::days(1), None)
            .unwrap();
        let record = summary.records.first().expect("usage recorded from stream");
        assert_eq!(record.tokens.input_tokens, 7);
        assert_eq!(record.tokens.output_tokens, 2);
    }

    #[test]
    fn provider_wire_format_matches_select_path_pairs() {
        assert_eq!(provider_wire_format("anthropic", ClientFormat::OpenAiChat), ClientFormat::AnthropicMessages);
        assert_eq!(provider_wire_format("openai", ClientFormat::OpenAiResponses), ClientFormat::OpenAiResponses);
        assert_eq!(provider_wire_format("openai", ClientFormat::OpenAiChat), ClientFormat::OpenAiChat);
        assert_eq!(provider_wire_format("xai", ClientFormat::OpenAiChat), ClientFormat::OpenAiChat);
        assert_eq!(provider_wire_format("ollama", ClientFormat::AnthropicMessages), ClientFormat::OpenAiChat);
    }
}

//! # relaygate-server
//!
//! Axum HTTP surface for the gateway: one router wiring the three chat
//! entry points (OpenAI chat completions, OpenAI responses, Anthropic
//! messages), the usage/budget endpoints, and the model catalog, ahead of
//! the chat pipeline in [`pipeline`]. The gateway itself is stateless per
//! request; everything shared lives in [`AppState`].

pub mod pipeline;
pub mod ratelimit;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{sse::Event as SseEvent, IntoResponse, Json, Response, Sse};
use axum::routing::{get, post};
use axum::{Extension, Router};
use futures::stream::Stream;
use relaygate_config::GatewayConfig;
use relaygate_core::schema::ClientFormat;
use relaygate_core::GatewayError;
use relaygate_providers::anthropic::AnthropicClient;
use relaygate_providers::ollama::ollama_client;
use relaygate_providers::openai::OpenAiCompatibleClient;
use relaygate_providers::{ModelRouter, PricingCatalog};
use relaygate_store::{BudgetStore, UsageStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use pipeline::{PipelineContext, StreamStart};
use ratelimit::{rate_limit_middleware, RateLimiter};

/// Shared server state — one `PipelineContext` serves every route, wrapped
/// in an `Arc` so streaming handlers can move a clone into their spawned
/// task without borrowing the request's lifetime.
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub pipeline: Arc<PipelineContext>,
}

/// Build a `ModelRouter` from the config's enabled providers, reading each
/// provider's credential from `std::env` directly — `GatewayConfig` never
/// carries credential fields (see `relaygate_config::schema::ProviderConfig`).
/// Each client advertises the models its pricing descriptor covers.
fn build_router(config: &GatewayConfig, pricing: &PricingCatalog) -> ModelRouter {
    let mut router = ModelRouter::new();
    let enabled = |name: &str| config.providers.get(name).map(|p| p.enabled).unwrap_or(false);

    if enabled("openai") {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            router.add_provider(Arc::new(
                OpenAiCompatibleClient::openai(key).with_models(pricing.models_for("openai")),
            ));
        } else {
            warn!("openai enabled but OPENAI_API_KEY is unset — skipping");
        }
    }
    if enabled("anthropic") {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            router.add_provider(Arc::new(
                AnthropicClient::new(key).with_models(pricing.models_for("anthropic")),
            ));
        } else {
            warn!("anthropic enabled but ANTHROPIC_API_KEY is unset — skipping");
        }
    }
    if enabled("xai") {
        if let Ok(key) = std::env::var("XAI_API_KEY") {
            router.add_provider(Arc::new(
                OpenAiCompatibleClient::xai(key).with_models(pricing.models_for("xai")),
            ));
        } else {
            warn!("xai enabled but XAI_API_KEY is unset — skipping");
        }
    }
    if enabled("openrouter") {
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            router.add_provider(Arc::new(
                OpenAiCompatibleClient::openrouter(key).with_models(pricing.models_for("openrouter")),
            ));
        } else {
            warn!("openrouter enabled but OPENROUTER_API_KEY is unset — skipping");
        }
    }
    if enabled("ollama") {
        let base_url = config.providers.get("ollama").and_then(|p| p.base_url.as_deref());
        router.add_provider(Arc::new(ollama_client(base_url).with_models(pricing.models_for("ollama"))));
    }

    router
}

/// Construct the full application: state, middleware stack, routes. The
/// `UsageStore`/`BudgetStore` open the configured SQLite file. The state is
/// returned alongside the router so `start_server` can hang background
/// work (the OpenRouter pricing refresh) off the same `PipelineContext`.
pub fn build_app(config: GatewayConfig) -> anyhow::Result<(Router, Arc<AppState>)> {
    let pricing = PricingCatalog::new();
    pricing.load_dir(&config.pricing.directory);
    let model_router = build_router(&config, &pricing);
    let usage = UsageStore::open(&config.store.db_path)?;
    let budget = BudgetStore::open(&config.store.db_path)?;

    let state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        pipeline: Arc::new(PipelineContext { router: model_router, pricing, usage, budget }),
    });

    let router = router_from_state(
        state.clone(),
        config.ratelimit.clone(),
        config.server.api_key.clone(),
        config.server.cors,
    );
    Ok((router, state))
}

/// Wire routes and the middleware stack onto an already-constructed
/// `AppState` — split out from `build_app` so integration tests can supply
/// a `PipelineContext` built from a `MockProviderClient` without touching
/// `std::env` or a real SQLite file on disk.
pub fn router_from_state(
    state: Arc<AppState>,
    ratelimit: relaygate_config::RateLimitConfig,
    api_key: Option<String>,
    cors: bool,
) -> Router {
    let limiter = RateLimiter::new(ratelimit);
    // Periodic bucket eviction, when a runtime is already up (it always is
    // under `start_server`; some tests construct the router standalone).
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        let evictor = limiter.clone();
        handle.spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(300)).await;
                evictor.evict_idle();
            }
        });
    }

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/responses", post(responses_handler))
        .route("/v1/messages", post(messages_handler))
        .route("/v1/models", get(models_handler))
        .route("/usage", get(usage_handler))
        .route("/budget", get(budget_get_handler).put(budget_put_handler))
        .route("/config/status", get(config_status_handler))
        .with_state(state)
        .layer(middleware::from_fn(rate_limit_middleware))
        .layer(Extension(limiter));

    if let Some(api_key) = api_key {
        router = router.layer(middleware::from_fn(move |headers: HeaderMap, req: Request<Body>, next: Next| {
            let api_key = api_key.clone();
            async move { auth_middleware(api_key, headers, req, next).await }
        }));
    }

    if cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

async fn auth_middleware(api_key: String, headers: HeaderMap, req: Request<Body>, next: Next) -> Response {
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(api_key.as_str()) {
        next.run(req).await
    } else {
        (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response()
    }
}

pub async fn start_server(config: GatewayConfig) -> anyhow::Result<()> {
    let listen = config.server.listen.clone();
    let (app, state) = build_app(config)?;

    if state.config.pricing.refresh_openrouter {
        let pipeline = state.pipeline.clone();
        let dir = state.config.pricing.directory.clone();
        let interval = Duration::from_secs(state.config.pricing.refresh_interval_hours.max(1) * 3600);
        tokio::spawn(async move {
            loop {
                relaygate_providers::pricing::refresh_openrouter(&pipeline.pricing, Some(dir.as_path())).await;
                tokio::time::sleep(interval).await;
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(%listen, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

fn client_hint(headers: &HeaderMap) -> Option<String> {
    headers.get("x-provider-hint").and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn error_response(err: GatewayError, format: ClientFormat) -> Response {
    (
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(err.to_client_body(format)),
    )
        .into_response()
}

/// Streaming response headers, set exactly once before any body bytes.
/// The Anthropic passthrough keeps the legacy `text/plain` framing;
/// canonicalized streams and the OpenAI-responses passthrough use
/// `text/event-stream`.
fn apply_stream_headers(resp: &mut Response, content_type: &'static str) {
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
}

async fn handle_chat(state: Arc<AppState>, format: ClientFormat, headers: HeaderMap, body: Value) -> Response {
    let hint = client_hint(&headers);
    let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    if !streaming {
        let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);
        let run = pipeline::run_non_streaming(&state.pipeline, format, &body, hint.as_deref());
        return match tokio::time::timeout(request_timeout, run).await {
            Ok(Ok(result)) => (StatusCode::OK, Json(result.body)).into_response(),
            Ok(Err(e)) => error_response(e, format),
            Err(_) => error_response(GatewayError::GatewayTimeout, format),
        };
    }

    let deadline = Duration::from_secs(state.config.server.stream_timeout_secs);
    let start = pipeline::start_streaming(state.pipeline.clone(), format, body, hint, deadline).await;

    match start {
        StreamStart::Failed(e) => error_response(e, format),
        StreamStart::Passthrough { mut rx } => {
            let byte_stream = async_stream::stream! {
                while let Some(chunk) = rx.recv().await {
                    yield Ok::<_, std::convert::Infallible>(chunk);
                }
            };
            let mut resp = Body::from_stream(byte_stream).into_response();
            let content_type = match format {
                ClientFormat::AnthropicMessages => "text/plain; charset=utf-8",
                _ => "text/event-stream",
            };
            apply_stream_headers(&mut resp, content_type);
            resp
        }
        StreamStart::Adapter { rx } => {
            let event_names = format == ClientFormat::AnthropicMessages;
            let sse_stream: std::pin::Pin<Box<dyn Stream<Item = Result<SseEvent, std::convert::Infallible>> + Send>> =
                Box::pin(async_stream::stream! {
                    let mut rx = rx;
                    while let Some(payload) = rx.recv().await {
                        if payload == Value::String("[DONE]".to_string()) {
                            yield Ok(SseEvent::default().data("[DONE]"));
                            continue;
                        }
                        match serde_json::to_string(&payload) {
                            Ok(data) => {
                                let mut event = SseEvent::default().data(data);
                                // Anthropic's SSE dialect names each event.
                                if event_names {
                                    if let Some(name) = payload["type"].as_str() {
                                        event = event.event(name.to_string());
                                    }
                                }
                                yield Ok(event);
                            }
                            Err(e) => warn!(error = %e, "failed to serialize stream event"),
                        }
                    }
                });
            let mut resp = Sse::new(sse_stream).into_response();
            apply_stream_headers(&mut resp, "text/event-stream");
            resp
        }
    }
}

async fn chat_completions_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    handle_chat(state, ClientFormat::OpenAiChat, headers, body).await
}

async fn responses_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    handle_chat(state, ClientFormat::OpenAiResponses, headers, body).await
}

async fn messages_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    handle_chat(state, ClientFormat::AnthropicMessages, headers, body).await
}

#[derive(Deserialize)]
struct ModelsQuery {
    provider: Option<String>,
    endpoint: Option<String>,
    search: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// Which client endpoints a provider's models are natively reachable from
/// without canonicalization (the passthrough pairs: Anthropic↔Anthropic,
/// Anthropic↔xAI, OpenAI-responses↔OpenAI). Every provider's models remain
/// reachable via every endpoint through the adapter path — `endpoint` here
/// filters to this native-format hint, not hard exclusion.
fn native_endpoints(provider: &str) -> &'static [&'static str] {
    match provider {
        "anthropic" => &["messages"],
        "xai" => &["messages", "chat"],
        "openai" => &["chat", "responses"],
        _ => &["chat"],
    }
}

async fn models_handler(State(state): State<Arc<AppState>>, Query(q): Query<ModelsQuery>) -> Json<Value> {
    let mut models: Vec<Value> = state
        .pipeline
        .router
        .configured_providers()
        .iter()
        .filter(|p| q.provider.as_deref().map(|wanted| p.name().eq_ignore_ascii_case(wanted)).unwrap_or(true))
        .filter(|p| {
            q.endpoint
                .as_deref()
                .map(|wanted| native_endpoints(p.name()).contains(&wanted))
                .unwrap_or(true)
        })
        .flat_map(|p| {
            let provider = p.name().to_string();
            p.models().into_iter().map(move |m| {
                serde_json::json!({"id": format!("{provider}/{m}"), "provider": provider.clone()})
            })
        })
        .filter(|m| {
            q.search
                .as_deref()
                .map(|needle| m["id"].as_str().unwrap_or_default().to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(true)
        })
        .collect();

    let total = models.len();
    let offset = q.offset.unwrap_or(0).min(total);
    models = models.split_off(offset);
    if let Some(limit) = q.limit {
        models.truncate(limit);
    }

    Json(serde_json::json!({"data": models, "total": total}))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageQuery {
    start_time: Option<String>,
    end_time: Option<String>,
    timezone: Option<String>,
    limit: Option<u32>,
    format: Option<String>,
}

/// Default lookback window when `startTime`/`endTime` are omitted from
/// `GET /usage`.
const DEFAULT_USAGE_WINDOW_DAYS: i64 = 7;

async fn usage_handler(State(state): State<Arc<AppState>>, Query(q): Query<UsageQuery>) -> Response {
    if let Some(tz) = q.timezone.as_deref() {
        if tz.parse::<chrono_tz::Tz>().is_err() {
            let err = GatewayError::InvalidInput(format!("unknown IANA timezone '{tz}'"));
            return error_response(err, ClientFormat::OpenAiChat);
        }
    }

    let start = match q.start_time.as_deref() {
        Some(s) => match chrono::DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.with_timezone(&chrono::Utc),
            Err(_) => {
                let err = GatewayError::InvalidInput(format!("invalid RFC-3339 startTime '{s}'"));
                return error_response(err, ClientFormat::OpenAiChat);
            }
        },
        None => chrono::Utc::now() - chrono::Duration::days(DEFAULT_USAGE_WINDOW_DAYS),
    };
    let end = match q.end_time.as_deref() {
        Some(s) => match chrono::DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.with_timezone(&chrono::Utc),
            Err(_) => {
                let err = GatewayError::InvalidInput(format!("invalid RFC-3339 endTime '{s}'"));
                return error_response(err, ClientFormat::OpenAiChat);
            }
        },
        None => chrono::Utc::now(),
    };

    let summary = match state.pipeline.usage.query(start, end, q.limit) {
        Ok(s) => s,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    if q.format.as_deref() == Some("csv") {
        return match state.pipeline.usage.csv_export(&summary) {
            Ok(csv) => (
                [
                    ("content-type", "text/csv".to_string()),
                    ("content-disposition", format!("attachment; filename=\"usage-{}-{}.csv\"", start.to_rfc3339(), end.to_rfc3339())),
                ],
                csv,
            )
                .into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        };
    }

    Json(serde_json::json!({
        "totalRequests": summary.total_requests,
        "totalCost": summary.total_cost,
        "totalTokens": summary.total_tokens,
        "costByProvider": summary.cost_by_provider,
        "costByModel": summary.cost_by_model,
        "records": summary.records,
    }))
    .into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BudgetStatusBody {
    amount_usd: Option<f64>,
    alert_only: bool,
    spent_month_to_date: f64,
    remaining: Option<f64>,
}

async fn budget_get_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.budget.status(&state.pipeline.usage) {
        Ok(status) => Json(BudgetStatusBody {
            amount_usd: status.settings.amount_usd,
            alert_only: status.settings.alert_only,
            spent_month_to_date: status.spent_month_to_date,
            remaining: status.remaining,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BudgetUpdate {
    amount_usd: Option<f64>,
    #[serde(default = "default_alert_only")]
    alert_only: bool,
}

fn default_alert_only() -> bool {
    true
}

async fn budget_put_handler(State(state): State<Arc<AppState>>, Json(update): Json<BudgetUpdate>) -> Response {
    match state.pipeline.budget.upsert(update.amount_usd, update.alert_only) {
        Ok(settings) => match state.pipeline.budget.status(&state.pipeline.usage) {
            Ok(status) => Json(BudgetStatusBody {
                amount_usd: settings.amount_usd,
                alert_only: settings.alert_only,
                spent_month_to_date: status.spent_month_to_date,
                remaining: status.remaining,
            })
            .into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        },
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// The `<PROVIDER>_API_KEY` env var each provider's credential lives in
/// (matches `build_router`'s own lookups; ollama has none since it's a
/// local daemon with no bearer credential).
fn credential_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "xai" => Some("XAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        _ => None,
    }
}

fn has_credential(provider: &str) -> bool {
    credential_env_var(provider).map(|var| std::env::var(var).is_ok()).unwrap_or(provider == "ollama")
}

async fn config_status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let providers: serde_json::Map<String, Value> = state
        .config
        .providers
        .iter()
        .map(|(name, cfg)| (name.clone(), Value::Bool(cfg.enabled && has_credential(name))))
        .collect();

    let has_api_keys = providers.values().any(|v| v.as_bool().unwrap_or(false));
    let x402_enabled = state.config.server.x402_enabled;
    let mode = match (has_api_keys, x402_enabled) {
        (true, false) => "byok",
        (true, true) => "hybrid",
        (false, _) => "x402-only",
    };

    Json(serde_json::json!({
        "providers": providers,
        "mode": mode,
        "hasApiKeys": has_api_keys,
        "x402Enabled": x402_enabled,
        "server": {
            "environment": state.config.server.environment,
            "port": state.config.server.port(),
        },
    }))
}

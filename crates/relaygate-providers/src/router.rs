//! Model→provider routing with circuit breaking and retry.
//!
//! Resolution is a three-tier tie-break: an explicit `provider/` prefix on
//! the model id wins, then a caller-supplied hint, then the first
//! configured provider whose pricing catalog covers the model. Dispatch
//! wraps every provider call in a per-provider circuit breaker and a
//! bounded exponential-backoff retry for transient upstream failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use relaygate_core::schema::ClientFormat;
use relaygate_core::{CanonicalRequest, GatewayError};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::{ProviderClient, ProviderError, ProviderResult};
use crate::pricing::PricingCatalog;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 1000;
const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_OPEN_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
        }
    }

    fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open { since } => {
                if since.elapsed() >= CIRCUIT_OPEN_DURATION {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => false,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= CIRCUIT_FAILURE_THRESHOLD {
            self.state = CircuitState::Open { since: Instant::now() };
        }
    }

    fn is_open(&self) -> bool {
        matches!(self.state, CircuitState::Open { .. })
    }
}

/// Routes a canonical request to the right provider client, in configured
/// priority order, with per-provider circuit breaking.
pub struct ModelRouter {
    providers: Vec<Arc<dyn ProviderClient>>,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRouter {
    pub fn new() -> Self {
        Self {
            providers: vec![],
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn add_provider(&mut self, provider: Arc<dyn ProviderClient>) {
        let name = provider.name().to_string();
        info!(provider = %name, "registered provider client");
        self.breakers.lock().entry(name).or_insert_with(CircuitBreaker::new);
        self.providers.push(provider);
    }

    pub fn configured_providers(&self) -> &[Arc<dyn ProviderClient>] {
        &self.providers
    }

    fn find(&self, name: &str) -> Option<Arc<dyn ProviderClient>> {
        self.providers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    fn is_available(&self, provider_name: &str) -> bool {
        let mut breakers = self.breakers.lock();
        breakers
            .get_mut(provider_name)
            .map(|cb| cb.allow_request())
            .unwrap_or(true)
    }

    fn record_success(&self, provider_name: &str) {
        if let Some(cb) = self.breakers.lock().get_mut(provider_name) {
            cb.record_success();
        }
    }

    fn record_failure(&self, provider_name: &str) {
        let mut breakers = self.breakers.lock();
        if let Some(cb) = breakers.get_mut(provider_name) {
            let was_open = cb.is_open();
            cb.record_failure();
            if !was_open && cb.is_open() {
                warn!(
                    provider = provider_name,
                    "circuit breaker OPEN — provider disabled for {}s",
                    CIRCUIT_OPEN_DURATION.as_secs()
                );
            }
        }
    }

    /// Resolve a canonical request to a configured provider: explicit
    /// `provider/` prefix first, then `client_hint` (e.g. which
    /// endpoint/wire-format the client used, if that implies a provider),
    /// then the first configured provider whose pricing catalog actually
    /// prices the requested model. The last step is a capability check,
    /// not a blind fallback — `ModelNotSupported` fires when providers
    /// are configured but none of them prices the model.
    pub fn resolve(
        &self,
        req: &CanonicalRequest,
        client_hint: Option<&str>,
        pricing: &PricingCatalog,
    ) -> Result<Arc<dyn ProviderClient>, GatewayError> {
        if let Some(provider) = req.explicit_provider() {
            return self
                .find(provider)
                .ok_or_else(|| GatewayError::ModelNotSupported(req.model.clone()));
        }
        if let Some(hint) = client_hint {
            if let Some(provider) = self.find(hint) {
                return Ok(provider);
            }
        }

        let model = req.bare_model();
        if let Some(provider) = self.providers.iter().find(|p| pricing.lookup(p.name(), model).is_some()) {
            return Ok(provider.clone());
        }

        if self.providers.is_empty() {
            Err(GatewayError::NoProvidersConfigured)
        } else {
            Err(GatewayError::ModelNotSupported(model.to_string()))
        }
    }

    pub async fn send(
        &self,
        provider: &Arc<dyn ProviderClient>,
        body: Value,
        wire: ClientFormat,
    ) -> ProviderResult<Value> {
        self.dispatch(provider, "request", || provider.send(body.clone(), wire)).await
    }

    pub async fn stream(
        &self,
        provider: &Arc<dyn ProviderClient>,
        body: Value,
        wire: ClientFormat,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<Value>>> {
        self.dispatch(provider, "stream", || provider.stream(body.clone(), wire)).await
    }

    pub async fn stream_bytes(
        &self,
        provider: &Arc<dyn ProviderClient>,
        body: Value,
        wire: ClientFormat,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<Bytes>>> {
        self.dispatch(provider, "passthrough stream", || provider.stream_bytes(body.clone(), wire)).await
    }

    /// Circuit-breaker gate plus bounded exponential-backoff retry around
    /// one provider call. Retries only cover connecting — once a stream
    /// channel is handed back, mid-stream failures are the pipeline's
    /// problem.
    async fn dispatch<T, F, Fut>(
        &self,
        provider: &Arc<dyn ProviderClient>,
        what: &str,
        mut attempt_call: F,
    ) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ProviderResult<T>>,
    {
        if !self.is_available(provider.name()) {
            warn!(provider = provider.name(), what, "circuit breaker is OPEN");
            return Err(ProviderError::Connection("circuit breaker open".into()));
        }

        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            match attempt_call().await {
                Ok(resp) => {
                    self.record_success(provider.name());
                    return Ok(resp);
                }
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = BASE_DELAY_MS * 2u64.pow(attempt);
                    warn!(
                        provider = provider.name(),
                        what,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    last_err = Some(e);
                }
                Err(e) => {
                    self.record_failure(provider.name());
                    return Err(e);
                }
            }
        }
        self.record_failure(provider.name());
        Err(last_err.unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProviderClient;

    fn sample_request(model: &str) -> CanonicalRequest {
        CanonicalRequest {
            schema_version: relaygate_core::CANONICAL_SCHEMA_VERSION.into(),
            model: model.into(),
            system: None,
            messages: vec![],
            tools: vec![],
            tool_choice: None,
            generation: Default::default(),
            stream: false,
            user: None,
            provider_params: Default::default(),
            reasoning_effort: None,
        }
    }

    fn catalog_pricing(entries: &[(&str, &str)]) -> PricingCatalog {
        let catalog = PricingCatalog::new();
        for (provider, model) in entries {
            catalog.insert(
                provider,
                model,
                crate::pricing::PricingEntry {
                    input: 1.0,
                    output: 1.0,
                    cache_write: None,
                    cache_read: None,
                    currency: "USD".into(),
                },
            );
        }
        catalog
    }

    #[test]
    fn explicit_prefix_wins_over_priority_order() {
        let mut router = ModelRouter::new();
        router.add_provider(Arc::new(MockProviderClient::new("openai")));
        router.add_provider(Arc::new(MockProviderClient::new("anthropic")));
        let pricing = catalog_pricing(&[]);

        let req = sample_request("anthropic/claude-sonnet-4");
        let resolved = router.resolve(&req, Some("openai"), &pricing).unwrap();
        assert_eq!(resolved.name(), "anthropic");
    }

    #[test]
    fn client_hint_used_when_no_explicit_prefix() {
        let mut router = ModelRouter::new();
        router.add_provider(Arc::new(MockProviderClient::new("openai")));
        router.add_provider(Arc::new(MockProviderClient::new("anthropic")));
        let pricing = catalog_pricing(&[]);

        let req = sample_request("gpt-4o");
        let resolved = router.resolve(&req, Some("anthropic"), &pricing).unwrap();
        assert_eq!(resolved.name(), "anthropic");
    }

    #[test]
    fn picks_first_configured_provider_whose_catalog_prices_the_model() {
        let mut router = ModelRouter::new();
        router.add_provider(Arc::new(MockProviderClient::new("openai")));
        router.add_provider(Arc::new(MockProviderClient::new("anthropic")));
        let pricing = catalog_pricing(&[("anthropic", "claude-sonnet-4")]);

        let req = sample_request("claude-sonnet-4");
        let resolved = router.resolve(&req, None, &pricing).unwrap();
        assert_eq!(resolved.name(), "anthropic");
    }

    #[test]
    fn model_not_priced_by_any_configured_provider_is_model_not_supported() {
        let mut router = ModelRouter::new();
        router.add_provider(Arc::new(MockProviderClient::new("openai")));
        let pricing = catalog_pricing(&[]);

        let req = sample_request("some-unknown-model");
        let err = match router.resolve(&req, None, &pricing) {
            Ok(_) => panic!("expected resolve to fail"),
            Err(err) => err,
        };
        assert!(matches!(err, GatewayError::ModelNotSupported(_)));
    }

    #[test]
    fn no_providers_configured_at_all_is_no_providers_configured() {
        let router = ModelRouter::new();
        let pricing = catalog_pricing(&[]);

        let req = sample_request("some-model");
        let err = match router.resolve(&req, None, &pricing) {
            Ok(_) => panic!("expected resolve to fail"),
            Err(err) => err,
        };
        assert!(matches!(err, GatewayError::NoProvidersConfigured));
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_failures() {
        let mut router = ModelRouter::new();
        // Non-retryable status so each call fails once instead of looping
        // through the retry-with-backoff path — this test exercises the
        // circuit breaker's failure count, not the retry delay.
        let failing = Arc::new(MockProviderClient::new("flaky").failing_with(ProviderError::Http {
            status: 400,
            body: "boom".into(),
        }));
        router.add_provider(failing.clone());

        for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
            let _ = router
                .send(
                    &(failing.clone() as Arc<dyn ProviderClient>),
                    serde_json::json!({}),
                    relaygate_core::schema::ClientFormat::OpenAiChat,
                )
                .await;
        }
        assert!(!router.is_available("flaky"));
    }
}

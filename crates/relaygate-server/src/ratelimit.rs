//! Caller-level throttle ahead of the chat pipeline. The scarce resource a
//! gateway guards is upstream quota, not its own CPU, so chat dispatches
//! draw a configurable multiple of what local management reads draw, and a
//! caller is identified by the bearer token it presents — per-key quotas
//! that survive NAT — with the client IP as the anonymous fallback.
//! Independent of the budget service in `relaygate_store::budget`: this
//! throttles request rate, the budget warns on spend, and the two never
//! share state.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Extension,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use relaygate_config::RateLimitConfig;
use tracing::warn;

/// Who a bucket belongs to. Tokens are stored as a hash so raw credentials
/// never sit in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallerId {
    Token(u64),
    Ip(IpAddr),
}

/// Routes that dispatch to a paid upstream, as opposed to reading local
/// state.
fn is_chat_route(path: &str) -> bool {
    matches!(path, "/v1/chat/completions" | "/v1/responses" | "/v1/messages")
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

fn client_ip(headers: &HeaderMap) -> IpAddr {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .and_then(|first| first.trim().parse().ok());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };
    forwarded
        .or_else(real_ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn caller_identity(headers: &HeaderMap) -> CallerId {
    if let Some(token) = bearer_token(headers) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        return CallerId::Token(hasher.finish());
    }
    CallerId::Ip(client_ip(headers))
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn full(burst: u32) -> Self {
        Self { tokens: burst as f64, refilled_at: Instant::now() }
    }

    /// Refill for elapsed time, then draw `weight` tokens or report how
    /// many seconds until the deficit refills.
    fn draw(&mut self, weight: f64, burst: u32, refill_per_sec: f64) -> Result<(), u64> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(burst as f64);
        self.refilled_at = now;

        if self.tokens >= weight {
            self.tokens -= weight;
            return Ok(());
        }
        if refill_per_sec <= 0.0 {
            return Err(60);
        }
        let deficit = weight - self.tokens;
        Err((deficit / refill_per_sec).ceil().max(1.0) as u64)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<DashMap<CallerId, Bucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { buckets: Arc::new(DashMap::new()), config }
    }

    /// Draw `weight` tokens from `caller`'s bucket; `Err` carries the
    /// Retry-After seconds.
    pub fn check(&self, caller: CallerId, weight: f64) -> Result<(), u64> {
        let mut bucket = self
            .buckets
            .entry(caller)
            .or_insert_with(|| Bucket::full(self.config.burst));
        bucket.draw(weight, self.config.burst, self.config.refill_per_sec)
    }

    /// Drop buckets idle for more than 5 minutes; call periodically from a
    /// background task so the map doesn't grow unbounded under churn.
    pub fn evict_idle(&self) {
        let cutoff = Instant::now() - Duration::from_secs(300);
        self.buckets.retain(|_caller, bucket| bucket.refilled_at > cutoff);
    }
}

pub async fn rate_limit_middleware(
    Extension(limiter): Extension<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !limiter.config.enabled {
        return next.run(req).await;
    }

    let caller = caller_identity(req.headers());
    let weight = if is_chat_route(req.uri().path()) {
        limiter.config.chat_weight.max(1) as f64
    } else {
        1.0
    };

    match limiter.check(caller, weight) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            warn!(?caller, retry_after, path = req.uri().path(), "rate limited");
            let mut resp = (
                StatusCode::TOO_MANY_REQUESTS,
                format!("rate limit exceeded, retry after {retry_after} seconds"),
            )
                .into_response();
            resp.headers_mut().insert("retry-after", retry_after.to_string().parse().unwrap());
            resp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(burst: u32, refill_per_sec: f64) -> RateLimitConfig {
        RateLimitConfig { enabled: true, burst, refill_per_sec, chat_weight: 5 }
    }

    fn ip(last: u8) -> CallerId {
        CallerId::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    #[test]
    fn chat_dispatches_drain_the_bucket_faster_than_reads() {
        let limiter = RateLimiter::new(config(10, 0.0));

        // Two chat requests at weight 5 exhaust what ten reads would.
        assert!(limiter.check(ip(1), 5.0).is_ok());
        assert!(limiter.check(ip(1), 5.0).is_ok());
        assert!(limiter.check(ip(1), 5.0).is_err());

        // A different caller still has the full burst of cheap reads.
        for _ in 0..10 {
            assert!(limiter.check(ip(2), 1.0).is_ok());
        }
        assert!(limiter.check(ip(2), 1.0).is_err());
    }

    #[test]
    fn bearer_token_identity_is_independent_of_source_ip() {
        let mut with_token_a = HeaderMap::new();
        with_token_a.insert("authorization", "Bearer key-a".parse().unwrap());
        with_token_a.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let mut with_token_b = HeaderMap::new();
        with_token_b.insert("authorization", "Bearer key-b".parse().unwrap());
        with_token_b.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let a = caller_identity(&with_token_a);
        let b = caller_identity(&with_token_b);
        assert_ne!(a, b, "two keys behind one NAT get separate buckets");
        assert!(matches!(a, CallerId::Token(_)));

        // Same key from a different address is still the same caller.
        let mut moved = HeaderMap::new();
        moved.insert("authorization", "Bearer key-a".parse().unwrap());
        moved.insert("x-forwarded-for", "192.168.7.7".parse().unwrap());
        assert_eq!(a, caller_identity(&moved));
    }

    #[test]
    fn anonymous_callers_fall_back_to_the_forwarded_chain_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.9, 172.16.0.1".parse().unwrap());
        assert_eq!(
            caller_identity(&headers),
            CallerId::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)))
        );

        let empty = HeaderMap::new();
        assert_eq!(
            caller_identity(&empty),
            CallerId::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
    }

    #[test]
    fn retry_after_grows_with_the_deficit() {
        let limiter = RateLimiter::new(config(4, 1.0));
        assert!(limiter.check(ip(1), 4.0).is_ok());
        // Bucket is empty; a weight-4 draw needs ~4s of refill, a weight-1
        // draw only ~1s.
        assert_eq!(limiter.check(ip(1), 4.0), Err(4));
        assert_eq!(limiter.check(ip(1), 1.0), Err(1));
    }

    #[test]
    fn evict_idle_keeps_recently_used_buckets() {
        let limiter = RateLimiter::new(config(60, 10.0));
        limiter.check(ip(1), 1.0).unwrap();
        limiter.evict_idle();
        assert_eq!(limiter.buckets.len(), 1);
    }
}

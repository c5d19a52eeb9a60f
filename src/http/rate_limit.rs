//! Fixed-window per-client rate limiting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;

use crate::config::HttpSettings;

use super::envelope::error_body;

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    windows: DashMap<String, Window>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(settings: &HttpSettings) -> Arc<Self> {
        Arc::new(Self {
            windows: DashMap::new(),
            limit: settings.rate_limit_limit,
            window: Duration::from_millis(settings.rate_limit_ttl_ms),
        })
    }

    /// Returns false when the caller exhausted its window.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        entry.count += 1;
        entry.count <= self.limit
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !limiter.check(&addr.ip().to_string()) {
        let status = StatusCode::TOO_MANY_REQUESTS;
        return (status, error_body(status, "rate limit exceeded")).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, ttl_ms: u64) -> Arc<RateLimiter> {
        RateLimiter::new(&HttpSettings {
            bind_address: String::new(),
            cors_origins: Vec::new(),
            rate_limit_ttl_ms: ttl_ms,
            rate_limit_limit: limit,
        })
    }

    #[test]
    fn allows_up_to_the_limit() {
        let limiter = limiter(3, 60_000);
        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(!limiter.check("1.2.3.4"));
        // Other clients are unaffected.
        assert!(limiter.check("5.6.7.8"));
    }

    #[test]
    fn window_resets_after_ttl() {
        let limiter = limiter(1, 1);
        assert!(limiter.check("1.2.3.4"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.check("1.2.3.4"));
    }
}

//! Shared HTTP plumbing: client construction, rate limiting and backoff.

use crate::types::Result;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, Proxy};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Rate limiter shared by every probe of a resolver.
pub type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Proxy for every scheme, e.g. `http://127.0.0.1:8080`.
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: concat!("depscan/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
        }
    }
}

/// Build a client that follows redirects.
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(&config.user_agent)
        .redirect(reqwest::redirect::Policy::limited(10))
        .http1_only()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(30));

    if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    Ok(builder.build()?)
}

/// Limiter allowing `per_second` requests per second; zero means one.
pub fn rate_limiter(per_second: u32) -> Arc<DirectLimiter> {
    let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Sleep before the `hits`-th retry after a rate-limited response.
pub fn backoff_delay(base: Duration, hits: u32) -> Duration {
    base.saturating_mul(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_linear() {
        let base = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(30));

        let delays: Vec<_> = (1..=5).map(|n| backoff_delay(base, n)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_build_client_with_proxy() {
        let config = HttpConfig {
            proxy: Some("http://127.0.0.1:8080".to_string()),
            ..HttpConfig::default()
        };
        assert!(build_client(&config).is_ok());
    }
}

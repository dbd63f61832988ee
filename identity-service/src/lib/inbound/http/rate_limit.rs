//! Per-client-IP request limiting.
//!
//! Token bucket per address via `governor`. Idle buckets are reclaimed by a
//! background sweeper so the key space stays bounded.

use std::net::IpAddr;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::extract::Request;
use axum::extract::State;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use governor::DefaultKeyedRateLimiter;
use governor::Quota;
use governor::RateLimiter;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::handlers::ApiError;
use super::middleware::client_ip;
use crate::config::RateLimitConfig;
use crate::inbound::http::router::AppState;

/// Interval between sweeps of idle client buckets.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct ClientRateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
}

impl ClientRateLimiter {
    /// Build a limiter from configuration.
    ///
    /// Zero rates are raised to one.
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(per_second);

        Self {
            limiter: RateLimiter::keyed(Quota::per_second(per_second).allow_burst(burst)),
        }
    }

    /// Whether `ip` may make another request now.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Forget clients whose buckets have fully refilled.
    pub fn sweep(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Sweep periodically until `shutdown` flips to true or its sender is dropped.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                        tracing::debug!(clients = self.tracked_clients(), "Rate limiter swept");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Rate limiter sweeper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Middleware rejecting requests over the client's quota with 429.
///
/// Passes everything through when the router was built without a limiter.
pub async fn limit_by_client_ip(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(limiter) = state.rate_limiter.as_ref() {
        let ip = client_ip(req.headers(), connect_info.as_ref(), state.trust_forwarded_for);
        if !limiter.check(ip) {
            tracing::warn!(client_ip = %ip, "Rate limit exceeded");
            return ApiError::TooManyRequests("rate limit exceeded".to_string()).into_response();
        }
    }

    next.run(req).await
}

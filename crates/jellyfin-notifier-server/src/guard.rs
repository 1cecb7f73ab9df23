// Request guard for webhook and library routes
//
// IP allowlist plus a per-address sliding-window rate limit.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use ipnetwork::IpNetwork;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::json;
use tracing::warn;

use jellyfin_notifier_config::SecurityConfig;

use crate::AppState;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    Forbidden,
    RateLimited,
}

impl Rejection {
    fn as_str(&self) -> &'static str {
        match self {
            Rejection::Forbidden => "allowlist",
            Rejection::RateLimited => "rate_limit",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::Forbidden => {
                (StatusCode::FORBIDDEN, Json(json!({"error": "Forbidden"}))).into_response()
            }
            Rejection::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, "60")],
                Json(json!({"error": "Rate limit exceeded"})),
            )
                .into_response(),
        }
    }
}

/// Sliding-window counter keyed by remote address.
pub(crate) struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request at `now`. Returns false when the caller already used
    /// up its window; rejected requests are not counted.
    pub fn allow(&self, key: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock();
        // Expire old hits for every address and forget addresses left idle.
        hits.retain(|_, stamps| {
            while let Some(oldest) = stamps.front() {
                if now.saturating_duration_since(*oldest) >= self.window {
                    stamps.pop_front();
                } else {
                    break;
                }
            }
            !stamps.is_empty()
        });

        let entry = hits.entry(key.to_string()).or_default();
        if entry.len() >= self.limit {
            return false;
        }
        entry.push_back(now);
        true
    }
}

pub(crate) struct RequestGuard {
    allowlist: Vec<IpNetwork>,
    rate_limiter: Option<RateLimiter>,
}

impl RequestGuard {
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let rate_limiter = match config.rate_limit_per_minute {
            0 => None,
            limit => Some(RateLimiter::new(limit as usize, RATE_WINDOW)),
        };

        Ok(Self {
            allowlist: config.parsed_allowlist()?,
            rate_limiter,
        })
    }

    pub fn check(&self, remote: Option<IpAddr>, path: &str) -> Result<(), Rejection> {
        let remote = remote.map(unmap_ipv4);

        if !self.allowlist.is_empty() {
            let allowed = remote
                .map(|ip| self.allowlist.iter().any(|net| net.contains(ip)))
                .unwrap_or(false);
            if !allowed {
                warn!(
                    remote_addr = ?remote,
                    path,
                    "Request rejected: remote address not in allowlist"
                );
                return Err(Rejection::Forbidden);
            }
        }

        if let Some(limiter) = &self.rate_limiter {
            let key = remote
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            if !limiter.allow(&key, Instant::now()) {
                warn!(remote_addr = %key, path, "Rate limit exceeded");
                return Err(Rejection::RateLimited);
            }
        }

        Ok(())
    }
}

/// Dual-stack listeners report IPv4 peers as `::ffff:a.b.c.d`.
fn unmap_ipv4(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

/// Middleware applied to the guarded routes.
pub(crate) async fn enforce(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let remote = connect_info.map(|ConnectInfo(addr)| addr.ip());
    match state.guard.check(remote, request.uri().path()) {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            counter!("notifier.requests.rejected", "reason" => rejection.as_str()).increment(1);
            rejection.into_response()
        }
    }
}

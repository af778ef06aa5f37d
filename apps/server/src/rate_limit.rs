use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

/// Request tiers with separate budgets. Booking creation is the strictest:
/// it writes rows and triggers notifications, so it gets a long window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Public,
    Booking,
    Staff,
}

impl Tier {
    fn budget(self) -> (u32, Duration) {
        match self {
            Tier::Public => (60, Duration::from_secs(60)),
            Tier::Booking => (5, Duration::from_secs(300)),
            Tier::Staff => (120, Duration::from_secs(60)),
        }
    }
}

/// Per-IP sliding window counters, one map per tier.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    hits: Arc<DashMap<(Tier, IpAddr), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            hits: Arc::new(DashMap::new()),
        }
    }

    /// Returns `Err(retry_after_secs)` when the budget is spent.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        let (max_requests, window) = tier.budget();
        let now = Instant::now();

        let mut entry = self.hits.entry((tier, ip)).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= max_requests as usize {
            let oldest = entry[0];
            let retry_after = (oldest + window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        entry.push_back(now);
        Ok(())
    }

    /// Drop IPs with no request inside 2× their window. Run from a
    /// background task; `check` already evicts per-key.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.hits.retain(|(tier, _ip), timestamps| {
            let (_, window) = tier.budget();
            timestamps.retain(|t| now.duration_since(*t) < window * 2);
            !timestamps.is_empty()
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Client IP: X-Forwarded-For first (we sit behind Caddy), then the socket.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

fn enforce(limiter: &RateLimiter, tier: Tier, req: &Request) -> Result<(), Response> {
    let ip = extract_client_ip(req);
    limiter.check(tier, ip).map_err(|retry_after| {
        let body = ApiResponse::<()>::error(format!(
            "Забагато запитів. Спробуйте через {} с",
            retry_after
        ));
        (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", retry_after.to_string())],
            Json(body),
        )
            .into_response()
    })
}

pub async fn rate_limit_public(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(&limiter, Tier::Public, &req)?;
    Ok(next.run(req).await)
}

pub async fn rate_limit_booking(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(&limiter, Tier::Booking, &req)?;
    Ok(next.run(req).await)
}

pub async fn rate_limit_staff(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(&limiter, Tier::Staff, &req)?;
    Ok(next.run(req).await)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_allows_up_to_budget() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check(Tier::Booking, ip(1)).is_ok());
        }
        assert!(limiter.check(Tier::Booking, ip(1)).is_err());
    }

    #[test]
    fn test_retry_after_within_window() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(Tier::Booking, ip(1)).unwrap();
        }
        let retry_after = limiter.check(Tier::Booking, ip(1)).unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 300);
    }

    #[test]
    fn test_ips_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(Tier::Booking, ip(1)).unwrap();
        }
        assert!(limiter.check(Tier::Booking, ip(1)).is_err());
        assert!(limiter.check(Tier::Booking, ip(2)).is_ok());
    }

    #[test]
    fn test_tiers_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(Tier::Booking, ip(1)).unwrap();
        }
        assert!(limiter.check(Tier::Booking, ip(1)).is_err());
        assert!(limiter.check(Tier::Public, ip(1)).is_ok());
    }

    #[test]
    fn test_cleanup_keeps_active_windows() {
        let limiter = RateLimiter::new();
        limiter.check(Tier::Staff, ip(1)).unwrap();
        limiter.cleanup();
        // the hit is still inside its window and still counts
        for _ in 0..119 {
            limiter.check(Tier::Staff, ip(1)).unwrap();
        }
        assert!(limiter.check(Tier::Staff, ip(1)).is_err());
    }
}

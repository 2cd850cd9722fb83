use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, governor::clock::DefaultClock>>,
}

impl RateLimitLayer {
    pub fn new(requests: u32, per_seconds: u64) -> Self {
        let quota = Quota::with_period(Duration::from_secs(per_seconds))
            .unwrap()
            .allow_burst(NonZeroU32::new(requests).unwrap());

        RateLimitLayer {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn check(&self) -> Result<(), Response> {
        match self.limiter.check() {
            Ok(_) => Ok(()),
            Err(_) => Err((
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded. Please try again later.",
            )
                .into_response()),
        }
    }
}

/// Rate limiting middleware for bid submission
pub async fn rate_limit_middleware(
    request: Request,
    next: Next,
) -> Result<impl IntoResponse, Response> {
    let rate_limit = request
        .extensions()
        .get::<Arc<RateLimitLayer>>()
        .cloned()
        .unwrap_or_else(|| Arc::new(RateLimitLayer::new(100, 60)));

    rate_limit.check()?;
    Ok(next.run(request).await)
}

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::clock::{self, Clock};
use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::rate_limit::{
    IdentifierStrategy, IpStrategy, RateLimitExceeded, RateLimitInfo, RateLimiter,
};
use crate::router::HandlerFuture;
use crate::{Response, StatusCode};

/// Spends one token per request from a [`RateLimiter`].
///
/// Requests are keyed by an [`IdentifierStrategy`] (client IP unless told
/// otherwise). A denied request is answered with `429 Too Many Requests` and
/// never reaches the handler; an allowed one gets `X-RateLimit-Limit`,
/// `X-RateLimit-Remaining` and `X-RateLimit-Reset` (unix seconds) on its
/// response.
pub struct ThrottleMiddleware {
    limiter: Arc<dyn RateLimiter>,
    strategy: Box<dyn IdentifierStrategy>,
    clock: Arc<dyn Clock>,
}

impl ThrottleMiddleware {
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            limiter,
            strategy: Box::new(IpStrategy),
            clock: clock::system(),
        }
    }

    pub fn with_strategy(mut self, strategy: impl IdentifierStrategy + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    /// Clock used for the `X-RateLimit-Reset` timestamp.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn reset_at(&self, info: &RateLimitInfo) -> String {
        (self.clock.now() + info.reset_time).to_string()
    }
}

fn too_many_requests(exceeded: &RateLimitExceeded, reset_at: String) -> Response {
    let info = exceeded.info();
    Response::json(
        StatusCode::TooManyRequests,
        json!({
            "error": "Too Many Requests",
            "message": exceeded.user_message(),
        }),
    )
    .header("Retry-After", exceeded.retry_after().to_string())
    .header("X-RateLimit-Limit", info.max_attempts.to_string())
    .header("X-RateLimit-Remaining", "0")
    .header("X-RateLimit-Reset", reset_at)
}

impl Middleware for ThrottleMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> HandlerFuture {
        let identifier = self.strategy.identify(&ctx);
        let verdict = self
            .limiter
            .attempt(&identifier)
            .and_then(|allowed| self.limiter.info(&identifier).map(|info| (allowed, info)))
            .map(|(allowed, info)| {
                let reset_at = self.reset_at(&info);
                (allowed, info, reset_at)
            });

        Box::pin(async move {
            let (allowed, info, reset_at) = verdict?;

            if !allowed {
                let exceeded = RateLimitExceeded::new(info);
                warn!(
                    identifier = %exceeded.info().identifier,
                    path = %ctx.request().path(),
                    retry_after = exceeded.retry_after(),
                    "request throttled"
                );
                return Ok(too_many_requests(&exceeded, reset_at));
            }

            let mut response = next.run(ctx).await?;
            response.set_header("X-RateLimit-Limit", info.max_attempts.to_string());
            response.set_header("X-RateLimit-Remaining", info.remaining_attempts.to_string());
            response.set_header("X-RateLimit-Reset", reset_at);
            Ok(response)
        })
    }
}

use std::pin::Pin;

use tokio::time::Instant;

use super::{Middleware, Next};
use crate::context::Context;
use crate::error::Result;
use crate::Response;

/// Logs each request's method, path, status and duration.
///
/// Emits `info` on completion and `error` when a downstream link fails; the error
/// itself is returned unchanged. Never short-circuits.
///
/// ```text
/// request completed method=GET path=/users/42 status=200 duration=1.2ms
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(
        &self,
        ctx: Context,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().clone();
            let path = ctx.request().path().to_owned();
            let client = ctx.request().client_ip();

            let result = next.run(ctx).await;
            let duration = start.elapsed();

            match &result {
                Ok(response) => tracing::info!(
                    %method,
                    %path,
                    client = ?client,
                    status = response.status().as_u16(),
                    ?duration,
                    "request completed"
                ),
                Err(error) => tracing::error!(
                    %method,
                    %path,
                    client = ?client,
                    ?duration,
                    %error,
                    "request failed"
                ),
            }

            result
        })
    }
}

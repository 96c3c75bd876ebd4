use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::router::HandlerFuture;
use crate::{Method, Response, StatusCode};

/// Cross-Origin Resource Sharing.
///
/// - No `Origin` header, or an origin outside the allow-list: the request passes
///   through untouched.
/// - `OPTIONS` preflight from an allowed origin: answered here with
///   `204 No Content`; nothing downstream runs.
/// - Any other request from an allowed origin: runs normally, then the
///   `Access-Control-*` headers are added to its response.
///
/// Specific origins are echoed back with `Vary: Origin`; a `"*"` entry allows
/// every origin and answers with `*`.
///
/// ```rust
/// use waypoint::security::CorsMiddleware;
///
/// let cors = CorsMiddleware::new()
///     .allow_origin("https://app.example.com")
///     .allow_method("PATCH")
///     .allow_header("X-Request-ID");
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    max_age: u32,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::permissive()
    }
}

impl CorsMiddleware {
    /// No origins allowed yet; `GET, POST, PUT, DELETE` and
    /// `Content-Type, Authorization` once one is.
    pub fn new() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: ["GET", "POST", "PUT", "DELETE"].map(String::from).to_vec(),
            allowed_headers: ["Content-Type", "Authorization"].map(String::from).to_vec(),
            max_age: 3600,
        }
    }

    /// Every origin allowed.
    pub fn permissive() -> Self {
        Self::new().allow_origin("*")
    }

    /// Pass `"*"` to permit every origin.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    /// Seconds a browser may cache a preflight answer.
    #[must_use]
    pub fn max_age(mut self, secs: u32) -> Self {
        self.max_age = secs;
        self
    }

    fn allow_origin_for(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }
}

fn apply(response: &mut Response, allow_origin: &str, methods: &str, headers: &str) {
    response.set_header("Access-Control-Allow-Origin", allow_origin);
    response.set_header("Access-Control-Allow-Methods", methods);
    response.set_header("Access-Control-Allow-Headers", headers);
    if allow_origin != "*" {
        response.add_header("Vary", "Origin");
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> HandlerFuture {
        let allow_origin = ctx
            .request()
            .headers()
            .get("origin")
            .and_then(|origin| self.allow_origin_for(origin));
        let methods = self.allowed_methods.join(", ");
        let headers = self.allowed_headers.join(", ");
        let max_age = self.max_age;

        Box::pin(async move {
            let Some(allow_origin) = allow_origin else {
                return next.run(ctx).await;
            };

            if ctx.request().method() == &Method::Options {
                let mut preflight = Response::new(StatusCode::NoContent)
                    .header("Access-Control-Max-Age", max_age.to_string());
                apply(&mut preflight, &allow_origin, &methods, &headers);
                return Ok(preflight);
            }

            let mut response = next.run(ctx).await?;
            apply(&mut response, &allow_origin, &methods, &headers);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::middleware::from_middleware;
    use crate::router::handler;
    use crate::Request;

    async fn run(cors: CorsMiddleware, request: Request, calls: Arc<AtomicUsize>) -> Response {
        let endpoint = handler(move |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Response::new(StatusCode::Ok) }
        });
        Next::new(vec![from_middleware(Arc::new(cors))], endpoint)
            .run(Context::new(request))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn requests_without_origin_pass_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = run(CorsMiddleware::permissive(), Request::new(Method::Get, "/"), calls.clone()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!response.headers().contains("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn preflight_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let request = Request::new(Method::Options, "/users").with_header("Origin", "https://a.test");
        let response = run(CorsMiddleware::permissive(), request, calls.clone()).await;

        assert_eq!(response.status(), StatusCode::NoContent);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(response.headers().get("access-control-allow-origin"), Some("*"));
        assert_eq!(response.headers().get("access-control-max-age"), Some("3600"));
    }

    #[tokio::test]
    async fn specific_origins_are_echoed_with_vary() {
        let cors = CorsMiddleware::new()
            .allow_origin("https://a.test")
            .allow_method("PATCH");
        let request = Request::new(Method::Get, "/").with_header("Origin", "https://a.test");
        let response = run(cors, request, Arc::new(AtomicUsize::new(0))).await;

        assert_eq!(response.headers().get("access-control-allow-origin"), Some("https://a.test"));
        assert_eq!(response.headers().get("vary"), Some("Origin"));
        assert_eq!(
            response.headers().get("access-control-allow-methods"),
            Some("GET, POST, PUT, DELETE, PATCH")
        );
    }

    #[tokio::test]
    async fn unknown_origins_get_no_headers() {
        let cors = CorsMiddleware::new().allow_origin("https://a.test").max_age(60);
        let request = Request::new(Method::Get, "/").with_header("Origin", "https://evil.test");
        let response = run(cors, request, Arc::new(AtomicUsize::new(0))).await;
        assert!(!response.headers().contains("access-control-allow-origin"));
    }
}

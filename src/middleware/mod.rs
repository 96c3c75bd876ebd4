//! Middleware pipeline: composable before/after request handler logic.
//!
//! A pipeline is an ordered list of middleware wrapped around a terminal
//! [`Handler`]. For `[m1, m2]` around `H` the call order is
//! `m1 (pre) → m2 (pre) → H → m2 (post) → m1 (post)`: each link receives the
//! [`Context`] and a [`Next`] continuation and may
//!
//! - forward with `next.run(ctx).await` and return the result unchanged,
//! - forward and decorate the returned [`Response`] (add headers, ...), or
//! - return a response without calling `next`, short-circuiting everything
//!   downstream, including the handler.
//!
//! Errors returned by any link propagate outwards untouched.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by stateful middleware.
//! - [`Next`]: cursor into the remaining chain.
//! - [`MiddlewareHandler`]: the single normalized invocation shape.
//! - [`MiddlewareRef`]: how routes refer to middleware before normalization:
//!   a bound instance, a registry key, or an inline function.

use std::{fmt, future::Future, pin::Pin, sync::Arc};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::router::{Handler, HandlerFuture};
use crate::Response;

mod logger;

pub use logger::LoggerMiddleware;

/// A type-erased, reference-counted middleware function.
///
/// Every link of a running pipeline has this shape, whatever [`MiddlewareRef`]
/// variant it started out as.
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> HandlerFuture + Send + Sync + 'static>;

/// The core trait for stateful middleware.
///
/// # Contract
///
/// - Implementations must be `Send + Sync`; one instance may serve many
///   concurrent requests.
/// - `handle` must return a pinned, `Send` future.
/// - Calling `next` at most once is enforced by [`Next::run`] taking `self`.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Result<Response>> + Send>>;
}

/// Converts a shared [`Middleware`] into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + ?Sized + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Converts an async closure into a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust
/// use waypoint::middleware::from_fn;
///
/// let stamp = from_fn(|ctx, next| async move {
///     let mut response = next.run(ctx).await?;
///     response.set_header("X-Powered-By", "waypoint");
///     Ok(response)
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> MiddlewareHandler
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(move |ctx: Context, next: Next| -> HandlerFuture {
        Box::pin(f(ctx, next))
    })
}

/// A cursor into the remaining middleware chain for a single request.
///
/// Once every middleware has been entered, [`run`](Self::run) invokes the
/// terminal handler.
pub struct Next {
    chain: Arc<[MiddlewareHandler]>,
    index: usize,
    endpoint: Handler,
}

impl Next {
    /// Positions a cursor at the start of `chain`, with `endpoint` as the innermost call.
    pub fn new(chain: impl Into<Arc<[MiddlewareHandler]>>, endpoint: Handler) -> Self {
        Self {
            chain: chain.into(),
            index: 0,
            endpoint,
        }
    }

    /// Invokes the next middleware, or the terminal handler when the chain is exhausted.
    pub async fn run(mut self, ctx: Context) -> Result<Response> {
        match self.chain.get(self.index).cloned() {
            Some(link) => {
                self.index += 1;
                link(ctx, self).await
            }
            None => (self.endpoint)(ctx).await,
        }
    }

    /// How many links (excluding the handler) are still ahead of this cursor.
    pub fn remaining(&self) -> usize {
        self.chain.len() - self.index
    }
}

/// A route's reference to a piece of middleware, prior to normalization.
#[derive(Clone)]
pub enum MiddlewareRef {
    /// A shared, already-constructed instance.
    Instance {
        name: &'static str,
        middleware: Arc<dyn Middleware>,
    },
    /// A key resolved through the [`Registry`] at dispatch time.
    Named(String),
    /// An inline function.
    Inline(MiddlewareHandler),
}

impl MiddlewareRef {
    pub fn instance<M>(middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        Self::Instance {
            name: std::any::type_name::<M>(),
            middleware: Arc::new(middleware),
        }
    }

    pub fn named(key: impl Into<String>) -> Self {
        Self::Named(key.into())
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        Self::Inline(from_fn(f))
    }

    /// Normalizes this reference into the pipeline's invocation shape.
    ///
    /// # Errors
    ///
    /// [`Error::UnresolvedMiddleware`] when a named reference has no registration.
    pub fn resolve(&self, registry: &Registry) -> Result<MiddlewareHandler> {
        match self {
            Self::Instance { middleware, .. } => Ok(from_middleware(Arc::clone(middleware))),
            Self::Named(key) => registry
                .resolve_middleware(key)
                .ok_or_else(|| Error::UnresolvedMiddleware { name: key.clone() }),
            Self::Inline(handler) => Ok(Arc::clone(handler)),
        }
    }

    /// Human-readable form used by route listings.
    pub fn describe(&self) -> String {
        match self {
            Self::Instance { name, .. } => (*name).to_owned(),
            Self::Named(key) => key.clone(),
            Self::Inline(_) => "closure".to_owned(),
        }
    }
}

impl fmt::Debug for MiddlewareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MiddlewareRef").field(&self.describe()).finish()
    }
}

impl From<&str> for MiddlewareRef {
    fn from(key: &str) -> Self {
        Self::Named(key.to_owned())
    }
}

impl From<String> for MiddlewareRef {
    fn from(key: String) -> Self {
        Self::Named(key)
    }
}

impl From<MiddlewareHandler> for MiddlewareRef {
    fn from(handler: MiddlewareHandler) -> Self {
        Self::Inline(handler)
    }
}

/// Anything that can stand for "one or more middleware" in registration calls:
/// a key, a [`MiddlewareRef`], or a list/array of either.
pub trait IntoMiddlewareList {
    fn into_middleware_list(self) -> Vec<MiddlewareRef>;
}

impl IntoMiddlewareList for &str {
    fn into_middleware_list(self) -> Vec<MiddlewareRef> {
        vec![self.into()]
    }
}

impl IntoMiddlewareList for String {
    fn into_middleware_list(self) -> Vec<MiddlewareRef> {
        vec![self.into()]
    }
}

impl IntoMiddlewareList for MiddlewareRef {
    fn into_middleware_list(self) -> Vec<MiddlewareRef> {
        vec![self]
    }
}

impl<T> IntoMiddlewareList for Vec<T>
where
    T: Into<MiddlewareRef>,
{
    fn into_middleware_list(self) -> Vec<MiddlewareRef> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T, const N: usize> IntoMiddlewareList for [T; N]
where
    T: Into<MiddlewareRef>,
{
    fn into_middleware_list(self) -> Vec<MiddlewareRef> {
        self.into_iter().map(Into::into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::router::handler;
    use crate::{Method, Request, StatusCode};

    fn ctx() -> Context {
        Context::new(Request::new(Method::Get, "/"))
    }

    fn tracing_link(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> MiddlewareHandler {
        from_fn(move |ctx, next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{name}:pre"));
                let response = next.run(ctx).await;
                log.lock().unwrap().push(format!("{name}:post"));
                response
            }
        })
    }

    #[tokio::test]
    async fn links_run_outer_to_inner_and_unwind_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = Arc::clone(&log);
        let endpoint = handler(move |_ctx| {
            let log = Arc::clone(&handler_log);
            async move {
                log.lock().unwrap().push("handler".to_owned());
                Response::new(StatusCode::Ok)
            }
        });

        let chain = vec![tracing_link(Arc::clone(&log), "m1"), tracing_link(Arc::clone(&log), "m2")];
        let response = Next::new(chain, endpoint).run(ctx()).await.unwrap();

        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["m1:pre", "m2:pre", "handler", "m2:post", "m1:post"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_downstream_links_and_handler() {
        let downstream = Arc::new(AtomicUsize::new(0));

        let gate = from_fn(|_ctx, _next| async { Ok(Response::new(StatusCode::Unauthorized)) });
        let counter = Arc::clone(&downstream);
        let inner = from_fn(move |ctx, next| {
            counter.fetch_add(1, Ordering::SeqCst);
            next.run(ctx)
        });
        let counter = Arc::clone(&downstream);
        let endpoint = handler(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Response::new(StatusCode::Ok) }
        });

        let response = Next::new(vec![gate, inner], endpoint).run(ctx()).await.unwrap();
        assert_eq!(response.status(), StatusCode::Unauthorized);
        assert_eq!(downstream.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_chain_calls_handler_directly() {
        let endpoint = handler(|_ctx| async { Response::new(StatusCode::NoContent) });
        let next = Next::new(Vec::<MiddlewareHandler>::new(), endpoint);
        assert_eq!(next.remaining(), 0);
        assert_eq!(next.run(ctx()).await.unwrap().status(), StatusCode::NoContent);
    }

    #[tokio::test]
    async fn handler_errors_propagate_through_links() {
        let endpoint = handler(|_ctx| async { Err::<Response, _>(Error::handler("boom")) });
        let passthrough = from_fn(|ctx, next| next.run(ctx));
        let result = Next::new(vec![passthrough], endpoint).run(ctx()).await;
        assert!(matches!(result, Err(Error::Handler(_))));
    }

    #[test]
    fn unknown_named_reference_fails_to_resolve() {
        let registry = Registry::new();
        let err = MiddlewareRef::named("auth").resolve(&registry).err().unwrap();
        assert!(matches!(err, Error::UnresolvedMiddleware { name } if name == "auth"));
    }

    #[test]
    fn list_conversions_accept_keys_and_arrays() {
        assert_eq!("auth".into_middleware_list().len(), 1);
        let list = ["cors", "log"].into_middleware_list();
        assert_eq!(
            list.iter().map(MiddlewareRef::describe).collect::<Vec<_>>(),
            vec!["cors", "log"]
        );
    }
}

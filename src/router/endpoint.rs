//! Terminal handlers and the endpoint descriptors routes bind them with.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::Response;

/// Boxed future produced by handlers and middleware.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send>>;

/// Type-erased, heap-allocated async handler that turns a [`Context`] into a
/// [`Response`].
///
/// Stored behind `Arc<dyn Fn(…)>` so a route can be cloned into the dispatch table
/// and shared across tasks without copying the closure. Build one with [`handler`].
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync + 'static>;

/// What a handler may return: a bare [`Response`], or a `Result` whose error
/// converts into the crate [`Error`].
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> Result<Response>;
}

impl IntoHandlerResult for Response {
    fn into_handler_result(self) -> Result<Response> {
        Ok(self)
    }
}

impl<E> IntoHandlerResult for std::result::Result<Response, E>
where
    E: Into<Error>,
{
    fn into_handler_result(self) -> Result<Response> {
        self.map_err(Into::into)
    }
}

/// Erases an async function into a [`Handler`].
///
/// The `Fn(Context)` bound sits directly on the argument so closure parameters are
/// inferred without annotations.
///
/// # Examples
///
/// ```rust
/// use waypoint::{Response, StatusCode};
/// use waypoint::router::handler;
///
/// let show = handler(|ctx| async move {
///     let id = ctx.param("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
pub fn handler<F, Fut, R>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + 'static,
{
    Arc::new(move |ctx: Context| -> HandlerFuture {
        let fut = f(ctx);
        Box::pin(async move { fut.await.into_handler_result() })
    })
}

/// What a route dispatches to once its middleware has run.
#[derive(Clone)]
pub enum Endpoint {
    /// A handler bound at registration time.
    Inline(Handler),
    /// A handler registered in the [`Registry`](crate::registry::Registry) under a key.
    Named(String),
    /// `Controller@action`: a controller factory in the registry plus an action name.
    Controller { controller: String, action: String },
}

impl Endpoint {
    /// Parses a string descriptor: `"Users@show"` names a controller action, anything
    /// else names a registered handler.
    pub fn parse(descriptor: &str) -> Self {
        match descriptor.split_once('@') {
            Some((controller, action)) => Self::Controller {
                controller: controller.to_owned(),
                action: action.to_owned(),
            },
            None => Self::Named(descriptor.to_owned()),
        }
    }

    /// Human-readable form used by route listings.
    pub fn describe(&self) -> String {
        match self {
            Self::Inline(_) => "closure".to_owned(),
            Self::Named(name) => name.clone(),
            Self::Controller { controller, action } => format!("{controller}@{action}"),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Endpoint").field(&self.describe()).finish()
    }
}

impl From<Handler> for Endpoint {
    fn from(handler: Handler) -> Self {
        Self::Inline(handler)
    }
}

impl From<&str> for Endpoint {
    fn from(descriptor: &str) -> Self {
        Self::parse(descriptor)
    }
}

impl From<String> for Endpoint {
    fn from(descriptor: String) -> Self {
        Self::parse(&descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, Request, StatusCode};

    #[test]
    fn descriptor_with_at_is_controller_action() {
        match Endpoint::parse("Users@show") {
            Endpoint::Controller { controller, action } => {
                assert_eq!(controller, "Users");
                assert_eq!(action, "show");
            }
            other => panic!("expected controller endpoint, got {other:?}"),
        }
    }

    #[test]
    fn bare_descriptor_names_a_handler() {
        assert!(matches!(Endpoint::parse("health"), Endpoint::Named(n) if n == "health"));
    }

    #[tokio::test]
    async fn fallible_handlers_convert_their_errors() {
        let failing = handler(|_ctx| async {
            Err::<Response, _>(Error::handler("boom"))
        });
        let ok = handler(|_ctx| async { Response::new(StatusCode::Accepted) });

        let ctx = || Context::new(Request::new(Method::Get, "/"));
        assert!(matches!(failing(ctx()).await, Err(Error::Handler(_))));
        assert_eq!(ok(ctx()).await.unwrap().status(), StatusCode::Accepted);
    }
}

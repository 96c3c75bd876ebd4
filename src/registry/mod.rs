//! Explicit resolver for middleware, handlers, and controllers referenced by name.
//!
//! Routes may name their collaborators with plain strings (`"throttle"`,
//! `"Users@show"`). The [`Registry`] is the one place those names are bound to
//! factories; the router consults it at dispatch time, so a missing binding
//! surfaces as an error on the first request that needs it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::middleware::{Middleware, MiddlewareHandler, from_middleware};
use crate::router::{Endpoint, Handler, HandlerFuture};

type MiddlewareFactory = Arc<dyn Fn() -> Arc<dyn Middleware> + Send + Sync>;
type ControllerFactory = Arc<dyn Fn() -> Arc<dyn Controller> + Send + Sync>;

/// A group of related actions addressed as `"Controller@action"`.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use waypoint::{Response, StatusCode, context::Context};
/// use waypoint::registry::Controller;
/// use waypoint::router::HandlerFuture;
///
/// struct Users;
///
/// impl Users {
///     async fn show(&self, ctx: Context) -> waypoint::Result<Response> {
///         let id = ctx.param("id").unwrap_or_default().to_owned();
///         Ok(Response::new(StatusCode::Ok).body(id))
///     }
/// }
///
/// impl Controller for Users {
///     fn call(self: Arc<Self>, action: &str, ctx: Context) -> Option<HandlerFuture> {
///         match action {
///             "show" => Some(Box::pin(async move { self.show(ctx).await })),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait Controller: Send + Sync + 'static {
    /// Runs `action`, or returns `None` when this controller has no such action.
    fn call(self: Arc<Self>, action: &str, ctx: Context) -> Option<HandlerFuture>;
}

/// String-keyed factories for everything a route can reference by name.
#[derive(Default, Clone)]
pub struct Registry {
    middleware: HashMap<String, MiddlewareFactory>,
    handlers: HashMap<String, Handler>,
    controllers: HashMap<String, ControllerFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `key` to a middleware factory; every resolution builds a fresh instance.
    pub fn middleware<M, F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        M: Middleware + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        let factory: MiddlewareFactory =
            Arc::new(move || -> Arc<dyn Middleware> { Arc::new(factory()) });
        self.middleware.insert(key.into(), factory);
        self
    }

    /// Binds `key` to one shared middleware instance.
    pub fn middleware_instance<M>(&mut self, key: impl Into<String>, middleware: M) -> &mut Self
    where
        M: Middleware + 'static,
    {
        let shared: Arc<dyn Middleware> = Arc::new(middleware);
        let factory: MiddlewareFactory = Arc::new(move || Arc::clone(&shared));
        self.middleware.insert(key.into(), factory);
        self
    }

    /// Binds `key` to a handler, addressable as a bare route endpoint descriptor.
    pub fn handler(&mut self, key: impl Into<String>, handler: Handler) -> &mut Self {
        self.handlers.insert(key.into(), handler);
        self
    }

    /// Binds `key` to a controller factory; `"key@action"` endpoints resolve through it.
    pub fn controller<C, F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        C: Controller,
        F: Fn() -> C + Send + Sync + 'static,
    {
        let factory: ControllerFactory =
            Arc::new(move || -> Arc<dyn Controller> { Arc::new(factory()) });
        self.controllers.insert(key.into(), factory);
        self
    }

    pub fn has_middleware(&self, key: &str) -> bool {
        self.middleware.contains_key(key)
    }

    /// Builds the middleware bound to `key`, normalized for the pipeline.
    pub fn resolve_middleware(&self, key: &str) -> Option<MiddlewareHandler> {
        self.middleware
            .get(key)
            .map(|factory| from_middleware(factory()))
    }

    /// Turns a route endpoint into a callable handler.
    ///
    /// Controller endpoints are instantiated here, once per dispatch; the action is
    /// looked up when the handler runs.
    ///
    /// # Errors
    ///
    /// [`Error::UnresolvedHandler`] or [`Error::UnresolvedController`] for unknown
    /// keys. An unknown action surfaces as [`Error::UnresolvedAction`] from the
    /// returned handler.
    pub fn resolve_endpoint(&self, endpoint: &Endpoint) -> Result<Handler> {
        match endpoint {
            Endpoint::Inline(handler) => Ok(Arc::clone(handler)),
            Endpoint::Named(key) => self
                .handlers
                .get(key)
                .cloned()
                .ok_or_else(|| Error::UnresolvedHandler { name: key.clone() }),
            Endpoint::Controller { controller, action } => {
                let factory = self.controllers.get(controller).ok_or_else(|| {
                    Error::UnresolvedController {
                        name: controller.clone(),
                    }
                })?;
                let instance = factory();
                let controller = controller.clone();
                let action = action.clone();
                let handler: Handler = Arc::new(move |ctx: Context| -> HandlerFuture {
                    match Arc::clone(&instance).call(&action, ctx) {
                        Some(fut) => fut,
                        None => {
                            let err = Error::UnresolvedAction {
                                controller: controller.clone(),
                                action: action.clone(),
                            };
                            Box::pin(async move { Err(err) })
                        }
                    }
                });
                Ok(handler)
            }
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut middleware: Vec<_> = self.middleware.keys().collect();
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        let mut controllers: Vec<_> = self.controllers.keys().collect();
        middleware.sort();
        handlers.sort();
        controllers.sort();
        f.debug_struct("Registry")
            .field("middleware", &middleware)
            .field("handlers", &handlers)
            .field("controllers", &controllers)
            .finish()
    }
}

//! Request routing: register routes, group them, and dispatch requests through
//! each route's middleware pipeline.
//!
//! ```rust
//! use waypoint::router::{Group, Router, handler};
//! use waypoint::{Response, StatusCode};
//!
//! let mut router = Router::new();
//! router.global_middleware("log");
//!
//! router.group(Group::new().prefix("api").middleware("throttle").name("api"), |api| {
//!     api.group(Group::new().prefix("users").name("users"), |users| {
//!         users.get("/", "Users@index").name("index");
//!         users.get("/{id:\\d+}", "Users@show").name("show");
//!     });
//! });
//!
//! router.get("/health", handler(|_ctx| async { Response::new(StatusCode::Ok) }));
//!
//! let show = router.route_by_name("api.users.show").unwrap();
//! assert_eq!(show.uri(), "/api/users/{id:\\d+}");
//! ```
//!
//! Registration takes `&mut self` and dispatch takes `&self`. Once a router is
//! shared (`Arc<Router>`) its route list can no longer change, which is the only
//! synchronisation the lazily compiled dispatch table needs.

mod endpoint;
mod group;
mod pattern;
mod route;
mod table;

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::middleware::{IntoMiddlewareList, MiddlewareRef, Next};
use crate::registry::Registry;
use crate::{Method, Request, Response, StatusCode};

use group::{join_name, join_uri, normalize_prefix};
use table::DispatchTable;

pub use group::Group;
pub use endpoint::{Endpoint, Handler, HandlerFuture, IntoHandlerResult, handler};
pub use pattern::PatternError;
pub use route::{Route, RouteHandle};
pub use table::RouteMatch;

/// Route registry and dispatcher.
///
/// Routes capture the middleware stack that is active when they are registered;
/// later changes to the stack never reach routes that already exist.
#[derive(Debug)]
pub struct Router {
    routes: Vec<Route>,
    // Global middleware plus that of every enclosing group, outermost first.
    stack: Vec<MiddlewareRef>,
    registry: Arc<Registry>,
    table: OnceLock<std::result::Result<DispatchTable, PatternError>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// A router with an empty [`Registry`]; only inline handlers and middleware
    /// instances can be used.
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// A router that resolves named middleware, handlers, and controllers through
    /// `registry`.
    pub fn with_registry(registry: impl Into<Arc<Registry>>) -> Self {
        Self {
            routes: Vec::new(),
            stack: Vec::new(),
            registry: registry.into(),
            table: OnceLock::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn get(&mut self, uri: &str, endpoint: impl Into<Endpoint>) -> RouteHandle<'_> {
        self.add_route(Method::Get, uri, endpoint)
    }

    pub fn post(&mut self, uri: &str, endpoint: impl Into<Endpoint>) -> RouteHandle<'_> {
        self.add_route(Method::Post, uri, endpoint)
    }

    pub fn put(&mut self, uri: &str, endpoint: impl Into<Endpoint>) -> RouteHandle<'_> {
        self.add_route(Method::Put, uri, endpoint)
    }

    pub fn delete(&mut self, uri: &str, endpoint: impl Into<Endpoint>) -> RouteHandle<'_> {
        self.add_route(Method::Delete, uri, endpoint)
    }

    pub fn patch(&mut self, uri: &str, endpoint: impl Into<Endpoint>) -> RouteHandle<'_> {
        self.add_route(Method::Patch, uri, endpoint)
    }

    pub fn options(&mut self, uri: &str, endpoint: impl Into<Endpoint>) -> RouteHandle<'_> {
        self.add_route(Method::Options, uri, endpoint)
    }

    /// Registers `endpoint` for every method in [`Method::ANY`]. The returned
    /// handle applies to all of the resulting routes.
    pub fn any(&mut self, uri: &str, endpoint: impl Into<Endpoint>) -> RouteHandle<'_> {
        let endpoint = endpoint.into();
        let start = self.routes.len();
        for method in Method::ANY {
            self.push(method, uri, endpoint.clone());
        }
        self.invalidate();
        RouteHandle::new(&mut self.routes[start..])
    }

    /// Registers a single route carrying the currently active middleware stack.
    pub fn add_route(
        &mut self,
        method: Method,
        uri: &str,
        endpoint: impl Into<Endpoint>,
    ) -> RouteHandle<'_> {
        self.push(method, uri, endpoint.into());
        self.invalidate();
        let start = self.routes.len() - 1;
        RouteHandle::new(&mut self.routes[start..])
    }

    fn push(&mut self, method: Method, uri: &str, endpoint: Endpoint) {
        let uri = join_uri("", uri);
        debug!(%method, %uri, endpoint = %endpoint.describe(), "route registered");
        self.routes
            .push(Route::new(method, uri, endpoint, self.stack.clone()));
    }

    /// Adds middleware to every route registered after this call, outside any
    /// group or route middleware those routes get.
    pub fn global_middleware(&mut self, middleware: impl IntoMiddlewareList) -> &mut Self {
        self.stack.extend(middleware.into_middleware_list());
        self
    }

    /// Registers routes that share a prefix, middleware, and name prefix.
    ///
    /// `register` receives a fresh router. When it returns, each collected route
    /// gets the group prefix in front of its URI, the active stack (including the
    /// group's middleware) in front of its own middleware, and the group name in
    /// front of its name. The stack is then restored, so routes registered after
    /// the group do not see the group's middleware.
    pub fn group<F>(&mut self, attributes: impl Into<Group>, register: F) -> &mut Self
    where
        F: FnOnce(&mut Router),
    {
        let group = attributes.into();
        let saved = self.stack.clone();
        self.stack.extend(group.middleware.iter().cloned());

        let mut nested = Router::with_registry(Arc::clone(&self.registry));
        register(&mut nested);

        let prefix = normalize_prefix(&group.prefix);
        let count = nested.routes.len();
        for mut route in nested.routes {
            route.uri = join_uri(&prefix, &route.uri);
            let own = std::mem::take(&mut route.middleware);
            route.middleware = self.stack.iter().cloned().chain(own).collect();
            route.name = join_name(&group.name, route.name.as_deref());
            self.routes.push(route);
        }

        self.stack = saved;
        self.invalidate();
        debug!(prefix = %prefix, name = %group.name, routes = count, "route group merged");
        self
    }

    /// Registered routes in registration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The most recently registered route named `name`.
    pub fn route_by_name(&self, name: &str) -> Option<&Route> {
        self.routes.iter().rev().find(|r| r.name() == Some(name))
    }

    /// Builds the path of a named route.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownRouteName`], [`Error::MissingRouteParameter`], or
    /// [`Error::InvalidPattern`] when the route's own pattern does not compile.
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String> {
        let route = self.route_by_name(name).ok_or_else(|| Error::UnknownRouteName {
            name: name.to_owned(),
        })?;
        let pattern = pattern::Pattern::parse(route.uri())?;
        pattern
            .build(|key| {
                params
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| (*v).to_owned())
            })
            .map_err(|param| Error::MissingRouteParameter {
                name: name.to_owned(),
                param: param.to_owned(),
            })
    }

    /// Compiles the dispatch table now instead of on the first request.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPattern`] for the first route whose pattern does not compile.
    pub fn compile(&self) -> Result<()> {
        self.table().map(|_| ())
    }

    /// Looks up `method` and `path` without running anything.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<RouteMatch<'_>> {
        Ok(self.table()?.lookup(method, path))
    }

    /// Routes `request` and runs the matched route's pipeline.
    ///
    /// Misses are ordinary responses: `404 Not Found`, or `405 Method Not Allowed`
    /// with an `Allow` header.
    ///
    /// # Errors
    ///
    /// Configuration errors (an invalid pattern, an unresolvable middleware or
    /// endpoint) and whatever the pipeline itself returns. Nothing is converted
    /// into a response here.
    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        let (route, params) = match self.resolve(request.method(), request.path())? {
            RouteMatch::Found { route, params } => (route, params),
            RouteMatch::MethodNotAllowed { allowed } => {
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                debug!(method = %request.method(), path = %request.path(), %allow, "method not allowed");
                return Ok(Response::status_page(StatusCode::MethodNotAllowed).header("Allow", allow));
            }
            RouteMatch::NotFound => {
                debug!(method = %request.method(), path = %request.path(), "no route matched");
                return Ok(Response::status_page(StatusCode::NotFound));
            }
        };

        let endpoint = self.registry.resolve_endpoint(route.endpoint())?;
        let chain = route
            .middleware()
            .iter()
            .map(|m| m.resolve(&self.registry))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            method = %request.method(),
            path = %request.path(),
            route = %route.uri(),
            middleware = chain.len(),
            "route matched"
        );

        Next::new(chain, endpoint)
            .run(Context::with_params(request, params))
            .await
    }

    fn table(&self) -> Result<&DispatchTable> {
        self.table
            .get_or_init(|| {
                let compiled = DispatchTable::compile(&self.routes);
                if let Ok(table) = &compiled {
                    debug!(
                        static_routes = table.static_count(),
                        dynamic_routes = table.dynamic_count(),
                        "dispatch table compiled"
                    );
                }
                compiled
            })
            .as_ref()
            .map_err(|e| Error::InvalidPattern(e.clone()))
    }

    fn invalidate(&mut self) {
        self.table.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ok(body: &'static str) -> Handler {
        handler(move |_ctx| async move { Response::new(StatusCode::Ok).body(body) })
    }

    fn request(method: &str, path: &str) -> Request {
        Request::new(method, path)
    }

    fn tag(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> MiddlewareRef {
        let log = Arc::clone(log);
        MiddlewareRef::from_fn(move |ctx, next| {
            log.lock().unwrap().push(name);
            next.run(ctx)
        })
    }

    #[test]
    fn router_starts_empty() {
        let router = Router::default();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn registration_methods_record_method_and_uri() {
        let mut router = Router::new();
        router.get("/a", ok("a"));
        router.post("b", ok("b"));
        router.put("/c/", ok("c"));
        router.delete("/d", ok("d"));
        router.patch("/e", ok("e"));
        router.options("/f", ok("f"));

        let listed: Vec<_> = router
            .routes()
            .iter()
            .map(|r| (r.method().as_str().to_owned(), r.uri().to_owned()))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("GET".into(), "/a".into()),
                ("POST".into(), "/b".into()),
                ("PUT".into(), "/c/".into()),
                ("DELETE".into(), "/d".into()),
                ("PATCH".into(), "/e".into()),
                ("OPTIONS".into(), "/f".into()),
            ]
        );
    }

    #[test]
    fn any_registers_six_methods_and_handle_applies_to_all() {
        let mut router = Router::new();
        router.any("/hook", ok("hook")).name("hook").middleware("audit");
        assert_eq!(router.len(), 6);
        assert!(router.routes().iter().all(|r| r.name() == Some("hook")));
        assert!(router.routes().iter().all(|r| r.middleware().len() == 1));
        assert!(!router.routes().iter().any(|r| r.method() == &Method::Head));
    }

    #[test]
    fn nested_groups_compose_prefix_and_name() {
        let mut router = Router::new();
        router.group(Group::new().prefix("api/").name("api."), |api| {
            api.group(Group::new().prefix("/v1").name("v1"), |v1| {
                v1.group("users", |users| {
                    users.get("/{id}", ok("show")).name("show");
                    users.get("/", ok("index"));
                });
            });
        });

        let uris: Vec<_> = router.routes().iter().map(Route::uri).collect();
        assert_eq!(uris, vec!["/api/v1/users/{id}", "/api/v1/users"]);
        assert_eq!(router.routes()[0].name(), Some("api.v1.show"));
        assert_eq!(router.routes()[1].name(), Some("api.v1"));
    }

    #[test]
    fn middleware_order_is_global_then_groups_then_route() {
        let mut router = Router::new();
        router.global_middleware("global");
        router.group(Group::new().middleware("outer"), |outer| {
            outer.group(Group::new().middleware(["inner", "inner2"]), |inner| {
                inner.get("/x", ok("x")).middleware("route");
            });
        });

        let names: Vec<_> = router.routes()[0]
            .middleware()
            .iter()
            .map(MiddlewareRef::describe)
            .collect();
        assert_eq!(names, vec!["global", "outer", "inner", "inner2", "route"]);
    }

    #[test]
    fn group_middleware_does_not_leak_past_the_group() {
        let mut router = Router::new();
        router.group(Group::new().middleware("auth"), |g| {
            g.get("/private", ok("private"));
        });
        router.get("/public", ok("public"));

        assert_eq!(router.routes()[0].middleware().len(), 1);
        assert!(router.routes()[1].middleware().is_empty());
    }

    #[test]
    fn global_middleware_only_reaches_later_routes() {
        let mut router = Router::new();
        router.get("/before", ok("before"));
        router.global_middleware("log");
        router.get("/after", ok("after"));

        assert!(router.routes()[0].middleware().is_empty());
        assert_eq!(router.routes()[1].middleware().len(), 1);
    }

    #[test]
    fn url_for_fills_parameters() {
        let mut router = Router::new();
        router.group(Group::new().prefix("users").name("users"), |users| {
            users.get(r"/{id:\d+}/posts/{post}", ok("post")).name("post");
        });

        assert_eq!(
            router.url_for("users.post", &[("id", "7"), ("post", "intro")]).unwrap(),
            "/users/7/posts/intro"
        );
        assert!(matches!(
            router.url_for("users.post", &[("id", "7")]),
            Err(Error::MissingRouteParameter { param, .. }) if param == "post"
        ));
        assert!(matches!(
            router.url_for("nope", &[]),
            Err(Error::UnknownRouteName { .. })
        ));
    }

    #[test]
    fn compile_reports_invalid_patterns() {
        let mut router = Router::new();
        router.get("/ok", ok("ok"));
        assert!(router.compile().is_ok());
        router.get("/broken/{id", ok("broken"));
        assert!(matches!(router.compile(), Err(Error::InvalidPattern(_))));
    }

    #[tokio::test]
    async fn dispatch_passes_params_to_the_handler() {
        let mut router = Router::new();
        router.get(
            "/users/{id}",
            handler(|ctx| async move {
                let id = ctx.param("id").unwrap_or_default().to_owned();
                Response::new(StatusCode::Ok).body(id)
            }),
        );

        let response = router.dispatch(request("GET", "/users/42")).await.unwrap();
        assert_eq!(response.text(), "42");
    }

    #[tokio::test]
    async fn dispatch_misses_are_404_and_405() {
        let mut router = Router::new();
        router.get("/users", ok("index"));
        router.post("/users", ok("store"));

        let missing = router.dispatch(request("GET", "/nope")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NotFound);
        assert_eq!(missing.text(), "404 Not Found");

        let wrong = router.dispatch(request("DELETE", "/users")).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::MethodNotAllowed);
        assert_eq!(wrong.headers().get("allow"), Some("GET, POST"));
    }

    #[tokio::test]
    async fn routes_added_after_dispatch_are_visible() {
        let mut router = Router::new();
        router.get("/first", ok("first"));
        let before = router.dispatch(request("GET", "/second")).await.unwrap();
        assert_eq!(before.status(), StatusCode::NotFound);

        router.get("/second", ok("second"));
        let after = router.dispatch(request("GET", "/second")).await.unwrap();
        assert_eq!(after.text(), "second");
    }

    #[tokio::test]
    async fn dispatch_runs_route_middleware_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        router.global_middleware(tag(&log, "global"));
        router.group(Group::new().middleware(tag(&log, "group")), |g| {
            g.get("/x", ok("x")).middleware(tag(&log, "route"));
        });

        router.dispatch(request("GET", "/x")).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["global", "group", "route"]);
    }

    #[tokio::test]
    async fn unresolvable_middleware_is_an_error_not_a_response() {
        let mut router = Router::new();
        router.get("/x", ok("x")).middleware("missing");

        let result = router.dispatch(request("GET", "/x")).await;
        assert!(matches!(result, Err(Error::UnresolvedMiddleware { name }) if name == "missing"));
    }

    #[tokio::test]
    async fn named_middleware_resolves_through_the_registry() {
        let mut registry = Registry::new();
        registry.middleware_instance("stamp", StampMiddleware);
        let mut router = Router::with_registry(registry);
        router.get("/x", ok("x")).middleware("stamp");

        let response = router.dispatch(request("GET", "/x")).await.unwrap();
        assert_eq!(response.headers().get("x-stamp"), Some("1"));
    }

    struct StampMiddleware;

    impl crate::middleware::Middleware for StampMiddleware {
        fn handle(&self, ctx: Context, next: Next) -> HandlerFuture {
            Box::pin(async move {
                let mut response = next.run(ctx).await?;
                response.set_header("X-Stamp", "1");
                Ok(response)
            })
        }
    }
}

use crate::Method;
use crate::middleware::{IntoMiddlewareList, MiddlewareRef};

use super::endpoint::Endpoint;

/// One method + URI pattern bound to an endpoint.
///
/// The middleware list is stored in execution order, outermost first: global and
/// group middleware ahead of anything attached to the route itself.
#[derive(Debug, Clone)]
pub struct Route {
    pub(crate) method: Method,
    pub(crate) uri: String,
    pub(crate) endpoint: Endpoint,
    pub(crate) middleware: Vec<MiddlewareRef>,
    pub(crate) name: Option<String>,
}

impl Route {
    pub(crate) fn new(
        method: Method,
        uri: String,
        endpoint: Endpoint,
        middleware: Vec<MiddlewareRef>,
    ) -> Self {
        Self {
            method,
            uri,
            endpoint,
            middleware,
            name: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The URI pattern, with every enclosing group prefix applied.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn middleware(&self) -> &[MiddlewareRef] {
        &self.middleware
    }

    /// The fully qualified name (`"api.users.show"`), if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Returned by registration calls to attach route-level middleware or a name.
///
/// [`Router::any`](super::Router::any) registers one route per method; the
/// handle then applies to all of them.
pub struct RouteHandle<'a> {
    routes: &'a mut [Route],
}

impl<'a> RouteHandle<'a> {
    pub(crate) fn new(routes: &'a mut [Route]) -> Self {
        Self { routes }
    }

    /// Appends middleware after everything inherited from groups, so it runs
    /// closest to the endpoint.
    pub fn middleware(self, middleware: impl IntoMiddlewareList) -> Self {
        let list = middleware.into_middleware_list();
        for route in self.routes.iter_mut() {
            route.middleware.extend(list.iter().cloned());
        }
        self
    }

    /// Names the route. Inside a group the group's name is prepended when the
    /// group closes.
    pub fn name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        for route in self.routes.iter_mut() {
            route.name = Some(name.clone());
        }
        self
    }
}

//! The compiled lookup structure behind [`Router::resolve`](super::Router::resolve).
//!
//! Static patterns live in a hash map keyed by path. Patterns with placeholders
//! are kept in first-registration order and tried one by one. Within each
//! pattern, routes are keyed by method, so a later registration for the same
//! method and pattern replaces the earlier one.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::Method;
use crate::context::PathParams;

use super::pattern::{Pattern, PatternError, normalize_path};
use super::route::Route;

type MethodMap = BTreeMap<Method, Arc<Route>>;

/// Outcome of looking up a method and path.
#[derive(Debug)]
pub enum RouteMatch<'a> {
    Found {
        route: &'a Route,
        params: PathParams,
    },
    /// The path exists under other methods, listed in a stable order.
    MethodNotAllowed { allowed: Vec<Method> },
    NotFound,
}

#[derive(Debug, Default)]
pub(crate) struct DispatchTable {
    static_routes: HashMap<String, MethodMap>,
    dynamic_routes: Vec<(Pattern, MethodMap)>,
}

impl DispatchTable {
    pub(crate) fn compile(routes: &[Route]) -> Result<Self, PatternError> {
        let mut table = Self::default();

        for route in routes {
            let pattern = Pattern::parse(route.uri())?;
            let route = Arc::new(route.clone());

            if pattern.is_static() {
                table
                    .static_routes
                    .entry(pattern.source().to_owned())
                    .or_default()
                    .insert(route.method.clone(), route);
                continue;
            }

            match table
                .dynamic_routes
                .iter_mut()
                .find(|(existing, _)| existing.source() == pattern.source())
            {
                Some((_, methods)) => {
                    methods.insert(route.method.clone(), route);
                }
                None => {
                    let mut methods = MethodMap::new();
                    methods.insert(route.method.clone(), route);
                    table.dynamic_routes.push((pattern, methods));
                }
            }
        }

        Ok(table)
    }

    pub(crate) fn static_count(&self) -> usize {
        self.static_routes.values().map(BTreeMap::len).sum()
    }

    pub(crate) fn dynamic_count(&self) -> usize {
        self.dynamic_routes.iter().map(|(_, m)| m.len()).sum()
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let path = normalize_path(path);

        if let Some(found) = self.find(method, path) {
            return found;
        }
        if *method == Method::Head {
            if let Some(found) = self.find(&Method::Get, path) {
                return found;
            }
        }

        let mut allowed = BTreeSet::new();
        if let Some(methods) = self.static_routes.get(path) {
            allowed.extend(methods.keys().cloned());
        }
        for (pattern, methods) in &self.dynamic_routes {
            if pattern.matches(path).is_some() {
                allowed.extend(methods.keys().cloned());
            }
        }

        if allowed.is_empty() {
            RouteMatch::NotFound
        } else {
            RouteMatch::MethodNotAllowed {
                allowed: allowed.into_iter().collect(),
            }
        }
    }

    fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        if let Some(route) = self.static_routes.get(path).and_then(|m| m.get(method)) {
            return Some(RouteMatch::Found {
                route,
                params: PathParams::new(),
            });
        }

        self.dynamic_routes.iter().find_map(|(pattern, methods)| {
            let route = methods.get(method)?;
            let params = pattern.matches(path)?;
            Some(RouteMatch::Found { route, params })
        })
    }
}

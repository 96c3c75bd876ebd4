use crate::middleware::{IntoMiddlewareList, MiddlewareRef};

/// Attributes shared by every route registered inside [`Router::group`](super::Router::group).
///
/// A bare string converts into a prefix-only group:
///
/// ```rust
/// use waypoint::router::Group;
///
/// let api = Group::new().prefix("api").middleware(["auth", "throttle"]).name("api");
/// let users: Group = "/users".into();
/// # let _ = (api, users);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub(crate) prefix: String,
    pub(crate) middleware: Vec<MiddlewareRef>,
    pub(crate) name: String,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn middleware(mut self, middleware: impl IntoMiddlewareList) -> Self {
        self.middleware.extend(middleware.into_middleware_list());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl From<&str> for Group {
    fn from(prefix: &str) -> Self {
        Self::new().prefix(prefix)
    }
}

impl From<String> for Group {
    fn from(prefix: String) -> Self {
        Self::new().prefix(prefix)
    }
}

/// `"users/"`, `"/users"` and `"users"` all become `"/users"`; an empty prefix stays empty.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Joins a normalized prefix and a route URI with exactly one slash between them.
pub(crate) fn join_uri(prefix: &str, uri: &str) -> String {
    let uri = uri.trim().trim_start_matches('/');
    match (prefix.is_empty(), uri.is_empty()) {
        (true, true) => "/".to_owned(),
        (false, true) => prefix.to_owned(),
        _ => format!("{prefix}/{uri}"),
    }
}

/// `group.route`, or whichever half is present.
pub(crate) fn join_name(group: &str, route: Option<&str>) -> Option<String> {
    let group = group.trim_end_matches('.');
    match (group.is_empty(), route) {
        (true, route) => route.map(str::to_owned),
        (false, None) => Some(group.to_owned()),
        (false, Some(route)) => Some(format!("{group}.{route}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_normalize_to_one_leading_slash() {
        assert_eq!(normalize_prefix("users"), "/users");
        assert_eq!(normalize_prefix("/users/"), "/users");
        assert_eq!(normalize_prefix("//api/v1//"), "/api/v1");
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
    }

    #[test]
    fn uris_join_without_doubled_or_missing_slashes() {
        assert_eq!(join_uri("/users", "/{id}"), "/users/{id}");
        assert_eq!(join_uri("/users", "{id}"), "/users/{id}");
        assert_eq!(join_uri("/users", "/"), "/users");
        assert_eq!(join_uri("/users", ""), "/users");
        assert_eq!(join_uri("", "ping"), "/ping");
        assert_eq!(join_uri("", "/"), "/");
    }

    #[test]
    fn names_combine_with_a_dot() {
        assert_eq!(join_name("api", Some("users")).as_deref(), Some("api.users"));
        assert_eq!(join_name("api.", Some("users")).as_deref(), Some("api.users"));
        assert_eq!(join_name("api", None).as_deref(), Some("api"));
        assert_eq!(join_name("", Some("users")).as_deref(), Some("users"));
        assert_eq!(join_name("", None), None);
    }
}

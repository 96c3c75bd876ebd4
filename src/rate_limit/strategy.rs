//! How a request is mapped to a rate-limit identifier.

use std::fmt;

use crate::context::Context;

/// Derives the bucket identifier for a request.
pub trait IdentifierStrategy: Send + Sync {
    fn identify(&self, ctx: &Context) -> String;
}

/// The authenticated user's id, placed in the request extensions by whatever
/// middleware authenticated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn ip_identifier(ctx: &Context) -> String {
    match ctx.request().client_ip() {
        Some(ip) => format!("ip:{ip}"),
        None => "ip:unknown".to_owned(),
    }
}

/// `ip:<client address>`, or `ip:unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpStrategy;

impl IdentifierStrategy for IpStrategy {
    fn identify(&self, ctx: &Context) -> String {
        ip_identifier(ctx)
    }
}

/// `user:<id>` for authenticated requests, the client IP otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserStrategy;

impl IdentifierStrategy for UserStrategy {
    fn identify(&self, ctx: &Context) -> String {
        match ctx.extensions().get::<UserId>() {
            Some(user) if !user.0.is_empty() => format!("user:{user}"),
            _ => ip_identifier(ctx),
        }
    }
}

/// `api_key:<X-API-Key header>`, the client IP when the header is absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiKeyStrategy;

impl IdentifierStrategy for ApiKeyStrategy {
    fn identify(&self, ctx: &Context) -> String {
        match ctx.request().headers().get("x-api-key") {
            Some(key) if !key.is_empty() => format!("api_key:{key}"),
            _ => ip_identifier(ctx),
        }
    }
}

/// Joins the identifiers of several strategies with `|`.
#[derive(Default)]
pub struct CompositeStrategy {
    strategies: Vec<Box<dyn IdentifierStrategy>>,
}

impl CompositeStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, strategy: impl IdentifierStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }
}

impl IdentifierStrategy for CompositeStrategy {
    fn identify(&self, ctx: &Context) -> String {
        self.strategies
            .iter()
            .map(|s| s.identify(ctx))
            .collect::<Vec<_>>()
            .join("|")
    }
}

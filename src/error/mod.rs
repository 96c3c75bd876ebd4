//! Crate-level error type for dispatch, configuration, and handler failures.
//!
//! Routing misses (404/405) and rate-limit denials are ordinary responses, never
//! errors. What ends up here is either a programmer/configuration mistake (an
//! unresolvable middleware key, a malformed route pattern) or a failure raised by
//! a handler or middleware, which the router propagates untouched.

use thiserror::Error;

use crate::cache::CacheError;
use crate::router::PatternError;

/// Boxed error type handlers may return through [`Error::Handler`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`Router::dispatch`](crate::router::Router::dispatch) and friends.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no middleware registered under `{name}`")]
    UnresolvedMiddleware { name: String },

    #[error("no handler registered under `{name}`")]
    UnresolvedHandler { name: String },

    #[error("no controller registered under `{name}`")]
    UnresolvedController { name: String },

    #[error("controller `{controller}` has no action `{action}`")]
    UnresolvedAction { controller: String, action: String },

    #[error(transparent)]
    InvalidPattern(#[from] PatternError),

    #[error("no route named `{name}`")]
    UnknownRouteName { name: String },

    #[error("route `{name}` requires parameter `{param}`")]
    MissingRouteParameter { name: String, param: String },

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handler error: {0}")]
    Handler(#[source] BoxError),
}

impl Error {
    /// Wraps an arbitrary failure raised inside a handler or middleware.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    /// `true` for errors caused by how the application was wired rather than by
    /// anything the request did.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedMiddleware { .. }
                | Self::UnresolvedHandler { .. }
                | Self::UnresolvedController { .. }
                | Self::UnresolvedAction { .. }
                | Self::InvalidPattern(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

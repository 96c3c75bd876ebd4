//! # waypoint
//!
//! An async HTTP/1.1 micro-framework: grouped routing with inherited prefixes,
//! middleware and names, ordered middleware pipelines, and token-bucket rate
//! limiting over a pluggable cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use waypoint::config::AppConfig;
//! use waypoint::middleware::{LoggerMiddleware, MiddlewareRef};
//! use waypoint::router::{Group, Router, handler};
//! use waypoint::{Response, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::from_env()?;
//!
//!     let mut router = Router::new();
//!     router.global_middleware(MiddlewareRef::instance(LoggerMiddleware));
//!     router.group(Group::new().prefix("/api").name("api."), |api| {
//!         api.get("/users/{id:\\d+}", handler(|ctx| async move {
//!             let id = ctx.param("id").unwrap_or_default().to_owned();
//!             Response::new(StatusCode::Ok).body(id)
//!         }))
//!         .name("users.show");
//!     });
//!
//!     let server = Server::bind(&config.server.addr).await?;
//!     server.serve(Arc::new(router), &config).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod middleware;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod security;
pub mod server;

pub use error::{Error, Result};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};

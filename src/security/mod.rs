//! Security middleware: CORS and request throttling.
//!
//! - [`CorsMiddleware`] injects `Access-Control-*` headers and short-circuits
//!   `OPTIONS` preflights.
//! - [`ThrottleMiddleware`] rate-limits requests through a
//!   [`RateLimiter`](crate::rate_limit::RateLimiter), answering `429` once a
//!   client's bucket is empty.

mod cors;
mod throttle;

pub use cors::CorsMiddleware;
pub use throttle::ThrottleMiddleware;

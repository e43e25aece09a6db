//! HTTP service surface: application wiring, routing, and the cross-cutting
//! concerns (rate limiting, connection tracking, error envelopes) every
//! handler shares (`spec.md` §4.6, §6).
mod app;
mod connections;
mod error_response;
mod rate_limit;
mod routes;
mod sse;

pub use app::{App, AppState};
pub use connections::ConnectionRegistry;
pub use error_response::{ErrorEnvelope, HttpError};
pub use rate_limit::{RateLimitStatus, RateLimiter};
pub use routes::router;

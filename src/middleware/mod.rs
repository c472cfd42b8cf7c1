mod auth;
mod client;
mod error_handler;
mod rate_limit;
mod two_factor;

pub use auth::{auth_middleware, require_staff, revoke};
pub use client::{ClientMeta, client_ip};
pub use error_handler::log_errors;
pub use rate_limit::{RateLimiter, rate_limit};
pub use two_factor::{is_exempt, safe_next, two_factor_gate, verification_url};

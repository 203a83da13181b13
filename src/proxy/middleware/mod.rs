//! Connection admission middleware

mod rate_limit;

pub use rate_limit::RateLimiter;

//! Tollgate - Inspecting Reverse Proxy
//!
//! Accepts HTTP connections one at a time, applies lightweight security
//! heuristics and forwards approved requests unmodified to a fixed upstream,
//! streaming the upstream's response back to the client.
//!
//! ## Features
//!
//! - Sliding-window denial-of-service detection
//! - Keyword-based SQL-injection detection
//! - Multipart file uploads re-encoded and forwarded per file
//! - Console reporting of every request, response chunk and anomaly

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;

pub use config::Config;
pub use error::{Result, TollgateError};

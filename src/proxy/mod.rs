//! Inspecting proxy implementation
//!
//! This module provides the proxy functionality including:
//! - Sequential accept loop with per-connection inspection
//! - Sliding-window rate limiting
//! - SQL-keyword content inspection
//! - Verbatim upstream relay with streamed responses
//! - Multipart upload re-encoding

pub mod inspector;
pub mod middleware;
pub mod multipart;
pub mod relay;
pub mod reporter;
pub mod server;
pub mod transport;

pub use inspector::{ContentInspector, RequestClass};
pub use middleware::RateLimiter;
pub use multipart::{MultipartBoundary, MultipartForwarder};
pub use relay::UpstreamRelay;
pub use reporter::{BroadcastReporter, ConsoleReporter, Reporter};
pub use server::{ConnectionOutcome, InspectingProxy};
pub use transport::{TcpConnector, UpstreamConnector};

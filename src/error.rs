use thiserror::Error;

/// Unified error type for the Tollgate proxy
#[derive(Error, Debug)]
pub enum TollgateError {
    // Listener errors
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Accept failed: {0}")]
    Accept(#[source] std::io::Error),

    // Client errors
    #[error("Failed to receive request from {client}: {message}")]
    ClientRead { client: String, message: String },

    #[error("Empty request from {client}")]
    EmptyRequest { client: String },

    #[error("Failed to send response to client: {0}")]
    ClientWrite(String),

    // Inspection rejections
    #[error("Possible DoS attack detected from {client}")]
    RateLimitExceeded { client: String },

    #[error("SQL injection detected in request from {client} (keyword: {keyword})")]
    SuspiciousContent {
        client: String,
        keyword: &'static str,
    },

    // Upstream errors
    #[error("Failed to connect to upstream {addr}: {message}")]
    UpstreamConnect { addr: String, message: String },

    #[error("Failed to send request to upstream: {0}")]
    UpstreamSend(String),

    #[error("Failed to receive response from upstream: {0}")]
    UpstreamReceive(String),

    // Multipart handling
    #[error("No multipart boundary found in request")]
    MissingBoundary,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations
pub type Result<T> = std::result::Result<T, TollgateError>;

/// How far a failure reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Terminates the proxy
    Fatal,
    /// Logged, the client connection is closed and the accept loop continues
    Connection,
    /// Swallowed without surfacing anything to the client
    Silent,
}

impl TollgateError {
    /// Classify this error into the proxy's failure taxonomy
    pub fn scope(&self) -> ErrorScope {
        match self {
            TollgateError::Bind { .. }
            | TollgateError::Accept(_)
            | TollgateError::InvalidConfig(_) => ErrorScope::Fatal,

            TollgateError::ClientRead { .. }
            | TollgateError::EmptyRequest { .. }
            | TollgateError::ClientWrite(_)
            | TollgateError::RateLimitExceeded { .. }
            | TollgateError::SuspiciousContent { .. }
            | TollgateError::UpstreamConnect { .. }
            | TollgateError::UpstreamSend(_)
            | TollgateError::UpstreamReceive(_)
            | TollgateError::Io(_) => ErrorScope::Connection,

            TollgateError::MissingBoundary => ErrorScope::Silent,
        }
    }

    /// Check if this error should stop the proxy
    pub fn is_fatal(&self) -> bool {
        self.scope() == ErrorScope::Fatal
    }

    /// Check if this error only affects the current client connection
    pub fn is_connection_scoped(&self) -> bool {
        self.scope() == ErrorScope::Connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_scope_mapping() {
        let io = || std::io::Error::new(std::io::ErrorKind::Other, "boom");

        assert_eq!(
            TollgateError::Bind {
                addr: "127.0.0.1:80".to_string(),
                source: io(),
            }
            .scope(),
            ErrorScope::Fatal
        );
        assert_eq!(TollgateError::Accept(io()).scope(), ErrorScope::Fatal);
        assert_eq!(
            TollgateError::RateLimitExceeded {
                client: "127.0.0.1:5555".to_string()
            }
            .scope(),
            ErrorScope::Connection
        );
        assert_eq!(
            TollgateError::SuspiciousContent {
                client: "127.0.0.1:5555".to_string(),
                keyword: "drop",
            }
            .scope(),
            ErrorScope::Connection
        );
        assert_eq!(
            TollgateError::UpstreamConnect {
                addr: "127.0.0.1:5002".to_string(),
                message: "refused".to_string(),
            }
            .scope(),
            ErrorScope::Connection
        );
        assert_eq!(TollgateError::MissingBoundary.scope(), ErrorScope::Silent);
    }

    #[test]
    fn test_error_scope_helpers() {
        let err = TollgateError::UpstreamSend("reset".to_string());
        assert!(err.is_connection_scoped());
        assert!(!err.is_fatal());

        let err = TollgateError::InvalidConfig("bad".to_string());
        assert!(err.is_fatal());
        assert!(!err.is_connection_scoped());
    }

    #[test]
    fn test_error_messages_carry_client() {
        let err = TollgateError::SuspiciousContent {
            client: "10.0.0.1:4242".to_string(),
            keyword: "union",
        };
        let message = err.to_string();
        assert!(message.contains("10.0.0.1:4242"));
        assert!(message.contains("union"));
    }
}

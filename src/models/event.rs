use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a reported event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where an upstream exchange broke down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStage {
    Connect,
    Send,
    Receive,
    ForwardToClient,
}

impl RelayStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStage::Connect => "connect",
            RelayStage::Send => "send",
            RelayStage::Receive => "receive",
            RelayStage::ForwardToClient => "forward_to_client",
        }
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ServerStarted { addr: String },
    RequestReceived { client: String, text: String },
    ResponseChunk { text: String, bytes: usize },
    RateLimited { client: String },
    SqlInjection { client: String, keyword: String },
    ClientReadFailed { client: String, message: String },
    EmptyRequest { client: String },
    UpstreamFailure { client: String, stage: RelayStage, message: String },
    UploadPartForwarded { client: String, filename: String, bytes: usize },
    UploadSkipped { client: String, reason: String },
}

/// One line for the console reporter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl InspectionEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn level(&self) -> EventLevel {
        match self.kind {
            EventKind::ServerStarted { .. }
            | EventKind::RequestReceived { .. }
            | EventKind::ResponseChunk { .. }
            | EventKind::UploadPartForwarded { .. } => EventLevel::Info,

            EventKind::RateLimited { .. }
            | EventKind::SqlInjection { .. }
            | EventKind::EmptyRequest { .. }
            | EventKind::UploadSkipped { .. } => EventLevel::Warning,

            EventKind::ClientReadFailed { .. } | EventKind::UpstreamFailure { .. } => {
                EventLevel::Error
            }
        }
    }

    /// Anomalies are the events the heuristics raise against a client
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self.kind,
            EventKind::RateLimited { .. } | EventKind::SqlInjection { .. }
        )
    }

    /// Human-readable single-line summary
    pub fn summary(&self) -> String {
        match &self.kind {
            EventKind::ServerStarted { addr } => format!("Server listening on {}...", addr),
            EventKind::RequestReceived { client, text } => {
                format!("Request from {} ({} bytes)", client, text.len())
            }
            EventKind::ResponseChunk { bytes, .. } => format!("Upstream response chunk ({} bytes)", bytes),
            EventKind::RateLimited { client } => format!("Possible DoS attack detected from: {}", client),
            EventKind::SqlInjection { client, keyword } => format!(
                "SQL Injection detected in request from: {} (keyword: {})",
                client, keyword
            ),
            EventKind::ClientReadFailed { client, message } => {
                format!("Failed to receive request from {}: {}", client, message)
            }
            EventKind::EmptyRequest { client } => format!("Empty request from {}", client),
            EventKind::UpstreamFailure { client, stage, message } => format!(
                "Upstream {} failed for {}: {}",
                stage.as_str(),
                client,
                message
            ),
            EventKind::UploadPartForwarded { client, filename, bytes } => format!(
                "Forwarded upload {} from {} ({} bytes)",
                filename, client, bytes
            ),
            EventKind::UploadSkipped { client, reason } => {
                format!("Upload from {} skipped: {}", client, reason)
            }
        }
    }
}

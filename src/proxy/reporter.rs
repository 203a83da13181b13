//! Console reporting of proxy activity
//!
//! Components hand [`InspectionEvent`]s to a [`Reporter`]; the binary renders
//! them through `tracing`, observers can subscribe to a broadcast channel.

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::models::{EventKind, EventLevel, InspectionEvent};

const RULER: &str = "=============================================================";

/// Receives human-readable activity from the proxy
pub trait Reporter: Send + Sync {
    fn report(&self, event: &InspectionEvent);

    fn emit(&self, kind: EventKind) {
        self.report(&InspectionEvent::new(kind));
    }
}

/// Renders events as console log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&self, event: &InspectionEvent) {
        match &event.kind {
            EventKind::RequestReceived { client, text } => {
                info!(client = %client, "Http request is:\n{}\n{}\n{}", RULER, text, RULER);
            }
            EventKind::ResponseChunk { text, .. } => {
                info!("Http response is:\n{}\n{}\n{}", RULER, text, RULER);
            }
            _ => match event.level() {
                EventLevel::Info => info!("{}", event.summary()),
                EventLevel::Warning => warn!("{}", event.summary()),
                EventLevel::Error => error!("{}", event.summary()),
            },
        }
    }
}

/// Publishes events on a broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastReporter {
    sender: broadcast::Sender<InspectionEvent>,
}

impl BroadcastReporter {
    /// Create a reporter with a bounded channel
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InspectionEvent> {
        self.sender.subscribe()
    }
}

impl Reporter for BroadcastReporter {
    fn report(&self, event: &InspectionEvent) {
        // No receivers is fine
        let _ = self.sender.send(event.clone());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bound every raw payload type must satisfy so deliveries can be cloned
/// into the dispatch engine and shared across worker tasks.
pub trait RawMessage: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> RawMessage for T {}

/// One raw payload handed over by a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery<R> {
    pub payload: R,                     // Opaque to the engine, decoded inside paths
    pub correlation_id: Option<String>, // Transport-provided id, if any
    pub received_at: DateTime<Utc>,     // When the transport picked it up
}

impl<R> Delivery<R> {
    pub fn new(payload: R) -> Self {
        Self {
            payload,
            correlation_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// How a dispatch ended, reported back to the transport on ack/nack.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    /// At least one handler signalled it handled the message.
    Handled,
    /// A path matched but no handler signalled handled.
    Unhandled,
    /// No path's filter accepted the raw message.
    Unrouted,
    /// A capability failed while processing the message.
    Faulted,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Handled => "handled",
            DispatchOutcome::Unhandled => "unhandled",
            DispatchOutcome::Unrouted => "unrouted",
            DispatchOutcome::Faulted => "faulted",
        }
    }
}

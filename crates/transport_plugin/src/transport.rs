use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Delivery, DispatchOutcome, RawMessage};

/// The one trait transport authors implement.
///
/// A transport owns the connection to whatever broker or queue feeds the
/// host and hands deliveries over one at a time. Acknowledgement is
/// optional; the default implementations do nothing, which suits
/// transports without a broker-side ack concept.
#[async_trait]
pub trait Transport<R: RawMessage>: Send + Sync {
    /// Wait for the next delivery. `Ok(None)` means the stream is closed
    /// and no further deliveries will arrive.
    async fn next(&self) -> Result<Option<Delivery<R>>, TransportError>;

    /// Confirm a delivery whose dispatch completed (handled or not).
    async fn ack(
        &self,
        _delivery: &Delivery<R>,
        _outcome: DispatchOutcome,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    /// Reject a delivery whose dispatch faulted. Requeue policy is the
    /// transport's own business.
    async fn nack(
        &self,
        _delivery: &Delivery<R>,
        _outcome: DispatchOutcome,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Errors a Transport implementation can return.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Something went wrong encoding or decoding JSON.
    #[error("JSON error: {0}")]
    Json(String),

    /// The transport is not in a state where this operation is valid.
    #[error("transport is closed")]
    Closed,

    /// A timeout occurred.
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    /// The transport returned an unspecified failure.
    #[error("transport error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> TransportError {
        TransportError::Json(err.to_string())
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(err: anyhow::Error) -> TransportError {
        TransportError::Other(err.to_string())
    }
}

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use transport_plugin::{Delivery, DispatchOutcome, RawMessage, Transport, TransportError};

/// In-memory transport backed by a bounded queue.
///
/// Tests push deliveries through the [`MockFeeder`]; dropping every feeder
/// closes the stream, so `next` returns `Ok(None)` once the queue drains
/// and a host consuming from this transport runs to completion.
pub struct MockTransport<R> {
    inbox: tokio::sync::Mutex<mpsc::Receiver<Delivery<R>>>,
    acks: Mutex<Vec<(Option<String>, DispatchOutcome)>>,
    nacks: Mutex<Vec<(Option<String>, DispatchOutcome)>>,
}

/// Push handle for a [`MockTransport`].
#[derive(Clone)]
pub struct MockFeeder<R> {
    tx: mpsc::Sender<Delivery<R>>,
}

impl<R: RawMessage> MockTransport<R> {
    pub fn new(capacity: usize) -> (Arc<Self>, MockFeeder<R>) {
        let (tx, rx) = mpsc::channel(capacity);
        let transport = Arc::new(Self {
            inbox: tokio::sync::Mutex::new(rx),
            acks: Mutex::new(Vec::new()),
            nacks: Mutex::new(Vec::new()),
        });
        (transport, MockFeeder { tx })
    }

    /// Acked deliveries so far, in ack order: (correlation id, outcome).
    pub fn acked(&self) -> Vec<(Option<String>, DispatchOutcome)> {
        self.acks.lock().expect("ack log lock").clone()
    }

    /// Nacked deliveries so far, in nack order.
    pub fn nacked(&self) -> Vec<(Option<String>, DispatchOutcome)> {
        self.nacks.lock().expect("nack log lock").clone()
    }
}

impl<R: RawMessage> MockFeeder<R> {
    /// Queue a bare payload with no correlation metadata.
    pub async fn push(&self, payload: R) -> Result<(), TransportError> {
        self.push_delivery(Delivery::new(payload)).await
    }

    pub async fn push_delivery(&self, delivery: Delivery<R>) -> Result<(), TransportError> {
        self.tx
            .send(delivery)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl<R: RawMessage> Transport<R> for MockTransport<R> {
    async fn next(&self) -> Result<Option<Delivery<R>>, TransportError> {
        Ok(self.inbox.lock().await.recv().await)
    }

    async fn ack(
        &self,
        delivery: &Delivery<R>,
        outcome: DispatchOutcome,
    ) -> Result<(), TransportError> {
        debug!(
            "mock ack: {:?} -> {}",
            delivery.correlation_id,
            outcome.as_str()
        );
        self.acks
            .lock()
            .expect("ack log lock")
            .push((delivery.correlation_id.clone(), outcome));
        Ok(())
    }

    async fn nack(
        &self,
        delivery: &Delivery<R>,
        outcome: DispatchOutcome,
    ) -> Result<(), TransportError> {
        debug!(
            "mock nack: {:?} -> {}",
            delivery.correlation_id,
            outcome.as_str()
        );
        self.nacks
            .lock()
            .expect("nack log lock")
            .push((delivery.correlation_id.clone(), outcome));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_next_delivers_in_order() {
        let (transport, feeder) = MockTransport::new(8);
        feeder.push("one".to_string()).await.expect("push one");
        feeder.push("two".to_string()).await.expect("push two");

        let first = transport.next().await.expect("next").expect("delivery");
        let second = transport.next().await.expect("next").expect("delivery");
        assert_eq!(first.payload, "one");
        assert_eq!(second.payload, "two");
    }

    #[tokio::test]
    async fn dropping_feeder_closes_the_stream() {
        let (transport, feeder) = MockTransport::new(2);
        feeder.push("last".to_string()).await.expect("push");
        drop(feeder);

        assert!(transport.next().await.expect("next").is_some());
        assert!(transport.next().await.expect("next").is_none());
    }

    #[tokio::test]
    async fn ack_and_nack_are_recorded_with_correlation() {
        let (transport, feeder) = MockTransport::new(2);
        feeder
            .push_delivery(Delivery::new("m".to_string()).with_correlation_id("c-1"))
            .await
            .expect("push");

        let delivery = transport.next().await.expect("next").expect("delivery");
        transport
            .ack(&delivery, DispatchOutcome::Handled)
            .await
            .expect("ack");
        transport
            .nack(&delivery, DispatchOutcome::Faulted)
            .await
            .expect("nack");

        assert_eq!(
            transport.acked(),
            vec![(Some("c-1".to_string()), DispatchOutcome::Handled)]
        );
        assert_eq!(
            transport.nacked(),
            vec![(Some("c-1".to_string()), DispatchOutcome::Faulted)]
        );
    }
}

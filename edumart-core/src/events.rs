use async_trait::async_trait;
use edumart_shared::SaleEvent;
use tokio::sync::broadcast;
use tracing::debug;

use crate::CoreResult;

/// Outbound sink for domain events. Publishing happens after the owning transaction commits,
/// so consumers must tolerate at-least-once delivery.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &SaleEvent) -> CoreResult<()>;
}

/// In-process fan-out used when no broker is configured, and by tests to observe events.
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<SaleEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaleEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &SaleEvent) -> CoreResult<()> {
        if self.tx.send(event.clone()).is_err() {
            debug!("No subscribers for {}", event.topic());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use edumart_shared::PaymentConfirmedEvent;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        let event = SaleEvent::PaymentConfirmed(PaymentConfirmedEvent {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            course_ids: vec![],
            paid_at: Utc::now(),
        });

        publisher.publish(&event).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = BroadcastPublisher::default();
        let event = SaleEvent::PaymentConfirmed(PaymentConfirmedEvent {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            course_ids: vec![],
            paid_at: Utc::now(),
        });
        assert!(publisher.publish(&event).await.is_ok());
    }
}

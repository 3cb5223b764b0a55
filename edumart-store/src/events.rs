use async_trait::async_trait;
use edumart_core::events::EventPublisher;
use edumart_core::{CoreError, CoreResult};
use edumart_shared::SaleEvent;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

/// Kafka sink for sale events: one topic per event type, keyed by order.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn send(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl EventPublisher for EventProducer {
    async fn publish(&self, event: &SaleEvent) -> CoreResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| CoreError::InternalError(format!("Event serialization failed: {}", e)))?;
        self.send(event.topic(), &event.key(), &payload)
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(format!("kafka: {}", e)))
    }
}

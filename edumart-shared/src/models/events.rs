use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TOPIC_PAYMENT_CONFIRMED: &str = "sale.payment.confirmed";
pub const TOPIC_PAYMENT_FAILED: &str = "sale.payment.failed";
pub const TOPIC_ORDER_SETTLED: &str = "sale.order.settled";
pub const TOPIC_ORDER_REFUNDED: &str = "sale.order.refunded";
pub const TOPIC_WALLET_TOPPED_UP: &str = "sale.wallet.topped_up";

/// Emitted once per order when it becomes paid. Enrollment and receipts hang off this.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentConfirmedEvent {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub course_ids: Vec<Uuid>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentFailedEvent {
    pub payment_id: Uuid,
    pub order_id: Option<Uuid>,
    pub response_code: Option<String>,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InstructorPayout {
    pub instructor_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrderSettledEvent {
    pub order_id: Uuid,
    pub payouts: Vec<InstructorPayout>,
    pub platform_fee: Decimal,
    pub forced: bool,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrderRefundedEvent {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WalletToppedUpEvent {
    pub wallet_id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub topped_up_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleEvent {
    PaymentConfirmed(PaymentConfirmedEvent),
    PaymentFailed(PaymentFailedEvent),
    OrderSettled(OrderSettledEvent),
    OrderRefunded(OrderRefundedEvent),
    WalletToppedUp(WalletToppedUpEvent),
}

impl SaleEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            SaleEvent::PaymentConfirmed(_) => TOPIC_PAYMENT_CONFIRMED,
            SaleEvent::PaymentFailed(_) => TOPIC_PAYMENT_FAILED,
            SaleEvent::OrderSettled(_) => TOPIC_ORDER_SETTLED,
            SaleEvent::OrderRefunded(_) => TOPIC_ORDER_REFUNDED,
            SaleEvent::WalletToppedUp(_) => TOPIC_WALLET_TOPPED_UP,
        }
    }

    /// Partition key. Events about one order land on one partition.
    pub fn key(&self) -> String {
        match self {
            SaleEvent::PaymentConfirmed(e) => e.order_id.to_string(),
            SaleEvent::PaymentFailed(e) => e
                .order_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| e.payment_id.to_string()),
            SaleEvent::OrderSettled(e) => e.order_id.to_string(),
            SaleEvent::OrderRefunded(e) => e.order_id.to_string(),
            SaleEvent::WalletToppedUp(e) => e.wallet_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_confirmed_wire_shape() {
        let order_id = Uuid::new_v4();
        let event = SaleEvent::PaymentConfirmed(PaymentConfirmedEvent {
            order_id,
            user_id: Uuid::new_v4(),
            course_ids: vec![Uuid::new_v4()],
            paid_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PAYMENT_CONFIRMED");
        assert_eq!(json["order_id"], order_id.to_string());
        assert_eq!(event.topic(), TOPIC_PAYMENT_CONFIRMED);
        assert_eq!(event.key(), order_id.to_string());
    }
}

use chrono::{DateTime, Duration, Utc};
use edumart_core::{CoreError, CoreResult};
use edumart_coupon::AppliedCoupon;
use edumart_shared::pii::Masked;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::pricing::{PriceBreakdown, PricedLine};

/// Order status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    PaymentConfirmed,
    Cancel,
    Refund,
}

impl OrderStatus {
    /// `Pending -> Paid -> Refunded`, `Pending -> Cancelled`.
    pub fn transition(self, event: OrderEvent) -> CoreResult<OrderStatus> {
        match (self, event) {
            (OrderStatus::Pending, OrderEvent::PaymentConfirmed) => Ok(OrderStatus::Paid),
            (OrderStatus::Pending, OrderEvent::Cancel) => Ok(OrderStatus::Cancelled),
            (OrderStatus::Paid, OrderEvent::Refund) => Ok(OrderStatus::Refunded),
            (from, event) => Err(CoreError::Conflict(format!(
                "Invalid order transition from {} on {:?}",
                from, event
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REFUNDED" => Ok(OrderStatus::Refunded),
            other => Err(CoreError::InternalError(format!("Unknown order status {}", other))),
        }
    }
}

/// Request metadata kept on the order as a fraud trail.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub notes: Option<String>,
}

/// The single source of truth for a purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    /// Sum of catalog prices before any coupon.
    pub subtotal: Decimal,
    pub subtotal_after_instructor_discount: Decimal,
    pub instructor_discount: Decimal,
    pub system_discount: Decimal,
    pub total_discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub applied_coupons: Vec<AppliedCoupon>,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_settled: bool,
    pub settled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub client_ip: Option<Masked<String>>,
    pub user_agent: Option<Masked<String>>,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Snapshot a price quote into a new pending order.
    pub fn from_quote(user_id: Uuid, quote: &PriceBreakdown, client: ClientContext, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            user_id,
            order_number: Self::generate_number(now),
            status: OrderStatus::Pending,
            subtotal: quote.subtotal,
            subtotal_after_instructor_discount: quote.subtotal_after_instructor_discount,
            instructor_discount: quote.instructor_discount,
            system_discount: quote.system_discount,
            total_discount: quote.total_discount,
            tax: quote.tax,
            total: quote.total,
            currency: quote.currency.clone(),
            applied_coupons: quote.applied_coupons.clone(),
            paid_at: None,
            is_settled: false,
            settled_at: None,
            refunded_at: None,
            refund_reason: None,
            client_ip: client.ip_address.map(Masked::new),
            user_agent: client.user_agent.map(Masked::new),
            notes: client.notes,
            items: quote
                .lines
                .iter()
                .map(|line| OrderItem::from_line(id, line, now))
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `ORD-yyyyMMdd-XXXXXXXX`
    pub fn generate_number(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
    }

    pub fn apply(&mut self, event: OrderEvent, now: DateTime<Utc>) -> CoreResult<()> {
        self.status = self.status.transition(event)?;
        match event {
            OrderEvent::PaymentConfirmed => self.paid_at = Some(now),
            OrderEvent::Refund => self.refunded_at = Some(now),
            OrderEvent::Cancel => {}
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn is_free(&self) -> bool {
        self.total.is_zero()
    }

    pub fn course_ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|i| i.course_id).collect()
    }

    /// Instructor earnings grouped per instructor, in a stable order.
    pub fn earnings_by_instructor(&self) -> BTreeMap<Uuid, Decimal> {
        let mut earnings = BTreeMap::new();
        for item in &self.items {
            *earnings.entry(item.instructor_id).or_insert(Decimal::ZERO) += item.instructor_earnings;
        }
        earnings
    }

    pub fn platform_fee_total(&self) -> Decimal {
        self.items.iter().map(|i| i.platform_fee_amount).sum()
    }

    /// When the hold period ends for this order, if it has been paid.
    pub fn settlement_due_at(&self, hold: Duration) -> Option<DateTime<Utc>> {
        self.paid_at.map(|paid_at| paid_at + hold)
    }

    /// Arithmetic invariants that must hold for every stored order.
    pub fn check_invariants(&self) -> CoreResult<()> {
        let broken = |what: &str| Err(CoreError::InternalError(format!("Order {}: {}", self.order_number, what)));

        if self.total_discount != self.instructor_discount + self.system_discount {
            return broken("total discount != instructor + system");
        }
        if self.total != self.subtotal - self.total_discount + self.tax {
            return broken("total != subtotal - discount + tax");
        }
        if self.total < Decimal::ZERO {
            return broken("negative total");
        }
        let lines: Decimal = self.items.iter().map(|i| i.line_total).sum();
        if lines != self.subtotal - self.total_discount {
            return broken("line totals do not add up to the discounted subtotal");
        }
        for item in &self.items {
            item.check_invariants()?;
        }
        Ok(())
    }
}

/// A course line inside an order, frozen at checkout time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub course_id: Uuid,
    pub course_title: String,
    pub course_thumbnail: Option<String>,
    pub instructor_id: Uuid,
    pub instructor_name: String,
    pub original_price: Decimal,
    pub instructor_discount: Decimal,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    /// This line's share of the order-level system discount.
    pub system_discount: Decimal,
    pub line_total: Decimal,
    pub platform_fee_percent: Decimal,
    pub platform_fee_amount: Decimal,
    pub instructor_earnings: Decimal,
    pub instructor_coupon_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    fn from_line(order_id: Uuid, line: &PricedLine, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            course_id: line.course.id,
            course_title: line.course.title.clone(),
            course_thumbnail: line.course.thumbnail_url.clone(),
            instructor_id: line.course.instructor_id,
            instructor_name: line.course.instructor_name.clone(),
            original_price: line.original_price,
            instructor_discount: line.instructor_discount,
            unit_price: line.unit_price,
            discount_percent: line.discount_percent,
            system_discount: line.system_discount,
            line_total: line.line_total,
            platform_fee_percent: line.platform_fee_percent,
            platform_fee_amount: line.platform_fee_amount,
            instructor_earnings: line.instructor_earnings,
            instructor_coupon_id: line.instructor_coupon.as_ref().map(|c| c.coupon_id),
            created_at: now,
        }
    }

    pub fn check_invariants(&self) -> CoreResult<()> {
        if self.unit_price != self.original_price - self.instructor_discount {
            return Err(CoreError::InternalError(format!(
                "Item {}: unit price != original - instructor discount",
                self.id
            )));
        }
        if self.line_total != self.platform_fee_amount + self.instructor_earnings {
            return Err(CoreError::InternalError(format!(
                "Item {}: line total != platform fee + earnings",
                self.id
            )));
        }
        if self.line_total < Decimal::ZERO || self.instructor_earnings < Decimal::ZERO {
            return Err(CoreError::InternalError(format!("Item {}: negative amounts", self.id)));
        }
        Ok(())
    }
}

use edumart_core::clock::Clock;
use edumart_core::events::EventPublisher;
use edumart_core::{CoreError, CoreResult};
use edumart_coupon::CouponService;
use edumart_shared::{OrderRefundedEvent, PaymentConfirmedEvent, SaleEvent};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::finance::refund_reversals;
use crate::models::{ClientContext, Order, OrderEvent, OrderStatus};
use crate::pricing::{CheckoutRequest, PriceBreakdown, PricingEngine};
use crate::publish_or_log;
use crate::repository::{OrderRepository, RefundPlan};

/// Order lifecycle: checkout, reads, cancellation and refunds.
pub struct OrderManager {
    orders: Arc<dyn OrderRepository>,
    pricing: Arc<PricingEngine>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl OrderManager {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        pricing: Arc<PricingEngine>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            pricing,
            publisher,
            clock,
        }
    }

    /// Price a cart without persisting anything.
    pub async fn preview(&self, user_id: Uuid, request: &CheckoutRequest) -> CoreResult<PriceBreakdown> {
        self.pricing.quote(user_id, request).await
    }

    /// Create an order from a cart. Free orders come back `Paid`; everything else is `Pending`
    /// until the gateway confirms.
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: &CheckoutRequest,
        client: ClientContext,
    ) -> CoreResult<Order> {
        let quote = self.pricing.quote(user_id, request).await?;

        let course_ids: Vec<Uuid> = quote.lines.iter().map(|l| l.course.id).collect();
        let owned = self.orders.purchased_course_ids(user_id, &course_ids).await?;
        if !owned.is_empty() {
            let titles: Vec<&str> = quote
                .lines
                .iter()
                .filter(|l| owned.contains(&l.course.id))
                .map(|l| l.course.title.as_str())
                .collect();
            return Err(CoreError::Conflict(format!(
                "Already purchased: {}",
                titles.join(", ")
            )));
        }

        let now = self.clock.now();
        let mut order = Order::from_quote(user_id, &quote, client, now);
        order.check_invariants()?;

        let usages = if order.is_free() {
            order.apply(OrderEvent::PaymentConfirmed, now)?;
            // Nothing to split, so there is nothing to hold either.
            order.is_settled = true;
            order.settled_at = Some(now);
            CouponService::plan_usages(order.id, user_id, &order.applied_coupons, now)
        } else {
            Vec::new()
        };

        self.orders.insert_order(&order, &usages).await?;
        info!(
            "Order {} created for user {}: total {} {} ({})",
            order.order_number, user_id, order.total, order.currency, order.status
        );

        if order.status == OrderStatus::Paid {
            let event = SaleEvent::PaymentConfirmed(PaymentConfirmedEvent {
                order_id: order.id,
                user_id,
                course_ids: order.course_ids(),
                paid_at: now,
            });
            publish_or_log(self.publisher.as_ref(), &event).await;
        }

        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> CoreResult<Order> {
        self.orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Order", order_id))
    }

    /// Someone else's order reads as missing.
    pub async fn get_order_for_user(&self, order_id: Uuid, user_id: Uuid) -> CoreResult<Order> {
        self.orders
            .find_order(order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| CoreError::not_found("Order", order_id))
    }

    pub async fn list_orders(&self, user_id: Uuid) -> CoreResult<Vec<Order>> {
        self.orders.list_orders_for_user(user_id).await
    }

    pub async fn cancel_order(&self, order_id: Uuid, user_id: Uuid) -> CoreResult<Order> {
        let order = self.orders.cancel_order(order_id, user_id, self.clock.now()).await?;
        info!("Order {} cancelled by its owner", order.order_number);
        Ok(order)
    }

    /// Admin refund of a paid order whose earnings are still on hold.
    pub async fn refund_order(&self, order_id: Uuid, operator: &str, reason: &str) -> CoreResult<Order> {
        if operator.trim().is_empty() || reason.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "Refunds need an operator and a reason".into(),
            ));
        }

        let order = self.get_order(order_id).await?;
        if order.status != OrderStatus::Paid {
            return Err(CoreError::Conflict(format!(
                "Order {} is {}, only paid orders can be refunded",
                order.order_number, order.status
            )));
        }
        if order.is_settled {
            return Err(CoreError::Conflict(format!(
                "Order {} is already settled",
                order.order_number
            )));
        }

        let now = self.clock.now();
        let plan = RefundPlan {
            order_id,
            reversals: refund_reversals(&order),
            operator: operator.trim().to_string(),
            reason: reason.trim().to_string(),
            refunded_at: now,
        };
        let refunded = self.orders.refund_order(&plan).await?;
        info!(
            "Order {} refunded by {}: {}",
            refunded.order_number, plan.operator, plan.reason
        );

        let event = SaleEvent::OrderRefunded(OrderRefundedEvent {
            order_id,
            user_id: refunded.user_id,
            amount: refunded.total,
            reason: plan.reason.clone(),
            refunded_at: now,
        });
        publish_or_log(self.publisher.as_ref(), &event).await;

        Ok(refunded)
    }
}

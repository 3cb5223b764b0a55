use chrono::{DateTime, Duration, Utc};
use edumart_core::clock::Clock;
use edumart_core::events::EventPublisher;
use edumart_core::{CoreError, CoreResult};
use edumart_shared::models::events::InstructorPayout;
use edumart_shared::{OrderSettledEvent, SaleEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::finance::{settlement_entries, RevenueSplit};
use crate::models::OrderStatus;
use crate::publish_or_log;
use crate::repository::{OrderRepository, SettlementOutcome, SettlementPlan, SettlementRepository};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementPolicy {
    /// Days a paid order's earnings stay pending.
    pub hold_days: i64,
    /// Orders settled per sweep.
    pub batch_size: i64,
    /// A failed order sits out of sweeps for this long, so it cannot starve the rest of the queue.
    pub failure_backoff_minutes: i64,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            hold_days: 14,
            batch_size: 100,
            failure_backoff_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementFailure {
    pub order_id: Uuid,
    pub error: String,
}

/// Result of one settlement sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub settled: usize,
    pub already_settled: usize,
    pub failures: Vec<SettlementFailure>,
}

/// Releases held earnings into available balances once the hold period is over.
pub struct SettlementEngine {
    orders: Arc<dyn OrderRepository>,
    settlements: Arc<dyn SettlementRepository>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: SettlementPolicy,
    /// Order id -> earliest time the sweep may retry it.
    backoff: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl SettlementEngine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        settlements: Arc<dyn SettlementRepository>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            orders,
            settlements,
            publisher,
            clock,
            policy,
            backoff: Mutex::new(HashMap::new()),
        }
    }

    fn hold(&self) -> Duration {
        Duration::days(self.policy.hold_days)
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.hold()
    }

    /// Orders still backing off after a failure. Expired entries are dropped.
    async fn backing_off(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut backoff = self.backoff.lock().await;
        backoff.retain(|_, retry_at| *retry_at > now);
        backoff.keys().copied().collect()
    }

    /// Settle every order whose hold period has passed, one transaction per order.
    /// A failing order is reported and the sweep moves on.
    pub async fn process_pending_settlements(&self) -> CoreResult<SweepReport> {
        let now = self.clock.now();
        let cutoff = self.cutoff(now);
        let skipped = self.backing_off(now).await;
        let due = self
            .settlements
            .due_for_settlement(cutoff, &skipped, self.policy.batch_size)
            .await?;

        let mut report = SweepReport::default();
        for order_id in due {
            let result = self.settle(order_id, Some(cutoff), None).await;
            let mut backoff = self.backoff.lock().await;
            if result.is_err() {
                backoff.insert(order_id, now + Duration::minutes(self.policy.failure_backoff_minutes));
            } else {
                backoff.remove(&order_id);
            }
            drop(backoff);

            match result {
                Ok(SettlementOutcome::Settled(_)) => report.settled += 1,
                Ok(SettlementOutcome::AlreadySettled) => report.already_settled += 1,
                Ok(SettlementOutcome::NotEligible(why)) => {
                    debug!("Skipping order {}: {}", order_id, why);
                }
                Err(e) => {
                    error!("Settlement of order {} failed: {}", order_id, e);
                    report.failures.push(SettlementFailure {
                        order_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.settled > 0 || !report.failures.is_empty() {
            info!(
                "Settlement sweep: {} settled, {} already settled, {} failed",
                report.settled,
                report.already_settled,
                report.failures.len()
            );
        }
        Ok(report)
    }

    /// Settle one order if its hold period is over.
    pub async fn settle_order(&self, order_id: Uuid) -> CoreResult<SettlementOutcome> {
        let cutoff = self.cutoff(self.clock.now());
        self.settle(order_id, Some(cutoff), None).await
    }

    /// Settle one order regardless of the hold period. The double-settlement guard still applies.
    pub async fn force_settle(&self, order_id: Uuid, operator: &str, reason: &str) -> CoreResult<SettlementOutcome> {
        let (operator, reason) = (operator.trim(), reason.trim());
        if operator.is_empty() || reason.is_empty() {
            return Err(CoreError::ValidationError(
                "Forced settlement needs an operator and a reason".into(),
            ));
        }
        warn!("Force settling order {} by {}: {}", order_id, operator, reason);
        self.settle(order_id, None, Some((operator.to_string(), reason.to_string())))
            .await
    }

    async fn settle(
        &self,
        order_id: Uuid,
        paid_before: Option<DateTime<Utc>>,
        forced_by: Option<(String, String)>,
    ) -> CoreResult<SettlementOutcome> {
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Order", order_id))?;

        if order.is_settled {
            return Ok(SettlementOutcome::AlreadySettled);
        }
        if order.status != OrderStatus::Paid {
            return Ok(SettlementOutcome::NotEligible(format!("order is {}", order.status)));
        }
        let now = self.clock.now();
        if paid_before.is_some() {
            match order.settlement_due_at(self.hold()) {
                Some(due) if due <= now => {}
                Some(due) => {
                    return Ok(SettlementOutcome::NotEligible(format!("held until {}", due)));
                }
                None => return Ok(SettlementOutcome::NotEligible("order has no payment time".into())),
            }
        }

        let split = RevenueSplit::of(&order);
        let forced = forced_by.is_some();
        let (operator, reason) = forced_by.unzip();
        let plan = SettlementPlan {
            order_id,
            entries: settlement_entries(&order),
            paid_before,
            forced,
            operator,
            reason,
            instructor_total: split.instructor_total(),
            platform_total: split.platform_fee,
            settled_at: now,
        };

        let outcome = self.settlements.settle_order(&plan).await?;
        if let SettlementOutcome::Settled(record) = &outcome {
            info!(
                "Order {} settled: {} to instructors, {} platform fee",
                order.order_number, record.instructor_total, record.platform_total
            );
            let event = SaleEvent::OrderSettled(OrderSettledEvent {
                order_id,
                payouts: split
                    .instructors
                    .iter()
                    .map(|(instructor_id, amount)| InstructorPayout {
                        instructor_id: *instructor_id,
                        amount: *amount,
                    })
                    .collect(),
                platform_fee: split.platform_fee,
                forced,
                settled_at: now,
            });
            publish_or_log(self.publisher.as_ref(), &event).await;
        }
        Ok(outcome)
    }
}

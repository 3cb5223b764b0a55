use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edumart_core::clock::{Clock, SystemClock};
use edumart_core::payment::{Payment, PaymentStatus};
use edumart_core::wallet::{LedgerEntry, Wallet, WalletOwner, WalletTransaction};
use edumart_core::{CoreError, CoreResult, CouponRejection};
use edumart_coupon::{Coupon, CouponRepository, CouponUsage};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Order, OrderEvent, OrderStatus};
use crate::payout::{PayoutRequest, PayoutStatus};
use crate::repository::{
    OrderRepository, PaymentConfirmation, PaymentOutcome, PaymentRepository, PaymentSlot, PayoutRepository,
    RefundPlan, SettlementOutcome, SettlementPlan, SettlementRecord, SettlementRepository, WalletRepository,
};

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    wallets: HashMap<Uuid, Wallet>,
    wallet_by_owner: HashMap<WalletOwner, Uuid>,
    /// Append-only, oldest first.
    transactions: Vec<WalletTransaction>,
    coupons: HashMap<Uuid, Coupon>,
    coupon_usages: Vec<CouponUsage>,
    settlements: HashMap<Uuid, SettlementRecord>,
    payouts: HashMap<Uuid, PayoutRequest>,
}

/// Every repository behind one lock. Multi-row writes are staged on copies and committed only
/// when every step succeeds, so a failed call leaves no trace.
pub struct InMemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    pub async fn wallet_count(&self) -> usize {
        self.state.lock().await.wallets.len()
    }

    /// A wallet's full transaction log, oldest first.
    pub async fn ledger(&self, wallet_id: Uuid) -> Vec<WalletTransaction> {
        self.state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|tx| tx.wallet_id == wallet_id)
            .cloned()
            .collect()
    }
}

// ============================================================================
// Staging helpers
// ============================================================================

struct StagedPostings {
    wallets: Vec<Wallet>,
    transactions: Vec<WalletTransaction>,
}

impl State {
    fn wallet_for(&self, owner: WalletOwner) -> Option<&Wallet> {
        self.wallet_by_owner.get(&owner).and_then(|id| self.wallets.get(id))
    }

    /// Applies `entries` to copies of the affected wallets, creating missing ones.
    fn stage_entries(&self, entries: &[LedgerEntry], currency: &str, now: DateTime<Utc>) -> CoreResult<StagedPostings> {
        let mut staged: HashMap<WalletOwner, Wallet> = HashMap::new();
        let mut transactions = Vec::with_capacity(entries.len());

        for entry in entries {
            let wallet = match staged.entry(entry.owner) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(v) => v.insert(
                    self.wallet_for(entry.owner)
                        .cloned()
                        .unwrap_or_else(|| Wallet::new(entry.owner, currency, now)),
                ),
            };
            transactions.push(wallet.apply(entry, now)?);
        }

        Ok(StagedPostings {
            wallets: staged.into_values().collect(),
            transactions,
        })
    }

    /// Claims one slot per usage on copies of the coupons.
    fn stage_usages(&self, usages: &[CouponUsage]) -> CoreResult<Vec<Coupon>> {
        let mut staged = Vec::with_capacity(usages.len());
        for usage in usages {
            let Some(coupon) = self.coupons.get(&usage.coupon_id) else {
                return Err(CoreError::coupon(usage.coupon_id.to_string(), CouponRejection::NotFound));
            };
            let mut coupon = coupon.clone();
            let prior = self
                .coupon_usages
                .iter()
                .filter(|u| u.coupon_id == usage.coupon_id && u.user_id == usage.user_id)
                .count() as i64;
            coupon
                .try_consume(prior)
                .map_err(|reason| CoreError::coupon(coupon.code.clone(), reason))?;
            coupon.updated_at = usage.used_at;
            staged.push(coupon);
        }
        Ok(staged)
    }

    fn commit_postings(&mut self, staged: StagedPostings) {
        for wallet in staged.wallets {
            self.wallet_by_owner.insert(wallet.owner, wallet.id);
            self.wallets.insert(wallet.id, wallet);
        }
        self.transactions.extend(staged.transactions);
    }

    fn commit_usages(&mut self, coupons: Vec<Coupon>, usages: &[CouponUsage]) {
        for coupon in coupons {
            self.coupons.insert(coupon.id, coupon);
        }
        self.coupon_usages.extend_from_slice(usages);
    }

    fn payment_mut(&mut self, payment_id: Uuid) -> CoreResult<&mut Payment> {
        self.payments
            .get_mut(&payment_id)
            .ok_or_else(|| CoreError::not_found("Payment", payment_id))
    }
}

/// Outcome for a payment that can no longer change.
fn settled_outcome(payment: &Payment) -> Option<PaymentOutcome> {
    match payment.status {
        PaymentStatus::Paid => Some(PaymentOutcome::AlreadyPaid(payment.clone())),
        PaymentStatus::Failed | PaymentStatus::Expired => Some(PaymentOutcome::AlreadyClosed(payment.clone())),
        PaymentStatus::Pending | PaymentStatus::Processing => None,
    }
}

// ============================================================================
// Orders
// ============================================================================

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert_order(&self, order: &Order, usages: &[CouponUsage]) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.id)
            || state.orders.values().any(|o| o.order_number == order.order_number)
        {
            return Err(CoreError::Conflict(format!("Order {} already exists", order.order_number)));
        }

        let coupons = state.stage_usages(usages)?;
        state.commit_usages(coupons, usages);
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> CoreResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> CoreResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn purchased_course_ids(&self, user_id: Uuid, course_ids: &[Uuid]) -> CoreResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut owned: Vec<Uuid> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id && o.status == OrderStatus::Paid)
            .flat_map(|o| o.items.iter().map(|i| i.course_id))
            .filter(|id| course_ids.contains(id))
            .collect();
        owned.sort();
        owned.dedup();
        Ok(owned)
    }

    async fn cancel_order(&self, order_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> CoreResult<Order> {
        let mut state = self.state.lock().await;
        let mut order = state
            .orders
            .get(&order_id)
            .filter(|o| o.user_id == user_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("Order", order_id))?;
        order.apply(OrderEvent::Cancel, now)?;

        for payment in state.payments.values_mut() {
            if payment.order_id == Some(order_id) && payment.status.is_active() {
                payment.mark_expired("Order cancelled".to_string(), now)?;
            }
        }
        state.orders.insert(order_id, order.clone());
        Ok(order)
    }

    async fn refund_order(&self, plan: &RefundPlan) -> CoreResult<Order> {
        let mut state = self.state.lock().await;
        let mut order = state
            .orders
            .get(&plan.order_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("Order", plan.order_id))?;
        if order.is_settled {
            return Err(CoreError::Conflict(format!("Order {} is already settled", order.order_number)));
        }
        order.apply(OrderEvent::Refund, plan.refunded_at)?;
        order.refund_reason = Some(format!("{} ({})", plan.reason, plan.operator));

        let staged = state.stage_entries(&plan.reversals, &order.currency, plan.refunded_at)?;
        state.commit_postings(staged);
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }
}

// ============================================================================
// Payments
// ============================================================================

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn open_order_payment(
        &self,
        candidate: Payment,
        now: DateTime<Utc>,
        expiry_reason: &str,
    ) -> CoreResult<PaymentSlot> {
        let mut state = self.state.lock().await;
        let order_id = candidate
            .order_id
            .ok_or_else(|| CoreError::ValidationError("Order payment without an order".into()))?;
        let order = state
            .orders
            .get(&order_id)
            .ok_or_else(|| CoreError::not_found("Order", order_id))?;
        if order.status != OrderStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "Order {} is {}",
                order.order_number, order.status
            )));
        }

        for payment in state.payments.values_mut() {
            if payment.order_id == Some(order_id) && payment.is_overdue_at(now) {
                payment.mark_expired(expiry_reason.to_string(), now)?;
            }
        }

        if let Some(active) = state
            .payments
            .values()
            .find(|p| p.order_id == Some(order_id) && p.status.is_active())
        {
            return Ok(PaymentSlot::Existing(active.clone()));
        }

        state.payments.insert(candidate.id, candidate.clone());
        Ok(PaymentSlot::Created(candidate))
    }

    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        if state
            .payments
            .values()
            .any(|p| p.payment_number == payment.payment_number)
        {
            return Err(CoreError::Conflict(format!(
                "Payment {} already exists",
                payment.payment_number
            )));
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn save_redirect(&self, payment_id: Uuid, url: &str, now: DateTime<Utc>) -> CoreResult<Payment> {
        let mut state = self.state.lock().await;
        let payment = state.payment_mut(payment_id)?;
        payment.mark_redirected(url.to_string(), now)?;
        Ok(payment.clone())
    }

    async fn find_payment(&self, payment_id: Uuid) -> CoreResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&payment_id).cloned())
    }

    async fn find_by_number(&self, payment_number: &str) -> CoreResult<Option<Payment>> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .values()
            .find(|p| p.payment_number == payment_number)
            .cloned())
    }

    async fn payments_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.order_id == Some(order_id))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn confirm_payment(&self, confirmation: &PaymentConfirmation) -> CoreResult<PaymentOutcome> {
        let mut state = self.state.lock().await;
        let current = state
            .payments
            .get(&confirmation.payment_id)
            .ok_or_else(|| CoreError::not_found("Payment", confirmation.payment_id))?;
        if let Some(outcome) = settled_outcome(current) {
            return Ok(outcome);
        }

        let paid_at = confirmation.receipt.paid_at;
        let mut payment = current.clone();
        payment.mark_paid(&confirmation.receipt)?;

        let order = match confirmation.order_id {
            Some(order_id) => {
                let mut order = state
                    .orders
                    .get(&order_id)
                    .cloned()
                    .ok_or_else(|| CoreError::not_found("Order", order_id))?;
                order.apply(OrderEvent::PaymentConfirmed, paid_at)?;
                Some(order)
            }
            None => None,
        };

        let coupons = state.stage_usages(&confirmation.coupon_usages)?;
        let postings = state.stage_entries(&confirmation.ledger_entries, &payment.currency, paid_at)?;

        state.commit_usages(coupons, &confirmation.coupon_usages);
        state.commit_postings(postings);
        if let Some(order) = order {
            state.orders.insert(order.id, order);
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(PaymentOutcome::Applied(payment))
    }

    async fn fail_payment(
        &self,
        payment_id: Uuid,
        reason: &str,
        transaction_no: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<PaymentOutcome> {
        let mut state = self.state.lock().await;
        let payment = state.payment_mut(payment_id)?;
        if let Some(outcome) = settled_outcome(payment) {
            return Ok(outcome);
        }
        payment.mark_failed(reason.to_string(), transaction_no.map(str::to_string), now)?;
        Ok(PaymentOutcome::Applied(payment.clone()))
    }

    async fn expire_payment(&self, payment_id: Uuid, reason: &str, now: DateTime<Utc>) -> CoreResult<PaymentOutcome> {
        let mut state = self.state.lock().await;
        let payment = state.payment_mut(payment_id)?;
        if let Some(outcome) = settled_outcome(payment) {
            return Ok(outcome);
        }
        payment.mark_expired(reason.to_string(), now)?;
        Ok(PaymentOutcome::Applied(payment.clone()))
    }

    async fn expire_stale_payments(&self, now: DateTime<Utc>, reason: &str) -> CoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for payment in state.payments.values_mut() {
            if payment.is_overdue_at(now) {
                payment.mark_expired(reason.to_string(), now)?;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

// ============================================================================
// Wallets
// ============================================================================

#[async_trait]
impl WalletRepository for InMemoryStore {
    async fn ensure_wallet(&self, owner: WalletOwner, currency: &str) -> CoreResult<Wallet> {
        let mut state = self.state.lock().await;
        if let Some(wallet) = state.wallet_for(owner) {
            return Ok(wallet.clone());
        }
        let wallet = Wallet::new(owner, currency, self.clock.now());
        state.wallet_by_owner.insert(owner, wallet.id);
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn find_wallet(&self, owner: WalletOwner) -> CoreResult<Option<Wallet>> {
        Ok(self.state.lock().await.wallet_for(owner).cloned())
    }

    async fn find_wallet_by_id(&self, wallet_id: Uuid) -> CoreResult<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(&wallet_id).cloned())
    }

    async fn transactions(&self, wallet_id: Uuid, limit: i64) -> CoreResult<Vec<WalletTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.wallet_id == wallet_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Payouts
// ============================================================================

#[async_trait]
impl PayoutRepository for InMemoryStore {
    async fn insert_payout(&self, payout: &PayoutRequest) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        let awaiting = state
            .payouts
            .values()
            .any(|p| p.instructor_id == payout.instructor_id && p.status == PayoutStatus::Requested);
        if awaiting {
            return Err(CoreError::Conflict(format!(
                "Instructor {} already has a payout request awaiting review",
                payout.instructor_id
            )));
        }
        state.payouts.insert(payout.id, payout.clone());
        Ok(())
    }

    async fn find_payout(&self, payout_id: Uuid) -> CoreResult<Option<PayoutRequest>> {
        Ok(self.state.lock().await.payouts.get(&payout_id).cloned())
    }

    async fn list_payouts(&self, instructor_id: Option<Uuid>, limit: i64) -> CoreResult<Vec<PayoutRequest>> {
        let state = self.state.lock().await;
        let mut payouts: Vec<PayoutRequest> = state
            .payouts
            .values()
            .filter(|p| instructor_id.map_or(true, |id| p.instructor_id == id))
            .cloned()
            .collect();
        payouts.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        payouts.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(payouts)
    }

    async fn approve_payout(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        now: DateTime<Utc>,
    ) -> CoreResult<(PayoutRequest, WalletTransaction)> {
        let mut state = self.state.lock().await;
        let mut payout = state
            .payouts
            .get(&payout_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("Payout", payout_id))?;

        let debit = payout.approve(admin_id, now)?;
        let staged = state.stage_entries(std::slice::from_ref(&debit), &payout.currency, now)?;
        let posted = staged
            .transactions
            .first()
            .cloned()
            .ok_or_else(|| CoreError::InternalError("Posting produced no transaction".into()))?;

        state.commit_postings(staged);
        state.payouts.insert(payout.id, payout.clone());
        Ok((payout, posted))
    }

    async fn reject_payout(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<PayoutRequest> {
        let mut state = self.state.lock().await;
        let payout = state
            .payouts
            .get_mut(&payout_id)
            .ok_or_else(|| CoreError::not_found("Payout", payout_id))?;
        payout.reject(admin_id, reason, now)?;
        Ok(payout.clone())
    }
}

// ============================================================================
// Settlement
// ============================================================================

#[async_trait]
impl SettlementRepository for InMemoryStore {
    async fn due_for_settlement(&self, paid_before: DateTime<Utc>, exclude: &[Uuid], limit: i64) -> CoreResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut due: Vec<(DateTime<Utc>, Uuid)> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Paid && !o.is_settled && !exclude.contains(&o.id))
            .filter_map(|o| o.paid_at.filter(|p| *p <= paid_before).map(|p| (p, o.id)))
            .collect();
        due.sort();
        Ok(due
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(_, id)| id)
            .collect())
    }

    async fn settle_order(&self, plan: &SettlementPlan) -> CoreResult<SettlementOutcome> {
        let mut state = self.state.lock().await;
        let mut order = state
            .orders
            .get(&plan.order_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("Order", plan.order_id))?;

        if order.is_settled {
            return Ok(SettlementOutcome::AlreadySettled);
        }
        if order.status != OrderStatus::Paid {
            return Ok(SettlementOutcome::NotEligible(format!("order is {}", order.status)));
        }
        if let Some(cutoff) = plan.paid_before {
            if order.paid_at.map_or(true, |p| p > cutoff) {
                return Ok(SettlementOutcome::NotEligible("still inside the hold period".into()));
            }
        }

        let postings = state.stage_entries(&plan.entries, &order.currency, plan.settled_at)?;
        order.is_settled = true;
        order.settled_at = Some(plan.settled_at);
        order.updated_at = plan.settled_at;
        let record = SettlementRecord {
            id: Uuid::new_v4(),
            order_id: plan.order_id,
            forced: plan.forced,
            operator: plan.operator.clone(),
            reason: plan.reason.clone(),
            instructor_total: plan.instructor_total,
            platform_total: plan.platform_total,
            settled_at: plan.settled_at,
        };

        state.commit_postings(postings);
        state.orders.insert(order.id, order);
        state.settlements.insert(plan.order_id, record.clone());
        Ok(SettlementOutcome::Settled(record))
    }

    async fn settlement_record(&self, order_id: Uuid) -> CoreResult<Option<SettlementRecord>> {
        Ok(self.state.lock().await.settlements.get(&order_id).cloned())
    }
}

// ============================================================================
// Coupons
// ============================================================================

#[async_trait]
impl CouponRepository for InMemoryStore {
    async fn insert_coupon(&self, coupon: &Coupon) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        if state.coupons.values().any(|c| c.code == coupon.code) {
            return Err(CoreError::Conflict(format!("Coupon code {} is taken", coupon.code)));
        }
        state.coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> CoreResult<Option<Coupon>> {
        Ok(self
            .state
            .lock()
            .await
            .coupons
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn find_coupon(&self, coupon_id: Uuid) -> CoreResult<Option<Coupon>> {
        Ok(self.state.lock().await.coupons.get(&coupon_id).cloned())
    }

    async fn count_user_usages(&self, coupon_id: Uuid, user_id: Uuid) -> CoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .coupon_usages
            .iter()
            .filter(|u| u.coupon_id == coupon_id && u.user_id == user_id)
            .count() as i64)
    }

    async fn usages_for_order(&self, order_id: Uuid) -> CoreResult<Vec<CouponUsage>> {
        let state = self.state.lock().await;
        Ok(state
            .coupon_usages
            .iter()
            .filter(|u| u.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn set_active(&self, coupon_id: Uuid, active: bool) -> CoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let coupon = state
            .coupons
            .get_mut(&coupon_id)
            .ok_or_else(|| CoreError::not_found("Coupon", coupon_id))?;
        coupon.is_active = active;
        coupon.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edumart_core::wallet::{replay, TransactionKind};
    use rust_decimal_macros::dec;

    fn entry(owner: WalletOwner, kind: TransactionKind, amount: rust_decimal::Decimal) -> LedgerEntry {
        LedgerEntry {
            owner,
            kind,
            amount,
            description: "test".into(),
            order_id: None,
            reference: None,
        }
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_trace() {
        let store = InMemoryStore::default();
        let instructor = WalletOwner::Instructor(Uuid::new_v4());
        let mut state = store.state.lock().await;

        let staged = state
            .stage_entries(
                &[entry(instructor, TransactionKind::PendingCredit, dec!(100))],
                "VND",
                Utc::now(),
            )
            .unwrap();
        state.commit_postings(staged);

        // The credit is fine, the settlement of more than is pending is not.
        let err = state
            .stage_entries(
                &[
                    entry(WalletOwner::Platform, TransactionKind::PendingCredit, dec!(30)),
                    entry(instructor, TransactionKind::Settlement, dec!(150)),
                ],
                "VND",
                Utc::now(),
            )
            .err();
        assert!(matches!(err, Some(CoreError::InsufficientFunds { .. })));
        assert!(state.wallet_for(WalletOwner::Platform).is_none());
        assert_eq!(state.transactions.len(), 1);
    }

    fn payout(wallet: &Wallet, amount: rust_decimal::Decimal) -> PayoutRequest {
        let WalletOwner::Instructor(instructor_id) = wallet.owner else {
            panic!("payouts belong to instructors");
        };
        PayoutRequest::new(
            wallet,
            instructor_id,
            crate::payout::NewPayoutRequest {
                amount,
                bank_name: "Techcombank".into(),
                bank_account_number: "1903000111".into(),
                bank_account_name: "NGUYEN THI LAN".into(),
                note: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_payout_approval_debits_or_changes_nothing() {
        let store = InMemoryStore::default();
        let owner = WalletOwner::Instructor(Uuid::new_v4());
        let wallet = store.ensure_wallet(owner, "VND").await.unwrap();
        {
            let mut state = store.state.lock().await;
            let staged = state
                .stage_entries(&[entry(owner, TransactionKind::TopUp, dec!(500))], "VND", Utc::now())
                .unwrap();
            state.commit_postings(staged);
        }

        let too_much = payout(&wallet, dec!(501));
        store.insert_payout(&too_much).await.unwrap();
        let err = store
            .approve_payout(too_much.id, Uuid::new_v4(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientFunds { .. }));
        let unchanged = store.find_payout(too_much.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, PayoutStatus::Requested);
        assert_eq!(store.ledger(wallet.id).await.len(), 1);

        store
            .reject_payout(too_much.id, Uuid::new_v4(), "over balance", Utc::now())
            .await
            .unwrap();
        let fits = payout(&wallet, dec!(200));
        store.insert_payout(&fits).await.unwrap();
        let (completed, tx) = store
            .approve_payout(fits.id, Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        assert_eq!(completed.status, PayoutStatus::Completed);
        assert_eq!(tx.kind, TransactionKind::Withdrawal);
        assert_eq!(tx.available_after, dec!(300));

        let wallet = store.find_wallet_by_id(wallet.id).await.unwrap().unwrap();
        assert_eq!(wallet.total_withdrawn, dec!(200));
        let (available, pending) = replay(&store.ledger(wallet.id).await);
        assert_eq!(available, wallet.available_balance);
        assert_eq!(pending, wallet.pending_balance);
    }

    #[tokio::test]
    async fn test_one_payout_awaiting_review_per_instructor() {
        let store = InMemoryStore::default();
        let wallet = store
            .ensure_wallet(WalletOwner::Instructor(Uuid::new_v4()), "VND")
            .await
            .unwrap();

        let first = payout(&wallet, dec!(100));
        store.insert_payout(&first).await.unwrap();
        let err = store.insert_payout(&payout(&wallet, dec!(50))).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        store
            .reject_payout(first.id, Uuid::new_v4(), "wrong account", Utc::now())
            .await
            .unwrap();
        store.insert_payout(&payout(&wallet, dec!(50))).await.unwrap();
        assert_eq!(store.list_payouts(None, 10).await.unwrap().len(), 2);
    }
}

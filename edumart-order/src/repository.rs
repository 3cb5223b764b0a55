use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edumart_core::payment::{Payment, PaymentReceipt};
use edumart_core::wallet::{LedgerEntry, Wallet, WalletOwner, WalletTransaction};
use edumart_core::CoreResult;
use edumart_coupon::CouponUsage;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Order;
use crate::payout::PayoutRequest;

// ============================================================================
// Orders
// ============================================================================

/// Everything a refund writes, applied in one transaction.
#[derive(Debug, Clone)]
pub struct RefundPlan {
    pub order_id: Uuid,
    /// Pending-balance reversals for every wallet credited at payment time.
    pub reversals: Vec<LedgerEntry>,
    pub operator: String,
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist an order with its items. `usages` is non-empty only for orders that are paid at
    /// creation (free orders); their coupon counters move in the same transaction.
    async fn insert_order(&self, order: &Order, usages: &[CouponUsage]) -> CoreResult<()>;

    async fn find_order(&self, order_id: Uuid) -> CoreResult<Option<Order>>;

    /// Newest first.
    async fn list_orders_for_user(&self, user_id: Uuid) -> CoreResult<Vec<Order>>;

    /// Which of `course_ids` the user already owns through a paid order.
    async fn purchased_course_ids(&self, user_id: Uuid, course_ids: &[Uuid]) -> CoreResult<Vec<Uuid>>;

    /// `Pending -> Cancelled` for the owner, expiring any active payment of the order.
    async fn cancel_order(&self, order_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> CoreResult<Order>;

    /// `Paid -> Refunded` for an unsettled order plus the pending reversals.
    async fn refund_order(&self, plan: &RefundPlan) -> CoreResult<Order>;
}

// ============================================================================
// Payments
// ============================================================================

/// Result of asking for a payment slot on an order.
#[derive(Debug, Clone)]
pub enum PaymentSlot {
    /// An unexpired active payment already exists; reuse it.
    Existing(Payment),
    /// The candidate payment was inserted.
    Created(Payment),
}

/// Side effects of a successful gateway callback, applied atomically with the status change.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub payment_id: Uuid,
    pub receipt: PaymentReceipt,
    /// Set for order payments: the order moves to `Paid` in the same transaction.
    pub order_id: Option<Uuid>,
    pub coupon_usages: Vec<CouponUsage>,
    pub ledger_entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    /// State changed by this call.
    Applied(Payment),
    /// The payment was already paid; nothing was written.
    AlreadyPaid(Payment),
    /// The payment had already failed or expired; nothing was written.
    AlreadyClosed(Payment),
}

impl PaymentOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            PaymentOutcome::Applied(p) | PaymentOutcome::AlreadyPaid(p) | PaymentOutcome::AlreadyClosed(p) => p,
        }
    }
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Under a lock on the order: expire overdue active payments with `expiry_reason`, then
    /// return the remaining active one or insert `candidate`. Fails with `Conflict` if the order
    /// is not pending.
    async fn open_order_payment(
        &self,
        candidate: Payment,
        now: DateTime<Utc>,
        expiry_reason: &str,
    ) -> CoreResult<PaymentSlot>;

    /// Top-up payments have no order to lock.
    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()>;

    /// Stores the gateway URL and moves the payment to `Processing`.
    async fn save_redirect(&self, payment_id: Uuid, url: &str, now: DateTime<Utc>) -> CoreResult<Payment>;

    async fn find_payment(&self, payment_id: Uuid) -> CoreResult<Option<Payment>>;

    async fn find_by_number(&self, payment_number: &str) -> CoreResult<Option<Payment>>;

    async fn payments_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Payment>>;

    /// Marks the payment paid and applies every side effect, or nothing.
    async fn confirm_payment(&self, confirmation: &PaymentConfirmation) -> CoreResult<PaymentOutcome>;

    async fn fail_payment(
        &self,
        payment_id: Uuid,
        reason: &str,
        transaction_no: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<PaymentOutcome>;

    /// Expire one overdue payment. A payment that is no longer active is returned untouched.
    async fn expire_payment(&self, payment_id: Uuid, reason: &str, now: DateTime<Utc>) -> CoreResult<PaymentOutcome>;

    /// Expire every active payment whose deadline is at or before `now`. Returns the count.
    async fn expire_stale_payments(&self, now: DateTime<Utc>, reason: &str) -> CoreResult<u64>;
}

// ============================================================================
// Wallets
// ============================================================================

#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Returns the owner's wallet, creating an empty one on first use.
    async fn ensure_wallet(&self, owner: WalletOwner, currency: &str) -> CoreResult<Wallet>;

    async fn find_wallet(&self, owner: WalletOwner) -> CoreResult<Option<Wallet>>;

    async fn find_wallet_by_id(&self, wallet_id: Uuid) -> CoreResult<Option<Wallet>>;

    /// Newest first.
    async fn transactions(&self, wallet_id: Uuid, limit: i64) -> CoreResult<Vec<WalletTransaction>>;
}

// ============================================================================
// Payouts
// ============================================================================

#[async_trait]
pub trait PayoutRepository: Send + Sync {
    /// Fails with `Conflict` when the instructor already has a request awaiting review.
    async fn insert_payout(&self, payout: &PayoutRequest) -> CoreResult<()>;

    async fn find_payout(&self, payout_id: Uuid) -> CoreResult<Option<PayoutRequest>>;

    /// Newest first, for one instructor or for everyone.
    async fn list_payouts(&self, instructor_id: Option<Uuid>, limit: i64) -> CoreResult<Vec<PayoutRequest>>;

    /// Under a lock on the request: `Requested -> Completed` plus the withdrawal debit, in one
    /// transaction. A short balance fails both.
    async fn approve_payout(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        now: DateTime<Utc>,
    ) -> CoreResult<(PayoutRequest, WalletTransaction)>;

    async fn reject_payout(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<PayoutRequest>;
}

// ============================================================================
// Settlement
// ============================================================================

#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub order_id: Uuid,
    pub entries: Vec<LedgerEntry>,
    /// When set, the order only qualifies if it was paid at or before this instant.
    pub paid_before: Option<DateTime<Utc>>,
    pub forced: bool,
    pub operator: Option<String>,
    pub reason: Option<String>,
    pub instructor_total: Decimal,
    pub platform_total: Decimal,
    pub settled_at: DateTime<Utc>,
}

/// Audit row written with every settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub forced: bool,
    pub operator: Option<String>,
    pub reason: Option<String>,
    pub instructor_total: Decimal,
    pub platform_total: Decimal,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Settled(SettlementRecord),
    /// Another run got there first. Nothing was written.
    AlreadySettled,
    /// Not paid, refunded, or still inside the hold period.
    NotEligible(String),
}

#[async_trait]
pub trait SettlementRepository: Send + Sync {
    /// Ids of paid, unsettled orders paid at or before `paid_before`, oldest first, leaving out
    /// `exclude`.
    async fn due_for_settlement(&self, paid_before: DateTime<Utc>, exclude: &[Uuid], limit: i64) -> CoreResult<Vec<Uuid>>;

    /// Claims the order through its `is_settled` flag and posts `plan.entries`, in one
    /// transaction. A concurrent or repeated call yields `AlreadySettled`.
    async fn settle_order(&self, plan: &SettlementPlan) -> CoreResult<SettlementOutcome>;

    async fn settlement_record(&self, order_id: Uuid) -> CoreResult<Option<SettlementRecord>>;
}

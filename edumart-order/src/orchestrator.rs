use chrono::{DateTime, Duration, Utc};
use edumart_core::clock::Clock;
use edumart_core::events::EventPublisher;
use edumart_core::payment::{
    GatewayCallback, Payment, PaymentGateway, PaymentPurpose, PaymentReceipt, PaymentStatus, PaymentUrlRequest,
};
use edumart_core::retry::{with_retry, RetryConfig};
use edumart_core::wallet::{LedgerEntry, TransactionKind, WalletOwner};
use edumart_core::{CoreError, CoreResult};
use edumart_coupon::CouponService;
use edumart_shared::{PaymentConfirmedEvent, PaymentFailedEvent, SaleEvent, WalletToppedUpEvent};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::finance::pending_credits;
use crate::models::OrderStatus;
use crate::publish_or_log;
use crate::repository::{
    OrderRepository, PaymentConfirmation, PaymentOutcome, PaymentRepository, PaymentSlot, WalletRepository,
};

#[derive(Debug, Clone)]
pub struct PaymentPolicy {
    pub expiry_minutes: i64,
    /// Currency of top-up wallets.
    pub currency: String,
    pub retry: RetryConfig,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            expiry_minutes: 15,
            currency: "VND".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Request facts needed to start a gateway payment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutContext {
    pub client_ip: String,
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub bank_code: Option<String>,
    pub locale: Option<String>,
}

/// What a gateway callback did.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Confirmed(Payment),
    Failed(Payment),
    /// Replayed or late callback; persisted state was left alone.
    AlreadyProcessed(Payment),
}

impl CallbackOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            CallbackOutcome::Confirmed(p) | CallbackOutcome::Failed(p) | CallbackOutcome::AlreadyProcessed(p) => p,
        }
    }
}

/// Drives payments from checkout through the gateway callback.
pub struct PaymentOrchestrator {
    payments: Arc<dyn PaymentRepository>,
    orders: Arc<dyn OrderRepository>,
    wallets: Arc<dyn WalletRepository>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: PaymentPolicy,
}

impl PaymentOrchestrator {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        orders: Arc<dyn OrderRepository>,
        wallets: Arc<dyn WalletRepository>,
        gateway: Arc<dyn PaymentGateway>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        policy: PaymentPolicy,
    ) -> Self {
        Self {
            payments,
            orders,
            wallets,
            gateway,
            publisher,
            clock,
            policy,
        }
    }

    fn ttl(&self) -> Duration {
        Duration::minutes(self.policy.expiry_minutes)
    }

    fn expiry_reason(&self) -> String {
        format!("Payment expired after {} minutes", self.policy.expiry_minutes)
    }

    // ========================================================================
    // Checkout
    // ========================================================================

    /// Start (or resume) the gateway payment for a pending order.
    pub async fn process_payment(&self, order_id: Uuid, user_id: Uuid, ctx: CheckoutContext) -> CoreResult<Payment> {
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| CoreError::not_found("Order", order_id))?;

        if order.status != OrderStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "Order {} is {}, only pending orders can be paid",
                order.order_number, order.status
            )));
        }
        if order.total <= Decimal::ZERO {
            return Err(CoreError::ValidationError(
                "Free orders do not need a payment".into(),
            ));
        }

        let now = self.clock.now();
        let candidate = Payment::for_order(
            order.id,
            order.total,
            &order.currency,
            self.gateway.provider(),
            now,
            self.ttl(),
        );

        let payment = match self
            .payments
            .open_order_payment(candidate, now, &self.expiry_reason())
            .await? {
            PaymentSlot::Existing(existing) if existing.redirect_url.is_some() => {
                info!(
                    "Reusing payment {} for order {}",
                    existing.payment_number, order.order_number
                );
                return Ok(existing);
            }
            PaymentSlot::Existing(existing) => existing,
            PaymentSlot::Created(created) => {
                info!(
                    "Payment {} opened for order {} ({} {})",
                    created.payment_number, order.order_number, created.amount, created.currency
                );
                created
            }
        };

        let order_info = format!("Thanh toan don hang {}", order.order_number);
        self.redirect(payment, order_info, &ctx).await
    }

    /// Start a gateway payment that credits the instructor's available balance.
    pub async fn start_top_up(&self, instructor_id: Uuid, amount: Decimal, ctx: CheckoutContext) -> CoreResult<Payment> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::ValidationError("Top-up amount must be positive".into()));
        }

        let wallet = self
            .wallets
            .ensure_wallet(WalletOwner::Instructor(instructor_id), &self.policy.currency)
            .await?;
        let now = self.clock.now();
        let payment = Payment::for_top_up(
            wallet.id,
            amount,
            &wallet.currency,
            self.gateway.provider(),
            now,
            self.ttl(),
        );
        self.payments.insert_payment(&payment).await?;
        info!("Top-up {} opened for wallet {}", payment.payment_number, wallet.id);

        let order_info = format!("Nap tien vi {}", payment.payment_number);
        self.redirect(payment, order_info, &ctx).await
    }

    async fn redirect(&self, payment: Payment, order_info: String, ctx: &CheckoutContext) -> CoreResult<Payment> {
        let request = PaymentUrlRequest {
            txn_ref: payment.payment_number.clone(),
            amount: payment.amount,
            order_info,
            client_ip: ctx.client_ip.clone(),
            created_at: payment.created_at,
            expires_at: payment.expires_at,
            return_url: self
                .gateway
                .resolve_return_url(ctx.origin.as_deref(), ctx.referer.as_deref()),
            bank_code: ctx.bank_code.clone(),
            locale: ctx.locale.clone(),
        };

        let gateway = self.gateway.as_ref();
        let request = &request;
        let url = with_retry(&self.policy.retry, "payment url", move || {
            gateway.create_payment_url(request)
        })
        .await?;

        self.payments.save_redirect(payment.id, &url, self.clock.now()).await
    }

    // ========================================================================
    // Callback
    // ========================================================================

    /// Apply a gateway callback. Safe to call any number of times for the same payment.
    pub async fn handle_callback(&self, raw_query: &str) -> CoreResult<CallbackOutcome> {
        let callback = self.gateway.verify_callback(raw_query).inspect_err(|e| {
            if matches!(e, CoreError::SignatureInvalid) {
                error!("Rejected {} callback with an invalid signature", self.gateway.provider());
            }
        })?;

        let payment = self
            .payments
            .find_by_number(&callback.txn_ref)
            .await?
            .ok_or_else(|| CoreError::not_found("Payment", &callback.txn_ref))?;

        if callback.amount != payment.amount {
            let err = CoreError::AmountMismatch {
                payment_number: payment.payment_number.clone(),
                expected: payment.amount,
                received: callback.amount,
            };
            warn!("{}", err);
            return Err(err);
        }

        match payment.status {
            PaymentStatus::Paid => {
                info!("Payment {} already paid, ignoring callback", payment.payment_number);
                return Ok(CallbackOutcome::AlreadyProcessed(payment));
            }
            PaymentStatus::Failed | PaymentStatus::Expired => {
                if callback.is_success() {
                    error!(
                        "Successful callback for {} payment {} (gateway txn {:?}); needs manual review",
                        payment.status, payment.payment_number, callback.transaction_no
                    );
                }
                return Ok(CallbackOutcome::AlreadyProcessed(payment));
            }
            PaymentStatus::Pending | PaymentStatus::Processing => {}
        }

        let now = self.clock.now();
        if callback.is_success() {
            self.confirm(payment, &callback, now).await
        } else {
            let reason = if callback.response_code == GatewayCallback::SUCCESS {
                format!("Transaction status {}", callback.transaction_status)
            } else {
                self.gateway.describe_response(&callback.response_code)
            };
            self.decline(payment, &callback, reason, now).await
        }
    }

    async fn confirm(&self, payment: Payment, callback: &GatewayCallback, now: DateTime<Utc>) -> CoreResult<CallbackOutcome> {
        let receipt = PaymentReceipt {
            transaction_no: callback.transaction_no.clone(),
            card_type: callback.card_type.clone(),
            bank_code: callback.bank_code.clone(),
            paid_at: now,
        };

        let (confirmation, event) = match payment.purpose {
            PaymentPurpose::OrderPayment => {
                let order_id = payment.order_id.ok_or_else(|| {
                    CoreError::InternalError(format!("Payment {} has no order", payment.payment_number))
                })?;
                let order = self
                    .orders
                    .find_order(order_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("Order", order_id))?;
                let confirmation = PaymentConfirmation {
                    payment_id: payment.id,
                    receipt,
                    order_id: Some(order.id),
                    coupon_usages: CouponService::plan_usages(order.id, order.user_id, &order.applied_coupons, now),
                    ledger_entries: pending_credits(&order),
                };
                let event = SaleEvent::PaymentConfirmed(PaymentConfirmedEvent {
                    order_id: order.id,
                    user_id: order.user_id,
                    course_ids: order.course_ids(),
                    paid_at: now,
                });
                (confirmation, event)
            }
            PaymentPurpose::WalletTopUp => {
                let wallet_id = payment.wallet_id.ok_or_else(|| {
                    CoreError::InternalError(format!("Top-up {} has no wallet", payment.payment_number))
                })?;
                let wallet = self
                    .wallets
                    .find_wallet_by_id(wallet_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("Wallet", wallet_id))?;
                let confirmation = PaymentConfirmation {
                    payment_id: payment.id,
                    receipt,
                    order_id: None,
                    coupon_usages: Vec::new(),
                    ledger_entries: vec![LedgerEntry {
                        owner: wallet.owner,
                        kind: TransactionKind::TopUp,
                        amount: payment.amount,
                        description: format!("Top-up {}", payment.payment_number),
                        order_id: None,
                        reference: Some(payment.payment_number.clone()),
                    }],
                };
                let event = SaleEvent::WalletToppedUp(WalletToppedUpEvent {
                    wallet_id,
                    payment_id: payment.id,
                    amount: payment.amount,
                    topped_up_at: now,
                });
                (confirmation, event)
            }
        };

        match self.payments.confirm_payment(&confirmation).await {
            Ok(PaymentOutcome::Applied(paid)) => {
                info!(
                    "Payment {} confirmed ({} {})",
                    paid.payment_number, paid.amount, paid.currency
                );
                publish_or_log(self.publisher.as_ref(), &event).await;
                Ok(CallbackOutcome::Confirmed(paid))
            }
            Ok(other) => Ok(CallbackOutcome::AlreadyProcessed(other.payment().clone())),
            Err(CoreError::CouponRejected { code, reason }) => {
                error!(
                    "Coupon {} could not be redeemed while confirming payment {}: {}. Money was captured; refund required",
                    code, payment.payment_number, reason
                );
                let why = format!("Coupon {} could not be applied: {}", code, reason);
                self.decline(payment, callback, why, now).await
            }
            Err(e) => Err(e),
        }
    }

    async fn decline(
        &self,
        payment: Payment,
        callback: &GatewayCallback,
        reason: String,
        now: DateTime<Utc>,
    ) -> CoreResult<CallbackOutcome> {
        let outcome = self
            .payments
            .fail_payment(payment.id, &reason, callback.transaction_no.as_deref(), now)
            .await?;

        match outcome {
            PaymentOutcome::Applied(failed) => {
                warn!(
                    "Payment {} failed with code {}: {}",
                    failed.payment_number, callback.response_code, reason
                );
                let event = SaleEvent::PaymentFailed(PaymentFailedEvent {
                    payment_id: failed.id,
                    order_id: failed.order_id,
                    response_code: Some(callback.response_code.clone()),
                    reason,
                    failed_at: now,
                });
                publish_or_log(self.publisher.as_ref(), &event).await;
                Ok(CallbackOutcome::Failed(failed))
            }
            other => Ok(CallbackOutcome::AlreadyProcessed(other.payment().clone())),
        }
    }

    // ========================================================================
    // Reads and expiry
    // ========================================================================

    /// Payment as seen by its owner: the buyer of the order, or the instructor topping up.
    /// An overdue payment is expired on the way out.
    pub async fn payment_for_user(&self, payment_id: Uuid, user_id: Uuid) -> CoreResult<Payment> {
        let payment = self
            .payments
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Payment", payment_id))?;

        let owned = match (payment.order_id, payment.wallet_id) {
            (Some(order_id), _) => self
                .orders
                .find_order(order_id)
                .await?
                .is_some_and(|o| o.user_id == user_id),
            (None, Some(wallet_id)) => self
                .wallets
                .find_wallet_by_id(wallet_id)
                .await?
                .is_some_and(|w| w.owner == WalletOwner::Instructor(user_id)),
            (None, None) => false,
        };
        if !owned {
            return Err(CoreError::not_found("Payment", payment_id));
        }

        self.expire_if_overdue(payment).await
    }

    pub async fn payments_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Payment>> {
        self.payments.payments_for_order(order_id).await
    }

    async fn expire_if_overdue(&self, payment: Payment) -> CoreResult<Payment> {
        let now = self.clock.now();
        if !payment.is_overdue_at(now) {
            return Ok(payment);
        }
        let outcome = self
            .payments
            .expire_payment(payment.id, &self.expiry_reason(), now)
            .await?;
        Ok(outcome.payment().clone())
    }

    /// Expire every overdue active payment. Orders stay pending and can be paid again.
    pub async fn expire_stale_payments(&self) -> CoreResult<u64> {
        let expired = self
            .payments
            .expire_stale_payments(self.clock.now(), &self.expiry_reason())
            .await?;
        if expired > 0 {
            info!("Expired {} stale payments", expired);
        }
        Ok(expired)
    }
}

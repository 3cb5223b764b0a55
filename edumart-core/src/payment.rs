use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Paid,
    Failed,
    Expired,
}

/// Inputs that move a payment through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEvent {
    /// The buyer has been handed the gateway URL.
    Redirected,
    Succeeded,
    Declined,
    TimedOut,
}

impl PaymentStatus {
    /// `Pending -> Processing -> {Paid | Failed | Expired}`. Terminal states accept nothing.
    pub fn transition(self, event: PaymentEvent) -> CoreResult<PaymentStatus> {
        match (self, event) {
            (PaymentStatus::Pending, PaymentEvent::Redirected) => Ok(PaymentStatus::Processing),
            (PaymentStatus::Pending | PaymentStatus::Processing, PaymentEvent::Succeeded) => {
                Ok(PaymentStatus::Paid)
            }
            (PaymentStatus::Pending | PaymentStatus::Processing, PaymentEvent::Declined) => {
                Ok(PaymentStatus::Failed)
            }
            (PaymentStatus::Pending | PaymentStatus::Processing, PaymentEvent::TimedOut) => {
                Ok(PaymentStatus::Expired)
            }
            (from, event) => Err(CoreError::Conflict(format!(
                "Invalid payment transition from {} on {:?}",
                from, event
            ))),
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PROCESSING" => Ok(PaymentStatus::Processing),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            "EXPIRED" => Ok(PaymentStatus::Expired),
            other => Err(CoreError::InternalError(format!("Unknown payment status {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentPurpose {
    OrderPayment,
    WalletTopUp,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::OrderPayment => "ORDER_PAYMENT",
            PaymentPurpose::WalletTopUp => "WALLET_TOP_UP",
        }
    }
}

impl FromStr for PaymentPurpose {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER_PAYMENT" => Ok(PaymentPurpose::OrderPayment),
            "WALLET_TOP_UP" => Ok(PaymentPurpose::WalletTopUp),
            other => Err(CoreError::InternalError(format!("Unknown payment purpose {}", other))),
        }
    }
}

/// One attempt to collect money through the gateway, for an order or a wallet top-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub wallet_id: Option<Uuid>,
    pub payment_number: String,
    pub purpose: PaymentPurpose,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub currency: String,
    pub provider: String,
    pub payment_method: Option<String>,
    pub bank_code: Option<String>,
    pub external_transaction_id: Option<String>,
    pub redirect_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn for_order(
        order_id: Uuid,
        amount: Decimal,
        currency: &str,
        provider: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self::new(PaymentPurpose::OrderPayment, Some(order_id), None, amount, currency, provider, now, ttl)
    }

    pub fn for_top_up(
        wallet_id: Uuid,
        amount: Decimal,
        currency: &str,
        provider: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self::new(PaymentPurpose::WalletTopUp, None, Some(wallet_id), amount, currency, provider, now, ttl)
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        purpose: PaymentPurpose,
        order_id: Option<Uuid>,
        wallet_id: Option<Uuid>,
        amount: Decimal,
        currency: &str,
        provider: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            wallet_id,
            payment_number: Self::generate_number(now),
            purpose,
            status: PaymentStatus::Pending,
            amount,
            currency: currency.to_string(),
            provider: provider.to_string(),
            payment_method: None,
            bank_code: None,
            external_transaction_id: None,
            redirect_url: None,
            paid_at: None,
            expires_at: now + ttl,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `PAY-yyyyMMdd-XXXXXXXX`; doubles as the gateway transaction reference.
    pub fn generate_number(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        format!("PAY-{}-{}", now.format("%Y%m%d"), suffix)
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.expires_at > now
    }

    /// Active by status but past its deadline; the expiry sweep has not caught it yet.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.expires_at <= now
    }

    pub fn apply(&mut self, event: PaymentEvent, now: DateTime<Utc>) -> CoreResult<()> {
        self.status = self.status.transition(event)?;
        self.updated_at = now;
        Ok(())
    }

    /// Returns `false` when a concurrent checkout already redirected this payment; its URL
    /// stands and `url` is dropped.
    pub fn mark_redirected(&mut self, url: String, now: DateTime<Utc>) -> CoreResult<bool> {
        if self.status == PaymentStatus::Processing && self.redirect_url.is_some() {
            return Ok(false);
        }
        self.apply(PaymentEvent::Redirected, now)?;
        self.redirect_url = Some(url);
        Ok(true)
    }

    pub fn mark_paid(&mut self, receipt: &PaymentReceipt) -> CoreResult<()> {
        self.apply(PaymentEvent::Succeeded, receipt.paid_at)?;
        self.paid_at = Some(receipt.paid_at);
        self.external_transaction_id = receipt.transaction_no.clone();
        self.payment_method = receipt.card_type.clone();
        self.bank_code = receipt.bank_code.clone();
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: String, transaction_no: Option<String>, now: DateTime<Utc>) -> CoreResult<()> {
        self.apply(PaymentEvent::Declined, now)?;
        self.failure_reason = Some(reason);
        if transaction_no.is_some() {
            self.external_transaction_id = transaction_no;
        }
        Ok(())
    }

    pub fn mark_expired(&mut self, reason: String, now: DateTime<Utc>) -> CoreResult<()> {
        self.apply(PaymentEvent::TimedOut, now)?;
        self.failure_reason = Some(reason);
        Ok(())
    }
}

/// Gateway-side facts recorded on a successful payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub transaction_no: Option<String>,
    pub card_type: Option<String>,
    pub bank_code: Option<String>,
    pub paid_at: DateTime<Utc>,
}

// ============================================================================
// Gateway port
// ============================================================================

#[derive(Debug, Clone)]
pub struct PaymentUrlRequest {
    pub txn_ref: String,
    pub amount: Decimal,
    pub order_info: String,
    pub client_ip: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub return_url: Option<String>,
    pub bank_code: Option<String>,
    pub locale: Option<String>,
}

/// Decoded callback fields. Only produced after the signature has been verified.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayCallback {
    pub txn_ref: String,
    pub transaction_no: Option<String>,
    pub response_code: String,
    pub transaction_status: String,
    pub amount: Decimal,
    pub bank_code: Option<String>,
    pub card_type: Option<String>,
    pub pay_date: Option<String>,
    pub order_info: Option<String>,
}

impl GatewayCallback {
    pub const SUCCESS: &'static str = "00";

    pub fn is_success(&self) -> bool {
        self.response_code == Self::SUCCESS && self.transaction_status == Self::SUCCESS
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> &'static str;

    /// Build the signed redirect URL for a payment attempt.
    async fn create_payment_url(&self, request: &PaymentUrlRequest) -> CoreResult<String>;

    /// Verify a callback against its raw, still-encoded query string.
    /// Returns [`CoreError::SignatureInvalid`] when the hash does not match.
    fn verify_callback(&self, raw_query: &str) -> CoreResult<GatewayCallback>;

    /// Human-readable reason for a gateway response code.
    fn describe_response(&self, response_code: &str) -> String;

    /// Return URL for a checkout started from `origin` or `referer`. `None` keeps the
    /// gateway's configured default.
    fn resolve_return_url(&self, _origin: Option<&str>, _referer: Option<&str>) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_happy_path_transitions() {
        let status = PaymentStatus::Pending;
        let status = status.transition(PaymentEvent::Redirected).unwrap();
        assert_eq!(status, PaymentStatus::Processing);
        assert_eq!(status.transition(PaymentEvent::Succeeded).unwrap(), PaymentStatus::Paid);
    }

    #[test]
    fn test_terminal_states_reject_events() {
        for terminal in [PaymentStatus::Paid, PaymentStatus::Failed, PaymentStatus::Expired] {
            for event in [
                PaymentEvent::Redirected,
                PaymentEvent::Succeeded,
                PaymentEvent::Declined,
                PaymentEvent::TimedOut,
            ] {
                assert!(matches!(terminal.transition(event), Err(CoreError::Conflict(_))));
            }
        }
    }

    #[test]
    fn test_processing_cannot_redirect_again() {
        assert!(PaymentStatus::Processing.transition(PaymentEvent::Redirected).is_err());
    }

    #[test]
    fn test_second_redirect_keeps_first_url() {
        let now = Utc::now();
        let mut payment = Payment::for_order(Uuid::new_v4(), dec!(100000), "VND", "VNPAY", now, Duration::minutes(15));
        assert!(payment.mark_redirected("https://pay.example/first".into(), now).unwrap());
        assert!(!payment.mark_redirected("https://pay.example/second".into(), now).unwrap());
        assert_eq!(payment.status, PaymentStatus::Processing);
        assert_eq!(payment.redirect_url.as_deref(), Some("https://pay.example/first"));

        payment.mark_expired("Payment expired after 15 minutes".into(), now).unwrap();
        assert!(payment.mark_redirected("https://pay.example/third".into(), now).is_err());
    }

    #[test]
    fn test_activity_window() {
        let now = Utc::now();
        let mut payment = Payment::for_order(Uuid::new_v4(), dec!(100000), "VND", "VNPAY", now, Duration::minutes(15));
        assert!(payment.payment_number.starts_with("PAY-"));
        assert_eq!(payment.payment_number.len(), "PAY-20260101-ABCDEF12".len());
        assert!(payment.is_active_at(now + Duration::minutes(14)));
        assert!(!payment.is_active_at(now + Duration::minutes(15)));
        assert!(payment.is_overdue_at(now + Duration::minutes(15)));

        payment.mark_expired("Payment expired after 15 minutes".into(), now).unwrap();
        assert_eq!(payment.status, PaymentStatus::Expired);
        assert!(!payment.is_overdue_at(now + Duration::hours(1)));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [PaymentStatus::Pending, PaymentStatus::Processing, PaymentStatus::Paid] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
    }
}

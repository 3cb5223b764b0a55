use chrono::{DateTime, Utc};
use edumart_core::clock::Clock;
use edumart_core::wallet::{LedgerEntry, TransactionKind, Wallet, WalletOwner, WalletTransaction};
use edumart_core::{CoreError, CoreResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::repository::{PayoutRepository, WalletRepository};

const MAX_PAGE: i64 = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Requested,
    Completed,
    Rejected,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Requested => "REQUESTED",
            PayoutStatus::Completed => "COMPLETED",
            PayoutStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUESTED" => Ok(PayoutStatus::Requested),
            "COMPLETED" => Ok(PayoutStatus::Completed),
            "REJECTED" => Ok(PayoutStatus::Rejected),
            other => Err(CoreError::InternalError(format!("Unknown payout status {}", other))),
        }
    }
}

/// What an instructor submits to cash out.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPayoutRequest {
    pub amount: Decimal,
    pub bank_name: String,
    pub bank_account_number: String,
    pub bank_account_name: String,
    pub note: Option<String>,
}

impl NewPayoutRequest {
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |msg: &str| Err(CoreError::ValidationError(msg.to_string()));

        if self.amount <= Decimal::ZERO {
            return invalid("Payout amount must be positive");
        }
        if self.bank_name.trim().is_empty() || self.bank_name.chars().count() > 100 {
            return invalid("Bank name is required and at most 100 characters");
        }
        if self.bank_account_number.trim().is_empty() || self.bank_account_number.chars().count() > 50 {
            return invalid("Bank account number is required and at most 50 characters");
        }
        if self.bank_account_name.trim().is_empty() || self.bank_account_name.chars().count() > 100 {
            return invalid("Bank account name is required and at most 100 characters");
        }
        if self.note.as_ref().is_some_and(|n| n.chars().count() > 500) {
            return invalid("Note is at most 500 characters");
        }
        Ok(())
    }
}

/// An instructor's request to move available balance to a bank account. The wallet is only
/// debited when an admin approves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub wallet_id: Uuid,
    pub request_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PayoutStatus,
    pub bank_name: String,
    pub bank_account_number: String,
    pub bank_account_name: String,
    pub note: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutRequest {
    pub fn new(wallet: &Wallet, instructor_id: Uuid, request: NewPayoutRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            instructor_id,
            wallet_id: wallet.id,
            request_number: Self::generate_number(now),
            amount: request.amount,
            currency: wallet.currency.clone(),
            status: PayoutStatus::Requested,
            bank_name: request.bank_name.trim().to_string(),
            bank_account_number: request.bank_account_number.trim().to_string(),
            bank_account_name: request.bank_account_name.trim().to_string(),
            note: request.note,
            requested_at: now,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            updated_at: now,
        }
    }

    /// `PO-yyyyMMdd-XXXXXXXX`
    pub fn generate_number(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        format!("PO-{}-{}", now.format("%Y%m%d"), suffix)
    }

    fn ensure_requested(&self) -> CoreResult<()> {
        if self.status != PayoutStatus::Requested {
            return Err(CoreError::Conflict(format!(
                "Payout {} is {}, only requested payouts can be reviewed",
                self.request_number, self.status
            )));
        }
        Ok(())
    }

    /// `Requested -> Completed`. Returns the debit the caller must post in the same transaction.
    pub fn approve(&mut self, admin_id: Uuid, now: DateTime<Utc>) -> CoreResult<LedgerEntry> {
        self.ensure_requested()?;
        self.status = PayoutStatus::Completed;
        self.approved_by = Some(admin_id);
        self.approved_at = Some(now);
        self.updated_at = now;

        Ok(LedgerEntry {
            owner: WalletOwner::Instructor(self.instructor_id),
            kind: TransactionKind::Withdrawal,
            amount: self.amount,
            description: format!("Payout {}", self.request_number),
            order_id: None,
            reference: Some(self.request_number.clone()),
        })
    }

    /// `Requested -> Rejected`. Nothing was debited, so nothing moves back.
    pub fn reject(&mut self, admin_id: Uuid, reason: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_requested()?;
        self.status = PayoutStatus::Rejected;
        self.rejected_by = Some(admin_id);
        self.rejected_at = Some(now);
        self.rejection_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(())
    }
}

/// Payout requests from instructors and their review by admins.
pub struct PayoutService {
    payouts: Arc<dyn PayoutRepository>,
    wallets: Arc<dyn WalletRepository>,
    clock: Arc<dyn Clock>,
    currency: String,
}

impl PayoutService {
    pub fn new(
        payouts: Arc<dyn PayoutRepository>,
        wallets: Arc<dyn WalletRepository>,
        clock: Arc<dyn Clock>,
        currency: &str,
    ) -> Self {
        Self {
            payouts,
            wallets,
            clock,
            currency: currency.to_string(),
        }
    }

    /// Open a payout request. The balance is checked now and again at approval; only one
    /// request per instructor may await review.
    pub async fn request_payout(&self, instructor_id: Uuid, request: NewPayoutRequest) -> CoreResult<PayoutRequest> {
        request.validate()?;

        let wallet = self
            .wallets
            .ensure_wallet(WalletOwner::Instructor(instructor_id), &self.currency)
            .await?;
        if wallet.available_balance < request.amount {
            let err = CoreError::InsufficientFunds {
                wallet_id: wallet.id,
                requested: request.amount,
                available: wallet.available_balance,
            };
            warn!("Payout request refused for instructor {}: {}", instructor_id, err);
            return Err(err);
        }

        let payout = PayoutRequest::new(&wallet, instructor_id, request, self.clock.now());
        self.payouts.insert_payout(&payout).await?;
        info!(
            "Payout {} requested by instructor {} ({} {})",
            payout.request_number, instructor_id, payout.amount, payout.currency
        );
        Ok(payout)
    }

    pub async fn get_payout(&self, payout_id: Uuid) -> CoreResult<PayoutRequest> {
        self.payouts
            .find_payout(payout_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Payout", payout_id))
    }

    /// Another instructor's request reads as not found.
    pub async fn payout_for_instructor(&self, payout_id: Uuid, instructor_id: Uuid) -> CoreResult<PayoutRequest> {
        let payout = self.get_payout(payout_id).await?;
        if payout.instructor_id != instructor_id {
            return Err(CoreError::not_found("Payout", payout_id));
        }
        Ok(payout)
    }

    /// Newest first. `None` lists every instructor's requests.
    pub async fn list_payouts(&self, instructor_id: Option<Uuid>, limit: i64) -> CoreResult<Vec<PayoutRequest>> {
        self.payouts.list_payouts(instructor_id, limit.clamp(1, MAX_PAGE)).await
    }

    /// Complete the payout and debit the wallet, or neither.
    pub async fn approve(&self, payout_id: Uuid, admin_id: Uuid) -> CoreResult<(PayoutRequest, WalletTransaction)> {
        match self.payouts.approve_payout(payout_id, admin_id, self.clock.now()).await {
            Ok((payout, tx)) => {
                info!(
                    "Payout {} approved by {}: {} debited, {} left available",
                    payout.request_number, admin_id, payout.amount, tx.available_after
                );
                Ok((payout, tx))
            }
            Err(e @ CoreError::InsufficientFunds { .. }) => {
                warn!("Payout {} cannot be approved: {}", payout_id, e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn reject(&self, payout_id: Uuid, admin_id: Uuid, reason: &str) -> CoreResult<PayoutRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::ValidationError("A rejection needs a reason".into()));
        }
        let payout = self
            .payouts
            .reject_payout(payout_id, admin_id, reason, self.clock.now())
            .await?;
        info!("Payout {} rejected by {}: {}", payout.request_number, admin_id, reason);
        Ok(payout)
    }
}

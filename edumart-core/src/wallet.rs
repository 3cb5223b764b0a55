use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Who a wallet belongs to. There is exactly one platform wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "instructor_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletOwner {
    Platform,
    Instructor(Uuid),
}

impl WalletOwner {
    pub fn owner_type(&self) -> &'static str {
        match self {
            WalletOwner::Platform => "PLATFORM",
            WalletOwner::Instructor(_) => "INSTRUCTOR",
        }
    }

    pub fn instructor_id(&self) -> Option<Uuid> {
        match self {
            WalletOwner::Platform => None,
            WalletOwner::Instructor(id) => Some(*id),
        }
    }

    pub fn from_parts(owner_type: &str, instructor_id: Option<Uuid>) -> CoreResult<Self> {
        match (owner_type, instructor_id) {
            ("PLATFORM", None) => Ok(WalletOwner::Platform),
            ("INSTRUCTOR", Some(id)) => Ok(WalletOwner::Instructor(id)),
            (other, _) => Err(CoreError::InternalError(format!("Malformed wallet owner {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Earnings of a paid order, held until settlement.
    PendingCredit,
    /// A refund inside the hold window takes held earnings back.
    PendingReversal,
    /// Hold period over: pending moves to available.
    Settlement,
    TopUp,
    Withdrawal,
}

impl TransactionKind {
    pub fn direction(&self) -> Direction {
        match self {
            TransactionKind::PendingCredit | TransactionKind::Settlement | TransactionKind::TopUp => {
                Direction::Credit
            }
            TransactionKind::PendingReversal | TransactionKind::Withdrawal => Direction::Debit,
        }
    }

    /// `(available delta, pending delta)` for a positive `amount`.
    pub fn deltas(&self, amount: Decimal) -> (Decimal, Decimal) {
        match self {
            TransactionKind::PendingCredit => (Decimal::ZERO, amount),
            TransactionKind::PendingReversal => (Decimal::ZERO, -amount),
            TransactionKind::Settlement => (amount, -amount),
            TransactionKind::TopUp => (amount, Decimal::ZERO),
            TransactionKind::Withdrawal => (-amount, Decimal::ZERO),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::PendingCredit => "PENDING_CREDIT",
            TransactionKind::PendingReversal => "PENDING_REVERSAL",
            TransactionKind::Settlement => "SETTLEMENT",
            TransactionKind::TopUp => "TOP_UP",
            TransactionKind::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_CREDIT" => Ok(TransactionKind::PendingCredit),
            "PENDING_REVERSAL" => Ok(TransactionKind::PendingReversal),
            "SETTLEMENT" => Ok(TransactionKind::Settlement),
            "TOP_UP" => Ok(TransactionKind::TopUp),
            "WITHDRAWAL" => Ok(TransactionKind::Withdrawal),
            other => Err(CoreError::InternalError(format!("Unknown transaction kind {}", other))),
        }
    }
}

/// A posting request. Storage turns it into a [`WalletTransaction`] atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub owner: WalletOwner,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    pub order_id: Option<Uuid>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub owner: WalletOwner,
    pub available_balance: Decimal,
    pub pending_balance: Decimal,
    pub total_earnings: Decimal,
    pub total_withdrawn: Decimal,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: TransactionKind,
    pub direction: Direction,
    pub amount: Decimal,
    pub available_after: Decimal,
    pub pending_after: Decimal,
    pub description: String,
    pub order_id: Option<Uuid>,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner: WalletOwner, currency: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            available_balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            currency: currency.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// The ledger rule: apply one entry, refusing anything that would drive a balance negative.
    /// On error the wallet is untouched.
    pub fn apply(&mut self, entry: &LedgerEntry, now: DateTime<Utc>) -> CoreResult<WalletTransaction> {
        if entry.amount <= Decimal::ZERO {
            return Err(CoreError::ValidationError(format!(
                "Ledger amount must be positive, got {}",
                entry.amount
            )));
        }
        if !self.is_active {
            return Err(CoreError::Conflict(format!("Wallet {} is inactive", self.id)));
        }

        let (available_delta, pending_delta) = entry.kind.deltas(entry.amount);
        let available = self.available_balance + available_delta;
        let pending = self.pending_balance + pending_delta;

        if available < Decimal::ZERO {
            return Err(CoreError::InsufficientFunds {
                wallet_id: self.id,
                requested: entry.amount,
                available: self.available_balance,
            });
        }
        if pending < Decimal::ZERO {
            return Err(CoreError::InsufficientFunds {
                wallet_id: self.id,
                requested: entry.amount,
                available: self.pending_balance,
            });
        }

        self.available_balance = available;
        self.pending_balance = pending;
        match entry.kind {
            TransactionKind::Settlement => self.total_earnings += entry.amount,
            TransactionKind::Withdrawal => self.total_withdrawn += entry.amount,
            _ => {}
        }
        self.updated_at = now;

        Ok(WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id: self.id,
            kind: entry.kind,
            direction: entry.kind.direction(),
            amount: entry.amount,
            available_after: available,
            pending_after: pending,
            description: entry.description.clone(),
            order_id: entry.order_id,
            reference: entry.reference.clone(),
            created_at: now,
        })
    }
}

/// Recomputes `(available, pending)` from a wallet's transaction log, oldest first.
pub fn replay(transactions: &[WalletTransaction]) -> (Decimal, Decimal) {
    transactions
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(available, pending), tx| {
            let (a, p) = tx.kind.deltas(tx.amount);
            (available + a, pending + p)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(kind: TransactionKind, amount: Decimal) -> LedgerEntry {
        LedgerEntry {
            owner: WalletOwner::Instructor(Uuid::nil()),
            kind,
            amount,
            description: "test".into(),
            order_id: None,
            reference: None,
        }
    }

    #[test]
    fn test_pending_then_settlement() {
        let now = Utc::now();
        let mut wallet = Wallet::new(WalletOwner::Instructor(Uuid::new_v4()), "VND", now);

        let credit = wallet.apply(&entry(TransactionKind::PendingCredit, dec!(245000)), now).unwrap();
        assert_eq!(credit.pending_after, dec!(245000));
        assert_eq!(wallet.available_balance, dec!(0));

        let settle = wallet.apply(&entry(TransactionKind::Settlement, dec!(245000)), now).unwrap();
        assert_eq!(settle.available_after, dec!(245000));
        assert_eq!(settle.pending_after, dec!(0));
        assert_eq!(wallet.total_earnings, dec!(245000));
        assert_eq!(settle.direction, Direction::Credit);
    }

    #[test]
    fn test_withdrawal_cannot_overdraw() {
        let now = Utc::now();
        let mut wallet = Wallet::new(WalletOwner::Instructor(Uuid::new_v4()), "VND", now);
        wallet.apply(&entry(TransactionKind::TopUp, dec!(100)), now).unwrap();

        let err = wallet.apply(&entry(TransactionKind::Withdrawal, dec!(100.01)), now).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientFunds { requested, available, .. }
            if requested == dec!(100.01) && available == dec!(100)));
        assert_eq!(wallet.available_balance, dec!(100));
        assert_eq!(wallet.total_withdrawn, dec!(0));
    }

    #[test]
    fn test_settlement_requires_pending_funds() {
        let now = Utc::now();
        let mut wallet = Wallet::new(WalletOwner::Platform, "VND", now);
        assert!(wallet.apply(&entry(TransactionKind::Settlement, dec!(1)), now).is_err());
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        let now = Utc::now();
        let mut wallet = Wallet::new(WalletOwner::Platform, "VND", now);
        assert!(matches!(
            wallet.apply(&entry(TransactionKind::TopUp, dec!(0)), now),
            Err(CoreError::ValidationError(_))
        ));
    }

    #[test]
    fn test_replay_matches_balances() {
        let now = Utc::now();
        let mut wallet = Wallet::new(WalletOwner::Instructor(Uuid::new_v4()), "VND", now);
        let mut log = Vec::new();
        for (kind, amount) in [
            (TransactionKind::PendingCredit, dec!(500)),
            (TransactionKind::PendingCredit, dec!(300)),
            (TransactionKind::PendingReversal, dec!(300)),
            (TransactionKind::Settlement, dec!(500)),
            (TransactionKind::TopUp, dec!(50)),
            (TransactionKind::Withdrawal, dec!(200)),
        ] {
            log.push(wallet.apply(&entry(kind, amount), now).unwrap());
        }

        assert_eq!(replay(&log), (wallet.available_balance, wallet.pending_balance));
        assert_eq!(wallet.available_balance, dec!(350));
        assert_eq!(wallet.pending_balance, dec!(0));
    }

    #[test]
    fn test_owner_parts_round_trip() {
        let id = Uuid::new_v4();
        let owner = WalletOwner::Instructor(id);
        assert_eq!(WalletOwner::from_parts(owner.owner_type(), owner.instructor_id()).unwrap(), owner);
        assert_eq!(WalletOwner::from_parts("PLATFORM", None).unwrap(), WalletOwner::Platform);
    }
}

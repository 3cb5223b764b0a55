use edumart_core::wallet::{Wallet, WalletOwner, WalletTransaction};
use edumart_core::CoreResult;
use std::sync::Arc;
use uuid::Uuid;

use crate::repository::WalletRepository;

const MAX_PAGE: i64 = 200;

/// Read side of the ledger. Money leaves through [`crate::PayoutService`].
pub struct WalletService {
    wallets: Arc<dyn WalletRepository>,
    currency: String,
}

impl WalletService {
    pub fn new(wallets: Arc<dyn WalletRepository>, currency: &str) -> Self {
        Self {
            wallets,
            currency: currency.to_string(),
        }
    }

    pub async fn instructor_wallet(&self, instructor_id: Uuid) -> CoreResult<Wallet> {
        self.wallets
            .ensure_wallet(WalletOwner::Instructor(instructor_id), &self.currency)
            .await
    }

    pub async fn platform_wallet(&self) -> CoreResult<Wallet> {
        self.wallets.ensure_wallet(WalletOwner::Platform, &self.currency).await
    }

    /// Newest first, at most `limit` rows (capped).
    pub async fn transactions(&self, wallet_id: Uuid, limit: i64) -> CoreResult<Vec<WalletTransaction>> {
        self.wallets.transactions(wallet_id, limit.clamp(1, MAX_PAGE)).await
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edumart_core::wallet::{Direction, LedgerEntry, TransactionKind, Wallet, WalletOwner, WalletTransaction};
use edumart_core::{CoreError, CoreResult};
use edumart_order::repository::WalletRepository;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::db_err;

pub struct StoreWalletRepository {
    pool: PgPool,
}

impl StoreWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    owner_type: String,
    instructor_id: Option<Uuid>,
    available_balance: Decimal,
    pending_balance: Decimal,
    total_earnings: Decimal,
    total_withdrawn: Decimal,
    currency: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WalletRow> for Wallet {
    type Error = CoreError;

    fn try_from(row: WalletRow) -> CoreResult<Self> {
        Ok(Wallet {
            id: row.id,
            owner: WalletOwner::from_parts(&row.owner_type, row.instructor_id)?,
            available_balance: row.available_balance,
            pending_balance: row.pending_balance,
            total_earnings: row.total_earnings,
            total_withdrawn: row.total_withdrawn,
            currency: row.currency,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    wallet_id: Uuid,
    kind: String,
    amount: Decimal,
    available_after: Decimal,
    pending_after: Decimal,
    description: String,
    order_id: Option<Uuid>,
    reference: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for WalletTransaction {
    type Error = CoreError;

    fn try_from(row: TransactionRow) -> CoreResult<Self> {
        let kind: TransactionKind = row.kind.parse()?;
        Ok(WalletTransaction {
            id: row.id,
            wallet_id: row.wallet_id,
            kind,
            direction: kind.direction(),
            amount: row.amount,
            available_after: row.available_after,
            pending_after: row.pending_after,
            description: row.description,
            order_id: row.order_id,
            reference: row.reference,
            created_at: row.created_at,
        })
    }
}

// ============================================================================
// Ledger posting, shared by every repository that moves money
// ============================================================================

async fn insert_wallet_if_missing(
    conn: &mut PgConnection,
    owner: WalletOwner,
    currency: &str,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    let wallet = Wallet::new(owner, currency, now);
    sqlx::query(
        r#"
        INSERT INTO wallets (id, owner_type, instructor_id, currency, is_active, created_at, updated_at)
        VALUES ($1, $2, $3, $4, TRUE, $5, $5)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(wallet.id)
    .bind(owner.owner_type())
    .bind(owner.instructor_id())
    .bind(&wallet.currency)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn select_wallet(conn: &mut PgConnection, owner: WalletOwner, for_update: bool) -> CoreResult<Option<Wallet>> {
    let sql = if for_update {
        "SELECT * FROM wallets WHERE owner_type = $1 AND instructor_id IS NOT DISTINCT FROM $2 FOR UPDATE"
    } else {
        "SELECT * FROM wallets WHERE owner_type = $1 AND instructor_id IS NOT DISTINCT FROM $2"
    };
    sqlx::query_as::<_, WalletRow>(sql)
        .bind(owner.owner_type())
        .bind(owner.instructor_id())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
        .map(Wallet::try_from)
        .transpose()
}

async fn insert_transaction(conn: &mut PgConnection, tx: &WalletTransaction) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO wallet_transactions
            (id, wallet_id, kind, direction, amount, available_after, pending_after, description, order_id, reference, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(tx.id)
    .bind(tx.wallet_id)
    .bind(tx.kind.as_str())
    .bind(match tx.direction {
        Direction::Credit => "CREDIT",
        Direction::Debit => "DEBIT",
    })
    .bind(tx.amount)
    .bind(tx.available_after)
    .bind(tx.pending_after)
    .bind(&tx.description)
    .bind(tx.order_id)
    .bind(&tx.reference)
    .bind(tx.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Posts `entries` inside the caller's transaction. Every affected wallet is created if missing
/// and row-locked in a fixed order before any balance moves, so concurrent postings serialize
/// per wallet and cannot deadlock. A balance that would go negative fails the whole batch.
pub(crate) async fn post_entries(
    conn: &mut PgConnection,
    entries: &[LedgerEntry],
    currency: &str,
    now: DateTime<Utc>,
) -> CoreResult<Vec<WalletTransaction>> {
    let mut owners: Vec<WalletOwner> = entries.iter().map(|e| e.owner).collect();
    owners.sort_by_key(|o| (o.owner_type(), o.instructor_id()));
    owners.dedup();

    let mut wallets = HashMap::with_capacity(owners.len());
    for owner in owners {
        insert_wallet_if_missing(conn, owner, currency, now).await?;
        let wallet = select_wallet(conn, owner, true)
            .await?
            .ok_or_else(|| CoreError::not_found("Wallet", owner.owner_type()))?;
        wallets.insert(owner, wallet);
    }

    let mut posted = Vec::with_capacity(entries.len());
    for entry in entries {
        let wallet = wallets
            .get_mut(&entry.owner)
            .ok_or_else(|| CoreError::not_found("Wallet", entry.owner.owner_type()))?;
        let tx = wallet.apply(entry, now)?;
        insert_transaction(conn, &tx).await?;
        posted.push(tx);
    }

    for wallet in wallets.values() {
        sqlx::query(
            r#"
            UPDATE wallets
            SET available_balance = $2, pending_balance = $3, total_earnings = $4,
                total_withdrawn = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.available_balance)
        .bind(wallet.pending_balance)
        .bind(wallet.total_earnings)
        .bind(wallet.total_withdrawn)
        .bind(wallet.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }

    Ok(posted)
}

#[async_trait]
impl WalletRepository for StoreWalletRepository {
    async fn ensure_wallet(&self, owner: WalletOwner, currency: &str) -> CoreResult<Wallet> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert_wallet_if_missing(&mut conn, owner, currency, Utc::now()).await?;
        select_wallet(&mut conn, owner, false)
            .await?
            .ok_or_else(|| CoreError::not_found("Wallet", owner.owner_type()))
    }

    async fn find_wallet(&self, owner: WalletOwner) -> CoreResult<Option<Wallet>> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        select_wallet(&mut conn, owner, false).await
    }

    async fn find_wallet_by_id(&self, wallet_id: Uuid) -> CoreResult<Option<Wallet>> {
        sqlx::query_as::<_, WalletRow>("SELECT * FROM wallets WHERE id = $1")
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Wallet::try_from)
            .transpose()
    }

    async fn transactions(&self, wallet_id: Uuid, limit: i64) -> CoreResult<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, wallet_id, kind, amount, available_after, pending_after, description, order_id, reference, created_at
            FROM wallet_transactions
            WHERE wallet_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(wallet_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(WalletTransaction::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wallet_row_needs_a_consistent_owner() {
        let now = Utc::now();
        let row = |owner_type: &str, instructor_id: Option<Uuid>| WalletRow {
            id: Uuid::new_v4(),
            owner_type: owner_type.to_string(),
            instructor_id,
            available_balance: dec!(0),
            pending_balance: dec!(108000),
            total_earnings: dec!(0),
            total_withdrawn: dec!(0),
            currency: "VND".into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let platform = Wallet::try_from(row("PLATFORM", None)).unwrap();
        assert_eq!(platform.owner, WalletOwner::Platform);
        assert_eq!(platform.pending_balance, dec!(108000));
        assert!(Wallet::try_from(row("PLATFORM", Some(Uuid::new_v4()))).is_err());
        assert!(Wallet::try_from(row("INSTRUCTOR", None)).is_err());
    }

    #[test]
    fn test_transaction_row_derives_direction() {
        let row = TransactionRow {
            id: Uuid::new_v4(),
            wallet_id: Uuid::new_v4(),
            kind: "PENDING_REVERSAL".into(),
            amount: dec!(245000),
            available_after: dec!(0),
            pending_after: dec!(0),
            description: "Refund".into(),
            order_id: None,
            reference: None,
            created_at: Utc::now(),
        };
        let tx = WalletTransaction::try_from(row).unwrap();
        assert_eq!(tx.kind, TransactionKind::PendingReversal);
        assert_eq!(tx.direction, Direction::Debit);
    }
}

//! Postgres ledger store
//!
//! The signature uniqueness and the atomic append are enforced by the database
//! (unique constraint + transaction), so several server instances can share it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{Allowance, AppendOutcome, LedgerStore, StoreError, StoreResult};
use super::types::{
    Account, AccountId, Lamports, NewPayment, PaymentRecord, Plan, ProductType, SubscriptionMarker,
    UsageCounter,
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS accounts (
        id             UUID PRIMARY KEY,
        subject        TEXT NOT NULL UNIQUE,
        wallet_address TEXT UNIQUE,
        created_at     TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS payment_records (
        id              UUID PRIMARY KEY,
        account_id      UUID NOT NULL REFERENCES accounts(id),
        product         TEXT NOT NULL,
        plan            TEXT,
        amount_lamports BIGINT NOT NULL CHECK (amount_lamports > 0),
        currency        TEXT NOT NULL,
        signature       TEXT NOT NULL UNIQUE,
        observed_at     TIMESTAMPTZ NOT NULL,
        expires_at      TIMESTAMPTZ,
        redeemed_digest TEXT
    )"#,
    "ALTER TABLE payment_records ADD COLUMN IF NOT EXISTS redeemed_digest TEXT",
    "CREATE INDEX IF NOT EXISTS idx_payment_records_account ON payment_records(account_id, observed_at)",
    r#"CREATE TABLE IF NOT EXISTS usage_counters (
        account_id            UUID PRIMARY KEY REFERENCES accounts(id),
        total_generated       BIGINT NOT NULL DEFAULT 0,
        total_spent_lamports  BIGINT NOT NULL DEFAULT 0,
        free_generations_used INTEGER NOT NULL DEFAULT 0,
        free_messages_used    INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS subscriptions (
        account_id     UUID PRIMARY KEY REFERENCES accounts(id),
        plan           TEXT NOT NULL,
        expires_at     TIMESTAMPTZ NOT NULL,
        last_signature TEXT NOT NULL,
        updated_at     TIMESTAMPTZ NOT NULL
    )"#,
];

const PAYMENT_COLUMNS: &str =
    "id, account_id, product, plan, amount_lamports, currency, signature, observed_at, expires_at";

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().map_or(false, |db| db.is_unique_violation())
}

fn to_i64(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("value {} exceeds BIGINT", value)))
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    Ok(Account {
        id: row.try_get("id").map_err(backend)?,
        subject: row.try_get("subject").map_err(backend)?,
        wallet_address: row.try_get("wallet_address").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn payment_from_row(row: &PgRow) -> StoreResult<PaymentRecord> {
    let product: String = row.try_get("product").map_err(backend)?;
    let plan: Option<String> = row.try_get("plan").map_err(backend)?;
    let amount: i64 = row.try_get("amount_lamports").map_err(backend)?;

    Ok(PaymentRecord {
        id: row.try_get("id").map_err(backend)?,
        account_id: row.try_get("account_id").map_err(backend)?,
        product: product
            .parse::<ProductType>()
            .map_err(|p| StoreError::Backend(format!("unknown product in ledger: {}", p)))?,
        plan: plan
            .map(|p| p.parse::<Plan>())
            .transpose()
            .map_err(|p| StoreError::Backend(format!("unknown plan in ledger: {}", p)))?,
        amount: Lamports(u64::try_from(amount).map_err(|_| StoreError::Backend("negative amount".into()))?),
        currency: row.try_get("currency").map_err(backend)?,
        signature: row.try_get("signature").map_err(backend)?,
        observed_at: row.try_get("observed_at").map_err(backend)?,
        expires_at: row.try_get("expires_at").map_err(backend)?,
    })
}

/// Ledger store backed by Postgres
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(backend)?;
        let store = Self { pool };
        store.migrate().await?;
        info!("🗄️ Postgres ledger store ready ({} max connections)", max_connections);
        Ok(store)
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(backend)?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        sqlx::query("SELECT id, subject, wallet_address, created_at FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn find_account_by_subject(&self, subject: &str) -> StoreResult<Option<Account>> {
        sqlx::query("SELECT id, subject, wallet_address, created_at FROM accounts WHERE subject = $1")
            .bind(subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn create_account(
        &self,
        subject: &str,
        wallet_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Account> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let inserted = sqlx::query(
            "INSERT INTO accounts (id, subject, wallet_address, created_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (subject) DO NOTHING RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(subject)
        .bind(wallet_address)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::WalletTaken(wallet_address.unwrap_or_default().to_string())
            } else {
                backend(e)
            }
        })?;

        if let Some(row) = inserted {
            let id: Uuid = row.try_get("id").map_err(backend)?;
            sqlx::query("INSERT INTO usage_counters (account_id) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        let row = sqlx::query("SELECT id, subject, wallet_address, created_at FROM accounts WHERE subject = $1")
            .bind(subject)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
        let account = account_from_row(&row)?;

        tx.commit().await.map_err(backend)?;
        Ok(account)
    }

    async fn attach_wallet(&self, id: AccountId, wallet_address: &str) -> StoreResult<Account> {
        sqlx::query(
            "UPDATE accounts SET wallet_address = $2 WHERE id = $1 \
             RETURNING id, subject, wallet_address, created_at",
        )
        .bind(id)
        .bind(wallet_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::WalletTaken(wallet_address.to_string())
            } else {
                backend(e)
            }
        })?
        .as_ref()
        .map(account_from_row)
        .transpose()?
        .ok_or(StoreError::AccountNotFound(id))
    }

    async fn find_payment(&self, signature: &str) -> StoreResult<Option<PaymentRecord>> {
        sqlx::query(&format!("SELECT {} FROM payment_records WHERE signature = $1", PAYMENT_COLUMNS))
            .bind(signature)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(payment_from_row)
            .transpose()
    }

    async fn append_payment(&self, payment: NewPayment) -> StoreResult<AppendOutcome> {
        let record = payment.into_record();
        let amount = to_i64(record.amount.0)?;
        let generated: i64 = if record.product == ProductType::WebsiteGeneration { 1 } else { 0 };

        // Dropping `tx` before commit rolls everything back
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO payment_records ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (signature) DO NOTHING RETURNING id",
            PAYMENT_COLUMNS
        ))
        .bind(record.id)
        .bind(record.account_id)
        .bind(record.product.as_str())
        .bind(record.plan.map(|p| p.as_str()))
        .bind(amount)
        .bind(&record.currency)
        .bind(&record.signature)
        .bind(record.observed_at)
        .bind(record.expires_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        if inserted.is_none() {
            tx.rollback().await.map_err(backend)?;
            let existing = self
                .find_payment(&record.signature)
                .await?
                .ok_or_else(|| StoreError::Backend(format!("signature {} vanished", record.signature)))?;
            return Ok(AppendOutcome::Duplicate(existing));
        }

        let updated = sqlx::query(
            "UPDATE usage_counters SET total_spent_lamports = total_spent_lamports + $2, \
             total_generated = total_generated + $3 WHERE account_id = $1",
        )
        .bind(record.account_id)
        .bind(amount)
        .bind(generated)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        if updated.rows_affected() != 1 {
            return Err(StoreError::AccountNotFound(record.account_id));
        }

        if let (ProductType::Subscription, Some(plan), Some(expires_at)) =
            (record.product, record.plan, record.expires_at)
        {
            sqlx::query(
                "INSERT INTO subscriptions (account_id, plan, expires_at, last_signature, updated_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (account_id) DO UPDATE SET \
                   plan = CASE WHEN EXCLUDED.expires_at > subscriptions.expires_at \
                               THEN EXCLUDED.plan ELSE subscriptions.plan END, \
                   expires_at = GREATEST(subscriptions.expires_at, EXCLUDED.expires_at), \
                   last_signature = EXCLUDED.last_signature, \
                   updated_at = EXCLUDED.updated_at",
            )
            .bind(record.account_id)
            .bind(plan.as_str())
            .bind(expires_at)
            .bind(&record.signature)
            .bind(record.observed_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        debug!("Committed payment {}", record.signature);
        Ok(AppendOutcome::Inserted(record))
    }

    async fn payments_for(&self, id: AccountId) -> StoreResult<Vec<PaymentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payment_records WHERE account_id = $1 ORDER BY observed_at, id",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn usage(&self, id: AccountId) -> StoreResult<UsageCounter> {
        let row = sqlx::query(
            "SELECT total_generated, total_spent_lamports, free_generations_used, free_messages_used \
             FROM usage_counters WHERE account_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::AccountNotFound(id))?;

        let total_generated: i64 = row.try_get("total_generated").map_err(backend)?;
        let total_spent: i64 = row.try_get("total_spent_lamports").map_err(backend)?;
        let free_generations_used: i32 = row.try_get("free_generations_used").map_err(backend)?;
        let free_messages_used: i32 = row.try_get("free_messages_used").map_err(backend)?;

        Ok(UsageCounter {
            total_generated: total_generated.max(0) as u64,
            total_spent: Lamports(total_spent.max(0) as u64),
            free_generations_used: free_generations_used.max(0) as u32,
            free_messages_used: free_messages_used.max(0) as u32,
        })
    }

    async fn subscription(&self, id: AccountId) -> StoreResult<Option<SubscriptionMarker>> {
        let row = sqlx::query("SELECT plan, expires_at, last_signature FROM subscriptions WHERE account_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let plan: String = row.try_get("plan").map_err(backend)?;
                Ok(Some(SubscriptionMarker {
                    plan: plan
                        .parse()
                        .map_err(|p| StoreError::Backend(format!("unknown plan in ledger: {}", p)))?,
                    expires_at: row.try_get("expires_at").map_err(backend)?,
                    last_signature: row.try_get("last_signature").map_err(backend)?,
                }))
            }
        }
    }

    async fn try_consume(&self, id: AccountId, allowance: Allowance, limit: u32) -> StoreResult<Option<u32>> {
        let limit = i64::from(limit);

        // Single conditional UPDATE: the row lock serializes concurrent consumers
        let remaining: Option<i64> = match allowance {
            Allowance::Generation => sqlx::query(
                "UPDATE usage_counters SET free_generations_used = free_generations_used + 1 \
                 WHERE account_id = $1 AND total_generated + free_generations_used < $2 \
                 RETURNING $2 - (total_generated + free_generations_used) AS remaining",
            ),
            Allowance::Message => sqlx::query(
                "UPDATE usage_counters SET free_messages_used = free_messages_used + 1 \
                 WHERE account_id = $1 AND free_messages_used < $2 \
                 RETURNING $2 - free_messages_used AS remaining",
            ),
        }
        .bind(id)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .map(|row| row.try_get::<i64, _>("remaining"))
        .transpose()
        .map_err(backend)?;

        match remaining {
            Some(left) => Ok(Some(left.max(0) as u32)),
            None => {
                // Distinguish "exhausted" from "no such account"
                self.usage(id).await?;
                Ok(None)
            }
        }
    }

    async fn bind_redemption(&self, signature: &str, digest: &str) -> StoreResult<Option<String>> {
        // The row lock lets exactly one concurrent binder match the NULL check
        let bound = sqlx::query(
            "UPDATE payment_records SET redeemed_digest = $2 \
             WHERE signature = $1 AND redeemed_digest IS NULL",
        )
        .bind(signature)
        .bind(digest)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if bound.rows_affected() == 1 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT redeemed_digest FROM payment_records WHERE signature = $1")
            .bind(signature)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::PaymentNotFound(signature.to_string()))?;
        let existing: Option<String> = row.try_get("redeemed_digest").map_err(backend)?;
        existing
            .map(Some)
            .ok_or_else(|| StoreError::Backend(format!("redemption of {} not visible", signature)))
    }
}

//! Ledger storage contract
//!
//! Every backend must provide:
//! - a global uniqueness constraint on payment signatures
//! - an atomic unit covering record append, counter update and subscription upsert
//! - an atomic check-and-increment for free allowances
//! - a set-once binding between a generation payment and the site it bought
//! - read-after-write consistency for a single account

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{Account, AccountId, NewPayment, PaymentRecord, SubscriptionMarker, UsageCounter};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),
    #[error("Wallet {0} is already attached to another account")]
    WalletTaken(String),
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result of appending a payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// First occurrence of the signature; counters were updated
    Inserted(PaymentRecord),
    /// Signature already present; nothing changed
    Duplicate(PaymentRecord),
}

/// Free-tier allowance kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Allowance {
    /// Shares its limit with paid website-generation records
    Generation,
    /// Lifetime messages sent
    Message,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn find_account_by_subject(&self, subject: &str) -> StoreResult<Option<Account>>;

    /// Create the account for `subject` or return the one that already exists
    async fn create_account(
        &self,
        subject: &str,
        wallet_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Account>;

    async fn attach_wallet(&self, id: AccountId, wallet_address: &str) -> StoreResult<Account>;

    async fn find_payment(&self, signature: &str) -> StoreResult<Option<PaymentRecord>>;

    /// Append a payment and apply its effects in one atomic unit.
    ///
    /// On a signature collision nothing is written and the stored record is returned.
    async fn append_payment(&self, payment: NewPayment) -> StoreResult<AppendOutcome>;

    /// Records for one account ordered by `observed_at`
    async fn payments_for(&self, id: AccountId) -> StoreResult<Vec<PaymentRecord>>;

    async fn usage(&self, id: AccountId) -> StoreResult<UsageCounter>;

    async fn subscription(&self, id: AccountId) -> StoreResult<Option<SubscriptionMarker>>;

    /// Consume one unit of a free allowance if any is left.
    ///
    /// Returns the remaining units after consumption, or `None` when exhausted.
    async fn try_consume(&self, id: AccountId, allowance: Allowance, limit: u32) -> StoreResult<Option<u32>>;

    /// Bind a site digest to a recorded payment if none is bound yet.
    ///
    /// Returns the digest bound earlier, or `None` when `digest` was bound by this call.
    async fn bind_redemption(&self, signature: &str, digest: &str) -> StoreResult<Option<String>>;
}

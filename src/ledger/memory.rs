//! In-process ledger store
//!
//! All tables live behind one mutex so every trait method is a single atomic
//! unit. The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::store::{Allowance, AppendOutcome, LedgerStore, StoreError, StoreResult};
use super::types::{
    Account, AccountId, NewPayment, PaymentRecord, ProductType, SubscriptionMarker, UsageCounter,
};

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    subjects: HashMap<String, AccountId>,
    wallets: HashMap<String, AccountId>,
    /// Append-only, insertion order
    payments: Vec<PaymentRecord>,
    signatures: HashMap<String, usize>,
    usage: HashMap<AccountId, UsageCounter>,
    subscriptions: HashMap<AccountId, SubscriptionMarker>,
    /// Signature to the digest of the site it paid for
    redemptions: HashMap<String, String>,
}

/// Ledger store backed by process memory
#[derive(Default)]
pub struct MemoryLedgerStore {
    tables: Mutex<Tables>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| StoreError::Backend(format!("ledger lock poisoned: {}", e)))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.lock()?.accounts.get(&id).cloned())
    }

    async fn find_account_by_subject(&self, subject: &str) -> StoreResult<Option<Account>> {
        let tables = self.lock()?;
        Ok(tables
            .subjects
            .get(subject)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    async fn create_account(
        &self,
        subject: &str,
        wallet_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Account> {
        let mut tables = self.lock()?;

        if let Some(existing) = tables.subjects.get(subject).and_then(|id| tables.accounts.get(id)) {
            return Ok(existing.clone());
        }
        if let Some(wallet) = wallet_address {
            if tables.wallets.contains_key(wallet) {
                return Err(StoreError::WalletTaken(wallet.to_string()));
            }
        }

        let account = Account::new(subject, wallet_address, now);
        if let Some(wallet) = wallet_address {
            tables.wallets.insert(wallet.to_string(), account.id);
        }
        tables.subjects.insert(subject.to_string(), account.id);
        tables.usage.insert(account.id, UsageCounter::default());
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn attach_wallet(&self, id: AccountId, wallet_address: &str) -> StoreResult<Account> {
        let mut tables = self.lock()?;

        match tables.wallets.get(wallet_address) {
            Some(owner) if *owner == id => {}
            Some(_) => return Err(StoreError::WalletTaken(wallet_address.to_string())),
            None => {}
        }

        let previous = {
            let account = tables.accounts.get_mut(&id).ok_or(StoreError::AccountNotFound(id))?;
            account.wallet_address.replace(wallet_address.to_string())
        };
        if let Some(previous) = previous {
            tables.wallets.remove(&previous);
        }
        tables.wallets.insert(wallet_address.to_string(), id);

        tables.accounts.get(&id).cloned().ok_or(StoreError::AccountNotFound(id))
    }

    async fn find_payment(&self, signature: &str) -> StoreResult<Option<PaymentRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .signatures
            .get(signature)
            .and_then(|idx| tables.payments.get(*idx))
            .cloned())
    }

    async fn append_payment(&self, payment: NewPayment) -> StoreResult<AppendOutcome> {
        let mut tables = self.lock()?;

        if let Some(existing) = tables
            .signatures
            .get(&payment.signature)
            .and_then(|idx| tables.payments.get(*idx))
        {
            return Ok(AppendOutcome::Duplicate(existing.clone()));
        }
        if !tables.accounts.contains_key(&payment.account_id) {
            return Err(StoreError::AccountNotFound(payment.account_id));
        }

        // Everything below is infallible, so the unit either fully applies or not at all
        let record = payment.into_record();
        tables.usage.entry(record.account_id).or_default().apply(&record);

        if record.product == ProductType::Subscription {
            if let (Some(plan), Some(expires_at)) = (record.plan, record.expires_at) {
                tables
                    .subscriptions
                    .entry(record.account_id)
                    .and_modify(|marker| marker.extend(plan, expires_at, &record.signature))
                    .or_insert_with(|| SubscriptionMarker {
                        plan,
                        expires_at,
                        last_signature: record.signature.clone(),
                    });
            }
        }

        let idx = tables.payments.len();
        tables.signatures.insert(record.signature.clone(), idx);
        tables.payments.push(record.clone());

        debug!("Appended payment {} ({} records in ledger)", record.signature, idx + 1);
        Ok(AppendOutcome::Inserted(record))
    }

    async fn payments_for(&self, id: AccountId) -> StoreResult<Vec<PaymentRecord>> {
        let tables = self.lock()?;
        let mut records: Vec<PaymentRecord> = tables
            .payments
            .iter()
            .filter(|p| p.account_id == id)
            .cloned()
            .collect();
        records.sort_by_key(|p| p.observed_at);
        Ok(records)
    }

    async fn usage(&self, id: AccountId) -> StoreResult<UsageCounter> {
        let tables = self.lock()?;
        if !tables.accounts.contains_key(&id) {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(tables.usage.get(&id).cloned().unwrap_or_default())
    }

    async fn subscription(&self, id: AccountId) -> StoreResult<Option<SubscriptionMarker>> {
        Ok(self.lock()?.subscriptions.get(&id).cloned())
    }

    async fn try_consume(&self, id: AccountId, allowance: Allowance, limit: u32) -> StoreResult<Option<u32>> {
        let mut tables = self.lock()?;
        if !tables.accounts.contains_key(&id) {
            return Err(StoreError::AccountNotFound(id));
        }
        let usage = tables.usage.entry(id).or_default();

        let remaining = match allowance {
            Allowance::Generation => {
                let used = usage.total_generated.saturating_add(usage.free_generations_used as u64);
                if used >= limit as u64 {
                    return Ok(None);
                }
                usage.free_generations_used += 1;
                (limit as u64 - used - 1) as u32
            }
            Allowance::Message => {
                if usage.free_messages_used >= limit {
                    return Ok(None);
                }
                usage.free_messages_used += 1;
                limit - usage.free_messages_used
            }
        };
        Ok(Some(remaining))
    }

    async fn bind_redemption(&self, signature: &str, digest: &str) -> StoreResult<Option<String>> {
        let mut tables = self.lock()?;
        if !tables.signatures.contains_key(signature) {
            return Err(StoreError::PaymentNotFound(signature.to_string()));
        }
        if let Some(bound) = tables.redemptions.get(signature) {
            return Ok(Some(bound.clone()));
        }
        tables.redemptions.insert(signature.to_string(), digest.to_string());
        Ok(None)
    }
}

//! Entitlement Ledger
//!
//! Validates payment claims, reconciles them against the store exactly once per
//! signature and derives entitlement snapshots from the recorded facts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::billing;
use super::store::{Allowance, AppendOutcome, LedgerStore, StoreError};
use super::types::{
    Account, EntitlementSnapshot, FreeTierLimits, Lamports, NewPayment, PaymentRecord, Plan,
    ProductType, SubscriptionMarker, UsageCounter, DEFAULT_CURRENCY,
};

/// Longest accepted transaction signature
pub const MAX_SIGNATURE_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Transaction signature is required")]
    MissingSignature,
    #[error("Transaction signature is malformed")]
    MalformedSignature,
    #[error("Amount must be a positive number")]
    NonPositiveAmount,
    #[error("Unknown product type: {0}")]
    UnknownProduct(String),
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),
    #[error("A plan only applies to subscription payments")]
    PlanNotApplicable,
    #[error("Currency tag must not be empty")]
    MissingCurrency,
    #[error("Account subject is required")]
    MissingSubject,
    #[error("Wallet address is malformed")]
    MalformedWallet,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Wallet {0} is already attached to another account")]
    WalletTaken(String),
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),
    #[error("Payment {0} was already used")]
    PaymentAlreadyUsed(String),
    #[error("Ledger write failed: {0}")]
    LedgerWriteFailed(String),
    #[error("Ledger read failed: {0}")]
    LedgerReadFailed(String),
}

impl LedgerError {
    fn from_write(subject: &str, err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(_) => Self::AccountNotFound(subject.to_string()),
            StoreError::WalletTaken(wallet) => Self::WalletTaken(wallet),
            StoreError::PaymentNotFound(signature) => Self::PaymentNotFound(signature),
            StoreError::Backend(msg) => Self::LedgerWriteFailed(msg),
        }
    }

    fn from_read(subject: &str, err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(_) => Self::AccountNotFound(subject.to_string()),
            StoreError::WalletTaken(wallet) => Self::WalletTaken(wallet),
            StoreError::PaymentNotFound(signature) => Self::PaymentNotFound(signature),
            StoreError::Backend(msg) => Self::LedgerReadFailed(msg),
        }
    }
}

/// A payment as claimed by a client, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentClaim {
    #[serde(default)]
    pub product: String,
    /// SOL decimal
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl PaymentClaim {
    pub fn new(product: ProductType, amount: f64, signature: &str) -> Self {
        Self {
            product: product.as_str().to_string(),
            amount,
            signature: signature.to_string(),
            plan: None,
            currency: None,
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan.as_str().to_string());
        self
    }
}

/// A claim that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedClaim {
    pub product: ProductType,
    pub plan: Option<Plan>,
    pub amount: Lamports,
    pub currency: String,
    pub signature: String,
}

impl ValidatedClaim {
    pub fn parse(claim: &PaymentClaim) -> Result<Self, ValidationError> {
        let signature = validate_signature(&claim.signature)?;
        let product: ProductType = claim
            .product
            .parse()
            .map_err(ValidationError::UnknownProduct)?;
        let amount = Lamports::from_sol(claim.amount).ok_or(ValidationError::NonPositiveAmount)?;

        let plan = match (product, claim.plan.as_deref()) {
            (ProductType::Subscription, None) => Some(Plan::Monthly),
            (ProductType::Subscription, Some(raw)) => {
                Some(raw.parse::<Plan>().map_err(ValidationError::UnknownPlan)?)
            }
            (_, None) => None,
            (_, Some(_)) => return Err(ValidationError::PlanNotApplicable),
        };

        let currency = match claim.currency.as_deref().map(str::trim) {
            None => DEFAULT_CURRENCY.to_string(),
            Some("") => return Err(ValidationError::MissingCurrency),
            Some(tag) => tag.to_uppercase(),
        };

        Ok(Self {
            product,
            plan,
            amount,
            currency,
            signature,
        })
    }
}

/// Check a transaction signature and return it trimmed
pub fn validate_signature(raw: &str) -> Result<String, ValidationError> {
    let signature = raw.trim();
    if signature.is_empty() {
        return Err(ValidationError::MissingSignature);
    }
    if signature.len() > MAX_SIGNATURE_LEN || !signature.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::MalformedSignature);
    }
    Ok(signature.to_string())
}

fn validate_wallet(raw: &str) -> Result<String, ValidationError> {
    let wallet = raw.trim();
    if wallet.is_empty() || wallet.len() > 64 || !wallet.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::MalformedWallet);
    }
    Ok(wallet.to_string())
}

/// Outcome of `record_payment`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    pub record: PaymentRecord,
    /// The signature had already been recorded
    pub duplicate: bool,
}

/// Outcome of `redeem_generation`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Redemption {
    /// The payment is now bound to this site
    First,
    /// The same site again under the same payment
    Repeat,
}

/// Drift between stored counters and the fold over records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterAudit {
    pub stored: UsageCounter,
    pub recomputed_generated: u64,
    pub recomputed_spent: Lamports,
}

impl CounterAudit {
    pub fn is_consistent(&self) -> bool {
        self.stored.total_generated == self.recomputed_generated
            && self.stored.total_spent == self.recomputed_spent
    }
}

/// Ledger behavior knobs
#[derive(Debug, Clone, Copy)]
pub struct LedgerSettings {
    pub limits: FreeTierLimits,
    /// Create accounts on first contact
    pub auto_create_accounts: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            limits: FreeTierLimits::default(),
            auto_create_accounts: true,
        }
    }
}

/// Authoritative record of payments and the entitlements derived from them
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    settings: LedgerSettings,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, settings: LedgerSettings) -> Self {
        Self { store, settings }
    }

    pub fn limits(&self) -> FreeTierLimits {
        self.settings.limits
    }

    /// Look up an account without creating it
    pub async fn find_account(&self, subject: &str) -> Result<Option<Account>, LedgerError> {
        self.store
            .find_account_by_subject(subject)
            .await
            .map_err(|e| LedgerError::from_read(subject, e))
    }

    /// Return the caller's account, creating it when allowed
    pub async fn resolve_account(
        &self,
        subject: &str,
        wallet_address: Option<&str>,
    ) -> Result<Account, LedgerError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(ValidationError::MissingSubject.into());
        }
        if let Some(account) = self.find_account(subject).await? {
            return Ok(account);
        }
        if !self.settings.auto_create_accounts {
            return Err(LedgerError::AccountNotFound(subject.to_string()));
        }

        let wallet = wallet_address.map(validate_wallet).transpose()?;
        let account = self
            .store
            .create_account(subject, wallet.as_deref(), Utc::now())
            .await
            .map_err(|e| LedgerError::from_write(subject, e))?;
        info!("👤 Account ready: subject={} id={}", subject, account.id);
        Ok(account)
    }

    /// Attach a wallet address to an existing account
    pub async fn attach_wallet(&self, subject: &str, wallet_address: &str) -> Result<Account, LedgerError> {
        let wallet = validate_wallet(wallet_address)?;
        let account = self.require_account(subject).await?;
        let account = self
            .store
            .attach_wallet(account.id, &wallet)
            .await
            .map_err(|e| LedgerError::from_write(subject, e))?;
        info!("👛 Wallet {} attached to account {}", wallet, account.id);
        Ok(account)
    }

    /// Look up a recorded payment by its transaction signature
    pub async fn find_payment(&self, signature: &str) -> Result<Option<PaymentRecord>, LedgerError> {
        self.store
            .find_payment(signature.trim())
            .await
            .map_err(|e| LedgerError::from_read(signature, e))
    }

    /// Spend a recorded website-generation payment on one rendered site.
    ///
    /// The first call binds `digest` to the payment. Later calls succeed only
    /// for the same payer and the same digest, so a lost response can be
    /// retried but the payment never buys a second, different site.
    pub async fn redeem_generation(
        &self,
        subject: &str,
        signature: &str,
        digest: &str,
    ) -> Result<Redemption, LedgerError> {
        let account = self.require_account(subject).await?;
        let signature = validate_signature(signature)?;
        let record = self
            .store
            .find_payment(&signature)
            .await
            .map_err(|e| LedgerError::from_read(subject, e))?
            .ok_or_else(|| LedgerError::PaymentNotFound(signature.clone()))?;

        if record.account_id != account.id || record.product != ProductType::WebsiteGeneration {
            warn!("🚫 Payment {} is not a generation payment of account {}", signature, account.id);
            return Err(LedgerError::PaymentAlreadyUsed(signature));
        }

        let bound = self
            .store
            .bind_redemption(&signature, digest)
            .await
            .map_err(|e| LedgerError::from_write(subject, e))?;
        match bound {
            None => {
                info!("🎟️ Payment {} redeemed for site {}", signature, digest.get(..12).unwrap_or(digest));
                Ok(Redemption::First)
            }
            Some(existing) if existing == digest => {
                debug!("Payment {} re-rendered the same site", signature);
                Ok(Redemption::Repeat)
            }
            Some(_) => {
                warn!("🚫 Payment {} replayed for a different site", signature);
                Err(LedgerError::PaymentAlreadyUsed(signature))
            }
        }
    }

    pub async fn record_payment(&self, subject: &str, claim: &PaymentClaim) -> Result<PaymentReceipt, LedgerError> {
        self.record_payment_at(subject, claim, Utc::now()).await
    }

    /// Reconcile a confirmed payment against the ledger, observed at `now`.
    ///
    /// Retrying with the same signature returns the stored record unchanged.
    pub async fn record_payment_at(
        &self,
        subject: &str,
        claim: &PaymentClaim,
        now: DateTime<Utc>,
    ) -> Result<PaymentReceipt, LedgerError> {
        let claim = ValidatedClaim::parse(claim)?;

        if let Some(existing) = self
            .store
            .find_payment(&claim.signature)
            .await
            .map_err(|e| LedgerError::from_read(subject, e))?
        {
            return Ok(self.duplicate_receipt(subject, existing).await);
        }

        let account = self.resolve_account(subject, None).await?;

        let expires_at = match claim.plan {
            Some(plan) => Some(billing::period_end(now, plan).ok_or_else(|| {
                LedgerError::LedgerWriteFailed(format!("subscription period out of range from {}", now))
            })?),
            None => None,
        };

        let payment = NewPayment {
            account_id: account.id,
            product: claim.product,
            plan: claim.plan,
            amount: claim.amount,
            currency: claim.currency,
            signature: claim.signature,
            observed_at: now,
            expires_at,
        };

        match self
            .store
            .append_payment(payment)
            .await
            .map_err(|e| LedgerError::from_write(subject, e))?
        {
            AppendOutcome::Inserted(record) => {
                info!(
                    "💰 Payment recorded: account={} product={} amount={} signature={}",
                    record.account_id, record.product, record.amount, record.signature
                );
                if let Some(expires_at) = record.expires_at {
                    info!("📅 Subscription period for {} ends {}", record.account_id, expires_at.to_rfc3339());
                }
                Ok(PaymentReceipt {
                    record,
                    duplicate: false,
                })
            }
            // Lost a race with a concurrent submission of the same signature
            AppendOutcome::Duplicate(existing) => Ok(self.duplicate_receipt(subject, existing).await),
        }
    }

    async fn duplicate_receipt(&self, subject: &str, existing: PaymentRecord) -> PaymentReceipt {
        match self.store.find_account_by_subject(subject).await {
            Ok(Some(account)) if account.id == existing.account_id => {
                debug!("Duplicate submission of {} ignored", existing.signature);
            }
            _ => warn!(
                "⚠️ Signature {} resubmitted by a different account (recorded for {})",
                existing.signature, existing.account_id
            ),
        }
        PaymentReceipt {
            record: existing,
            duplicate: true,
        }
    }

    pub async fn get_entitlement(&self, subject: &str) -> Result<EntitlementSnapshot, LedgerError> {
        self.get_entitlement_at(subject, Utc::now()).await
    }

    /// Fold the account's records into a snapshot as of `now`
    pub async fn get_entitlement_at(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<EntitlementSnapshot, LedgerError> {
        let account = self.require_account(subject).await?;
        let records = self
            .store
            .payments_for(account.id)
            .await
            .map_err(|e| LedgerError::from_read(subject, e))?;
        let usage = self
            .store
            .usage(account.id)
            .await
            .map_err(|e| LedgerError::from_read(subject, e))?;

        Ok(EntitlementSnapshot::fold(
            account.id,
            &records,
            &usage,
            &self.settings.limits,
            now,
        ))
    }

    /// Payment history ordered by observation time
    pub async fn payment_history(&self, subject: &str) -> Result<Vec<PaymentRecord>, LedgerError> {
        let account = self.require_account(subject).await?;
        self.store
            .payments_for(account.id)
            .await
            .map_err(|e| LedgerError::from_read(subject, e))
    }

    /// Compare stored counters with a fresh fold over the records
    pub async fn verify_counters(&self, subject: &str) -> Result<CounterAudit, LedgerError> {
        let account = self.require_account(subject).await?;
        let records = self
            .store
            .payments_for(account.id)
            .await
            .map_err(|e| LedgerError::from_read(subject, e))?;
        let stored = self
            .store
            .usage(account.id)
            .await
            .map_err(|e| LedgerError::from_read(subject, e))?;

        let recomputed_generated = records
            .iter()
            .filter(|r| r.product == ProductType::WebsiteGeneration)
            .count() as u64;
        let recomputed_spent = Lamports(records.iter().map(|r| r.amount.0).sum());

        let audit = CounterAudit {
            stored,
            recomputed_generated,
            recomputed_spent,
        };
        if !audit.is_consistent() {
            warn!("❗ Counter drift for account {}: {:?}", account.id, audit);
        }
        Ok(audit)
    }

    pub(crate) async fn subscription_marker(
        &self,
        account: &Account,
    ) -> Result<Option<SubscriptionMarker>, LedgerError> {
        self.store
            .subscription(account.id)
            .await
            .map_err(|e| LedgerError::from_read(&account.subject, e))
    }

    pub(crate) async fn consume_allowance(
        &self,
        account: &Account,
        allowance: Allowance,
    ) -> Result<Option<u32>, LedgerError> {
        let limit = match allowance {
            Allowance::Generation => self.settings.limits.generations,
            Allowance::Message => self.settings.limits.messages,
        };
        self.store
            .try_consume(account.id, allowance, limit)
            .await
            .map_err(|e| LedgerError::from_write(&account.subject, e))
    }

    async fn require_account(&self, subject: &str) -> Result<Account, LedgerError> {
        self.find_account(subject)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(subject.to_string()))
    }
}

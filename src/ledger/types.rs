//! Ledger Entities
//!
//! Accounts, append-only payment records and the counters/snapshots derived from them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Internal account identifier
pub type AccountId = Uuid;

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Currency tag recorded when the caller does not send one
pub const DEFAULT_CURRENCY: &str = "SOL";

/// Amount in the network-native integer unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lamports(pub u64);

impl Lamports {
    pub const ZERO: Lamports = Lamports(0);

    /// Convert a SOL decimal, rounding to the nearest lamport.
    ///
    /// Returns `None` for non-finite, non-positive or overflowing values
    /// and for amounts that round down to zero lamports.
    pub fn from_sol(sol: f64) -> Option<Self> {
        if !sol.is_finite() || sol <= 0.0 {
            return None;
        }
        let lamports = (sol * LAMPORTS_PER_SOL as f64).round();
        if lamports < 1.0 || lamports >= u64::MAX as f64 {
            return None;
        }
        Some(Self(lamports as u64))
    }

    pub fn as_sol(&self) -> f64 {
        self.0 as f64 / LAMPORTS_PER_SOL as f64
    }

    pub fn checked_add(self, other: Lamports) -> Option<Lamports> {
        self.0.checked_add(other.0).map(Lamports)
    }
}

impl fmt::Display for Lamports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} SOL", self.as_sol())
    }
}

/// What a payment bought
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProductType {
    /// One paid website generation
    WebsiteGeneration,
    /// Time-boxed unlimited access
    Subscription,
    /// Done-for-you setup
    SetupService,
}

impl ProductType {
    pub const ALL: [ProductType; 3] = [
        ProductType::WebsiteGeneration,
        ProductType::Subscription,
        ProductType::SetupService,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebsiteGeneration => "website-generation",
            Self::Subscription => "subscription",
            Self::SetupService => "setup-service",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Subscription billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Monthly,
    Yearly,
}

impl Plan {
    /// Calendar months covered by one payment
    pub fn months(&self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Yearly => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(other.to_string()),
        }
    }
}

/// A user identity keyed by wallet address or identity-provider subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// External key the caller authenticates as
    pub subject: String,
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(subject: &str, wallet_address: Option<&str>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            wallet_address: wallet_address.map(str::to_string),
            created_at,
        }
    }
}

/// Immutable ledger entry for one confirmed on-chain payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub account_id: AccountId,
    pub product: ProductType,
    pub plan: Option<Plan>,
    pub amount: Lamports,
    pub currency: String,
    /// Globally unique transaction signature
    pub signature: String,
    pub observed_at: DateTime<Utc>,
    /// Only set for subscription payments
    pub expires_at: Option<DateTime<Utc>>,
}

/// A payment that passed validation and is ready to be appended
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub account_id: AccountId,
    pub product: ProductType,
    pub plan: Option<Plan>,
    pub amount: Lamports,
    pub currency: String,
    pub signature: String,
    pub observed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewPayment {
    pub fn into_record(self) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            account_id: self.account_id,
            product: self.product,
            plan: self.plan,
            amount: self.amount,
            currency: self.currency,
            signature: self.signature,
            observed_at: self.observed_at,
            expires_at: self.expires_at,
        }
    }
}

/// Stored per-account aggregates.
///
/// `total_generated` and `total_spent` are caches over the payment records and
/// only change inside the same atomic unit that appends a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub total_generated: u64,
    pub total_spent: Lamports,
    pub free_generations_used: u32,
    pub free_messages_used: u32,
}

impl UsageCounter {
    /// Apply one appended payment
    pub fn apply(&mut self, record: &PaymentRecord) {
        self.total_spent = Lamports(self.total_spent.0.saturating_add(record.amount.0));
        if record.product == ProductType::WebsiteGeneration {
            self.total_generated += 1;
        }
    }
}

/// Active-subscription marker, upserted alongside subscription payments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMarker {
    pub plan: Plan,
    pub expires_at: DateTime<Utc>,
    pub last_signature: String,
}

impl SubscriptionMarker {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Merge a new period; expiry never moves backwards
    pub fn extend(&mut self, plan: Plan, expires_at: DateTime<Utc>, signature: &str) {
        if expires_at > self.expires_at {
            self.expires_at = expires_at;
            self.plan = plan;
        }
        self.last_signature = signature.to_string();
    }
}

/// Free-tier allowances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeTierLimits {
    pub generations: u32,
    pub messages: u32,
}

impl Default for FreeTierLimits {
    fn default() -> Self {
        Self {
            generations: 3,
            messages: 3,
        }
    }
}

/// Derived, read-only view of an account's paid access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    pub account_id: AccountId,
    pub is_subscribed: bool,
    pub plan: Option<Plan>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub free_generations_remaining: u32,
    pub free_messages_remaining: u32,
    pub total_generated: u64,
    pub total_spent: Lamports,
    pub as_of: DateTime<Utc>,
}

impl EntitlementSnapshot {
    /// Fold an account's payment records into a snapshot.
    ///
    /// Totals and subscription state come from the records alone; the free
    /// allowance counters are the only non-ledger input.
    pub fn fold(
        account_id: AccountId,
        records: &[PaymentRecord],
        usage: &UsageCounter,
        limits: &FreeTierLimits,
        now: DateTime<Utc>,
    ) -> Self {
        let mut total_generated = 0u64;
        let mut total_spent = 0u64;
        let mut latest: Option<(DateTime<Utc>, Option<Plan>)> = None;

        for record in records {
            total_spent = total_spent.saturating_add(record.amount.0);
            match record.product {
                ProductType::WebsiteGeneration => total_generated += 1,
                ProductType::Subscription => {
                    if let Some(expires_at) = record.expires_at {
                        if latest.map_or(true, |(current, _)| expires_at > current) {
                            latest = Some((expires_at, record.plan));
                        }
                    }
                }
                ProductType::SetupService => {}
            }
        }

        let generations_used = total_generated.saturating_add(usage.free_generations_used as u64);
        let free_generations_remaining =
            (limits.generations as u64).saturating_sub(generations_used) as u32;
        let free_messages_remaining = limits.messages.saturating_sub(usage.free_messages_used);

        Self {
            account_id,
            is_subscribed: latest.map_or(false, |(expires_at, _)| expires_at > now),
            plan: latest.and_then(|(_, plan)| plan),
            subscription_expires_at: latest.map(|(expires_at, _)| expires_at),
            free_generations_remaining,
            free_messages_remaining,
            total_generated,
            total_spent: Lamports(total_spent),
            as_of: now,
        }
    }
}

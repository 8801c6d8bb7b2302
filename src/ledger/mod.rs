//! Entitlement Ledger Module
//!
//! The authoritative record of confirmed payments and everything derived from it:
//! - append-only payment records with globally unique signatures
//! - usage counters updated in the same atomic unit as the append
//! - calendar-month subscription periods
//! - entitlement snapshots folded on demand

pub mod billing;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod service;
pub mod store;
pub mod types;

pub use memory::MemoryLedgerStore;
#[cfg(feature = "postgres")]
pub use postgres::PgLedgerStore;
pub use service::{
    CounterAudit, Ledger, LedgerError, LedgerSettings, PaymentClaim, PaymentReceipt, Redemption,
    ValidatedClaim, ValidationError,
};
pub use store::{Allowance, AppendOutcome, LedgerStore, StoreError, StoreResult};
pub use types::{
    Account, AccountId, EntitlementSnapshot, FreeTierLimits, Lamports, NewPayment, PaymentRecord,
    Plan, ProductType, SubscriptionMarker, UsageCounter, DEFAULT_CURRENCY, LAMPORTS_PER_SOL,
};

//! # Coinforge Core
//!
//! Backend for a memecoin landing-page builder paid for with Solana transfers.
//!
//! - [`ledger`]: payment records reconciled exactly once per signature, and the
//!   entitlements derived from them
//! - [`gate`]: subscription-or-free-allowance check in front of generation and messaging
//! - [`confirmation`]: waits for a signature to reach the required commitment
//! - [`templates`]: deterministic static-site rendering
//! - [`telegram`]: gated group broadcasts
//! - [`api`]: the HTTP surface tying them together

pub mod api;
pub mod config;
pub mod confirmation;
pub mod gate;
pub mod ledger;
pub mod rate_limit;
pub mod telegram;
pub mod templates;

pub use api::{create_router, AppState};
pub use config::AppConfig;
pub use gate::{Action, Decision, DenyReason, GenerationGate};
pub use ledger::{Ledger, LedgerError, LedgerSettings, MemoryLedgerStore, PaymentClaim};
pub use templates::{SiteBundle, SiteContent, TemplateId, TemplateRegistry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

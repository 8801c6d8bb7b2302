//! Generation Gate
//!
//! Decides whether a website generation or a Telegram message may proceed.
//! Subscribers are unlimited; everyone else draws from a lifetime free
//! allowance that is consumed in the same step as the check.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ledger::{Allowance, Ledger, LedgerError};

/// Gated actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    WebsiteGeneration,
    TelegramMessage,
}

impl Action {
    fn allowance(&self) -> Allowance {
        match self {
            Self::WebsiteGeneration => Allowance::Generation,
            Self::TelegramMessage => Allowance::Message,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebsiteGeneration => f.write_str("website-generation"),
            Self::TelegramMessage => f.write_str("telegram-message"),
        }
    }
}

/// Why an action was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Free allowance used up and never subscribed
    FreeLimitReached,
    /// Free allowance used up and the subscription has lapsed
    SubscriptionExpired,
    AccountNotFound,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FreeLimitReached => "free_limit_reached",
            Self::SubscriptionExpired => "subscription_expired",
            Self::AccountNotFound => "account_not_found",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeLimitReached => f.write_str("Free limit reached. Purchase a subscription to continue."),
            Self::SubscriptionExpired => f.write_str("Subscription expired. Renew to continue."),
            Self::AccountNotFound => f.write_str("Account not found"),
        }
    }
}

/// Gate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// `remaining` is `None` for subscribers (unlimited)
    Allow { remaining: Option<u32> },
    Deny { reason: DenyReason },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Deny { reason } => Some(*reason),
            Self::Allow { .. } => None,
        }
    }
}

/// Authorization check in front of generation and messaging
#[derive(Clone)]
pub struct GenerationGate {
    ledger: Arc<Ledger>,
}

impl GenerationGate {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub async fn authorize(&self, subject: &str, action: Action) -> Result<Decision, LedgerError> {
        self.authorize_at(subject, action, Utc::now()).await
    }

    /// Authorize one unit of `action` as of `now`.
    ///
    /// An `Allow` for a non-subscriber has already consumed one free unit.
    pub async fn authorize_at(
        &self,
        subject: &str,
        action: Action,
        now: DateTime<Utc>,
    ) -> Result<Decision, LedgerError> {
        let account = match self.ledger.find_account(subject).await? {
            Some(account) => account,
            None => {
                debug!("Gate: {} denied for unknown account {}", action, subject);
                return Ok(Decision::Deny {
                    reason: DenyReason::AccountNotFound,
                });
            }
        };

        let marker = self.ledger.subscription_marker(&account).await?;
        if let Some(marker) = marker.as_ref().filter(|m| m.is_active_at(now)) {
            debug!(
                "Gate: {} allowed for subscriber {} (until {})",
                action, account.id, marker.expires_at
            );
            return Ok(Decision::Allow { remaining: None });
        }

        match self.ledger.consume_allowance(&account, action.allowance()).await? {
            Some(remaining) => {
                debug!("Gate: {} allowed for {} ({} free left)", action, account.id, remaining);
                Ok(Decision::Allow {
                    remaining: Some(remaining),
                })
            }
            None => {
                let reason = if marker.is_some() {
                    DenyReason::SubscriptionExpired
                } else {
                    DenyReason::FreeLimitReached
                };
                info!("🚫 Gate: {} denied for {}: {}", action, account.id, reason.code());
                Ok(Decision::Deny { reason })
            }
        }
    }
}

//! Telegram group broadcast
//!
//! Sends one text to a list of groups, one gated message at a time, with a
//! fixed delay between sends to stay under provider rate limits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::gate::{Action, Decision, DenyReason, GenerationGate};
use crate::ledger::LedgerError;

/// Telegram's limit for one text message
pub const MAX_MESSAGE_CHARS: usize = 4096;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("Telegram request failed: {0}")]
    Transport(String),
    #[error("Telegram rejected the message: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Message text must not be empty")]
    EmptyMessage,
    #[error("Message exceeds {MAX_MESSAGE_CHARS} characters")]
    MessageTooLong,
    #[error("At least one group is required")]
    NoGroups,
    #[error("Too many groups ({requested}), the limit is {max}")]
    TooManyGroups { requested: usize, max: usize },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Anything that can post a text to a group
#[async_trait]
pub trait GroupSender: Send + Sync {
    async fn send(&self, group_id: &str, text: &str) -> Result<(), TelegramError>;
}

#[derive(Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Bot API `sendMessage` client
#[derive(Clone)]
pub struct BotApiSender {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl BotApiSender {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl GroupSender for BotApiSender {
    async fn send(&self, group_id: &str, text: &str) -> Result<(), TelegramError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let response: BotApiResponse = self
            .http
            .post(&url)
            .json(&json!({ "chat_id": group_id, "text": text }))
            .send()
            .await
            // reqwest errors embed the URL, which carries the token
            .map_err(|e| TelegramError::Transport(e.without_url().to_string()))?
            .json()
            .await
            .map_err(|e| TelegramError::Transport(e.without_url().to_string()))?;

        if response.ok {
            Ok(())
        } else {
            Err(TelegramError::Rejected(
                response.description.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// Per-group result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub group_id: String,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub deliveries: Vec<Delivery>,
    /// Groups never attempted because the gate refused
    pub skipped: Vec<String>,
    pub denied: Option<DenyReason>,
    /// Free messages left after the last allowed send, `None` when unlimited
    pub remaining: Option<u32>,
}

impl BroadcastReport {
    pub fn sent(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.outcome == DeliveryOutcome::Sent)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.deliveries.len() - self.sent()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Pause between consecutive sends
    pub message_delay: Duration,
    pub max_groups: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            message_delay: Duration::from_secs(2),
            max_groups: 50,
        }
    }
}

pub struct Broadcaster {
    gate: GenerationGate,
    sender: Arc<dyn GroupSender>,
    settings: BroadcastSettings,
}

impl Broadcaster {
    pub fn new(gate: GenerationGate, sender: Arc<dyn GroupSender>, settings: BroadcastSettings) -> Self {
        Self { gate, sender, settings }
    }

    /// Send `text` to each group in order.
    ///
    /// Each message is authorized before it is attempted, so a failed send
    /// still counts against the free allowance. A denial stops the loop.
    pub async fn broadcast(
        &self,
        subject: &str,
        groups: &[String],
        text: &str,
    ) -> Result<BroadcastReport, BroadcastError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BroadcastError::EmptyMessage);
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(BroadcastError::MessageTooLong);
        }
        let groups: Vec<&str> = groups
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .collect();
        if groups.is_empty() {
            return Err(BroadcastError::NoGroups);
        }
        if groups.len() > self.settings.max_groups {
            return Err(BroadcastError::TooManyGroups {
                requested: groups.len(),
                max: self.settings.max_groups,
            });
        }

        let mut report = BroadcastReport::default();
        for (idx, group_id) in groups.iter().enumerate() {
            match self.gate.authorize(subject, Action::TelegramMessage).await? {
                Decision::Allow { remaining } => report.remaining = remaining,
                Decision::Deny { reason } => {
                    report.denied = Some(reason);
                    report.skipped = groups[idx..].iter().map(|g| g.to_string()).collect();
                    break;
                }
            }

            let outcome = match self.sender.send(group_id, text).await {
                Ok(()) => DeliveryOutcome::Sent,
                Err(e) => {
                    warn!("Telegram send to {} failed: {}", group_id, e);
                    DeliveryOutcome::Failed { error: e.to_string() }
                }
            };
            report.deliveries.push(Delivery {
                group_id: group_id.to_string(),
                outcome,
            });

            if idx + 1 < groups.len() && !self.settings.message_delay.is_zero() {
                tokio::time::sleep(self.settings.message_delay).await;
            }
        }

        info!(
            "📨 Broadcast for {}: {} sent, {} failed, {} skipped",
            subject,
            report.sent(),
            report.failed(),
            report.skipped.len()
        );
        Ok(report)
    }
}

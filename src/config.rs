//! Server configuration
//!
//! Loaded from a TOML or YAML file (picked by extension). Every field has a
//! default, so a missing section or an empty file is valid. A handful of
//! deployment secrets can be supplied through the environment instead.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::confirmation::{CommitmentLevel, WatcherSettings};
use crate::ledger::{FreeTierLimits, LedgerSettings};
use crate::rate_limit::RateLimitConfig;
use crate::telegram::{BroadcastSettings, DEFAULT_API_BASE};

/// Default HTTP bind address
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub database: DatabaseConfig,
    pub solana: SolanaConfig,
    pub pricing: PricingConfig,
    pub telegram: TelegramConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub free_generation_limit: u32,
    pub free_message_limit: u32,
    pub auto_create_accounts: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let limits = FreeTierLimits::default();
        Self {
            free_generation_limit: limits.generations,
            free_message_limit: limits.messages,
            auto_create_accounts: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL; the in-memory store is used when unset
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolanaConfig {
    pub rpc_url: Option<String>,
    /// Wallet that receives payments, published to the frontend
    pub merchant_address: Option<String>,
    pub commitment: CommitmentLevel,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Wait for on-chain confirmation before recording a payment
    pub require_confirmation: bool,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            merchant_address: None,
            commitment: CommitmentLevel::Confirmed,
            confirmation_timeout_secs: 60,
            poll_interval_ms: 1500,
            require_confirmation: false,
        }
    }
}

/// Prices in SOL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub website_generation: f64,
    pub subscription_monthly: f64,
    pub subscription_yearly: f64,
    pub setup_service: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            website_generation: 0.5,
            subscription_monthly: 1.0,
            subscription_yearly: 10.0,
            setup_service: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Broadcasting is disabled without a token
    pub bot_token: Option<String>,
    pub api_base: String,
    pub message_delay_ms: u64,
    pub max_groups_per_broadcast: usize,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        let settings = BroadcastSettings::default();
        Self {
            bot_token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            message_delay_ms: settings.message_delay.as_millis() as u64,
            max_groups_per_broadcast: settings.max_groups,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or defaults when no path is given. Environment
    /// overrides are applied and the result is validated.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                warn!("No config file given, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("yaml") | Some("yml") => {
                // serde_yaml rejects an empty document
                if content.trim().is_empty() {
                    return Ok(Self::default());
                }
                serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse YAML config {}", path.display()))
            }
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config {}", path.display())),
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(bind) = get("COINFORGE_BIND") {
            self.server.bind = bind;
        }
        if let Some(url) = get("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(url) = get("SOLANA_RPC_URL") {
            self.solana.rpc_url = Some(url);
        }
        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ledger.free_generation_limit == 0 {
            bail!("ledger.free_generation_limit must be greater than zero");
        }
        if self.ledger.free_message_limit == 0 {
            bail!("ledger.free_message_limit must be greater than zero");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be greater than zero");
        }
        if self.solana.confirmation_timeout_secs == 0 {
            bail!("solana.confirmation_timeout_secs must be greater than zero");
        }
        if self.solana.poll_interval_ms == 0 {
            bail!("solana.poll_interval_ms must be greater than zero");
        }
        if self.solana.require_confirmation && self.solana.rpc_url.is_none() {
            bail!("solana.require_confirmation needs solana.rpc_url (or SOLANA_RPC_URL)");
        }
        if self.telegram.max_groups_per_broadcast == 0 {
            bail!("telegram.max_groups_per_broadcast must be greater than zero");
        }
        if self.rate_limit.enabled && (self.rate_limit.window_secs == 0 || self.rate_limit.max_requests == 0) {
            bail!("rate_limit.window_secs and rate_limit.max_requests must be greater than zero");
        }
        for (name, price) in [
            ("website_generation", self.pricing.website_generation),
            ("subscription_monthly", self.pricing.subscription_monthly),
            ("subscription_yearly", self.pricing.subscription_yearly),
            ("setup_service", self.pricing.setup_service),
        ] {
            if !price.is_finite() || price <= 0.0 {
                bail!("pricing.{} must be a positive number", name);
            }
        }
        Ok(())
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            limits: FreeTierLimits {
                generations: self.ledger.free_generation_limit,
                messages: self.ledger.free_message_limit,
            },
            auto_create_accounts: self.ledger.auto_create_accounts,
        }
    }

    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            commitment: self.solana.commitment,
            poll_interval: Duration::from_millis(self.solana.poll_interval_ms),
            timeout: Duration::from_secs(self.solana.confirmation_timeout_secs),
        }
    }

    pub fn broadcast_settings(&self) -> BroadcastSettings {
        BroadcastSettings {
            message_delay: Duration::from_millis(self.telegram.message_delay_ms),
            max_groups: self.telegram.max_groups_per_broadcast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.ledger.free_generation_limit, 3);
        assert_eq!(config.ledger.free_message_limit, 3);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
bind = "127.0.0.1:9000"

[ledger]
free_generation_limit = 5

[solana]
rpc_url = "http://localhost:8899"
commitment = "finalized"
require_confirmation = true
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.ledger.free_generation_limit, 5);
        assert_eq!(config.ledger.free_message_limit, 3);
        assert_eq!(config.solana.commitment, CommitmentLevel::Finalized);
        assert_eq!(config.watcher_settings().commitment, CommitmentLevel::Finalized);
        assert_eq!(config.ledger_settings().limits.generations, 5);
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "telegram:\n  bot_token: \"123:abc\"\n  message_delay_ms: 0\nrate_limit:\n  max_requests: 10\n"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.telegram.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(config.broadcast_settings().message_delay, Duration::ZERO);
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window_secs, 60);
    }

    #[test]
    fn test_empty_files_use_defaults() {
        for suffix in [".toml", ".yml"] {
            let file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
            let config = AppConfig::from_file(file.path()).unwrap();
            assert_eq!(config.server.bind, DEFAULT_BIND);
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.ledger.free_generation_limit = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.solana.require_confirmation = true;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.solana.confirmation_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pricing.website_generation = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("COINFORGE_BIND", "127.0.0.1:7000"),
            ("DATABASE_URL", "postgres://localhost/coinforge"),
            ("TELEGRAM_BOT_TOKEN", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.server.bind, "127.0.0.1:7000");
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/coinforge"));
        assert!(config.solana.rpc_url.is_none());
        // blank values are ignored
        assert!(config.telegram.bot_token.is_none());
    }
}

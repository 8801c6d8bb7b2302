//! Payment Confirmation Watcher
//!
//! Waits for a transaction signature to reach the required commitment before
//! the ledger treats the payment as real. The wait is bounded; on timeout the
//! caller must fail closed. A late confirmation can still be reconciled by
//! resubmitting the same signature.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Solana commitment levels, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentLevel {
    Processed,
    Confirmed,
    Finalized,
}

impl std::str::FromStr for CommitmentLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(format!("unknown commitment level: {}", other)),
        }
    }
}

/// What the network currently knows about a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Not seen yet
    Unknown,
    /// Seen at the given commitment
    Landed(CommitmentLevel),
    /// Landed but the transaction itself failed
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfirmationError {
    #[error("Signature {signature} not confirmed within {waited:?}")]
    Timeout { signature: String, waited: Duration },
    #[error("Transaction failed on-chain: {0}")]
    TransactionFailed(String),
    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Source of signature statuses (an RPC node in production)
#[async_trait]
pub trait SignatureStatusSource: Send + Sync {
    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, ConfirmationError>;
}

// === Solana JSON-RPC ===

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<RpcResult>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResult {
    value: Vec<Option<RpcSignatureStatus>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcSignatureStatus {
    #[serde(default)]
    err: Option<serde_json::Value>,
    #[serde(default)]
    confirmation_status: Option<CommitmentLevel>,
}

/// `getSignatureStatuses` client
#[derive(Debug, Clone)]
pub struct SolanaRpcClient {
    http: reqwest::Client,
    rpc_url: String,
}

impl SolanaRpcClient {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
        }
    }
}

#[async_trait]
impl SignatureStatusSource for SolanaRpcClient {
    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, ConfirmationError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getSignatureStatuses",
            "params": [[signature], { "searchTransactionHistory": true }],
        });

        let response: RpcResponse = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConfirmationError::Rpc(e.to_string()))?
            .error_for_status()
            .map_err(|e| ConfirmationError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| ConfirmationError::Rpc(e.to_string()))?;

        if let Some(err) = response.error {
            return Err(ConfirmationError::Rpc(format!("{} ({})", err.message, err.code)));
        }

        let status = response
            .result
            .and_then(|r| r.value.into_iter().next())
            .flatten();

        Ok(match status {
            None => SignatureStatus::Unknown,
            Some(RpcSignatureStatus { err: Some(err), .. }) if !err.is_null() => {
                SignatureStatus::Failed(err.to_string())
            }
            // Older nodes omit confirmationStatus for rooted slots
            Some(s) => SignatureStatus::Landed(s.confirmation_status.unwrap_or(CommitmentLevel::Finalized)),
        })
    }
}

// === Watcher ===

/// Watcher settings
#[derive(Debug, Clone, Copy)]
pub struct WatcherSettings {
    pub commitment: CommitmentLevel,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            commitment: CommitmentLevel::Confirmed,
            poll_interval: Duration::from_millis(1500),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Polls a status source until a signature is confirmed, fails, or times out
#[derive(Clone)]
pub struct ConfirmationWatcher {
    source: Arc<dyn SignatureStatusSource>,
    settings: WatcherSettings,
}

impl ConfirmationWatcher {
    pub fn new(source: Arc<dyn SignatureStatusSource>, settings: WatcherSettings) -> Self {
        Self { source, settings }
    }

    /// Wait until `signature` reaches the configured commitment.
    ///
    /// RPC errors inside the deadline are retried; an on-chain failure is final.
    pub async fn await_confirmation(&self, signature: &str) -> Result<CommitmentLevel, ConfirmationError> {
        let started = Instant::now();
        let required = self.settings.commitment;

        let polling = async {
            loop {
                match self.source.signature_status(signature).await {
                    Ok(SignatureStatus::Landed(level)) if level >= required => return Ok(level),
                    Ok(SignatureStatus::Landed(level)) => {
                        debug!("Signature {} at {:?}, waiting for {:?}", signature, level, required);
                    }
                    Ok(SignatureStatus::Failed(reason)) => {
                        return Err(ConfirmationError::TransactionFailed(reason));
                    }
                    Ok(SignatureStatus::Unknown) => {
                        debug!("Signature {} not seen yet", signature);
                    }
                    Err(e) => warn!("Status poll for {} failed: {}", signature, e),
                }
                sleep(self.settings.poll_interval).await;
            }
        };

        match timeout(self.settings.timeout, polling).await {
            Ok(Ok(level)) => {
                info!(
                    "✅ Signature {} confirmed at {:?} after {:?}",
                    signature,
                    level,
                    started.elapsed()
                );
                Ok(level)
            }
            Ok(Err(e)) => {
                warn!("❌ Signature {} rejected: {}", signature, e);
                Err(e)
            }
            Err(_) => {
                warn!("⏰ Signature {} not confirmed within {:?}", signature, self.settings.timeout);
                Err(ConfirmationError::Timeout {
                    signature: signature.to_string(),
                    waited: self.settings.timeout,
                })
            }
        }
    }
}

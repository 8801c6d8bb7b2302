//! Payment Confirmation Watcher Tests
//!
//! Drives the watcher with a scripted status source.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use coinforge_core::confirmation::{
    CommitmentLevel, ConfirmationError, ConfirmationWatcher, SignatureStatus, SignatureStatusSource,
    WatcherSettings,
};

/// Replays a fixed sequence of answers, then repeats the last one
struct ScriptedSource {
    script: Mutex<VecDeque<Result<SignatureStatus, String>>>,
    last: Mutex<Result<SignatureStatus, String>>,
    polls: Mutex<usize>,
}

impl ScriptedSource {
    fn new(script: Vec<Result<SignatureStatus, String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Ok(SignatureStatus::Unknown)),
            polls: Mutex::new(0),
        })
    }

    fn polls(&self) -> usize {
        *self.polls.lock().unwrap()
    }
}

#[async_trait]
impl SignatureStatusSource for ScriptedSource {
    async fn signature_status(&self, _signature: &str) -> Result<SignatureStatus, ConfirmationError> {
        *self.polls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        let answer = match next {
            Some(answer) => {
                *self.last.lock().unwrap() = answer.clone();
                answer
            }
            None => self.last.lock().unwrap().clone(),
        };
        answer.map_err(ConfirmationError::Rpc)
    }
}

fn settings(commitment: CommitmentLevel, timeout_ms: u64) -> WatcherSettings {
    WatcherSettings {
        commitment,
        poll_interval: Duration::from_millis(5),
        timeout: Duration::from_millis(timeout_ms),
    }
}

/// Test the watcher waits through weaker commitments
#[tokio::test]
async fn test_waits_for_required_commitment() {
    let source = ScriptedSource::new(vec![
        Ok(SignatureStatus::Unknown),
        Ok(SignatureStatus::Landed(CommitmentLevel::Processed)),
        Ok(SignatureStatus::Landed(CommitmentLevel::Confirmed)),
    ]);
    let watcher = ConfirmationWatcher::new(source.clone(), settings(CommitmentLevel::Confirmed, 2_000));

    let level = watcher.await_confirmation("sig1").await.unwrap();
    assert_eq!(level, CommitmentLevel::Confirmed);
    assert_eq!(source.polls(), 3);
}

/// Test a stronger commitment than required is accepted immediately
#[tokio::test]
async fn test_stronger_commitment_accepted() {
    let source = ScriptedSource::new(vec![Ok(SignatureStatus::Landed(CommitmentLevel::Finalized))]);
    let watcher = ConfirmationWatcher::new(source, settings(CommitmentLevel::Processed, 2_000));
    assert_eq!(
        watcher.await_confirmation("sig1").await.unwrap(),
        CommitmentLevel::Finalized
    );
}

/// Test an unseen signature times out and fails closed
#[tokio::test]
async fn test_timeout_fails_closed() {
    let source = ScriptedSource::new(vec![Ok(SignatureStatus::Unknown)]);
    let watcher = ConfirmationWatcher::new(source.clone(), settings(CommitmentLevel::Confirmed, 50));

    match watcher.await_confirmation("neverLands").await {
        Err(ConfirmationError::Timeout { signature, waited }) => {
            assert_eq!(signature, "neverLands");
            assert_eq!(waited, Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(source.polls() > 1);
}

/// Test a processed-only signature still times out when confirmed is required
#[tokio::test]
async fn test_insufficient_commitment_times_out() {
    let source = ScriptedSource::new(vec![Ok(SignatureStatus::Landed(CommitmentLevel::Processed))]);
    let watcher = ConfirmationWatcher::new(source, settings(CommitmentLevel::Finalized, 40));
    assert!(matches!(
        watcher.await_confirmation("sig1").await,
        Err(ConfirmationError::Timeout { .. })
    ));
}

/// Test an on-chain failure stops the wait at once
#[tokio::test]
async fn test_failed_transaction_is_final() {
    let source = ScriptedSource::new(vec![
        Ok(SignatureStatus::Unknown),
        Ok(SignatureStatus::Failed("InstructionError".to_string())),
        Ok(SignatureStatus::Landed(CommitmentLevel::Finalized)),
    ]);
    let watcher = ConfirmationWatcher::new(source.clone(), settings(CommitmentLevel::Confirmed, 2_000));

    match watcher.await_confirmation("sig1").await {
        Err(ConfirmationError::TransactionFailed(reason)) => assert_eq!(reason, "InstructionError"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(source.polls(), 2);
}

/// Test transient RPC errors are retried inside the deadline
#[tokio::test]
async fn test_rpc_errors_are_retried() {
    let source = ScriptedSource::new(vec![
        Err("connection refused".to_string()),
        Err("503 Service Unavailable".to_string()),
        Ok(SignatureStatus::Landed(CommitmentLevel::Confirmed)),
    ]);
    let watcher = ConfirmationWatcher::new(source.clone(), settings(CommitmentLevel::Confirmed, 2_000));
    assert_eq!(
        watcher.await_confirmation("sig1").await.unwrap(),
        CommitmentLevel::Confirmed
    );
    assert_eq!(source.polls(), 3);
}

/// Test watcher defaults
#[test]
fn test_watcher_settings_defaults() {
    let settings = WatcherSettings::default();
    assert_eq!(settings.commitment, CommitmentLevel::Confirmed);
    assert!(settings.poll_interval < settings.timeout);
}

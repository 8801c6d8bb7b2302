//! Telegram Broadcast Tests
//!
//! Uses a recording sender in place of the Bot API.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use coinforge_core::gate::{DenyReason, GenerationGate};
use coinforge_core::ledger::{Ledger, LedgerSettings, MemoryLedgerStore, PaymentClaim, Plan, ProductType};
use coinforge_core::telegram::{
    BroadcastError, BroadcastSettings, Broadcaster, DeliveryOutcome, GroupSender, TelegramError,
};

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    failing: HashSet<String>,
}

impl RecordingSender {
    fn failing(groups: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    fn groups(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(g, _)| g.clone()).collect()
    }
}

#[async_trait]
impl GroupSender for RecordingSender {
    async fn send(&self, group_id: &str, text: &str) -> Result<(), TelegramError> {
        if self.failing.contains(group_id) {
            return Err(TelegramError::Rejected("Forbidden: bot was kicked".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((group_id.to_string(), text.to_string()));
        Ok(())
    }
}

fn settings() -> BroadcastSettings {
    BroadcastSettings {
        message_delay: Duration::ZERO,
        max_groups: 10,
    }
}

async fn setup(sender: Arc<RecordingSender>) -> (Arc<Ledger>, Broadcaster) {
    let ledger = Arc::new(Ledger::new(
        Arc::new(MemoryLedgerStore::new()),
        LedgerSettings::default(),
    ));
    ledger.resolve_account("alice", None).await.unwrap();
    let broadcaster = Broadcaster::new(GenerationGate::new(ledger.clone()), sender, settings());
    (ledger, broadcaster)
}

fn groups(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|g| g.to_string()).collect()
}

/// Test the free allowance stops the loop and reports the rest as skipped
#[tokio::test]
async fn test_denial_stops_broadcast() {
    let sender = Arc::new(RecordingSender::default());
    let (ledger, broadcaster) = setup(sender.clone()).await;

    let report = broadcaster
        .broadcast("alice", &groups(&["@g1", "@g2", "@g3", "@g4", "@g5"]), "  gm frens  ")
        .await
        .unwrap();

    assert_eq!(report.sent(), 3);
    assert_eq!(report.skipped, groups(&["@g4", "@g5"]));
    assert_eq!(report.denied, Some(DenyReason::FreeLimitReached));
    assert_eq!(report.remaining, Some(0));
    assert_eq!(sender.groups(), groups(&["@g1", "@g2", "@g3"]));
    assert!(sender.sent.lock().unwrap().iter().all(|(_, text)| text == "gm frens"));

    let snapshot = ledger.get_entitlement("alice").await.unwrap();
    assert_eq!(snapshot.free_messages_remaining, 0);
    // messages do not touch the generation allowance
    assert_eq!(snapshot.free_generations_remaining, 3);
}

/// Test a failed send is recorded, consumes allowance and does not stop the loop
#[tokio::test]
async fn test_send_failure_continues() {
    let sender = Arc::new(RecordingSender::failing(&["@kicked"]));
    let (ledger, broadcaster) = setup(sender.clone()).await;

    let report = broadcaster
        .broadcast("alice", &groups(&["@g1", "@kicked", "@g3"]), "launch in 1h")
        .await
        .unwrap();

    assert_eq!(report.sent(), 2);
    assert_eq!(report.failed(), 1);
    assert!(report.denied.is_none());
    assert!(report.skipped.is_empty());
    assert!(matches!(
        &report.deliveries[1].outcome,
        DeliveryOutcome::Failed { error } if error.contains("kicked")
    ));
    assert_eq!(
        ledger.get_entitlement("alice").await.unwrap().free_messages_remaining,
        0
    );
}

/// Test subscribers broadcast without limit
#[tokio::test]
async fn test_subscriber_unlimited() {
    let sender = Arc::new(RecordingSender::default());
    let (ledger, broadcaster) = setup(sender.clone()).await;
    let claim = PaymentClaim::new(ProductType::Subscription, 10.0, "yearSig").with_plan(Plan::Yearly);
    ledger.record_payment("alice", &claim).await.unwrap();

    let many: Vec<String> = (0..8).map(|i| format!("@group{}", i)).collect();
    let report = broadcaster.broadcast("alice", &many, "hello").await.unwrap();
    assert_eq!(report.sent(), 8);
    assert_eq!(report.remaining, None);
    assert_eq!(
        ledger.get_entitlement("alice").await.unwrap().free_messages_remaining,
        3
    );
}

/// Test unknown callers are denied before anything is sent
#[tokio::test]
async fn test_unknown_account_sends_nothing() {
    let sender = Arc::new(RecordingSender::default());
    let (_ledger, broadcaster) = setup(sender.clone()).await;

    let report = broadcaster.broadcast("mallory", &groups(&["@g1", "@g2"]), "hi").await.unwrap();
    assert_eq!(report.denied, Some(DenyReason::AccountNotFound));
    assert!(report.deliveries.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert!(sender.groups().is_empty());
}

/// Test request validation happens before any allowance is used
#[tokio::test]
async fn test_broadcast_validation() {
    let sender = Arc::new(RecordingSender::default());
    let (ledger, broadcaster) = setup(sender.clone()).await;

    assert!(matches!(
        broadcaster.broadcast("alice", &groups(&["@g1"]), "   ").await,
        Err(BroadcastError::EmptyMessage)
    ));
    let long = "x".repeat(4097);
    assert!(matches!(
        broadcaster.broadcast("alice", &groups(&["@g1"]), &long).await,
        Err(BroadcastError::MessageTooLong)
    ));
    assert!(matches!(
        broadcaster.broadcast("alice", &groups(&["", "  "]), "hi").await,
        Err(BroadcastError::NoGroups)
    ));
    let too_many: Vec<String> = (0..11).map(|i| format!("@g{}", i)).collect();
    assert!(matches!(
        broadcaster.broadcast("alice", &too_many, "hi").await,
        Err(BroadcastError::TooManyGroups { requested: 11, max: 10 })
    ));

    assert!(sender.groups().is_empty());
    assert_eq!(
        ledger.get_entitlement("alice").await.unwrap().free_messages_remaining,
        3
    );
}

/// Test the delay is applied between sends but not after the last one
#[tokio::test(start_paused = true)]
async fn test_delay_between_messages() {
    let sender = Arc::new(RecordingSender::default());
    let ledger = Arc::new(Ledger::new(
        Arc::new(MemoryLedgerStore::new()),
        LedgerSettings::default(),
    ));
    ledger.resolve_account("alice", None).await.unwrap();
    let broadcaster = Broadcaster::new(
        GenerationGate::new(ledger),
        sender,
        BroadcastSettings {
            message_delay: Duration::from_secs(2),
            max_groups: 10,
        },
    );

    let started = tokio::time::Instant::now();
    broadcaster
        .broadcast("alice", &groups(&["@g1", "@g2", "@g3"]), "hi")
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(6));
}

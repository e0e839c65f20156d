//! Periodic sweep of records stranded in `Submitted`.
//!
//! The per-request receipt check lives only in memory, so a restart (or a
//! receipt that was not ready in time) leaves records `Submitted` forever.
//! The sweeper rebuilds a tracker from the ticket ids persisted on those
//! records and runs one reconciliation pass over them.
//!
//! The gateway only keeps receipts for about a day. Records still `Submitted`
//! past `max_age` are failed with [`RECEIPT_UNAVAILABLE`] before each pass, so
//! tickets that can never resolve do not crowd newer records out of the batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use pushgate_common::error::AppError;

use crate::reconciler::{ReceiptReconciler, ReconcileSummary};
use crate::records::RecordStore;
use crate::tracker::TicketTracker;

/// Maximum number of records reconciled per sweep.
const SWEEP_BATCH_LIMIT: i64 = 1000;

/// Diagnostic stored on records whose receipt expired at the gateway.
pub const RECEIPT_UNAVAILABLE: &str = r#"{"error":"ReceiptUnavailable"}"#;

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

fn cutoff(age: TimeDelta) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(age)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub struct ReceiptSweeper {
    reconciler: ReceiptReconciler,
    records: Arc<dyn RecordStore>,
    interval: Duration,
    min_age: TimeDelta,
    max_age: TimeDelta,
}

impl ReceiptSweeper {
    pub fn new(
        reconciler: ReceiptReconciler,
        records: Arc<dyn RecordStore>,
        interval: Duration,
        min_age_secs: u64,
        max_age_secs: u64,
    ) -> Self {
        Self {
            reconciler,
            records,
            interval,
            min_age: seconds(min_age_secs),
            max_age: seconds(max_age_secs),
        }
    }

    /// Fail expired records, then reconcile one page of stale `Submitted` records.
    pub async fn sweep_once(&self) -> Result<ReconcileSummary, AppError> {
        let expired = self
            .records
            .expire_submitted(cutoff(self.max_age), RECEIPT_UNAVAILABLE)
            .await?;
        if expired > 0 {
            tracing::warn!(
                records = expired,
                max_age_secs = self.max_age.num_seconds(),
                "Failed submitted notifications whose receipts expired"
            );
        }
        let expired = usize::try_from(expired).unwrap_or(usize::MAX);

        let stale = self
            .records
            .stale_submitted(cutoff(self.min_age), SWEEP_BATCH_LIMIT)
            .await?;

        if stale.is_empty() {
            return Ok(ReconcileSummary {
                expired,
                ..Default::default()
            });
        }

        tracing::info!(records = stale.len(), "Sweeping stale submitted notifications");
        let mut tracker: TicketTracker = stale.into_iter().collect();
        let mut summary = self.reconciler.reconcile(&mut tracker).await;
        summary.expired = expired;
        Ok(summary)
    }

    /// Sweep every `interval` until the task is dropped.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            min_age_secs = self.min_age.num_seconds(),
            max_age_secs = self.max_age.num_seconds(),
            "Receipt sweeper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                tracing::error!(error = %e, "Receipt sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushgate_common::types::NotificationStatus;
    use pushgate_notifier::{PushGatewayClient, PushReceipt};

    use crate::testing::{MemoryStore, ScriptedTransport, seed_submitted};

    #[tokio::test]
    async fn test_sweep_reconciles_only_old_submitted_records() {
        let store = MemoryStore::new();
        let transport = ScriptedTransport::new();
        let reconciler =
            ReceiptReconciler::new(PushGatewayClient::new(transport.clone()), store.clone());

        store.add_user(1, Some("ExpoPushToken[one]"));
        let old = seed_submitted(&store, 1, "t-old").await;
        let fresh = seed_submitted(&store, 1, "t-fresh").await;
        store.backdate(old, TimeDelta::hours(1));
        transport.set_receipt("t-old", PushReceipt::Ok);
        transport.set_receipt("t-fresh", PushReceipt::Ok);

        let sweeper = ReceiptSweeper::new(reconciler, store.clone(), Duration::from_secs(60), 900, 86_400);
        let summary = sweeper.sweep_once().await.unwrap();

        assert_eq!(summary.delivered, 1);
        assert_eq!(store.record(old).unwrap().status, NotificationStatus::Delivered);
        assert_eq!(store.record(fresh).unwrap().status, NotificationStatus::Submitted);
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_stale_makes_no_gateway_calls() {
        let store = MemoryStore::new();
        let transport = ScriptedTransport::new();
        let reconciler =
            ReceiptReconciler::new(PushGatewayClient::new(transport.clone()), store.clone());

        let sweeper = ReceiptSweeper::new(reconciler, store.clone(), Duration::from_secs(60), 900, 86_400);
        let summary = sweeper.sweep_once().await.unwrap();

        assert_eq!(summary, ReconcileSummary::default());
        assert_eq!(transport.receipt_requests(), 0);
    }

    #[tokio::test]
    async fn test_expired_receipts_do_not_block_newer_records() {
        let store = MemoryStore::new();
        let transport = ScriptedTransport::new();
        let reconciler =
            ReceiptReconciler::new(PushGatewayClient::new(transport.clone()), store.clone());
        store.add_user(1, Some("ExpoPushToken[one]"));

        // More unanswerable tickets than one sweep can load.
        let dead_count = SWEEP_BATCH_LIMIT as usize + 5;
        let mut dead = Vec::with_capacity(dead_count);
        for i in 0..dead_count {
            let ticket = format!("t-dead-{i}");
            let id = seed_submitted(&store, 1, &ticket).await;
            store.backdate(id, TimeDelta::hours(48));
            transport.withhold_receipt(&ticket);
            dead.push(id);
        }
        let newer = seed_submitted(&store, 1, "t-newer").await;
        store.backdate(newer, TimeDelta::hours(1));

        let sweeper =
            ReceiptSweeper::new(reconciler, store.clone(), Duration::from_secs(60), 900, 86_400);
        let summary = sweeper.sweep_once().await.unwrap();

        assert_eq!(summary.expired, dead_count);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.pending, 0);
        assert_eq!(store.record(newer).unwrap().status, NotificationStatus::Delivered);
        for id in dead {
            let record = store.record(id).unwrap();
            assert_eq!(record.status, NotificationStatus::Failed);
            assert_eq!(record.error_message.as_deref(), Some(RECEIPT_UNAVAILABLE));
        }
        // Only the newer ticket was asked about.
        assert_eq!(transport.receipt_requests(), 1);

        // Nothing left to sweep: the gateway is not polled again.
        let summary = sweeper.sweep_once().await.unwrap();
        assert_eq!(summary, ReconcileSummary::default());
        assert_eq!(transport.receipt_requests(), 1);
    }

    #[tokio::test]
    async fn test_unanswered_receipts_inside_window_stay_submitted() {
        let store = MemoryStore::new();
        let transport = ScriptedTransport::new();
        let reconciler =
            ReceiptReconciler::new(PushGatewayClient::new(transport.clone()), store.clone());
        store.add_user(1, Some("ExpoPushToken[one]"));

        let id = seed_submitted(&store, 1, "t-waiting").await;
        store.backdate(id, TimeDelta::hours(2));
        transport.withhold_receipt("t-waiting");

        let sweeper =
            ReceiptSweeper::new(reconciler, store.clone(), Duration::from_secs(60), 900, 86_400);
        let summary = sweeper.sweep_once().await.unwrap();

        assert_eq!(summary.expired, 0);
        assert_eq!(summary.pending, 1);
        assert_eq!(store.record(id).unwrap().status, NotificationStatus::Submitted);
    }
}

//! Receipt reconciliation.
//!
//! Runs once per dispatch cycle, detached from the request, after a fixed
//! delay. Receipts that are not ready at that point are not re-checked.
//! Nothing here propagates errors: gateway and store failures are logged and
//! counted in the returned [`ReconcileSummary`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use pushgate_notifier::batcher::{MAX_RECEIPT_IDS_PER_REQUEST, batches};
use pushgate_notifier::{PushGatewayClient, PushReceipt};

use crate::records::RecordStore;
use crate::tracker::TicketTracker;

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub delivered: usize,
    pub failed: usize,
    pub tokens_cleared: usize,
    /// Receipts for tickets this pass was not tracking.
    pub unmatched: usize,
    /// Tickets still tracked after the pass (receipt not ready or fetch failed).
    pub pending: usize,
    /// Records failed by the sweeper because their receipt can no longer arrive.
    pub expired: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct ReceiptReconciler {
    gateway: PushGatewayClient,
    records: Arc<dyn RecordStore>,
}

impl ReceiptReconciler {
    pub fn new(gateway: PushGatewayClient, records: Arc<dyn RecordStore>) -> Self {
        Self { gateway, records }
    }

    /// Spawn a detached task that sleeps `delay` and then reconciles `tracker` once.
    pub fn schedule(&self, tracker: TicketTracker, delay: Duration) -> JoinHandle<ReconcileSummary> {
        let reconciler = self.clone();
        tracing::debug!(
            tickets = tracker.len(),
            delay_secs = delay.as_secs(),
            "Receipt check scheduled"
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut tracker = tracker;
            reconciler.reconcile(&mut tracker).await
        })
    }

    /// Fetch receipts for every tracked ticket and finalize the matching records.
    pub async fn reconcile(&self, tracker: &mut TicketTracker) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        if tracker.is_empty() {
            return summary;
        }

        let ticket_ids = tracker.ticket_ids();
        for chunk in batches(&ticket_ids, MAX_RECEIPT_IDS_PER_REQUEST) {
            let receipts = match self.gateway.fetch_receipts(chunk).await {
                Ok(receipts) => receipts,
                Err(e) => {
                    tracing::error!(tickets = chunk.len(), error = %e, "Error checking receipts");
                    summary.errors += 1;
                    continue;
                }
            };

            for (ticket_id, receipt) in receipts {
                let Some(record_id) = tracker.take(&ticket_id) else {
                    tracing::debug!(ticket_id = %ticket_id, "Receipt for untracked ticket ignored");
                    summary.unmatched += 1;
                    continue;
                };

                tracing::debug!(ticket_id = %ticket_id, record_id, ?receipt, "Processing receipt");
                self.apply_receipt(record_id, &receipt, &mut summary).await;
            }
        }

        summary.pending = tracker.len();
        tracing::info!(
            delivered = summary.delivered,
            failed = summary.failed,
            tokens_cleared = summary.tokens_cleared,
            pending = summary.pending,
            errors = summary.errors,
            "Receipt reconciliation finished"
        );

        summary
    }

    async fn apply_receipt(
        &self,
        record_id: i64,
        receipt: &PushReceipt,
        summary: &mut ReconcileSummary,
    ) {
        if let PushReceipt::Ok = receipt {
            match self.records.mark_delivered(record_id).await {
                Ok(true) => summary.delivered += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(record_id, error = %e, "Failed to mark notification delivered");
                    summary.errors += 1;
                }
            }
            return;
        }

        if receipt.is_device_not_registered() {
            self.clear_owner_token(record_id, summary).await;
        }

        match self.records.mark_failed(record_id, &receipt.diagnostic()).await {
            Ok(true) => summary.failed += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(record_id, error = %e, "Failed to mark notification failed");
                summary.errors += 1;
            }
        }
    }

    /// Clear the token of the user this record was sent to.
    async fn clear_owner_token(&self, record_id: i64, summary: &mut ReconcileSummary) {
        let owner = match self.records.record_owner(record_id).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                tracing::warn!(record_id, "No owner found for unregistered-device receipt");
                return;
            }
            Err(e) => {
                tracing::error!(record_id, error = %e, "Failed to look up notification owner");
                summary.errors += 1;
                return;
            }
        };

        match self.records.clear_user_token(owner).await {
            Ok(_) => {
                summary.tokens_cleared += 1;
                tracing::warn!(
                    user_id = owner,
                    record_id,
                    "Push token removed due to DeviceNotRegistered receipt"
                );
            }
            Err(e) => {
                tracing::error!(user_id = owner, error = %e, "Failed to clear push token");
                summary.errors += 1;
            }
        }
    }
}

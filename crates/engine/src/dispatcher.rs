//! Dispatch orchestration for one push request.
//!
//! 1. Resolve recipients and their unread counts
//! 2. Create one `Created` record per recipient (all before any batch is sent)
//! 3. Drop recipients whose token is not a well-formed push token
//! 4. Submit batches sequentially; apply each ticket to its record
//! 5. Schedule the receipt check and return without waiting for it

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;

use pushgate_common::error::AppError;
use pushgate_common::types::{NewNotification, Recipient};
use pushgate_notifier::batcher::{MAX_MESSAGES_PER_BATCH, batches};
use pushgate_notifier::{GatewayError, PushGatewayClient, PushMessage, PushTicket, is_expo_push_token};

use crate::reconciler::ReceiptReconciler;
use crate::records::RecordStore;
use crate::request::PushRequest;
use crate::resolver::RecipientResolver;
use crate::tracker::TicketTracker;

/// Number of record inserts allowed in flight for one request.
const RECORD_CREATE_CONCURRENCY: usize = 8;

/// What happened to one request's recipients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub recipients: usize,
    pub records_created: usize,
    pub persistence_failures: usize,
    pub invalid_tokens: usize,
    pub batches_sent: usize,
    pub submitted: usize,
    pub rejected: usize,
    pub tokens_cleared: usize,
}

/// A message ready for submission, tied to the record it reports on.
#[derive(Debug, Clone)]
struct PreparedMessage {
    record_id: i64,
    user_id: i32,
    message: PushMessage,
}

pub struct PushDispatcher {
    resolver: Arc<dyn RecipientResolver>,
    records: Arc<dyn RecordStore>,
    gateway: PushGatewayClient,
    reconciler: ReceiptReconciler,
    receipt_delay: Duration,
}

impl PushDispatcher {
    pub fn new(
        resolver: Arc<dyn RecipientResolver>,
        records: Arc<dyn RecordStore>,
        gateway: PushGatewayClient,
        receipt_delay: Duration,
    ) -> Self {
        let reconciler = ReceiptReconciler::new(gateway.clone(), records.clone());
        Self {
            resolver,
            records,
            gateway,
            reconciler,
            receipt_delay,
        }
    }

    pub fn reconciler(&self) -> &ReceiptReconciler {
        &self.reconciler
    }

    /// Run one dispatch cycle.
    ///
    /// Returns once every batch has been submitted and the receipt check is
    /// scheduled. A batch that exhausts its retries aborts the remaining
    /// batches and is returned as [`AppError::Gateway`]; records already
    /// written keep whatever state they reached, and tickets from earlier
    /// batches are still reconciled.
    pub async fn dispatch(&self, request: &PushRequest) -> Result<DispatchReport, AppError> {
        let recipients = self.resolver.resolve(&request.user_ids).await?;

        let mut report = DispatchReport {
            recipients: recipients.len(),
            ..Default::default()
        };

        let prepared = self.prepare(request, recipients, &mut report).await;
        tracing::info!(
            recipients = report.recipients,
            messages = prepared.len(),
            "Prepared messages for sending"
        );

        let mut tracker = TicketTracker::new();
        let outcome = self.submit_all(&prepared, &mut tracker, &mut report).await;

        self.reconciler.schedule(tracker, self.receipt_delay);

        outcome?;
        Ok(report)
    }

    /// Create a record for every recipient and build messages for the ones
    /// with a usable token.
    async fn prepare(
        &self,
        request: &PushRequest,
        recipients: Vec<Recipient>,
        report: &mut DispatchReport,
    ) -> Vec<PreparedMessage> {
        let records = &self.records;

        // `buffered` keeps input order, so records and messages line up with recipients.
        let created: Vec<(Recipient, Result<i64, AppError>)> = stream::iter(recipients)
            .map(|recipient| {
                let new = NewNotification {
                    user_id: recipient.user_id,
                    sender_user_id: request.sender_user_id,
                    token: recipient.push_token.clone(),
                    title: request.title.clone(),
                    body: request.body.clone(),
                    data: serde_json::Value::Object(request.data.clone()),
                    tournament_id: request.tournament_id,
                };
                async move {
                    let result = records.create(&new).await;
                    (recipient, result)
                }
            })
            .buffered(RECORD_CREATE_CONCURRENCY)
            .collect()
            .await;

        let mut prepared = Vec::with_capacity(created.len());
        for (recipient, result) in created {
            let record_id = match result {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(
                        user_id = recipient.user_id,
                        error = %e,
                        "Error inserting push notification, skipping recipient"
                    );
                    report.persistence_failures += 1;
                    continue;
                }
            };
            report.records_created += 1;
            tracing::debug!(record_id, user_id = recipient.user_id, "Notification record created");

            let token = match recipient.push_token.as_deref() {
                Some(token) if is_expo_push_token(token) => token,
                other => {
                    tracing::warn!(
                        user_id = recipient.user_id,
                        record_id,
                        token = ?other,
                        "Invalid push token, recipient excluded from batch"
                    );
                    report.invalid_tokens += 1;
                    continue;
                }
            };

            let mut data = request.data.clone();
            data.insert("m".to_string(), serde_json::json!(record_id));

            prepared.push(PreparedMessage {
                record_id,
                user_id: recipient.user_id,
                message: PushMessage::new(
                    token,
                    &request.title,
                    &request.body,
                    serde_json::Value::Object(data),
                    recipient.badge(),
                ),
            });
        }

        prepared
    }

    async fn submit_all(
        &self,
        prepared: &[PreparedMessage],
        tracker: &mut TicketTracker,
        report: &mut DispatchReport,
    ) -> Result<(), GatewayError> {
        for batch in batches(prepared, MAX_MESSAGES_PER_BATCH) {
            let messages: Vec<PushMessage> = batch.iter().map(|p| p.message.clone()).collect();
            let tickets = self.gateway.submit(&messages).await?;
            report.batches_sent += 1;

            // Ticket i belongs to message i of this batch.
            for (message, ticket) in batch.iter().zip(tickets) {
                self.apply_ticket(message, ticket, tracker, report).await;
            }
        }

        Ok(())
    }

    async fn apply_ticket(
        &self,
        prepared: &PreparedMessage,
        ticket: PushTicket,
        tracker: &mut TicketTracker,
        report: &mut DispatchReport,
    ) {
        let record_id = prepared.record_id;

        if let PushTicket::Ok { id } = &ticket {
            match self.records.mark_submitted(record_id, id).await {
                Ok(true) => {
                    tracker.register(id.clone(), record_id);
                    report.submitted += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(record_id, ticket_id = %id, error = %e, "Failed to mark notification submitted");
                }
            }
            return;
        }

        report.rejected += 1;
        tracing::warn!(record_id, user_id = prepared.user_id, ?ticket, "Ticket error for message");

        let diagnostic = serde_json::to_string(&ticket).unwrap_or_else(|_| "{}".to_string());
        if let Err(e) = self.records.mark_failed(record_id, &diagnostic).await {
            tracing::error!(record_id, error = %e, "Failed to mark notification failed");
        }

        if ticket.is_device_not_registered() {
            match self.records.clear_token(&prepared.message.to).await {
                Ok(cleared) => {
                    report.tokens_cleared += cleared as usize;
                    tracing::warn!(
                        user_id = prepared.user_id,
                        record_id,
                        "Push token removed due to DeviceNotRegistered error"
                    );
                }
                Err(e) => {
                    tracing::error!(user_id = prepared.user_id, error = %e, "Failed to clear push token");
                }
            }
        }
    }
}

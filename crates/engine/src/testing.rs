//! In-memory store and scripted gateway for tests.
//!
//! Enabled for this crate's unit tests and, through the `test-utils` feature,
//! for the API crate's router tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use pushgate_common::error::AppError;
use pushgate_common::types::{NewNotification, NotificationRecord, NotificationStatus, Recipient};
use pushgate_notifier::{
    GatewayError, PushErrorDetails, PushMessage, PushReceipt, PushTicket, PushTransport,
};

use crate::records::RecordStore;
use crate::resolver::RecipientResolver;

#[derive(Debug, Clone)]
struct MemoryUser {
    push_token: Option<String>,
    has_push_token: bool,
}

#[derive(Default)]
struct StoreState {
    users: BTreeMap<i32, MemoryUser>,
    records: BTreeMap<i64, NotificationRecord>,
    next_id: i64,
    failing_users: HashSet<i32>,
}

/// `RecipientResolver` + `RecordStore` over plain maps, with the same
/// transition guards as the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, user_id: i32, push_token: Option<&str>) {
        self.state().users.insert(
            user_id,
            MemoryUser {
                push_token: push_token.map(str::to_string),
                has_push_token: push_token.is_some(),
            },
        );
    }

    /// A user flagged as having a token but with none stored.
    pub fn add_flagged_user(&self, user_id: i32) {
        self.state().users.insert(
            user_id,
            MemoryUser {
                push_token: None,
                has_push_token: true,
            },
        );
    }

    /// Make record creation fail for `user_id`.
    pub fn fail_create_for(&self, user_id: i32) {
        self.state().failing_users.insert(user_id);
    }

    pub fn user_token(&self, user_id: i32) -> Option<String> {
        self.state()
            .users
            .get(&user_id)
            .and_then(|u| u.push_token.clone())
    }

    pub fn record(&self, record_id: i64) -> Option<NotificationRecord> {
        self.state().records.get(&record_id).cloned()
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.state().records.values().cloned().collect()
    }

    pub fn records_for_user(&self, user_id: i32) -> Vec<NotificationRecord> {
        self.state()
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Move a record's `created_at` into the past.
    pub fn backdate(&self, record_id: i64, by: TimeDelta) {
        if let Some(record) = self.state().records.get_mut(&record_id) {
            record.created_at -= by;
        }
    }

    fn transition(
        &self,
        record_id: i64,
        target: NotificationStatus,
        apply: impl FnOnce(&mut NotificationRecord),
    ) -> bool {
        let mut state = self.state();
        match state.records.get_mut(&record_id) {
            Some(record) if record.status.can_transition_to(target) => {
                record.status = target;
                apply(record);
                true
            }
            other => {
                tracing::warn!(
                    record_id,
                    current = ?other.map(|r| r.status),
                    target = %target,
                    "Status transition not applied"
                );
                false
            }
        }
    }
}

#[async_trait]
impl RecipientResolver for MemoryStore {
    async fn resolve(&self, user_ids: &[i32]) -> Result<Vec<Recipient>, AppError> {
        let state = self.state();
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id).map(|u| (*id, u)))
            .filter(|(_, u)| u.push_token.is_some() || u.has_push_token)
            .map(|(user_id, u)| Recipient {
                user_id,
                push_token: u.push_token.clone(),
                unread_count: state
                    .records
                    .values()
                    .filter(|r| r.user_id == user_id)
                    .filter(|r| r.seen_at.is_none_or(|seen| seen < r.created_at))
                    .count() as i64,
            })
            .collect())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, record: &NewNotification) -> Result<i64, AppError> {
        let mut state = self.state();
        if state.failing_users.contains(&record.user_id) {
            return Err(AppError::Persistence(format!(
                "insert rejected for user {}",
                record.user_id
            )));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.records.insert(
            id,
            NotificationRecord {
                id,
                user_id: record.user_id,
                sender_user_id: record.sender_user_id,
                token: record.token.clone(),
                title: record.title.clone(),
                body: record.body.clone(),
                data: record.data.clone(),
                status: NotificationStatus::Created,
                ticket_id: None,
                error_message: None,
                tournament_id: record.tournament_id,
                created_at: Utc::now(),
                seen_at: None,
            },
        );
        Ok(id)
    }

    async fn get(&self, record_id: i64) -> Result<Option<NotificationRecord>, AppError> {
        Ok(self.record(record_id))
    }

    async fn mark_submitted(&self, record_id: i64, ticket_id: &str) -> Result<bool, AppError> {
        Ok(self.transition(record_id, NotificationStatus::Submitted, |r| {
            r.ticket_id = Some(ticket_id.to_string());
        }))
    }

    async fn mark_failed(&self, record_id: i64, diagnostic: &str) -> Result<bool, AppError> {
        Ok(self.transition(record_id, NotificationStatus::Failed, |r| {
            r.error_message = Some(diagnostic.to_string());
        }))
    }

    async fn mark_delivered(&self, record_id: i64) -> Result<bool, AppError> {
        Ok(self.transition(record_id, NotificationStatus::Delivered, |_| {}))
    }

    async fn record_owner(&self, record_id: i64) -> Result<Option<i32>, AppError> {
        Ok(self.state().records.get(&record_id).map(|r| r.user_id))
    }

    async fn clear_user_token(&self, user_id: i32) -> Result<bool, AppError> {
        Ok(match self.state().users.get_mut(&user_id) {
            Some(user) => {
                user.push_token = None;
                true
            }
            None => false,
        })
    }

    async fn clear_token(&self, token: &str) -> Result<u64, AppError> {
        let mut cleared = 0;
        for user in self.state().users.values_mut() {
            if user.push_token.as_deref() == Some(token) {
                user.push_token = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn expire_submitted(
        &self,
        older_than: DateTime<Utc>,
        diagnostic: &str,
    ) -> Result<u64, AppError> {
        let mut expired = 0;
        for record in self.state().records.values_mut() {
            if record.status == NotificationStatus::Submitted && record.created_at < older_than {
                record.status = NotificationStatus::Failed;
                record.error_message = Some(diagnostic.to_string());
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn stale_submitted(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(i64, String)>, AppError> {
        let state = self.state();
        let mut stale: Vec<&NotificationRecord> = state
            .records
            .values()
            .filter(|r| r.status == NotificationStatus::Submitted && r.created_at < older_than)
            .collect();
        stale.sort_by_key(|r| r.created_at);

        Ok(stale
            .into_iter()
            .filter_map(|r| r.ticket_id.clone().map(|t| (r.id, t)))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }
}

/// Create a record for `user_id` and move it to `Submitted` with `ticket_id`.
pub async fn seed_submitted(store: &MemoryStore, user_id: i32, ticket_id: &str) -> i64 {
    let id = store
        .create(&NewNotification {
            user_id,
            sender_user_id: 99,
            token: store.user_token(user_id),
            title: "seed".into(),
            body: "seed".into(),
            data: serde_json::json!({}),
            tournament_id: None,
        })
        .await
        .unwrap_or_else(|e| panic!("seed insert failed: {e}"));
    store.transition(id, NotificationStatus::Submitted, |r| {
        r.ticket_id = Some(ticket_id.to_string());
    });
    id
}

enum SendStep {
    Pass,
    Fail,
}

#[derive(Default)]
struct TransportState {
    script: VecDeque<SendStep>,
    rejected_tokens: HashMap<String, String>,
    issued: HashMap<String, String>,
    next_ticket: u64,
    sent: Vec<Vec<PushMessage>>,
    attempts: usize,
    receipts: HashMap<String, PushReceipt>,
    token_receipts: HashMap<String, PushReceipt>,
    withheld: HashSet<String>,
    fail_receipts: bool,
    receipt_requests: usize,
    observed: Option<Arc<MemoryStore>>,
    records_at_first_send: Option<usize>,
}

/// Push transport that issues tickets locally.
///
/// Sends succeed unless scripted otherwise; receipts are `ok` unless
/// overridden, withheld, or failed wholesale.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<TransportState>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `n` successful send calls.
    pub fn pass_sends(&self, n: usize) {
        self.state().script.extend((0..n).map(|_| SendStep::Pass));
    }

    /// Queue `n` failing send calls (HTTP 503).
    pub fn fail_sends(&self, n: usize) {
        self.state().script.extend((0..n).map(|_| SendStep::Fail));
    }

    /// Return an error ticket with `code` for messages sent to `token`.
    pub fn reject_token(&self, token: &str, code: &str) {
        self.state()
            .rejected_tokens
            .insert(token.to_string(), code.to_string());
    }

    pub fn set_receipt(&self, ticket_id: &str, receipt: PushReceipt) {
        self.state().receipts.insert(ticket_id.to_string(), receipt);
    }

    /// Receipt for whichever ticket gets issued to `token`.
    pub fn receipt_for_token(&self, token: &str, receipt: PushReceipt) {
        self.state()
            .token_receipts
            .insert(token.to_string(), receipt);
    }

    /// Leave `ticket_id` out of receipt responses (not ready yet).
    pub fn withhold_receipt(&self, ticket_id: &str) {
        self.state().withheld.insert(ticket_id.to_string());
    }

    pub fn fail_receipts(&self, fail: bool) {
        self.state().fail_receipts = fail;
    }

    /// Count `store`'s records when the first send arrives.
    pub fn observe_store(&self, store: Arc<MemoryStore>) {
        self.state().observed = Some(store);
    }

    pub fn records_seen_at_first_send(&self) -> Option<usize> {
        self.state().records_at_first_send
    }

    /// Messages from successful send calls, in order.
    pub fn sent_messages(&self) -> Vec<PushMessage> {
        self.state().sent.concat()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state().sent.iter().map(Vec::len).collect()
    }

    pub fn send_attempts(&self) -> usize {
        self.state().attempts
    }

    pub fn receipt_requests(&self) -> usize {
        self.state().receipt_requests
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn send(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, GatewayError> {
        let mut state = self.state();
        state.attempts += 1;
        if state.attempts == 1 {
            let seen = state.observed.as_ref().map(|store| store.records().len());
            state.records_at_first_send = seen;
        }

        if let Some(SendStep::Fail) = state.script.pop_front() {
            return Err(GatewayError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }

        let mut tickets = Vec::with_capacity(messages.len());
        for message in messages {
            if let Some(code) = state.rejected_tokens.get(&message.to) {
                tickets.push(PushTicket::Error {
                    message: format!("\"{}\" is not a registered push notification recipient", message.to),
                    details: Some(PushErrorDetails {
                        error: Some(code.clone()),
                        ..Default::default()
                    }),
                });
                continue;
            }

            state.next_ticket += 1;
            let id = format!("ticket-{}", state.next_ticket);
            state.issued.insert(id.clone(), message.to.clone());
            tickets.push(PushTicket::Ok { id });
        }

        state.sent.push(messages.to_vec());
        Ok(tickets)
    }

    async fn receipts(
        &self,
        ticket_ids: &[String],
    ) -> Result<HashMap<String, PushReceipt>, GatewayError> {
        let mut state = self.state();
        state.receipt_requests += 1;
        if state.fail_receipts {
            return Err(GatewayError::Status {
                status: 500,
                body: "receipts unavailable".to_string(),
            });
        }

        let mut receipts = HashMap::new();
        for id in ticket_ids {
            if state.withheld.contains(id) {
                continue;
            }
            let receipt = state
                .receipts
                .get(id)
                .or_else(|| {
                    state
                        .issued
                        .get(id)
                        .and_then(|token| state.token_receipts.get(token))
                })
                .cloned()
                .unwrap_or(PushReceipt::Ok);
            receipts.insert(id.clone(), receipt);
        }
        Ok(receipts)
    }
}

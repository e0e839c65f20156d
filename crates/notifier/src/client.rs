//! Retrying push gateway client.
//!
//! Wraps a [`PushTransport`] with the submission retry discipline and receipt
//! chunking. A submission is attempted at most `max_attempts` times; after
//! failed attempt `n` the client waits `base_delay * 2^n` before trying again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::batcher::{MAX_RECEIPT_IDS_PER_REQUEST, batches};
use crate::error::GatewayError;
use crate::expo::PushTransport;
use crate::message::{PushMessage, PushReceipt, PushTicket};

/// Bounded exponential backoff for batch submission.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Clone)]
pub struct PushGatewayClient {
    transport: Arc<dyn PushTransport>,
    retry: RetryPolicy,
}

impl PushGatewayClient {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Submit one batch, returning exactly one ticket per message in input order.
    ///
    /// A whole-batch failure (transport, non-2xx, undecodable body, or a ticket
    /// count that does not match the batch) is retried. Once attempts run out
    /// the last error is returned wrapped in [`GatewayError::Exhausted`].
    pub async fn submit(&self, batch: &[PushMessage]) -> Result<Vec<PushTicket>, GatewayError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = self.transport.send(batch).await.and_then(|tickets| {
                if tickets.len() == batch.len() {
                    Ok(tickets)
                } else {
                    Err(GatewayError::TicketCountMismatch {
                        expected: batch.len(),
                        got: tickets.len(),
                    })
                }
            });

            match result {
                Ok(tickets) => {
                    if attempt > 1 {
                        tracing::info!(attempt, size = batch.len(), "Push batch succeeded after retry");
                    }
                    return Ok(tickets);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Push batch submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        attempt,
                        size = batch.len(),
                        error = %e,
                        "Push batch submission failed, giving up"
                    );
                    return Err(GatewayError::Exhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// Fetch receipts for `ticket_ids`, chunked to the gateway's request limit.
    ///
    /// Tickets whose receipt is not ready yet are simply absent from the map.
    pub async fn fetch_receipts(
        &self,
        ticket_ids: &[String],
    ) -> Result<HashMap<String, PushReceipt>, GatewayError> {
        let mut receipts = HashMap::with_capacity(ticket_ids.len());
        for chunk in batches(ticket_ids, MAX_RECEIPT_IDS_PER_REQUEST) {
            receipts.extend(self.transport.receipts(chunk).await?);
        }
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::Instant;

    /// Transport that replays scripted send results and records call times.
    struct FlakyTransport {
        results: Mutex<VecDeque<Result<Vec<PushTicket>, GatewayError>>>,
        calls: Mutex<Vec<Instant>>,
        receipt_calls: Mutex<Vec<usize>>,
    }

    impl FlakyTransport {
        fn new(results: Vec<Result<Vec<PushTicket>, GatewayError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(Vec::new()),
                receipt_calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PushTransport for FlakyTransport {
        async fn send(&self, _messages: &[PushMessage]) -> Result<Vec<PushTicket>, GatewayError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Decode("script exhausted".into())))
        }

        async fn receipts(
            &self,
            ticket_ids: &[String],
        ) -> Result<HashMap<String, PushReceipt>, GatewayError> {
            self.receipt_calls.lock().unwrap().push(ticket_ids.len());
            Ok(ticket_ids
                .iter()
                .map(|id| (id.clone(), PushReceipt::Ok))
                .collect())
        }
    }

    fn down() -> Result<Vec<PushTicket>, GatewayError> {
        Err(GatewayError::Status {
            status: 503,
            body: "unavailable".into(),
        })
    }

    fn message() -> PushMessage {
        PushMessage::new("ExpoPushToken[a]", "T", "B", serde_json::json!({}), 1)
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(400));
        assert_eq!(policy.delay_after(2), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_three_attempts_with_backoff() {
        let transport = FlakyTransport::new(vec![down(), down(), down(), down()]);
        let client = PushGatewayClient::new(transport.clone());

        let err = client.submit(&[message()]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Exhausted { attempts: 3, .. }));

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_millis(400));
        assert_eq!(calls[2] - calls[1], Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_attempt_stops_retrying() {
        let ok = Ok(vec![PushTicket::Ok { id: "t1".into() }]);
        let transport = FlakyTransport::new(vec![down(), ok, down()]);
        let client = PushGatewayClient::new(transport.clone());

        let tickets = client.submit(&[message()]).await.unwrap();
        assert_eq!(tickets, vec![PushTicket::Ok { id: "t1".into() }]);
        assert_eq!(transport.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_count_mismatch_is_retried() {
        let short = Ok(vec![PushTicket::Ok { id: "t1".into() }]);
        let full = Ok(vec![
            PushTicket::Ok { id: "t1".into() },
            PushTicket::Ok { id: "t2".into() },
        ]);
        let transport = FlakyTransport::new(vec![short, full]);
        let client = PushGatewayClient::new(transport.clone());

        let tickets = client.submit(&[message(), message()]).await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert_eq!(transport.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_receipts_are_chunked() {
        let transport = FlakyTransport::new(vec![]);
        let client = PushGatewayClient::new(transport.clone());
        let ids: Vec<String> = (0..650).map(|i| format!("t{i}")).collect();

        let receipts = client.fetch_receipts(&ids).await.unwrap();
        assert_eq!(receipts.len(), 650);
        assert_eq!(*transport.receipt_calls.lock().unwrap(), vec![300, 300, 50]);
    }
}

//! HTTP transport for the Expo push API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::message::{PushMessage, PushReceipt, PushTicket};

/// A single round-trip to the push gateway, with no retry or chunking.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Submit one batch. Returns the gateway's tickets as-is.
    async fn send(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, GatewayError>;

    /// Fetch receipts for at most one request's worth of ticket ids.
    async fn receipts(
        &self,
        ticket_ids: &[String],
    ) -> Result<HashMap<String, PushReceipt>, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    data: Vec<PushTicket>,
}

#[derive(Debug, Deserialize)]
struct ReceiptsResponse {
    data: HashMap<String, PushReceipt>,
}

/// reqwest-backed transport for `https://exp.host/--/api/v2`.
#[derive(Clone)]
pub struct ExpoTransport {
    http: Client,
    base_url: String,
    access_token: Option<String>,
}

impl ExpoTransport {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(reqwest::header::ACCEPT, "application/json");

        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PushTransport for ExpoTransport {
    async fn send(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, GatewayError> {
        let response = self.post("/push/send").json(messages).send().await?;
        let parsed: SendResponse = Self::read_json(response).await?;

        tracing::debug!(
            messages = messages.len(),
            tickets = parsed.data.len(),
            "Push batch submitted"
        );
        Ok(parsed.data)
    }

    async fn receipts(
        &self,
        ticket_ids: &[String],
    ) -> Result<HashMap<String, PushReceipt>, GatewayError> {
        let response = self
            .post("/push/getReceipts")
            .json(&serde_json::json!({ "ids": ticket_ids }))
            .send()
            .await?;
        let parsed: ReceiptsResponse = Self::read_json(response).await?;

        tracing::debug!(
            requested = ticket_ids.len(),
            received = parsed.data.len(),
            "Push receipts fetched"
        );
        Ok(parsed.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_response_decoding() {
        let body = r#"{"data":[{"status":"ok","id":"a"},{"status":"error","message":"bad","details":{"error":"DeviceNotRegistered"}}]}"#;
        let parsed: SendResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert!(parsed.data[1].is_device_not_registered());
    }

    #[test]
    fn test_receipts_response_decoding() {
        let body = r#"{"data":{"a":{"status":"ok"},"b":{"status":"error","message":"gone","details":{"error":"DeviceNotRegistered"}}}}"#;
        let parsed: ReceiptsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data["a"], PushReceipt::Ok);
        assert!(parsed.data["b"].is_device_not_registered());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let transport =
            ExpoTransport::new("https://exp.host/--/api/v2/", None, Duration::from_secs(5))
                .unwrap();
        assert_eq!(transport.base_url, "https://exp.host/--/api/v2");
    }
}

//! Expo push wire types.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Receipt/ticket error code for a device token that is no longer valid.
pub const DEVICE_NOT_REGISTERED: &str = "DeviceNotRegistered";

static EXPO_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Expo(nent)?PushToken\[.*\]$").expect("static regex is valid")
});

static DEVICE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z\d]{8}-[a-z\d]{4}-[a-z\d]{4}-[a-z\d]{4}-[a-z\d]{12}$")
        .expect("static regex is valid")
});

/// Whether `token` looks like something the Expo push service accepts.
pub fn is_expo_push_token(token: &str) -> bool {
    EXPO_TOKEN_RE.is_match(token) || DEVICE_ID_RE.is_match(token)
}

/// One outbound push message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub to: String,
    pub sound: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub badge: i64,
    pub priority: String,
    pub interruption_level: String,
    #[serde(rename = "_displayInForeground")]
    pub display_in_foreground: bool,
}

impl PushMessage {
    /// High-priority, time-sensitive message with the default sound.
    pub fn new(
        to: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        data: serde_json::Value,
        badge: i64,
    ) -> Self {
        Self {
            to: to.into(),
            sound: "default".to_string(),
            title: title.into(),
            body: body.into(),
            data,
            badge,
            priority: "high".to_string(),
            interruption_level: "time-sensitive".to_string(),
            display_in_foreground: true,
        }
    }
}

/// Structured part of a ticket or receipt error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-message submission outcome, positionally aligned with the submitted batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PushTicket {
    Ok {
        id: String,
    },
    Error {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<PushErrorDetails>,
    },
}

impl PushTicket {
    pub fn is_device_not_registered(&self) -> bool {
        match self {
            PushTicket::Ok { .. } => false,
            PushTicket::Error { details, .. } => is_unregistered(details.as_ref()),
        }
    }
}

/// Final delivery outcome for a previously issued ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PushReceipt {
    Ok,
    Error {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<PushErrorDetails>,
    },
}

impl PushReceipt {
    pub fn is_device_not_registered(&self) -> bool {
        match self {
            PushReceipt::Ok => false,
            PushReceipt::Error { details, .. } => is_unregistered(details.as_ref()),
        }
    }

    /// JSON form of the error details stored on a failed record (`{}` when absent).
    pub fn diagnostic(&self) -> String {
        match self {
            PushReceipt::Error {
                details: Some(details),
                ..
            } => serde_json::to_string(details).unwrap_or_else(|_| "{}".to_string()),
            _ => "{}".to_string(),
        }
    }
}

fn is_unregistered(details: Option<&PushErrorDetails>) -> bool {
    details
        .and_then(|d| d.error.as_deref())
        .is_some_and(|e| e == DEVICE_NOT_REGISTERED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expo_token_formats() {
        assert!(is_expo_push_token("ExponentPushToken[xxxxxxxxxxxxxxxxxxxxxx]"));
        assert!(is_expo_push_token("ExpoPushToken[abc]"));
        assert!(is_expo_push_token("F5741A13-BCDA-434B-A316-5DC0E6FFA94F"));
        assert!(is_expo_push_token("ExponentPushToken[]"));
        assert!(!is_expo_push_token("ExponentPushToken[abc"));
        assert!(!is_expo_push_token("not-a-token"));
        assert!(!is_expo_push_token(""));
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = PushMessage::new("ExpoPushToken[a]", "T", "B", json!({"m": 7}), 3);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["to"], "ExpoPushToken[a]");
        assert_eq!(value["sound"], "default");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["interruptionLevel"], "time-sensitive");
        assert_eq!(value["_displayInForeground"], true);
        assert_eq!(value["badge"], 3);
        assert_eq!(value["data"]["m"], 7);
    }

    #[test]
    fn test_ticket_parsing() {
        let ok: PushTicket = serde_json::from_value(json!({"status": "ok", "id": "t-1"})).unwrap();
        assert_eq!(ok, PushTicket::Ok { id: "t-1".into() });

        let err: PushTicket = serde_json::from_value(json!({
            "status": "error",
            "message": "\"ExponentPushToken[x]\" is not a registered push notification recipient",
            "details": {"error": "DeviceNotRegistered", "expoPushToken": "ExponentPushToken[x]"}
        }))
        .unwrap();
        assert!(err.is_device_not_registered());
        assert!(!ok.is_device_not_registered());

        // Stored diagnostic keeps the gateway's shape.
        let stored = serde_json::to_value(&err).unwrap();
        assert_eq!(stored["status"], "error");
        assert_eq!(stored["details"]["error"], "DeviceNotRegistered");
        assert_eq!(stored["details"]["expoPushToken"], "ExponentPushToken[x]");
    }

    #[test]
    fn test_receipt_parsing() {
        let ok: PushReceipt = serde_json::from_value(json!({"status": "ok"})).unwrap();
        assert_eq!(ok, PushReceipt::Ok);
        assert_eq!(ok.diagnostic(), "{}");

        let rate: PushReceipt = serde_json::from_value(json!({
            "status": "error",
            "message": "too many",
            "details": {"error": "MessageRateExceeded"}
        }))
        .unwrap();
        assert!(!rate.is_device_not_registered());
        assert_eq!(rate.diagnostic(), r#"{"error":"MessageRateExceeded"}"#);
    }
}

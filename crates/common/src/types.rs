use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery status of a push notification record.
///
/// Stored as a `SMALLINT`. Transitions only move forward:
/// `Created -> Submitted -> {Delivered | Failed}` or `Created -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Created = 0,
    Submitted = 1,
    Delivered = 2,
    Failed = 3,
}

impl NotificationStatus {
    /// `Delivered` and `Failed` are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Submitted)
                | (Self::Created, Self::Failed)
                | (Self::Submitted, Self::Delivered)
                | (Self::Submitted, Self::Failed)
        )
    }

    /// Statuses a record may be in for a transition into `self` to apply.
    pub fn predecessors(self) -> &'static [NotificationStatus] {
        match self {
            Self::Created => &[],
            Self::Submitted => &[Self::Created],
            Self::Delivered => &[Self::Submitted],
            Self::Failed => &[Self::Created, Self::Submitted],
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Created => write!(f, "created"),
            NotificationStatus::Submitted => write!(f, "submitted"),
            NotificationStatus::Delivered => write!(f, "delivered"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A user resolved for delivery, with the unread count used for the badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recipient {
    pub user_id: i32,
    pub push_token: Option<String>,
    pub unread_count: i64,
}

impl Recipient {
    /// Badge value shown on the device: pending unread plus the one being sent.
    pub fn badge(&self) -> i64 {
        self.unread_count.max(0) + 1
    }
}

/// A persisted push notification.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: i32,
    pub sender_user_id: i32,
    /// Snapshot of the recipient's device token at send time.
    pub token: Option<String>,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub status: NotificationStatus,
    pub ticket_id: Option<String>,
    /// Serialized gateway diagnostic for failed records.
    pub error_message: Option<String>,
    pub tournament_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub seen_at: Option<DateTime<Utc>>,
}

/// Fields for a new record, inserted in `Created` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: i32,
    pub sender_user_id: i32,
    pub token: Option<String>,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub tournament_id: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [NotificationStatus; 4] = [
        NotificationStatus::Created,
        NotificationStatus::Submitted,
        NotificationStatus::Delivered,
        NotificationStatus::Failed,
    ];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_predecessors_agree_with_transitions() {
        for to in ALL {
            for from in ALL {
                assert_eq!(
                    to.predecessors().contains(&from),
                    from.can_transition_to(to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_no_backwards_moves() {
        assert!(!NotificationStatus::Submitted.can_transition_to(NotificationStatus::Created));
        assert!(!NotificationStatus::Created.can_transition_to(NotificationStatus::Delivered));
    }

    #[test]
    fn test_badge_counts_current_notification() {
        let recipient = Recipient {
            user_id: 1,
            push_token: None,
            unread_count: 4,
        };
        assert_eq!(recipient.badge(), 5);
    }
}

//! Notification record store.
//!
//! The store is the single source of truth for delivery status. Every status
//! change is a guarded update that only applies when the record is currently
//! in one of the target status's predecessors, so a terminal record can never
//! be moved again. Transition methods return whether the update applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use pushgate_common::error::AppError;
use pushgate_common::types::{NewNotification, NotificationRecord, NotificationStatus};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record in `Created` state and return its id.
    async fn create(&self, record: &NewNotification) -> Result<i64, AppError>;

    async fn get(&self, record_id: i64) -> Result<Option<NotificationRecord>, AppError>;

    /// `Created -> Submitted`, storing the gateway ticket id.
    async fn mark_submitted(&self, record_id: i64, ticket_id: &str) -> Result<bool, AppError>;

    /// `Created | Submitted -> Failed`, storing the serialized diagnostic.
    async fn mark_failed(&self, record_id: i64, diagnostic: &str) -> Result<bool, AppError>;

    /// `Submitted -> Delivered`.
    async fn mark_delivered(&self, record_id: i64) -> Result<bool, AppError>;

    /// The user a record was sent to.
    async fn record_owner(&self, record_id: i64) -> Result<Option<i32>, AppError>;

    /// Clear the push token of one user. Returns whether the user exists.
    async fn clear_user_token(&self, user_id: i32) -> Result<bool, AppError>;

    /// Clear a specific device token from whichever users hold it.
    async fn clear_token(&self, token: &str) -> Result<u64, AppError>;

    /// `Submitted -> Failed` for every submitted record created before
    /// `older_than`. Returns how many records were moved.
    async fn expire_submitted(
        &self,
        older_than: DateTime<Utc>,
        diagnostic: &str,
    ) -> Result<u64, AppError>;

    /// `Submitted` records created before `older_than`, oldest first, as
    /// `(record_id, ticket_id)` pairs.
    async fn stale_submitted(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(i64, String)>, AppError>;
}

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn predecessor_codes(target: NotificationStatus) -> Vec<i16> {
        target.predecessors().iter().map(|s| *s as i16).collect()
    }

    fn log_rejected(record_id: i64, target: NotificationStatus, applied: bool) {
        if !applied {
            tracing::warn!(
                record_id,
                target = %target,
                "Status transition not applied (record missing or not in a predecessor state)"
            );
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create(&self, record: &NewNotification) -> Result<i64, AppError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO push_notifications
                (user_id, sender_user_id, token, title, body, data, status, tournament_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(record.user_id)
        .bind(record.sender_user_id)
        .bind(&record.token)
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.data)
        .bind(NotificationStatus::Created)
        .bind(record.tournament_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(id)
    }

    async fn get(&self, record_id: i64) -> Result<Option<NotificationRecord>, AppError> {
        let record: Option<NotificationRecord> =
            sqlx::query_as("SELECT * FROM push_notifications WHERE id = $1")
                .bind(record_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    async fn mark_submitted(&self, record_id: i64, ticket_id: &str) -> Result<bool, AppError> {
        let target = NotificationStatus::Submitted;
        let result = sqlx::query(
            "UPDATE push_notifications SET status = $1, ticket_id = $2 WHERE id = $3 AND status = ANY($4)",
        )
        .bind(target)
        .bind(ticket_id)
        .bind(record_id)
        .bind(Self::predecessor_codes(target))
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        Self::log_rejected(record_id, target, applied);
        Ok(applied)
    }

    async fn mark_failed(&self, record_id: i64, diagnostic: &str) -> Result<bool, AppError> {
        let target = NotificationStatus::Failed;
        let result = sqlx::query(
            "UPDATE push_notifications SET status = $1, error_message = $2 WHERE id = $3 AND status = ANY($4)",
        )
        .bind(target)
        .bind(diagnostic)
        .bind(record_id)
        .bind(Self::predecessor_codes(target))
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        Self::log_rejected(record_id, target, applied);
        Ok(applied)
    }

    async fn mark_delivered(&self, record_id: i64) -> Result<bool, AppError> {
        let target = NotificationStatus::Delivered;
        let result = sqlx::query(
            "UPDATE push_notifications SET status = $1 WHERE id = $2 AND status = ANY($3)",
        )
        .bind(target)
        .bind(record_id)
        .bind(Self::predecessor_codes(target))
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        Self::log_rejected(record_id, target, applied);
        Ok(applied)
    }

    async fn record_owner(&self, record_id: i64) -> Result<Option<i32>, AppError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT user_id FROM push_notifications WHERE id = $1")
                .bind(record_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(user_id,)| user_id))
    }

    async fn clear_user_token(&self, user_id: i32) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE users SET push_token = NULL WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_token(&self, token: &str) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE users SET push_token = NULL WHERE push_token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn expire_submitted(
        &self,
        older_than: DateTime<Utc>,
        diagnostic: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE push_notifications
            SET status = $1, error_message = $2
            WHERE status = $3
              AND created_at < $4
            "#,
        )
        .bind(NotificationStatus::Failed)
        .bind(diagnostic)
        .bind(NotificationStatus::Submitted)
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stale_submitted(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(i64, String)>, AppError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT id, ticket_id
            FROM push_notifications
            WHERE status = $1
              AND ticket_id IS NOT NULL
              AND created_at < $2
            ORDER BY created_at
            LIMIT $3
            "#,
        )
        .bind(NotificationStatus::Submitted)
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

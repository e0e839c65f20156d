//! Recipient resolution: device tokens and unread counts.

use async_trait::async_trait;
use sqlx::PgPool;

use pushgate_common::error::AppError;
use pushgate_common::types::Recipient;

/// Looks up which of the requested users can receive a push.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    /// Users among `user_ids` that have a token or are flagged as having one.
    /// Order is not significant.
    async fn resolve(&self, user_ids: &[i32]) -> Result<Vec<Recipient>, AppError>;
}

pub struct PgRecipientResolver {
    pool: PgPool,
}

impl PgRecipientResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientResolver for PgRecipientResolver {
    async fn resolve(&self, user_ids: &[i32]) -> Result<Vec<Recipient>, AppError> {
        // Unread: never seen, or seen before it was (re)created.
        let recipients: Vec<Recipient> = sqlx::query_as(
            r#"
            SELECT
                u.id AS user_id,
                u.push_token,
                (
                    SELECT COUNT(*)
                    FROM push_notifications pn
                    WHERE pn.user_id = u.id
                      AND (pn.seen_at IS NULL OR pn.seen_at < pn.created_at)
                ) AS unread_count
            FROM users u
            WHERE u.id = ANY($1)
              AND (u.push_token IS NOT NULL OR u.has_push_token = true)
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(
            requested = user_ids.len(),
            resolved = recipients.len(),
            "Resolved push recipients"
        );

        Ok(recipients)
    }
}

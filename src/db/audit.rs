//! Append-only audit log. Written once per match, regardless of
//! per-channel delivery outcome.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{AUDIT_BODY_MAX_LEN, truncate_chars};

pub struct AuditRepository<'a> {
    pool: &'a PgPool,
}

/// One dispatch attempt's outcome, ready to append.
pub struct AuditEntry {
    pub rule_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub message_content: String,
    pub detected_keyword: String,
    pub dispatched_to_email: bool,
    pub dispatched_to_bot: bool,
}

impl<'a> AuditRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: AuditEntry) -> Result<Uuid, StorageError> {
        let id = Uuid::new_v4();
        let truncated = truncate_chars(&entry.message_content, AUDIT_BODY_MAX_LEN);

        sqlx::query(
            r#"
            INSERT INTO alert_logs (
                id, alert_id, user_id, message_content, detected_keyword,
                dispatched_to_email, dispatched_to_bot
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(entry.rule_id)
        .bind(entry.user_id)
        .bind(truncated)
        .bind(entry.detected_keyword)
        .bind(entry.dispatched_to_email)
        .bind(entry.dispatched_to_bot)
        .execute(self.pool)
        .await?;

        Ok(id)
    }
}

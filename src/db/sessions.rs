//! Platform session repository: the source of truth the Supervisor
//! polls every tick and the only table it is ever allowed to mutate
//! (and then only to clear `is_active`).

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::PlatformSession;

pub struct SessionRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> SessionRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_active(&self) -> Result<Vec<PlatformSession>, StorageError> {
        let sessions = sqlx::query_as::<_, PlatformSession>(
            "SELECT * FROM telegram_sessions WHERE is_active = TRUE",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(sessions)
    }

    pub async fn get_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<PlatformSession>, StorageError> {
        let session = sqlx::query_as::<_, PlatformSession>(
            "SELECT * FROM telegram_sessions WHERE user_id = $1 AND is_active = TRUE LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(session)
    }

    /// Clear `is_active` for the given session. Never deletes the row —
    /// the core never deletes a `PlatformSession`.
    pub async fn mark_inactive(&self, session_id: Uuid) -> Result<(), StorageError> {
        sqlx::query("UPDATE telegram_sessions SET is_active = FALSE WHERE id = $1")
            .bind(session_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

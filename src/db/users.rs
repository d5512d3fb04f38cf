//! User lookups used by the supervisor (owner metadata for dispatch)
//! and the control-bot (`/start` linking, sender resolution).

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::User;

pub struct UserRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Option<User>, StorageError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(user)
    }

    /// Look up a user via the platform sender id, by joining through
    /// the active `telegram_sessions` row that carries it. Used by the
    /// control-bot to resolve `/start` and every subsequent command.
    pub async fn find_by_platform_sender_id(
        &self,
        sender_id: &str,
    ) -> Result<Option<User>, StorageError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.* FROM users u
            JOIN telegram_sessions s ON s.user_id = u.id
            WHERE s.telegram_id = $1
            LIMIT 1
            "#,
        )
        .bind(sender_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(user)
    }

    pub async fn find_by_bot_chat_id(&self, chat_id: i64) -> Result<Option<User>, StorageError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE bot_chat_id = $1")
            .bind(chat_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(user)
    }

    /// Persist the caller's chat id as the user's `bot_chat_id`, so
    /// future alert fan-out has a delivery target. No-op (but still
    /// `Ok`) if the value is already current.
    pub async fn set_bot_chat_id(&self, user_id: Uuid, chat_id: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE users SET bot_chat_id = $1 WHERE id = $2")
            .bind(chat_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

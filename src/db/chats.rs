//! Synced-chat snapshot, refreshed wholesale on every client start.
//! Exists only so the control-bot's `/add @handle` can resolve a human
//! handle to a numeric chat id.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::SyncedChat;

pub struct ChatRepository<'a> {
    pool: &'a PgPool,
}

/// A conversation snapshot ready to insert, pre-resolution of its type
/// string (see `models::ChatType`).
pub struct NewSyncedChat {
    pub id: i64,
    pub title: String,
    pub chat_type: &'static str,
    pub username: Option<String>,
}

impl<'a> ChatRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SyncedChat>, StorageError> {
        let chats = sqlx::query_as::<_, SyncedChat>(
            "SELECT * FROM telegram_chats WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;
        Ok(chats)
    }

    /// Case-insensitive handle lookup among the user's synced chats,
    /// used by the control-bot's `/add <keyword> @handle`.
    pub async fn find_by_username(
        &self,
        user_id: Uuid,
        handle: &str,
    ) -> Result<Option<SyncedChat>, StorageError> {
        let chats = self.list_for_user(user_id).await?;
        let handle_lower = handle.to_ascii_lowercase();
        Ok(chats
            .into_iter()
            .find(|c| c.username.as_deref().is_some_and(|u| u.to_ascii_lowercase() == handle_lower)))
    }

    /// Atomically replace every synced-chat row for a user: delete all
    /// existing rows, then insert the fresh snapshot, in one
    /// transaction.
    pub async fn replace_all(
        &self,
        user_id: Uuid,
        chats: Vec<NewSyncedChat>,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM telegram_chats WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for chat in chats {
            sqlx::query(
                "INSERT INTO telegram_chats (id, user_id, title, type, username) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(chat.id)
            .bind(user_id)
            .bind(chat.title)
            .bind(chat.chat_type)
            .bind(chat.username)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

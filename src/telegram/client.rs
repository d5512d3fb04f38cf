//! Thin wrapper over the upstream MTProto user-session client. All
//! connect/auth/send failures funnel through here and come out the
//! other side as a [`TelegramError`], never as a raw upstream panic or
//! a bare string the caller has to pattern-match.

use std::time::Duration;

use grammers_client::{Client, Config, InitParams, Update};
use grammers_session::Session;
use tracing::warn;

use crate::db::NewSyncedChat;
use crate::error::TelegramError;

/// How long a `whoami` round-trip is allowed before it's a zombie.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected, authorized upstream client for one user's session.
pub struct PlatformClient {
    client: Client,
}

impl PlatformClient {
    /// Connect using an opaque, previously-serialized session blob. The
    /// blob is never inspected or mutated, only handed to the session
    /// loader and round-tripped back out on save (not needed here since
    /// the core never re-persists a session string after creation).
    pub async fn connect(session_string: &str, api_id: i32, api_hash: &str) -> Result<Self, TelegramError> {
        let session = Session::load(session_string.as_bytes())
            .map_err(|e| TelegramError::classify(e.to_string()))?;

        let client = Client::connect(Config {
            session,
            api_id,
            api_hash: api_hash.to_string(),
            params: InitParams::default(),
        })
        .await
        .map_err(|e| TelegramError::classify(e.to_string()))?;

        Ok(Self { client })
    }

    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::classify(e.to_string()))
    }

    /// Zombie-detecting liveness probe: a bounded `whoami` round-trip.
    /// Returns the platform's own user id for the bot identity cache
    /// when called against the bot client too.
    pub async fn whoami(&self) -> Result<i64, TelegramError> {
        match tokio::time::timeout(LIVENESS_TIMEOUT, self.client.get_me()).await {
            Ok(Ok(me)) => Ok(me.id()),
            Ok(Err(e)) => Err(TelegramError::classify(e.to_string())),
            Err(_) => Err(TelegramError::LivenessTimeout),
        }
    }

    /// Fetch the top `limit` conversations, for the one-shot chat sync
    /// done on client start.
    pub async fn top_dialogs(&self, limit: usize) -> Result<Vec<NewSyncedChat>, TelegramError> {
        let mut iter = self.client.iter_dialogs();
        let mut chats = Vec::with_capacity(limit);

        while chats.len() < limit {
            let dialog = match iter.next().await {
                Ok(Some(d)) => d,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "dialog sync interrupted");
                    break;
                }
            };
            let chat = dialog.chat();
            chats.push(NewSyncedChat {
                id: chat.id(),
                title: chat.name().unwrap_or_default().to_string(),
                chat_type: classify_chat(&chat),
                username: chat.username().map(str::to_string),
            });
        }

        Ok(chats)
    }

    /// Block until the next update arrives, or return `Ok(None)` if the
    /// connection closed cleanly.
    pub async fn next_update(&self) -> Result<Option<Update>, TelegramError> {
        self.client
            .next_update()
            .await
            .map(Some)
            .or_else(|e| Err(TelegramError::classify(e.to_string())))
    }

    pub async fn disconnect(self) {
        // grammers has no explicit disconnect; dropping the client
        // tears down its background network task.
        drop(self.client);
    }
}

fn classify_chat(chat: &grammers_client::types::Chat) -> &'static str {
    use grammers_client::types::Chat;
    match chat {
        Chat::User(_) => "User",
        Chat::Group(_) => "Group",
        Chat::Channel(_) => "Channel",
    }
}

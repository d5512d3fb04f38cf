//! Plain record types for the core's entities. All traversal between
//! entities goes through the Storage Gateway (`db` module) — nothing
//! here holds a cross-reference to another entity, only foreign keys.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub role: String,
    pub bot_chat_id: Option<i64>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReferralCode {
    pub code: String,
    pub max_uses: i32,
    pub used_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A platform (Telegram) session credential for a user. At most one row
/// per user has `is_active = true`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlatformSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_string: String,
    pub phone_number: Option<String>,
    pub telegram_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// An alert rule. `keywords` is non-empty by construction (enforced by
/// the Storage Gateway's `CreateRule`, never by the database schema
/// alone — the core treats this as a logical invariant it must uphold).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Rule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_id: Option<i64>,
    pub source_name: Option<String>,
    pub keywords: Vec<String>,
    pub excluded_keywords: Vec<String>,
    pub is_regex: bool,
    pub notify_email: bool,
    pub notify_bot: bool,
    /// Reserved field, not yet wired to any sender (see SPEC_FULL.md §9).
    pub webhook_url: Option<String>,
    pub is_paused: bool,
    pub trigger_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub alert_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub message_content: String,
    pub detected_keyword: String,
    pub dispatched_to_email: bool,
    pub dispatched_to_bot: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    User,
    Group,
    Channel,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Group => "Group",
            Self::Channel => "Channel",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncedChat {
    pub id: i64,
    pub user_id: Uuid,
    pub title: String,
    #[sqlx(rename = "type")]
    pub chat_type: String,
    pub username: Option<String>,
}

/// Maximum length an audit log message body is truncated to.
pub const AUDIT_BODY_MAX_LEN: usize = 500;

/// Maximum length a bot-delivered message body is truncated to.
pub const BOT_BODY_MAX_LEN: usize = 4000;

/// Truncate `s` to at most `max_chars` characters, respecting UTF-8
/// boundaries (char count, not byte count).
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_respects_utf8_boundaries() {
        let s = "héllo wörld";
        let truncated = truncate_chars(s, 5);
        assert_eq!(truncated, "héllo");
    }

    #[test]
    fn truncate_chars_noop_when_shorter() {
        assert_eq!(truncate_chars("short", 500), "short");
    }
}

//! Unified error handling for the alert worker.
//!
//! Each subsystem gets its own error enum so failure sites stay close to
//! the operation that can fail, with `thiserror` providing `Display`/`Error`
//! impls and `#[from]` conversions from the underlying driver/transport
//! errors.

use thiserror::Error;

/// Errors from the Storage Gateway (C1).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Transient(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("rule not found: {0}")]
    RuleNotFound(uuid::Uuid),

    #[error("user not found: {0}")]
    UserNotFound(uuid::Uuid),
}

/// Errors from the upstream platform client (C4).
///
/// Connect/auth/send failures are classified into this sum type at the
/// single point the raw upstream error is received, rather than
/// string-matched at every call site. The two literal substrings the
/// upstream protocol uses to signal session revocation are the one
/// unavoidable exception — they have no structured equivalent.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("session revoked: {0}")]
    SessionRevoked(String),

    #[error("not authorized")]
    NotAuthorized,

    #[error("transient transport error: {0}")]
    TransientTransport(String),

    #[error("liveness check timed out")]
    LivenessTimeout,

    #[error("other upstream error: {0}")]
    Other(String),
}

impl TelegramError {
    /// Markers the upstream MTProto layer uses to report that a session
    /// string was invalidated (multi-IP use, duplicated auth key). These
    /// are checked once at ingestion; nothing downstream string-matches.
    const REVOCATION_MARKERS: [&'static str; 2] = [
        "used under two different IP addresses",
        "AuthKeyDuplicated",
    ];

    /// Classify a raw upstream error message into a typed variant.
    pub fn classify(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if Self::REVOCATION_MARKERS.iter().any(|m| raw.contains(m)) {
            return Self::SessionRevoked(raw);
        }
        Self::Other(raw)
    }
}

/// Errors from the Notification Dispatcher (C2).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("smtp error: {0}")]
    Smtp(String),

    #[error("bot send error: {0}")]
    BotSend(String),

    #[error("send timed out")]
    Timeout,
}

/// Errors surfaced by the control-bot command surface (C5).
///
/// Never crashes the bot client: every variant maps to a short human
/// reply rather than propagating further.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("account not linked")]
    Unlinked,

    #[error("missing keyword argument")]
    MissingKeyword,

    #[error("chat handle not found: {0}")]
    HandleNotFound(String),

    #[error("no rule matching id prefix: {0}")]
    RuleNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CommandError {
    /// Short human-facing reply text, HTML-formatted for teloxide's
    /// `ParseMode::Html`.
    pub fn reply_text(&self) -> String {
        match self {
            Self::Unlinked => {
                "\u{274c} You are not linked. Please log in to the dashboard first.".to_string()
            }
            Self::MissingKeyword => {
                "\u{274c} Please provide a keyword.\nUsage: <code>/add &lt;word&gt; [@user] [-email] [-bot]</code>".to_string()
            }
            Self::HandleNotFound(handle) => format!(
                "\u{274c} Could not find chat <b>@{handle}</b> in your synced dialogs."
            ),
            Self::RuleNotFound(prefix) => {
                format!("\u{274c} Alert ID <code>{prefix}</code> not found.")
            }
            Self::Storage(_) => "\u{274c} Internal error, please try again later.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_multi_ip_marker_as_revoked() {
        let err = TelegramError::classify("AuthKeyUsed under two different IP addresses, uh oh");
        assert!(matches!(err, TelegramError::SessionRevoked(_)));
    }

    #[test]
    fn classifies_duplicated_key_marker_as_revoked() {
        let err = TelegramError::classify("AuthKeyDuplicatedError: blah");
        assert!(matches!(err, TelegramError::SessionRevoked(_)));
    }

    #[test]
    fn classifies_unrelated_error_as_other() {
        let err = TelegramError::classify("connection reset by peer");
        assert!(matches!(err, TelegramError::Other(_)));
    }
}

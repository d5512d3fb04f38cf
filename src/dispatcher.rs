//! Notification Dispatcher (C2): renders and fans out a match across
//! email and the control bot. Both channels are best-effort and
//! independent — one failing never prevents the other, and the caller
//! always gets back `(email_ok, bot_ok)` to record in the audit log.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{error, info, warn};

use crate::error::DispatchError;
use crate::evaluator::MessageEvent;
use crate::models::{BOT_BODY_MAX_LEN, PlatformSession, Rule, User, truncate_chars};

/// Bound on how long a single send (SMTP or bot) is allowed to take
/// before it's treated as a failure for that channel.
const SEND_TIMEOUT: Duration = Duration::from_secs(20);

/// Abstraction over "send an HTML message to a chat id", so the
/// dispatcher doesn't depend on a concrete `teloxide::Bot` in tests.
#[async_trait]
pub trait BotSender: Send + Sync {
    async fn send_html(&self, chat_id: i64, text: &str) -> Result<(), DispatchError>;
}

#[async_trait]
impl BotSender for teloxide::Bot {
    async fn send_html(&self, chat_id: i64, text: &str) -> Result<(), DispatchError> {
        use teloxide::prelude::Requester;
        use teloxide::types::{ChatId, ParseMode};

        self.send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            .map_err(|e| DispatchError::BotSend(e.to_string()))
    }
}

pub struct Dispatcher<B: BotSender> {
    smtp: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from_email: String,
    bot: Option<B>,
}

impl<B: BotSender> Dispatcher<B> {
    /// Build the SMTP transport from configuration. Port 465 gets
    /// implicit TLS; any other port gets STARTTLS. Returns `None` for
    /// the transport when SMTP isn't configured — email delivery is
    /// then always skipped, never an error.
    pub fn new(
        smtp_server: Option<&str>,
        smtp_port: u16,
        smtp_user: Option<&str>,
        smtp_password: Option<&str>,
        from_email: Option<&str>,
        bot: Option<B>,
    ) -> anyhow::Result<Self> {
        let smtp = match (smtp_server, smtp_user, smtp_password) {
            (Some(server), Some(user), Some(password)) => {
                let creds = Credentials::new(user.to_string(), password.to_string());
                let builder = if smtp_port == 465 {
                    AsyncSmtpTransport::<Tokio1Executor>::relay(server)?
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)?
                };
                Some(builder.port(smtp_port).credentials(creds).build())
            }
            _ => None,
        };

        let from_email = from_email
            .map(String::from)
            .or_else(|| smtp_user.map(String::from))
            .unwrap_or_default();

        Ok(Self {
            smtp,
            from_email,
            bot,
        })
    }

    /// Dispatch one match across every enabled, resolvable channel.
    pub async fn dispatch(
        &self,
        rule: &Rule,
        owner: Option<&User>,
        owner_session: Option<&PlatformSession>,
        event: &MessageEvent,
        matched_trigger: &str,
    ) -> (bool, bool) {
        let from_user = event.sender_username.as_deref().unwrap_or("Unknown");
        let keyword_str = rule.keywords.join(", ");

        let mut email_ok = false;
        if rule.notify_email
            && let Some(user) = owner
            && !user.email.is_empty()
        {
            match tokio::time::timeout(
                SEND_TIMEOUT,
                self.send_email(&user.email, matched_trigger, &keyword_str, from_user, &event.body),
            )
            .await
            {
                Ok(Ok(())) => {
                    info!(to = %user.email, "email sent");
                    email_ok = true;
                }
                Ok(Err(e)) => error!(to = %user.email, error = %e, "smtp error"),
                Err(_) => error!(to = %user.email, "smtp send timed out"),
            }
        }

        let target_chat_id = owner
            .and_then(|u| u.bot_chat_id)
            .or_else(|| owner_session.and_then(|s| s.telegram_id.as_ref()?.parse::<i64>().ok()));

        let mut bot_ok = false;
        if rule.notify_bot
            && let Some(chat_id) = target_chat_id
        {
            let short_id = rule.id.to_string().chars().take(8).collect::<String>();
            let body = render_bot_message(&keyword_str, from_user, &event.body, &short_id);

            match tokio::time::timeout(SEND_TIMEOUT, self.send_bot(chat_id, &body)).await {
                Ok(Ok(())) => {
                    info!(chat_id, "bot message sent");
                    bot_ok = true;
                }
                Ok(Err(e)) => error!(chat_id, error = %e, "bot send error"),
                Err(_) => error!(chat_id, "bot send timed out"),
            }
        } else if rule.notify_bot {
            warn!(rule_id = %rule.id, "bot delivery enabled but no target chat id resolvable");
        }

        (email_ok, bot_ok)
    }

    async fn send_email(
        &self,
        to_email: &str,
        matched_trigger: &str,
        keyword_str: &str,
        from_user: &str,
        body: &str,
    ) -> Result<(), DispatchError> {
        let Some(transport) = &self.smtp else {
            return Err(DispatchError::Smtp("smtp not configured".to_string()));
        };

        let text_body = render_email_text(matched_trigger, from_user, body);
        let html_body = render_email_html(keyword_str, from_user, body);
        let subject = format!("\u{1f6a8} TeleGuard Alert: {matched_trigger}");

        let message = Message::builder()
            .from(self.from_email.parse().map_err(|e| DispatchError::Smtp(format!("{e}")))?)
            .to(to_email.parse().map_err(|e| DispatchError::Smtp(format!("{e}")))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text_body))
                    .singlepart(SinglePart::html(html_body)),
            )
            .map_err(|e| DispatchError::Smtp(format!("{e}")))?;

        transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| DispatchError::Smtp(e.to_string()))
    }

    async fn send_bot(&self, chat_id: i64, body: &str) -> Result<(), DispatchError> {
        let Some(bot) = &self.bot else {
            return Err(DispatchError::BotSend("bot not configured".to_string()));
        };
        bot.send_html(chat_id, body).await
    }
}

fn render_email_text(matched_trigger: &str, from_user: &str, body: &str) -> String {
    format!("Alert triggered by: '{matched_trigger}'\n\nSender: {from_user}\nMessage: {body}")
}

fn render_email_html(keyword_str: &str, from_user: &str, body: &str) -> String {
    format!(
        "<html>\n    <body>\n        <h2>\u{1f6a8} TeleGuard Alert Triggered</h2>\n        <p><strong>Trigger Keyword:</strong> {keyword_str}</p>\n        <p><strong>Sender:</strong> {from_user}</p>\n        <hr>\n        <h3>Message Content:</h3>\n        <blockquote style=\"background: #f9f9f9; border-left: 10px solid #ccc; margin: 1.5em 10px; padding: 0.5em 10px;\">\n            {body}\n        </blockquote>\n        <hr>\n        <p><small>Sent by TeleGuard Monitoring System</small></p>\n    </body>\n</html>"
    )
}

fn render_bot_message(keyword_str: &str, from_user: &str, body: &str, short_rule_id: &str) -> String {
    let truncated = truncate_chars(body, BOT_BODY_MAX_LEN);
    format!(
        "\u{1f6a8} <b>TeleGuard Alert</b>\n\n\u{1f511} <b>Trigger:</b> <code>{keyword_str}</code>\n\u{1f464} <b>Sender:</b> {from_user}\n\u{1f194} <b>ID:</b> <code>{short_rule_id}</code>\n\n\u{1f4dd} <b>Message:</b>\n{truncated}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct MockBot {
        sent: Mutex<Vec<(i64, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl BotSender for MockBot {
        async fn send_html(&self, chat_id: i64, text: &str) -> Result<(), DispatchError> {
            if self.fail {
                return Err(DispatchError::BotSend("mock failure".to_string()));
            }
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    fn rule() -> Rule {
        Rule {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            source_id: None,
            source_name: None,
            keywords: vec!["bitcoin".to_string()],
            excluded_keywords: vec![],
            is_regex: false,
            notify_email: false,
            notify_bot: true,
            webhook_url: None,
            is_paused: false,
            trigger_count: 0,
            created_at: Utc::now(),
        }
    }

    fn event() -> MessageEvent {
        MessageEvent {
            chat_id: 10,
            message_id: 7,
            sender_id: Some(1),
            sender_username: Some("alice".to_string()),
            outgoing: false,
            body: "Buying Bitcoin now".to_string(),
        }
    }

    #[tokio::test]
    async fn bot_dispatch_uses_owner_bot_chat_id() {
        let dispatcher = Dispatcher::new(None, 587, None, None, None, Some(MockBot::default())).unwrap();
        let user = User {
            id: Uuid::new_v4(),
            email: String::new(),
            hashed_password: String::new(),
            full_name: None,
            role: "user".to_string(),
            bot_chat_id: Some(4242),
            is_verified: true,
            created_at: Utc::now(),
        };

        let (email_ok, bot_ok) = dispatcher
            .dispatch(&rule(), Some(&user), None, &event(), "bitcoin")
            .await;

        assert!(!email_ok);
        assert!(bot_ok);
        let sent = dispatcher.bot.as_ref().unwrap().sent.lock().unwrap();
        assert_eq!(sent[0].0, 4242);
    }

    #[tokio::test]
    async fn bot_dispatch_falls_back_to_session_telegram_id() {
        let dispatcher = Dispatcher::new(None, 587, None, None, None, Some(MockBot::default())).unwrap();
        let session = PlatformSession {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_string: "opaque".to_string(),
            phone_number: None,
            telegram_id: Some("555".to_string()),
            is_active: true,
            created_at: Utc::now(),
        };

        let (_, bot_ok) = dispatcher
            .dispatch(&rule(), None, Some(&session), &event(), "bitcoin")
            .await;

        assert!(bot_ok);
        let sent = dispatcher.bot.as_ref().unwrap().sent.lock().unwrap();
        assert_eq!(sent[0].0, 555);
    }

    #[tokio::test]
    async fn bot_dispatch_skipped_without_target() {
        let dispatcher = Dispatcher::new(None, 587, None, None, None, Some(MockBot::default())).unwrap();
        let (email_ok, bot_ok) = dispatcher
            .dispatch(&rule(), None, None, &event(), "bitcoin")
            .await;

        assert!(!email_ok);
        assert!(!bot_ok);
    }

    #[tokio::test]
    async fn bot_send_failure_reports_false_without_panicking() {
        let dispatcher = Dispatcher::new(
            None,
            587,
            None,
            None,
            None,
            Some(MockBot {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }),
        )
        .unwrap();
        let user = User {
            id: Uuid::new_v4(),
            email: String::new(),
            hashed_password: String::new(),
            full_name: None,
            role: "user".to_string(),
            bot_chat_id: Some(1),
            is_verified: true,
            created_at: Utc::now(),
        };

        let (_, bot_ok) = dispatcher
            .dispatch(&rule(), Some(&user), None, &event(), "bitcoin")
            .await;
        assert!(!bot_ok);
    }

    #[test]
    fn email_html_renders_alert_emoji_and_fields() {
        let html = render_email_html("bitcoin, airdrop", "alice", "Buying Bitcoin now");
        assert!(html.contains("\u{1f6a8} TeleGuard Alert Triggered"));
        assert!(!html.contains("\\u{1f6a8}"));
        assert!(html.contains("bitcoin, airdrop"));
        assert!(html.contains("alice"));
        assert!(html.contains("Buying Bitcoin now"));
    }

    #[test]
    fn bot_message_truncates_body() {
        let long_body = "x".repeat(5_000);
        let rendered = render_bot_message("bitcoin", "alice", &long_body, "abcd1234");
        // truncated to BOT_BODY_MAX_LEN chars + surrounding template text
        let body_len = rendered.matches('x').count();
        assert_eq!(body_len, BOT_BODY_MAX_LEN);
    }
}

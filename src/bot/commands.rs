//! Control-Bot Command Surface (C5): `/start /add /list /del` over the
//! same bot token used for outbound alert delivery.

use std::sync::Arc;

use parking_lot::Mutex;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{Database, NewRule};
use crate::error::CommandError;
use crate::models::User;

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "TeleGuard commands:")]
enum Command {
    #[command(description = "link your account to this chat")]
    Start,
    #[command(description = "/add <keyword> [@handle] [-email] [-bot]")]
    Add(String),
    #[command(description = "list your active alerts")]
    List,
    #[command(description = "/del <id-prefix>")]
    Del(String),
}

/// Fetch and cache the bot's own platform user id, used by the
/// Evaluator's self-message suppression (§4.3).
pub async fn fetch_bot_id(bot: &Bot) -> Option<i64> {
    match bot.get_me().await {
        Ok(me) => Some(me.id.0 as i64),
        Err(e) => {
            warn!(error = %e, "failed to fetch bot identity; self-suppression falls back to textual marker");
            None
        }
    }
}

/// Run the command dispatcher until the process shuts down. Consumes
/// the bot's long-poll connection — there is exactly one of these per
/// process, shared with C2's outbound sends.
pub async fn run(bot: Bot, db: Arc<Database>, _bot_id: Arc<Mutex<Option<i64>>>) {
    let handler = Update::filter_message().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let db = db.clone();
            async move {
                if let Err(e) = handle(&bot, &msg, cmd, &db).await {
                    let _ = bot
                        .send_message(msg.chat.id, e.reply_text())
                        .parse_mode(ParseMode::Html)
                        .await;
                }
                respond(())
            }
        },
    );

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle(bot: &Bot, msg: &Message, cmd: Command, db: &Database) -> Result<(), CommandError> {
    let chat_id = msg.chat.id.0;
    let sender_id = msg.from.as_ref().map(|u| u.id.0.to_string());

    match cmd {
        Command::Start => {
            let caller = resolve_caller(db, sender_id.as_deref(), chat_id).await?;
            db.users().set_bot_chat_id(caller.id, chat_id).await?;
            info!(user_id = %caller.id, "linked bot chat");
            reply(
                bot,
                msg,
                "\u{2705} Linked. Use <code>/add &lt;keyword&gt; [@chat] [-email] [-bot]</code> to create an alert.",
            )
            .await;
        }
        Command::Add(args) => {
            let caller = resolve_caller(db, sender_id.as_deref(), chat_id).await?;
            let rule_id = handle_add(db, &caller, &args).await?;
            reply(bot, msg, &format!("\u{2705} Alert created: <code>{rule_id}</code>")).await;
        }
        Command::List => {
            let caller = resolve_caller(db, sender_id.as_deref(), chat_id).await?;
            let rules = db.rules().list_for_user(caller.id, true).await?;
            if rules.is_empty() {
                reply(bot, msg, "No active alerts.").await;
            } else {
                let lines: Vec<String> = rules
                    .iter()
                    .map(|r| {
                        let short_id: String = r.id.to_string().chars().take(8).collect();
                        format!("<code>{short_id}</code> — {}", r.keywords.join(", "))
                    })
                    .collect();
                reply(bot, msg, &lines.join("\n")).await;
            }
        }
        Command::Del(prefix) => {
            let caller = resolve_caller(db, sender_id.as_deref(), chat_id).await?;
            let prefix = prefix.trim();
            let rule = db
                .rules()
                .find_by_id_prefix(caller.id, prefix)
                .await?
                .ok_or_else(|| CommandError::RuleNotFound(prefix.to_string()))?;
            db.rules().delete_cascade(rule.id).await?;
            reply(bot, msg, "\u{1f5d1} Alert deleted.").await;
        }
    }

    Ok(())
}

/// `/start`, `/add`, `/list`, `/del` all require a linked caller:
/// resolved first by matching platform sender id against an active
/// session, then by `bot_chat_id` on this very chat.
async fn resolve_caller(db: &Database, sender_id: Option<&str>, chat_id: i64) -> Result<User, CommandError> {
    if let Some(sender_id) = sender_id
        && let Some(user) = db.users().find_by_platform_sender_id(sender_id).await?
    {
        return Ok(user);
    }
    db.users()
        .find_by_bot_chat_id(chat_id)
        .await?
        .ok_or(CommandError::Unlinked)
}

/// Tokenizes `<keyword> [@handle] [-email] [-bot]`: leading `-` tokens
/// are flags, everything else is positional. First positional is the
/// keyword; a second positional starting with `@` targets a synced
/// chat by handle.
async fn handle_add(db: &Database, caller: &User, args: &str) -> Result<Uuid, CommandError> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let mut positional = Vec::new();
    let mut flags = Vec::new();
    for tok in tokens {
        if let Some(flag) = tok.strip_prefix('-') {
            flags.push(flag.to_ascii_lowercase());
        } else {
            positional.push(tok);
        }
    }

    let keyword = positional.first().ok_or(CommandError::MissingKeyword)?.to_string();

    let (source_id, source_name) = match positional.get(1) {
        Some(handle) if handle.starts_with('@') => {
            let handle = handle.trim_start_matches('@');
            let chat = db
                .chats()
                .find_by_username(caller.id, handle)
                .await?
                .ok_or_else(|| CommandError::HandleNotFound(handle.to_string()))?;
            (Some(chat.id), Some(chat.title))
        }
        _ => (None, None),
    };

    let (notify_email, notify_bot) = if flags.is_empty() {
        (true, true)
    } else {
        (flags.contains(&"email".to_string()), flags.contains(&"bot".to_string()))
    };

    let rule = db
        .rules()
        .create(NewRule {
            user_id: caller.id,
            source_id,
            source_name,
            keywords: vec![keyword],
            excluded_keywords: vec![],
            is_regex: false,
            notify_email,
            notify_bot,
        })
        .await?;

    Ok(rule.id)
}

async fn reply(bot: &Bot, msg: &Message, text: &str) {
    if let Err(e) = bot.send_message(msg.chat.id, text).parse_mode(ParseMode::Html).await {
        error!(error = %e, "failed to send bot reply");
    }
}

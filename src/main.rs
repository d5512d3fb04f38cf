//! TeleGuard worker entrypoint: wires the Storage Gateway, Alert
//! Evaluator, Notification Dispatcher, Session Supervisor, and
//! Control-Bot Command Surface together and runs until SIGINT.

mod bot;
mod config;
mod db;
mod dispatcher;
mod error;
mod evaluator;
mod models;
mod telegram;

use std::sync::Arc;

use parking_lot::Mutex;
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::db::Database;
use crate::dispatcher::Dispatcher;
use crate::evaluator::Evaluator;
use crate::telegram::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    let db = Arc::new(Database::connect(&config.database_url).await?);
    let evaluator = Arc::new(Evaluator::new());

    let bot = config.bot_token.as_ref().map(|token| Bot::new(token.clone()));
    let bot_id = Arc::new(Mutex::new(None));
    if let Some(bot) = &bot {
        *bot_id.lock() = bot::commands::fetch_bot_id(bot).await;
    }

    let dispatcher = Arc::new(Dispatcher::new(
        config.smtp_server.as_deref(),
        config.smtp_port,
        config.smtp_user.as_deref(),
        config.smtp_password.as_deref(),
        config.emails_from_email.as_deref(),
        bot.clone(),
    )?);

    let (supervisor, shutdown_rx) = Supervisor::new(
        db.clone(),
        evaluator.clone(),
        dispatcher.clone(),
        bot_id.clone(),
        config.telegram_api_id,
        config.telegram_api_hash.clone(),
    );
    let supervisor = Arc::new(supervisor);
    let shutdown_tx = supervisor.shutdown_handle();

    let sup = supervisor.clone();
    let supervisor_handle = tokio::spawn(async move { sup.run(shutdown_rx).await });

    let bot_handle = bot.map(|bot| tokio::spawn(bot::commands::run(bot, db.clone(), bot_id.clone())));

    info!("teleguard-worker started");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, disconnecting clients");

    let _ = shutdown_tx.send(true);
    supervisor_handle.await?;
    if let Some(handle) = bot_handle {
        handle.abort();
    }

    info!("teleguard-worker stopped");
    Ok(())
}

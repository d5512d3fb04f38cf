//! Session Supervisor (C4): owns the lifecycle of one upstream client
//! per user and routes inbound events into the Evaluator and Dispatcher.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use grammers_client::Update;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{AuditEntry, Database};
use crate::dispatcher::{BotSender, Dispatcher};
use crate::error::TelegramError;
use crate::evaluator::{Evaluator, MessageEvent};
use crate::telegram::client::PlatformClient;

const TICK_INTERVAL: Duration = Duration::from_secs(5);
const CHAT_SYNC_LIMIT: usize = 50;

/// Per-user client state. `Absent` is represented by the key's absence
/// from the map rather than as a variant.
enum ClientState {
    Initializing,
    Running,
}

pub struct Supervisor<B: BotSender + 'static> {
    db: Arc<Database>,
    evaluator: Arc<Evaluator>,
    dispatcher: Arc<Dispatcher<B>>,
    active: Arc<DashMap<Uuid, ClientState>>,
    clients: Arc<DashMap<Uuid, Arc<PlatformClient>>>,
    bot_id: Arc<SyncMutex<Option<i64>>>,
    api_id: i32,
    api_hash: String,
    shutdown: watch::Sender<bool>,
}

impl<B: BotSender + 'static> Supervisor<B> {
    pub fn new(
        db: Arc<Database>,
        evaluator: Arc<Evaluator>,
        dispatcher: Arc<Dispatcher<B>>,
        bot_id: Arc<SyncMutex<Option<i64>>>,
        api_id: i32,
        api_hash: String,
    ) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                db,
                evaluator,
                dispatcher,
                active: Arc::new(DashMap::new()),
                clients: Arc::new(DashMap::new()),
                bot_id,
                api_id,
                api_hash,
                shutdown: tx,
            },
            rx,
        )
    }

    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Run the 5-second supervision loop until shutdown is signalled.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        self.disconnect_all().await;
    }

    async fn tick(&self) {
        let sessions = match self.db.sessions().list_active().await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to list active sessions");
                return;
            }
        };

        for session in sessions {
            let user_id = session.user_id;
            let entry = self.active.get(&user_id).map(|e| matches!(*e, ClientState::Running));

            match entry {
                None => {
                    self.active.insert(user_id, ClientState::Initializing);
                    let session_id = session.id;
                    let session_string = session.session_string.clone();
                    self.spawn_client(user_id, session_id, session_string).await;
                }
                Some(true) => self.check_liveness(user_id, session.id).await,
                Some(false) => {} // Initializing: next tick recreates if it failed
            }
        }
    }

    async fn spawn_client(&self, user_id: Uuid, session_id: Uuid, session_string: String) {
        let client = match PlatformClient::connect(&session_string, self.api_id, &self.api_hash).await {
            Ok(c) => c,
            Err(e) => {
                warn!(%user_id, error = %e, "failed to connect upstream client");
                self.deactivate(user_id, session_id, &e).await;
                return;
            }
        };

        match client.is_authorized().await {
            Ok(true) => {}
            Ok(false) => {
                warn!(%user_id, "session not authorized");
                self.deactivate(user_id, session_id, &TelegramError::NotAuthorized).await;
                return;
            }
            Err(e) => {
                warn!(%user_id, error = %e, "authorization check failed");
                self.deactivate(user_id, session_id, &e).await;
                return;
            }
        }

        let client = Arc::new(client);
        self.clients.insert(user_id, client.clone());
        self.active.insert(user_id, ClientState::Running);
        info!(%user_id, "upstream client running");

        self.sync_chats(user_id, &client);
        self.spawn_event_loop(user_id, session_id, client);
    }

    fn sync_chats(&self, user_id: Uuid, client: &Arc<PlatformClient>) {
        let client = client.clone();
        let db = self.db.clone();
        tokio::spawn(async move {
            let chats = match client.top_dialogs(CHAT_SYNC_LIMIT).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(%user_id, error = %e, "chat sync failed");
                    return;
                }
            };
            if let Err(e) = db.chats().replace_all(user_id, chats).await {
                warn!(%user_id, error = %e, "chat sync persist failed");
            }
        });
    }

    fn spawn_event_loop(&self, user_id: Uuid, session_id: Uuid, client: Arc<PlatformClient>) {
        let db = self.db.clone();
        let evaluator = self.evaluator.clone();
        let dispatcher = self.dispatcher.clone();
        let bot_id = self.bot_id.clone();
        let active = self.active.clone();
        let clients = self.clients.clone();

        tokio::spawn(async move {
            loop {
                let update = match client.next_update().await {
                    Ok(Some(u)) => u,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%user_id, error = %e, "event stream error");
                        break;
                    }
                };

                let Update::NewMessage(message) = update else {
                    continue;
                };

                let event = MessageEvent {
                    chat_id: message.chat().id(),
                    message_id: message.id(),
                    sender_id: message.sender().map(|c| c.id()),
                    sender_username: message.sender().and_then(|c| c.username().map(str::to_string)),
                    outgoing: message.outgoing(),
                    body: message.text().to_string(),
                };

                let rules = match db.rules().get_active_for_user(user_id).await {
                    Ok(r) => r,
                    Err(e) => {
                        error!(%user_id, error = %e, "failed to load rules");
                        continue;
                    }
                };

                let matches = evaluator.evaluate(&event, &rules, *bot_id.lock());
                for m in matches {
                    let db = db.clone();
                    let dispatcher = dispatcher.clone();
                    let event = event.clone();
                    tokio::spawn(async move {
                        let owner = db.users().get(m.rule.user_id).await.ok().flatten();
                        let owner_session = db.sessions().get_active_for_user(m.rule.user_id).await.ok().flatten();
                        let (email_ok, bot_ok) = dispatcher
                            .dispatch(&m.rule, owner.as_ref(), owner_session.as_ref(), &event, &m.matched_trigger)
                            .await;

                        if let Err(e) = db.rules().increment_trigger_count(m.rule.id).await {
                            error!(rule_id = %m.rule.id, error = %e, "failed to increment trigger count");
                        }

                        let entry = AuditEntry {
                            rule_id: Some(m.rule.id),
                            user_id: Some(m.rule.user_id),
                            message_content: event.body.clone(),
                            detected_keyword: m.matched_trigger.clone(),
                            dispatched_to_email: email_ok,
                            dispatched_to_bot: bot_ok,
                        };
                        if let Err(e) = db.audit().append(entry).await {
                            error!(rule_id = %m.rule.id, error = %e, "failed to append audit log");
                        }
                    });
                }
            }

            active.remove(&user_id);
            clients.remove(&user_id);
            let _ = session_id; // retained for future per-session diagnostics
        });
    }

    async fn check_liveness(&self, user_id: Uuid, session_id: Uuid) {
        let Some(client) = self.clients.get(&user_id).map(|c| c.clone()) else {
            return;
        };

        if client.whoami().await.is_ok() {
            return;
        }

        warn!(%user_id, "liveness check failed, reconnecting");
        self.active.remove(&user_id);
        self.clients.remove(&user_id);

        let session_string = match self.db.sessions().get_active_for_user(user_id).await {
            Ok(Some(s)) => s.session_string,
            _ => return,
        };

        self.active.insert(user_id, ClientState::Initializing);
        self.spawn_client(user_id, session_id, session_string).await;
    }

    async fn deactivate(&self, user_id: Uuid, session_id: Uuid, reason: &TelegramError) {
        warn!(%user_id, error = %reason, "deactivating session");
        if let Err(e) = self.db.sessions().mark_inactive(session_id).await {
            error!(%user_id, error = %e, "failed to mark session inactive");
        }
        self.active.remove(&user_id);
        self.clients.remove(&user_id);
    }

    async fn disconnect_all(&self) {
        let ids: Vec<Uuid> = self.clients.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, client)) = self.clients.remove(&id)
                && let Ok(client) = Arc::try_unwrap(client)
            {
                client.disconnect().await;
            }
        }
        self.active.clear();
    }
}

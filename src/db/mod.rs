//! Storage Gateway (C1): typed read/write access to users, rules,
//! sessions, synced chats, and the audit log.
//!
//! Every operation returns a value/`None` or fails with [`StorageError`];
//! transient failures are logged by the caller and retried on the next
//! supervisor tick rather than treated as fatal.

mod audit;
mod chats;
mod rules;
mod sessions;
mod users;

pub use audit::{AuditEntry, AuditRepository};
pub use chats::{ChatRepository, NewSyncedChat};
pub use rules::{NewRule, RuleRepository};
pub use sessions::SessionRepository;
pub use users::UserRepository;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

use crate::error::StorageError;

/// Database handle with a pooled connection, shared (cheaply cloned) by
/// every component that talks to storage.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connection acquire timeout — prevents a connection storm (e.g. a
    /// burst of per-user dispatches) from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can sit idle before being recycled.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connect and run embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .idle_timeout(Some(Self::IDLE_TIMEOUT))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        info!("database connected");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("migrations applied");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    pub fn sessions(&self) -> SessionRepository<'_> {
        SessionRepository::new(&self.pool)
    }

    pub fn rules(&self) -> RuleRepository<'_> {
        RuleRepository::new(&self.pool)
    }

    pub fn audit(&self) -> AuditRepository<'_> {
        AuditRepository::new(&self.pool)
    }

    pub fn chats(&self) -> ChatRepository<'_> {
        ChatRepository::new(&self.pool)
    }
}

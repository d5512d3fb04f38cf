//! Rule (Alert) repository. Owns the invariant that a paused rule never
//! appears in `get_active_for_user`, and the cascading delete that
//! removes a rule's audit rows before the rule itself (the database is
//! not assumed to cascade — the core does it explicitly, in one
//! transaction).

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::Rule;

/// Arguments for creating a new rule; mirrors what the control-bot's
/// `/add` command and (out of scope) the HTTP API both need to supply.
pub struct NewRule {
    pub user_id: Uuid,
    pub source_id: Option<i64>,
    pub source_name: Option<String>,
    pub keywords: Vec<String>,
    pub excluded_keywords: Vec<String>,
    pub is_regex: bool,
    pub notify_email: bool,
    pub notify_bot: bool,
}

pub struct RuleRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RuleRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Active (non-paused) rules for a user, in creation order — the
    /// order the Evaluator iterates them in.
    pub async fn get_active_for_user(&self, user_id: Uuid) -> Result<Vec<Rule>, StorageError> {
        let rules = sqlx::query_as::<_, Rule>(
            "SELECT * FROM alerts WHERE user_id = $1 AND is_paused = FALSE ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rules)
    }

    /// All rules for a user, optionally filtered to non-paused only
    /// (used by the control-bot's `/list`, which always passes `true`,
    /// and reserved for dashboard-style listing that wants everything).
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<Rule>, StorageError> {
        let rules = if active_only {
            self.get_active_for_user(user_id).await?
        } else {
            sqlx::query_as::<_, Rule>(
                "SELECT * FROM alerts WHERE user_id = $1 ORDER BY created_at ASC",
            )
            .bind(user_id)
            .fetch_all(self.pool)
            .await?
        };
        Ok(rules)
    }

    pub async fn find_by_id_prefix(
        &self,
        user_id: Uuid,
        prefix: &str,
    ) -> Result<Option<Rule>, StorageError> {
        let rules = sqlx::query_as::<_, Rule>(
            "SELECT * FROM alerts WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        let prefix_lower = prefix.to_ascii_lowercase();
        Ok(rules
            .into_iter()
            .find(|r| r.id.to_string().starts_with(&prefix_lower)))
    }

    pub async fn create(&self, new_rule: NewRule) -> Result<Rule, StorageError> {
        let id = Uuid::new_v4();
        let rule = sqlx::query_as::<_, Rule>(
            r#"
            INSERT INTO alerts (
                id, user_id, source_id, source_name, keywords, excluded_keywords,
                is_regex, notify_email, notify_bot, webhook_url, is_paused, trigger_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL, FALSE, 0)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(new_rule.user_id)
        .bind(new_rule.source_id)
        .bind(new_rule.source_name)
        .bind(&new_rule.keywords)
        .bind(&new_rule.excluded_keywords)
        .bind(new_rule.is_regex)
        .bind(new_rule.notify_email)
        .bind(new_rule.notify_bot)
        .fetch_one(self.pool)
        .await?;
        Ok(rule)
    }

    /// Increment `trigger_count` by exactly one. Called once per match,
    /// never per successful delivery channel (see SPEC_FULL.md §9 open
    /// question 1 — the original source double-increments; this does
    /// not).
    pub async fn increment_trigger_count(&self, rule_id: Uuid) -> Result<(), StorageError> {
        sqlx::query("UPDATE alerts SET trigger_count = trigger_count + 1 WHERE id = $1")
            .bind(rule_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Delete a rule and its audit rows in one transaction (audit rows
    /// first, per the cascade-is-explicit design note).
    pub async fn delete_cascade(&self, rule_id: Uuid) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM alert_logs WHERE alert_id = $1")
            .bind(rule_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM alerts WHERE id = $1")
            .bind(rule_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

//! Environment-driven configuration.
//!
//! Loaded once at startup via `dotenvy` + `std::env`, mirroring the
//! `MiraConfig::from_env()` style: every recognized variable gets a typed
//! field and a clear error if a required one is missing or fails to parse.

use anyhow::{Context, Result};

/// Worker configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub secret_key: String,
    /// Read for presence/validation only — the API process, not this
    /// worker, consumes the expiry value.
    pub access_token_expire_minutes: u32,

    pub telegram_api_id: i32,
    pub telegram_api_hash: String,
    pub bot_token: Option<String>,

    pub smtp_server: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub emails_from_email: Option<String>,

    pub invite: Option<String>,
}

impl Config {
    /// Load configuration from the process environment, sourcing a
    /// `.env` file first if one is present (missing `.env` is not an
    /// error — production deployments set the environment directly).
    pub fn load() -> Result<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(err).context("failed to load .env file");
            }
        }

        Ok(Self {
            database_url: require_env("DATABASE_URL")?,
            secret_key: require_env("SECRET_KEY")?,
            access_token_expire_minutes: env_parsed_or("ACCESS_TOKEN_EXPIRE_MINUTES", 30)?,

            telegram_api_id: require_env_parsed("TELEGRAM_API_ID")?,
            telegram_api_hash: require_env("TELEGRAM_API_HASH")?,
            bot_token: optional_env("BOT_TOKEN"),

            smtp_server: optional_env("SMTP_SERVER"),
            smtp_port: env_parsed_or("SMTP_PORT", 587)?,
            smtp_user: optional_env("SMTP_USER"),
            smtp_password: optional_env("SMTP_PASSWORD"),
            emails_from_email: optional_env("EMAILS_FROM_EMAIL"),

            invite: optional_env("INVITE"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional_env(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok())
}

fn require_env_parsed<T>(key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display + Send + Sync + 'static,
{
    let raw = require_env(key)?;
    parse_value(key, &raw)
}

fn env_parsed_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Pure parsing step shared by `require_env_parsed`/`env_parsed_or`,
/// factored out so it can be exercised with an injected string instead
/// of a real environment variable (mutating process env from tests is
/// unsound in the presence of concurrent test threads and requires
/// `unsafe` as of Rust 1.82, which this workspace forbids).
fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("failed to parse {key}={raw:?}: {e}"))
}

/// Pure form of `optional_env`'s empty-string-as-absent rule, exercised
/// directly in tests instead of `optional_env` itself.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_parses_valid_input() {
        let port: u16 = parse_value("TEST_PORT", "465").unwrap();
        assert_eq!(port, 465);
    }

    #[test]
    fn parse_value_reports_key_on_failure() {
        let err = parse_value::<u16>("TEST_PORT", "not-a-number").unwrap_err();
        assert!(err.to_string().contains("TEST_PORT"));
    }

    #[test]
    fn non_empty_treats_empty_string_as_absent() {
        assert_eq!(non_empty(Some(String::new())), None);
    }

    #[test]
    fn non_empty_keeps_non_empty_string() {
        assert_eq!(non_empty(Some("value".to_string())), Some("value".to_string()));
    }

    #[test]
    fn non_empty_passes_through_missing() {
        assert_eq!(non_empty(None), None);
    }
}

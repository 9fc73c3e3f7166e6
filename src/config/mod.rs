//! Configuration loading for the clinic sync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `CLINIC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{TenantId, TenantIdError};

const ENV_PREFIX: &str = "CLINIC_";
const REDACTED: &str = "[REDACTED]";

/// Profiles that may run without any session token.
const DEVELOPMENT_PROFILES: [&str; 2] = ["local", "test"];

/// A bearer token accepted by the dashboard API and the tenant it acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub tenant: TenantId,
}

/// Application configuration derived from `CLINIC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_webhook_bind_addr")]
    pub webhook_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_tokens: Vec<SessionToken>,
    #[serde(default = "default_webhook_max_body_kb")]
    pub webhook_max_body_kb: usize,
    #[serde(default = "default_relay_poll_interval_ms")]
    pub relay_poll_interval_ms: u64,
    #[serde(default = "default_relay_channel_capacity")]
    pub relay_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            webhook_bind_addr: default_webhook_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            session_tokens: Vec::new(),
            webhook_max_body_kb: default_webhook_max_body_kb(),
            relay_poll_interval_ms: default_relay_poll_interval_ms(),
            relay_channel_capacity: default_relay_channel_capacity(),
        }
    }
}

impl AppConfig {
    /// Returns the dashboard API bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_bind_addr(&self.api_bind_addr)
    }

    /// Returns the standalone webhook server bind address.
    pub fn webhook_bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_bind_addr(&self.webhook_bind_addr)
    }

    pub fn is_local(&self) -> bool {
        self.profile == "local"
    }

    pub fn webhook_max_body_bytes(&self) -> usize {
        self.webhook_max_body_kb.saturating_mul(1024)
    }

    pub fn relay_poll_interval(&self) -> Duration {
        Duration::from_millis(self.relay_poll_interval_ms)
    }

    /// Returns a redacted JSON representation (session tokens are hidden).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        for session in &mut config.session_tokens {
            session.token = REDACTED.to_string();
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        self.webhook_bind_addr()?;

        if !DEVELOPMENT_PROFILES.contains(&self.profile.as_str()) && self.session_tokens.is_empty()
        {
            return Err(ConfigError::MissingSessionTokens {
                profile: self.profile.clone(),
            });
        }

        if self.webhook_max_body_kb == 0 {
            return Err(ConfigError::InvalidWebhookBodyLimit {
                value: self.webhook_max_body_kb,
            });
        }

        if !(50..=60_000).contains(&self.relay_poll_interval_ms) {
            return Err(ConfigError::InvalidRelayPollInterval {
                value: self.relay_poll_interval_ms,
            });
        }

        if self.relay_channel_capacity == 0 {
            return Err(ConfigError::InvalidRelayChannelCapacity {
                value: self.relay_channel_capacity,
            });
        }

        Ok(())
    }
}

fn parse_bind_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::InvalidBindAddr {
            value: value.to_string(),
            source,
        })
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_webhook_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://clinic-sync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_webhook_max_body_kb() -> usize {
    1024
}

fn default_relay_poll_interval_ms() -> u64 {
    1000
}

fn default_relay_channel_capacity() -> usize {
    256
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value '{value}' for CLINIC_{key}")]
    InvalidNumber { key: String, value: String },
    #[error("no session tokens configured for profile '{profile}'; set CLINIC_SESSION_TOKENS")]
    MissingSessionTokens { profile: String },
    #[error("session token entry '{entry}' must look like token:tenant")]
    InvalidSessionToken { entry: String },
    #[error("session token tenant '{tenant}' is invalid: {source}")]
    InvalidSessionTenant {
        tenant: String,
        source: TenantIdError,
    },
    #[error("webhook body limit must be positive, got {value} KiB")]
    InvalidWebhookBodyLimit { value: usize },
    #[error("relay poll interval must be between 50 and 60000 ms, got {value}")]
    InvalidRelayPollInterval { value: u64 },
    #[error("relay channel capacity must be positive, got {value}")]
    InvalidRelayChannelCapacity { value: usize },
}

/// Parses `token:tenant[,token:tenant...]`.
fn parse_session_tokens(raw: &str) -> Result<Vec<SessionToken>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, tenant) = entry
                .split_once(':')
                .map(|(token, tenant)| (token.trim(), tenant.trim()))
                .filter(|(token, _)| !token.is_empty())
                .ok_or_else(|| ConfigError::InvalidSessionToken {
                    entry: entry.to_string(),
                })?;
            let tenant = TenantId::parse(tenant).map_err(|source| {
                ConfigError::InvalidSessionTenant {
                    tenant: tenant.to_string(),
                    source,
                }
            })?;
            Ok(SessionToken {
                token: token.to_string(),
                tenant,
            })
        })
        .collect()
}

/// Loads configuration using layered `.env` files and `CLINIC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut text = |key: &str, default: fn() -> String| {
            layered
                .remove(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default)
        };

        let profile = text("PROFILE", String::new);
        let profile = if profile.is_empty() {
            profile_hint
        } else {
            profile
        };
        let api_bind_addr = text("API_BIND_ADDR", default_api_bind_addr);
        let webhook_bind_addr = text("WEBHOOK_BIND_ADDR", default_webhook_bind_addr);
        let log_level = text("LOG_LEVEL", default_log_level);
        let log_format = text("LOG_FORMAT", default_log_format);
        let database_url = text("DATABASE_URL", default_database_url);

        let session_tokens = match layered.remove("SESSION_TOKENS") {
            Some(raw) => parse_session_tokens(&raw)?,
            None => Vec::new(),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            webhook_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections: number(
                &mut layered,
                "DB_MAX_CONNECTIONS",
                default_db_max_connections,
            )?,
            db_acquire_timeout_ms: number(
                &mut layered,
                "DB_ACQUIRE_TIMEOUT_MS",
                default_db_acquire_timeout_ms,
            )?,
            session_tokens,
            webhook_max_body_kb: number(
                &mut layered,
                "WEBHOOK_MAX_BODY_KB",
                default_webhook_max_body_kb,
            )?,
            relay_poll_interval_ms: number(
                &mut layered,
                "RELAY_POLL_INTERVAL_MS",
                default_relay_poll_interval_ms,
            )?,
            relay_channel_capacity: number(
                &mut layered,
                "RELAY_CHANNEL_CAPACITY",
                default_relay_channel_capacity,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("CLINIC_PROFILE")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn number<T: FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: fn() -> T,
) -> Result<T, ConfigError> {
    match layered.remove(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber {
                key: key.to_string(),
                value: raw,
            }),
        None => Ok(default()),
    }
}

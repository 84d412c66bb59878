use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Environment variable selecting the active profile.
pub const PROFILE_VAR: &str = "SQLRELAY_PROFILE";

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub store: StoreConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SQLRELAY_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or(PROFILE_VAR, "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            store: StoreConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  store:       mysql://{}:{}@{}:{}/{}",
            self.store.user,
            self.store.redacted_password(),
            self.store.host,
            self.store.port,
            self.store.database
        );
        tracing::info!("  timeout:     connect={:?}", self.store.connect_timeout);
    }
}

// ── Backing store (MySQL) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Upper bound on establishing the startup connection.
    pub connect_timeout: Duration,
}

impl StoreConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 3306;
    pub const DEFAULT_USER: &'static str = "root";
    pub const DEFAULT_DATABASE: &'static str = "test";
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "MYSQL_HOST", Self::DEFAULT_HOST),
            port: profiled_env_u16(p, "MYSQL_PORT", Self::DEFAULT_PORT),
            user: profiled_env_or(p, "MYSQL_USER", Self::DEFAULT_USER),
            password: profiled_env_or(p, "MYSQL_PASSWORD", ""),
            database: profiled_env_or(p, "MYSQL_DATABASE", Self::DEFAULT_DATABASE),
            connect_timeout: Duration::from_secs(profiled_env_u64(
                p,
                "MYSQL_CONNECT_TIMEOUT_SECS",
                Self::DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
        }
    }

    fn redacted_password(&self) -> &'static str {
        if self.password.is_empty() { "" } else { "***" }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
            user: Self::DEFAULT_USER.to_string(),
            password: String::new(),
            database: Self::DEFAULT_DATABASE.to_string(),
            connect_timeout: Duration::from_secs(Self::DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

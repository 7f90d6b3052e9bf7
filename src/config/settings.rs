//! Process settings from the environment (after `.env` is loaded).

use crate::error::ConfigError;
use crate::resource::UnresolvedIds;

#[derive(Clone, Debug)]
pub struct Settings {
    /// PostgreSQL connection string; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub config_path: String,
    pub bind_addr: String,
    pub unresolved_ids: UnresolvedIds,
    pub body_limit_bytes: usize,
    pub max_connections: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: None,
            config_path: "sample".into(),
            bind_addr: "0.0.0.0:3000".into(),
            unresolved_ids: UnresolvedIds::Ignore,
            body_limit_bytes: 1024 * 1024,
            max_connections: 5,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Settings::default();
        s.database_url = lookup("DATABASE_URL").filter(|v| !v.is_empty());
        if let Some(v) = lookup("CONFIG_PATH") {
            s.config_path = v;
        }
        if let Some(v) = lookup("BIND_ADDR") {
            s.bind_addr = v;
        }
        if let Some(v) = lookup("UNRESOLVED_IDS") {
            s.unresolved_ids = v.parse()?;
        }
        if let Some(v) = lookup("BODY_LIMIT_BYTES") {
            s.body_limit_bytes = v
                .parse()
                .map_err(|_| ConfigError::Validation(format!("BODY_LIMIT_BYTES: invalid number {}", v)))?;
        }
        if let Some(v) = lookup("MAX_CONNECTIONS") {
            s.max_connections = v
                .parse()
                .map_err(|_| ConfigError::Validation(format!("MAX_CONNECTIONS: invalid number {}", v)))?;
        }
        Ok(s)
    }
}

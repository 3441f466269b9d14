//! Runtime configuration, read from the environment.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),

    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Connection pool settings for the Postgres backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WmsConfig {
    /// `None` selects the in-memory backend.
    pub database: Option<DatabaseConfig>,
}

impl WmsConfig {
    pub const DEFAULT_MIN_CONNECTIONS: u32 = 5;
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;
    pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 60;

    pub fn in_memory() -> Self {
        Self { database: None }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let use_persistent = match lookup("USE_PERSISTENT_STORES") {
            Some(raw) => parse::<bool>("USE_PERSISTENT_STORES", &raw)?,
            None => false,
        };
        if !use_persistent {
            return Ok(Self::in_memory());
        }

        let url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let min_connections = optional(&lookup, "DB_MIN_CONNECTIONS", Self::DEFAULT_MIN_CONNECTIONS)?;
        let max_connections = optional(&lookup, "DB_MAX_CONNECTIONS", Self::DEFAULT_MAX_CONNECTIONS)?;
        let timeout_secs = optional(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", Self::DEFAULT_ACQUIRE_TIMEOUT_SECS)?;

        if max_connections == 0 || min_connections > max_connections {
            return Err(ConfigError::Invalid {
                name: "DB_MAX_CONNECTIONS",
                value: max_connections.to_string(),
                reason: format!("must be at least 1 and >= DB_MIN_CONNECTIONS ({min_connections})"),
            });
        }

        Ok(Self {
            database: Some(DatabaseConfig {
                url,
                min_connections,
                max_connections,
                acquire_timeout: Duration::from_secs(timeout_secs),
            }),
        })
    }
}

fn optional<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(name) {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<WmsConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        WmsConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_to_in_memory() {
        assert_eq!(config(&[]).unwrap(), WmsConfig::in_memory());
        assert_eq!(config(&[("USE_PERSISTENT_STORES", "false")]).unwrap().database, None);
    }

    #[test]
    fn persistent_requires_database_url() {
        assert_eq!(
            config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }

    #[test]
    fn pool_settings_have_defaults_and_overrides() {
        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/wms"),
            ("DB_MAX_CONNECTIONS", "8"),
        ])
        .unwrap();
        let db = cfg.database.unwrap();
        assert_eq!(db.min_connections, 5);
        assert_eq!(db.max_connections, 8);
        assert_eq!(db.acquire_timeout, Duration::from_secs(60));
    }

    #[test]
    fn rejects_garbage_values() {
        assert!(matches!(
            config(&[("USE_PERSISTENT_STORES", "yes please")]),
            Err(ConfigError::Invalid { name: "USE_PERSISTENT_STORES", .. })
        ));
        assert!(config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/wms"),
            ("DB_MIN_CONNECTIONS", "30"),
        ])
        .is_err());
    }
}

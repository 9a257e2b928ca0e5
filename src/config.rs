use serde::Deserialize;
use std::time::Duration;

use crate::unit_of_work::DEFAULT_UNIT_NAME;

/// Connection settings for one persistence unit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PersistenceUnitConfig {
    /// Name the unit is registered under
    pub name: String,

    /// Database connection URL
    pub url: String,

    /// Maximum number of pooled connections
    pub max_connections: u32,

    /// Minimum number of idle connections kept in the pool
    pub min_connections: u32,

    /// How long to wait for a pooled connection
    pub acquire_timeout_secs: u64,

    /// Query run by the health check
    pub validation_query: String,

    /// Upper bound on a single health check
    pub validation_timeout_secs: u64,
}

impl Default for PersistenceUnitConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_UNIT_NAME.to_string(),
            url: String::new(),
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            validation_query: "SELECT 1".to_string(),
            validation_timeout_secs: 5,
        }
    }
}

impl PersistenceUnitConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build a config for `name` from the `DATABASE_URL` environment variable.
    pub fn from_env(name: impl Into<String>) -> Option<Self> {
        std::env::var("DATABASE_URL")
            .ok()
            .map(|url| Self::new(name, url))
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn validation_query(mut self, query: impl Into<String>) -> Self {
        self.validation_query = query.into();
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }
}

//! Store configuration.
//!
//! All settings can be configured via environment variables:
//! - `COMMENT_BACKEND`: `memory`, `postgres` or `graph` (default: memory)
//! - `LEGACY_COMMENTS_TABLE`: legacy flat comment table (default: legacy_comments)
//! - `MIGRATE_ON_STARTUP`: import legacy comments into an empty store (default: true)
//!
//! Backend-specific variables are documented on `PostgresConfig` and `GraphConfig`.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "graph")]
use crate::store::GraphConfig;
#[cfg(feature = "postgres")]
use crate::store::PostgresConfig;

/// Which comment store to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// Process-local adjacency list.
    #[default]
    Memory,
    /// Relational adjacency-list table.
    Postgres,
    /// Native graph nodes and edges.
    Graph,
}

impl BackendKind {
    /// Parse backend kind from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in-memory" | "" => Some(Self::Memory),
            "postgres" | "postgresql" | "relational" => Some(Self::Postgres),
            "graph" | "neo4j" => Some(Self::Graph),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Postgres => write!(f, "postgres"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

/// Read and parse an environment variable, falling back to `default`.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Configuration for the comment store and its startup behavior.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Selected backend.
    pub backend: BackendKind,
    /// Legacy flat comment table read by migration.
    pub legacy_table: String,
    /// Run legacy migration when the store is empty.
    pub migrate_on_startup: bool,
    /// Relational backend settings.
    #[cfg(feature = "postgres")]
    pub postgres: PostgresConfig,
    /// Graph backend settings.
    #[cfg(feature = "graph")]
    pub graph: GraphConfig,
}

impl StoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let backend = match std::env::var("COMMENT_BACKEND") {
            Ok(raw) => BackendKind::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "unknown COMMENT_BACKEND, using memory");
                BackendKind::Memory
            }),
            Err(_) => BackendKind::Memory,
        };

        Self {
            backend,
            legacy_table: std::env::var("LEGACY_COMMENTS_TABLE")
                .unwrap_or_else(|_| "legacy_comments".to_string()),
            migrate_on_startup: env_or("MIGRATE_ON_STARTUP", true),
            #[cfg(feature = "postgres")]
            postgres: PostgresConfig::from_env(),
            #[cfg(feature = "graph")]
            graph: GraphConfig::from_env(),
        }
    }

    /// In-memory configuration, used by tests and demos.
    pub fn memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            legacy_table: "legacy_comments".to_string(),
            migrate_on_startup: false,
            #[cfg(feature = "postgres")]
            postgres: PostgresConfig::from_env(),
            #[cfg(feature = "graph")]
            graph: GraphConfig::from_env(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_kind() {
        assert_eq!(BackendKind::parse("Postgres"), Some(BackendKind::Postgres));
        assert_eq!(BackendKind::parse(" neo4j "), Some(BackendKind::Graph));
        assert_eq!(BackendKind::parse("memory"), Some(BackendKind::Memory));
        assert_eq!(BackendKind::parse("mysql"), None);
    }

    #[test]
    fn test_backend_kind_round_trips_through_display() {
        for kind in [BackendKind::Memory, BackendKind::Postgres, BackendKind::Graph] {
            assert_eq!(BackendKind::parse(&kind.to_string()), Some(kind));
        }
    }

    #[test]
    fn test_env_or_falls_back() {
        assert_eq!(env_or("THREADSCAPE_TEST_UNSET_VARIABLE", 17u32), 17);
    }
}

//! Shared service state.

use std::sync::Arc;
use std::time::Instant;

use crate::store::CommentStore;
use crate::system::CommentSystem;
use crate::types::AuthorId;

/// Seeding settings exposed through the REST surface.
#[derive(Debug, Clone, Copy)]
pub struct SeedSettings {
    /// Whether `POST /api/posts/:id/seed` is allowed.
    pub enabled: bool,
    /// Base user when the request names none.
    pub default_base_user: AuthorId,
}

impl SeedSettings {
    /// Load from `ALLOW_SEEDING` (default: true) and `SEED_BASE_USER` (default: 1).
    pub fn from_env() -> Self {
        Self {
            enabled: crate::config::env_or("ALLOW_SEEDING", true),
            default_base_user: AuthorId::new(crate::config::env_or("SEED_BASE_USER", 1)),
        }
    }
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_base_user: AuthorId::new(1),
        }
    }
}

/// Shared service state.
///
/// Holds the comment system over the configured store.
pub struct ServiceState<S: CommentStore + 'static> {
    /// Comment operations.
    pub system: Arc<CommentSystem<S>>,
    /// Seeding settings.
    pub seed: SeedSettings,
    started_at: Instant,
}

impl<S: CommentStore + 'static> ServiceState<S> {
    /// Create service state over a store.
    pub fn new(store: S) -> Self {
        Self::with_system(CommentSystem::new(store), SeedSettings::default())
    }

    /// Create service state over an existing system.
    pub fn with_system(system: CommentSystem<S>, seed: SeedSettings) -> Self {
        Self {
            system: Arc::new(system),
            seed,
            started_at: Instant::now(),
        }
    }

    /// Create service state with seeding settings from the environment.
    pub fn from_env(store: S) -> Self {
        let seed = SeedSettings::from_env();
        if !seed.enabled {
            tracing::info!("seeding endpoint disabled");
        }
        Self::with_system(CommentSystem::new(store), seed)
    }

    /// The store behind the system.
    pub fn store(&self) -> &Arc<S> {
        self.system.store()
    }

    /// Seconds since the state was created.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl<S: CommentStore + 'static> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            system: Arc::clone(&self.system),
            seed: self.seed,
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCommentStore;

    #[test]
    fn test_clone_shares_system() {
        let state = ServiceState::new(InMemoryCommentStore::new());
        let clone = state.clone();
        assert!(Arc::ptr_eq(&state.system, &clone.system));
    }

    #[test]
    fn test_default_seed_settings() {
        let seed = SeedSettings::default();
        assert!(seed.enabled);
        assert_eq!(seed.default_base_user, AuthorId::new(1));
    }
}

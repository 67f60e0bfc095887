//! Session configuration (`spec.md` §4.F / §6), built the way the teacher
//! builds `RuntimeConfig`: a small builder with sensible defaults and one
//! `dotenvy`-backed resolver for the SQLite connection string.

use std::path::PathBuf;
use std::time::Duration;

use crate::serializer::SerializerFlavor;

/// Which [`crate::backend::Backend`] a [`crate::session::Session`] should
/// open.
#[derive(Clone, Debug)]
pub enum BackendChoice {
    Memory,
    FileTree { root: PathBuf },
    #[cfg(feature = "sqlite")]
    Sqlite { database_url: String },
}

/// Defaults applied when the caller doesn't configure a recovery strategy
/// chain of their own (`spec.md` §4.C's `NoopStrategy` fallback).
#[derive(Clone, Debug)]
pub struct RetryDefaults {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub agent_name: String,
    pub backend: BackendChoice,
    pub serializer_flavor: SerializerFlavor,
    pub retry_defaults: RetryDefaults,
}

impl SessionConfig {
    fn resolve_sqlite_database_url(provided: Option<String>) -> String {
        if let Some(url) = provided {
            return url;
        }
        dotenvy::dotenv().ok();
        std::env::var("MINDTRACE_SQLITE_DB")
            .unwrap_or_else(|_| "sqlite://mindtrace.db".to_string())
    }

    #[must_use]
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            backend: BackendChoice::Memory,
            serializer_flavor: SerializerFlavor::default(),
            retry_defaults: RetryDefaults::default(),
        }
    }

    #[must_use]
    pub fn with_memory_backend(mut self) -> Self {
        self.backend = BackendChoice::Memory;
        self
    }

    #[must_use]
    pub fn with_file_tree_backend(mut self, root: impl Into<PathBuf>) -> Self {
        self.backend = BackendChoice::FileTree { root: root.into() };
        self
    }

    #[cfg(feature = "sqlite")]
    #[must_use]
    pub fn with_sqlite_backend(mut self, database_url: Option<String>) -> Self {
        self.backend = BackendChoice::Sqlite {
            database_url: Self::resolve_sqlite_database_url(database_url),
        };
        self
    }

    #[must_use]
    pub fn with_serializer_flavor(mut self, flavor: SerializerFlavor) -> Self {
        self.serializer_flavor = flavor;
        self
    }

    #[must_use]
    pub fn with_retry_defaults(mut self, retry_defaults: RetryDefaults) -> Self {
        self.retry_defaults = retry_defaults;
        self
    }
}

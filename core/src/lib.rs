// PState Core: per-account protocol state persistence
//
// Tracks which devices already hold the active sender key of each group
// distribution epoch, on top of a single shared relational backend that
// is either an embedded sqlite file or a postgres server.

pub mod config;
pub mod db;
pub mod directory;
pub mod ids;
pub mod store;

use thiserror::Error;

pub use config::{BackendKind, DatabaseSettings, ResolvedDatabase};
pub use db::{BackendConnection, NoopObserver, PrometheusObserver, QueryObserver};
pub use directory::{AccountDirectory, RecipientDirectory};
pub use ids::{AccountId, DeviceAddress, DistributionId};
pub use store::{AccountStoreRegistry, SenderKeySharedTable, Store};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Startup configuration problems. These are fatal: a process must not
/// continue with an ambiguous backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Malformed database URI {uri:?}: {reason}")]
    MalformedUri { uri: String, reason: String },

    #[error("Invalid database scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Backend {0} requires a database user and password")]
    MissingCredentials(BackendKind),

    #[error("Invalid sqlite path in {0:?}")]
    InvalidSqlitePath(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The backend could not be reached at all. Distinct from an empty
    /// result so callers never mistake an outage for "nobody has the key".
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Postgres error: {0}")]
    Postgres(#[from] postgres::Error),

    #[error("Batch {operation} failed, no row was persisted: {source}")]
    BatchFailed {
        operation: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Raised by [`RecipientDirectory`] or [`AccountDirectory`] implementations.
    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

impl StoreError {
    /// True when the failure means the backend could not be reached, as
    /// opposed to a statement being rejected.
    pub fn is_unavailable(&self) -> bool {
        match self {
            StoreError::Unavailable { .. } => true,
            StoreError::BatchFailed { source, .. } => source.is_unavailable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_detected_through_batch_wrapper() {
        let err = StoreError::BatchFailed {
            operation: "sender_key_shared_mark_distributed".to_string(),
            source: Box::new(StoreError::Unavailable {
                reason: "connection refused".to_string(),
            }),
        };
        assert!(err.is_unavailable());
        assert!(!StoreError::InvalidInput("x".to_string()).is_unavailable());
    }

    #[test]
    fn test_config_error_message_names_scheme() {
        let err = ConfigError::UnsupportedScheme("mysql".to_string());
        assert_eq!(err.to_string(), "Invalid database scheme: mysql");
    }
}

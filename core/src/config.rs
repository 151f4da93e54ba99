//! Database configuration
//!
//! The connection descriptor is a URI whose scheme selects the backend:
//! - `sqlite:/path/to/file.db`, `sqlite:///abs/path.db`, `sqlite::memory:`
//! - `postgresql://host:port/dbname` (user and password configured separately)
//!
//! A legacy `jdbc:` prefix is accepted and ignored. Resolution happens once,
//! at startup, and yields an immutable [`ResolvedDatabase`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::ConfigError;

const LEGACY_PREFIX: &str = "jdbc:";
const SQLITE_MEMORY: &str = ":memory:";

pub const DEFAULT_METRICS_NAMESPACE: &str = "pstate";

// ============================================================================
// BACKEND KIND
// ============================================================================

/// Which physical relational engine serves every account of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded single-file store
    Sqlite,
    /// Client-server relational store
    Postgres,
}

impl BackendKind {
    pub fn from_scheme(scheme: &str) -> Result<Self, ConfigError> {
        match scheme {
            "sqlite" => Ok(Self::Sqlite),
            "postgresql" | "postgres" => Ok(Self::Postgres),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Postgres => write!(f, "postgresql"),
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Raw database settings as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Connection descriptor URI
    pub url: String,

    /// Database user, required by the postgres backend
    #[serde(default)]
    pub user: Option<String>,

    /// Database password, required by the postgres backend
    #[serde(default)]
    pub password: Option<String>,

    /// Emit a debug line for every executed statement
    #[serde(default)]
    pub log_queries: bool,

    /// Prefix of the query latency histogram
    #[serde(default = "default_metrics_namespace")]
    pub metrics_namespace: String,
}

fn default_metrics_namespace() -> String {
    DEFAULT_METRICS_NAMESPACE.to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: format!("sqlite:{}", SQLITE_MEMORY),
            user: None,
            password: None,
            log_queries: false,
            metrics_namespace: default_metrics_namespace(),
        }
    }
}

impl DatabaseSettings {
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            url: format!("sqlite:{}", path.into().display()),
            ..Self::default()
        }
    }

    pub fn postgres(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: Some(user.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    /// Parse only the scheme of the descriptor.
    pub fn backend_kind(&self) -> Result<BackendKind, ConfigError> {
        let uri = self.parse_uri()?;
        BackendKind::from_scheme(uri.scheme())
    }

    /// Resolve the descriptor into connection parameters for exactly one
    /// backend kind.
    pub fn resolve(&self) -> Result<ResolvedDatabase, ConfigError> {
        let uri = self.parse_uri()?;
        let kind = BackendKind::from_scheme(uri.scheme())?;

        let target = match kind {
            BackendKind::Sqlite => BackendTarget::Sqlite(sqlite_target(self.descriptor())?),
            BackendKind::Postgres => {
                let (user, password) = match (&self.user, &self.password) {
                    (Some(user), Some(password)) if !user.is_empty() => (user, password),
                    _ => return Err(ConfigError::MissingCredentials(kind)),
                };
                let mut config: postgres::Config =
                    self.descriptor().parse().map_err(|e: postgres::Error| {
                        ConfigError::MalformedUri {
                            uri: self.url.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                config.user(user).password(password);
                BackendTarget::Postgres(Box::new(config))
            }
        };

        Ok(ResolvedDatabase {
            target,
            log_queries: self.log_queries,
        })
    }

    fn descriptor(&self) -> &str {
        let trimmed = self.url.trim();
        trimmed.strip_prefix(LEGACY_PREFIX).unwrap_or(trimmed)
    }

    fn parse_uri(&self) -> Result<Url, ConfigError> {
        Url::parse(self.descriptor()).map_err(|e| ConfigError::MalformedUri {
            uri: self.url.clone(),
            reason: e.to_string(),
        })
    }
}

/// The sqlite path is taken verbatim from the descriptor text, not from the
/// parsed URI, whose path is percent-encoded and loses anything after `#`
/// or `?`.
fn sqlite_target(descriptor: &str) -> Result<SqliteTarget, ConfigError> {
    let rest = descriptor
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    // `sqlite:///abs.db` and `sqlite://relative.db` carry an empty authority.
    let path = rest.strip_prefix("//").unwrap_or(rest);
    if path.is_empty() || path == "/" {
        return Err(ConfigError::InvalidSqlitePath(descriptor.to_string()));
    }
    if path == SQLITE_MEMORY {
        return Ok(SqliteTarget::Memory);
    }
    Ok(SqliteTarget::File(PathBuf::from(path)))
}

// ============================================================================
// RESOLVED CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub enum BackendTarget {
    Sqlite(SqliteTarget),
    Postgres(Box<postgres::Config>),
}

/// Immutable result of resolving [`DatabaseSettings`] once at startup.
#[derive(Debug, Clone)]
pub struct ResolvedDatabase {
    pub target: BackendTarget,
    pub log_queries: bool,
}

impl ResolvedDatabase {
    pub fn kind(&self) -> BackendKind {
        match self.target {
            BackendTarget::Sqlite(_) => BackendKind::Sqlite,
            BackendTarget::Postgres(_) => BackendKind::Postgres,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> DatabaseSettings {
        DatabaseSettings {
            url: url.to_string(),
            ..DatabaseSettings::default()
        }
    }

    #[test]
    fn test_sqlite_absolute_path() {
        let resolved = settings("sqlite:///var/lib/pstate/state.db").resolve().unwrap();
        assert_eq!(resolved.kind(), BackendKind::Sqlite);
        match resolved.target {
            BackendTarget::Sqlite(SqliteTarget::File(path)) => {
                assert_eq!(path, PathBuf::from("/var/lib/pstate/state.db"))
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_sqlite_short_forms() {
        match settings("sqlite:/tmp/a.db").resolve().unwrap().target {
            BackendTarget::Sqlite(SqliteTarget::File(path)) => assert_eq!(path, PathBuf::from("/tmp/a.db")),
            other => panic!("unexpected target {:?}", other),
        }
        match settings("sqlite://relative.db").resolve().unwrap().target {
            BackendTarget::Sqlite(SqliteTarget::File(path)) => assert_eq!(path, PathBuf::from("relative.db")),
            other => panic!("unexpected target {:?}", other),
        }
        match settings("sqlite::memory:").resolve().unwrap().target {
            BackendTarget::Sqlite(target) => assert_eq!(target, SqliteTarget::Memory),
            other => panic!("unexpected target {:?}", other),
        }
    }

    fn resolved_file(settings: DatabaseSettings) -> PathBuf {
        match settings.resolve().unwrap().target {
            BackendTarget::Sqlite(SqliteTarget::File(path)) => path,
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_sqlite_path_kept_verbatim() {
        let spaced = PathBuf::from("/Users/me/Library/Application Support/pstate/state.db");
        assert_eq!(resolved_file(DatabaseSettings::sqlite(&spaced)), spaced);

        let hashed = PathBuf::from("/srv/pstate/team#1.db");
        assert_eq!(resolved_file(DatabaseSettings::sqlite(&hashed)), hashed);

        let queried = PathBuf::from("/srv/pstate/what?.db");
        assert_eq!(resolved_file(DatabaseSettings::sqlite(&queried)), queried);

        assert_eq!(
            resolved_file(settings("sqlite:///srv/état/state.db")),
            PathBuf::from("/srv/état/state.db")
        );
        assert_eq!(
            resolved_file(settings("jdbc:sqlite:/srv/a b/state.db")),
            PathBuf::from("/srv/a b/state.db")
        );
    }

    #[test]
    fn test_sqlite_relative_path_from_constructor() {
        assert_eq!(
            resolved_file(DatabaseSettings::sqlite("state.db")),
            PathBuf::from("state.db")
        );
    }

    #[test]
    fn test_legacy_jdbc_prefix_is_ignored() {
        assert_eq!(
            settings("jdbc:sqlite:/tmp/signald.db").backend_kind().unwrap(),
            BackendKind::Sqlite
        );
        assert_eq!(
            settings("jdbc:postgresql://localhost/signald").backend_kind().unwrap(),
            BackendKind::Postgres
        );
    }

    #[test]
    fn test_unknown_scheme_is_fatal() {
        assert_eq!(
            settings("mysql://localhost/db").resolve().unwrap_err(),
            ConfigError::UnsupportedScheme("mysql".to_string())
        );
    }

    #[test]
    fn test_malformed_uri() {
        assert!(matches!(
            settings("not a uri").resolve(),
            Err(ConfigError::MalformedUri { .. })
        ));
        assert!(matches!(
            settings("").backend_kind(),
            Err(ConfigError::MalformedUri { .. })
        ));
    }

    #[test]
    fn test_sqlite_without_path_rejected() {
        assert!(matches!(
            settings("sqlite:").resolve(),
            Err(ConfigError::InvalidSqlitePath(_))
        ));
    }

    #[test]
    fn test_postgres_requires_credentials() {
        assert_eq!(
            settings("postgresql://localhost:5432/pstate").resolve().unwrap_err(),
            ConfigError::MissingCredentials(BackendKind::Postgres)
        );

        let resolved = DatabaseSettings::postgres("postgresql://localhost:5432/pstate", "pstate", "secret")
            .resolve()
            .unwrap();
        assert_eq!(resolved.kind(), BackendKind::Postgres);
        match resolved.target {
            BackendTarget::Postgres(config) => {
                assert_eq!(config.get_user(), Some("pstate"));
                assert_eq!(config.get_password(), Some("secret".as_bytes()));
                assert_eq!(config.get_dbname(), Some("pstate"));
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let parsed: DatabaseSettings = serde_json::from_str(r#"{"url":"sqlite:/tmp/x.db"}"#).unwrap();
        assert!(!parsed.log_queries);
        assert_eq!(parsed.metrics_namespace, DEFAULT_METRICS_NAMESPACE);
        assert_eq!(parsed.user, None);
    }
}

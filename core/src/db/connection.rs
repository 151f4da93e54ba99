use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{BackendKind, BackendTarget, ResolvedDatabase};
use crate::db::observer::QueryObserver;
use crate::db::postgres::PostgresDriver;
use crate::db::schema;
use crate::db::sqlite::SqliteDriver;
use crate::{Result, StoreError};

/// A bound parameter or a returned column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Int(i64),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

pub type Row = Vec<Value>;

/// One open physical connection. Statements use `?` placeholders; a session
/// rewrites them if its engine wants another syntax.
pub trait Session: Send {
    /// True when the handle can no longer be used and must be replaced.
    fn is_stale(&mut self) -> bool;

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Runs `sql` once per parameter row inside one transaction. Either every
    /// row is applied or none is.
    fn execute_batch(&mut self, sql: &str, batch: &[Vec<Value>]) -> Result<u64>;

    fn apply_schema(&mut self, statements: &[&str]) -> Result<()>;

    fn close(self: Box<Self>) -> Result<()>;
}

/// Everything that differs between backend kinds: how to connect and the
/// dialect-specific statement shapes.
pub trait Driver: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn connect(&self) -> Result<Box<dyn Session>>;

    /// Idempotent insert of a row whose columns together form the key.
    fn insert_or_replace(&self, table: &str, columns: &[&str]) -> String;
}

/// Select the driver for the configured backend kind.
pub fn driver_for(resolved: &ResolvedDatabase) -> Box<dyn Driver> {
    match &resolved.target {
        BackendTarget::Sqlite(target) => Box::new(SqliteDriver::new(target.clone())),
        BackendTarget::Postgres(config) => Box::new(PostgresDriver::new((**config).clone())),
    }
}

/// The single physical connection shared by every account's store.
///
/// The session is opened lazily, replaced when stale, and every statement
/// is timed against the observer. Statements from different accounts are
/// serialized on the one session; no cross-account ordering is promised.
pub struct BackendConnection {
    driver: Box<dyn Driver>,
    slot: Mutex<SessionSlot>,
    observer: Arc<dyn QueryObserver>,
    log_queries: bool,
}

#[derive(Default)]
struct SessionSlot {
    session: Option<Box<dyn Session>>,
    /// Set by [`BackendConnection::close`]; a closed connection never reopens.
    closed: bool,
}

impl BackendConnection {
    pub fn new(resolved: &ResolvedDatabase, observer: Arc<dyn QueryObserver>) -> Self {
        Self::with_driver(driver_for(resolved), observer, resolved.log_queries)
    }

    pub fn with_driver(
        driver: Box<dyn Driver>,
        observer: Arc<dyn QueryObserver>,
        log_queries: bool,
    ) -> Self {
        Self {
            driver,
            slot: Mutex::new(SessionSlot::default()),
            observer,
            log_queries,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.driver.kind()
    }

    pub fn insert_or_replace_sql(&self, table: &str, columns: &[&str]) -> String {
        self.driver.insert_or_replace(table, columns)
    }

    /// Returns the open session, opening or replacing it first if needed.
    /// The guard holds the connection lock: drop it before issuing another
    /// statement on this connection.
    pub(crate) fn acquire(&self) -> Result<MappedMutexGuard<'_, Box<dyn Session>>> {
        let mut slot = self.slot.lock();
        if slot.closed {
            return Err(StoreError::Unavailable {
                reason: format!("{} connection is closed", self.driver.kind()),
            });
        }

        let stale = match slot.session.as_mut() {
            Some(session) => session.is_stale(),
            None => true,
        };
        if stale {
            if slot.session.take().is_some() {
                debug!("Replacing stale {} connection", self.driver.kind());
            }
            let mut session = self.driver.connect()?;
            session.apply_schema(schema::STATEMENTS)?;
            info!("Opened {} connection", self.driver.kind());
            slot.session = Some(session);
        }

        MutexGuard::try_map(slot, |slot| slot.session.as_mut()).map_err(|_| StoreError::Unavailable {
            reason: "connection slot empty after open".to_string(),
        })
    }

    pub fn query(&self, name: &str, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.timed(name, false, |session| session.query(sql, params))
    }

    pub fn execute(&self, name: &str, sql: &str, params: &[Value]) -> Result<u64> {
        self.timed(name, true, |session| session.execute(sql, params))
    }

    /// All-or-nothing batch. An empty batch does not touch the backend.
    pub fn execute_batch(&self, name: &str, sql: &str, batch: &[Vec<Value>]) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.timed(name, true, |session| session.execute_batch(sql, batch))
            .map_err(|source| StoreError::BatchFailed {
                operation: name.to_string(),
                source: Box::new(source),
            })
    }

    /// Drop the physical session; the next statement reopens it.
    pub fn invalidate(&self) {
        self.slot.lock().session.take();
    }

    /// Release the physical session for good. Later statements fail with
    /// [`StoreError::Unavailable`] instead of reconnecting.
    pub fn close(&self) {
        let session = {
            let mut slot = self.slot.lock();
            slot.closed = true;
            slot.session.take()
        };
        if let Some(session) = session {
            match session.close() {
                Ok(()) => info!("Closed {} connection", self.driver.kind()),
                Err(e) => warn!("Failed to close database connection: {}", e),
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().session.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    fn timed<T>(
        &self,
        name: &str,
        write: bool,
        run: impl FnOnce(&mut dyn Session) -> Result<T>,
    ) -> Result<T> {
        let mut session = self.acquire()?;
        let started = Instant::now();
        let result = run(&mut **session);
        drop(session);

        let seconds = started.elapsed().as_secs_f64();
        self.observer.observe(name, write, seconds);
        if self.log_queries {
            debug!("executed query {} in {} ms", name, seconds * 1000.0);
        }
        result
    }
}

impl Drop for BackendConnection {
    fn drop(&mut self) {
        self.close();
    }
}

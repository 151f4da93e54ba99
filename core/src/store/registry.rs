//! Account store registry
//!
//! Maps each local account to its [`Store`], all of them sharing one
//! [`BackendConnection`]. The registry is an ordinary value built by the
//! composition root; there is no process-global instance.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::{BackendKind, DatabaseSettings};
use crate::db::{BackendConnection, QueryObserver};
use crate::ids::AccountId;
use crate::store::{SenderKeySharedTable, Store};
use crate::{ConfigError, Result};

pub struct AccountStoreRegistry {
    settings: DatabaseSettings,
    observer: Arc<dyn QueryObserver>,
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    connection: Option<Arc<BackendConnection>>,
    stores: HashMap<AccountId, Arc<Store>>,
}

impl AccountStoreRegistry {
    /// Resolve the backend kind from `settings` and prepare the shared
    /// connection. A bad descriptor fails here, before any store exists.
    pub fn open(
        settings: DatabaseSettings,
        observer: Arc<dyn QueryObserver>,
    ) -> std::result::Result<Self, ConfigError> {
        let registry = Self {
            settings,
            observer,
            state: Mutex::new(RegistryState::default()),
        };
        registry.resolve_backend_kind()?;
        Ok(registry)
    }

    /// The cached store of `account`, created on first use. Concurrent
    /// callers for the same account all receive the same instance.
    pub fn get(&self, account: &AccountId) -> Result<Arc<Store>> {
        let mut state = self.state.lock();
        if let Some(store) = state.stores.get(account) {
            return Ok(store.clone());
        }

        let connection = self.connection_locked(&mut state)?;
        let store = Arc::new(Store::new(account.clone(), connection));
        state.stores.insert(account.clone(), store.clone());
        Ok(store)
    }

    /// Backend kind serving every account. Parsed once and cached until
    /// [`Self::close`].
    pub fn resolve_backend_kind(&self) -> std::result::Result<BackendKind, ConfigError> {
        let mut state = self.state.lock();
        Ok(self.connection_locked(&mut state)?.kind())
    }

    pub fn connection(&self) -> std::result::Result<Arc<BackendConnection>, ConfigError> {
        let mut state = self.state.lock();
        self.connection_locked(&mut state)
    }

    /// Purge the sender-key records of `account` and evict its cached store.
    /// Other tables are torn down by their own owners.
    pub fn delete_account(&self, account: &AccountId) -> Result<u64> {
        let connection = self.connection()?;
        let removed = SenderKeySharedTable::delete_account(&connection, account)?;
        self.state.lock().stores.remove(account);
        info!("Deleted {} sender key record(s) of account {}", removed, account);
        Ok(removed)
    }

    /// Release the shared connection and forget every cached store. Stores
    /// handed out earlier fail with `Unavailable` from then on; the next
    /// [`Self::get`] re-resolves the configuration and reconnects lazily.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Some(connection) = state.connection.take() {
            connection.close();
        }
        state.stores.clear();
    }

    pub fn cached_accounts(&self) -> usize {
        self.state.lock().stores.len()
    }

    fn connection_locked(
        &self,
        state: &mut RegistryState,
    ) -> std::result::Result<Arc<BackendConnection>, ConfigError> {
        if let Some(connection) = &state.connection {
            return Ok(connection.clone());
        }

        let resolved = self.settings.resolve()?;
        info!("Using {} database backend", resolved.kind());
        let connection = Arc::new(BackendConnection::new(&resolved, self.observer.clone()));
        state.connection = Some(connection.clone());
        Ok(connection)
    }
}

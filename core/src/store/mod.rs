// Store module: per-account table bundles and the registry caching them

pub mod registry;
pub mod sender_key_shared;

pub use registry::AccountStoreRegistry;
pub use sender_key_shared::SenderKeySharedTable;

use std::sync::Arc;

use crate::config::BackendKind;
use crate::db::BackendConnection;
use crate::ids::AccountId;

/// Tables of one local account. Construction does no I/O.
pub struct Store {
    account: AccountId,
    connection: Arc<BackendConnection>,
    sender_key_shared: SenderKeySharedTable,
}

impl Store {
    pub fn new(account: AccountId, connection: Arc<BackendConnection>) -> Self {
        Self {
            sender_key_shared: SenderKeySharedTable::new(account.clone(), connection.clone()),
            account,
            connection,
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.connection.kind()
    }

    pub fn sender_key_shared(&self) -> &SenderKeySharedTable {
        &self.sender_key_shared
    }
}

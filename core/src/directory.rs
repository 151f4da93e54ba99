// Collaborators owned by other parts of the daemon.
//
// The tracker only needs two answers from them: which identity string a
// contact's devices are stored under, and whether an account has linked
// devices of its own.

use crate::ids::AccountId;
use crate::Result;

/// Resolves a logical contact (phone number, username, ...) to the identity
/// used in device addresses. `Ok(None)` means the contact is unknown.
#[cfg_attr(test, mockall::automock)]
pub trait RecipientDirectory: Send + Sync {
    fn identity_of(&self, contact: &str) -> Result<Option<String>>;
}

#[cfg_attr(test, mockall::automock)]
pub trait AccountDirectory: Send + Sync {
    fn is_multi_device(&self, account: &AccountId) -> Result<bool>;
}

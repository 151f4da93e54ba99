//! Identifiers shared by every per-account table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Stable identifier of a local account owning a store. Opaque to this
/// crate; accounts are usually keyed by their service UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for AccountId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdParseError::EmptyIdentity);
        }
        Ok(Self::new(s))
    }
}

/// One sender-key epoch for a (sender, group) pair. A new value is minted
/// by the protocol engine every time the key rotates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistributionId(String);

impl DistributionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self::from(Uuid::new_v4())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for DistributionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl fmt::Display for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DistributionId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdParseError::EmptyIdentity);
        }
        Ok(Self::new(s))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("missing device id in {0:?}, expected identity.device")]
    MissingDevice(String),
    #[error("device id must be a positive integer, got {0:?}")]
    InvalidDevice(String),
    #[error("identifier must not be empty")]
    EmptyIdentity,
}

/// One registered device of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub identity: String,
    pub device_id: u32,
}

impl DeviceAddress {
    pub fn new(identity: impl Into<String>, device_id: u32) -> Self {
        Self {
            identity: identity.into(),
            device_id,
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.identity, self.device_id)
    }
}

impl FromStr for DeviceAddress {
    type Err = IdParseError;

    // Identities may themselves contain dots, so split on the last one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (identity, device) = s
            .rsplit_once('.')
            .ok_or_else(|| IdParseError::MissingDevice(s.to_string()))?;
        if identity.is_empty() {
            return Err(IdParseError::EmptyIdentity);
        }
        let device_id: u32 = device
            .parse()
            .map_err(|_| IdParseError::InvalidDevice(device.to_string()))?;
        if device_id == 0 {
            return Err(IdParseError::InvalidDevice(device.to_string()));
        }
        Ok(Self::new(identity, device_id))
    }
}

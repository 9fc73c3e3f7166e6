//! Tenant identity and tenant-scoped collection addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::collection::Collection;

/// Reasons a raw string is not a usable tenant id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantIdError {
    #[error("tenant id must not be empty")]
    Empty,
    #[error("tenant id must not contain '/' or control characters")]
    InvalidCharacter,
}

/// Opaque identifier of a clinic. Every store address is built from one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, TenantIdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(TenantIdError::Empty);
        }
        if raw.chars().any(|c| c == '/' || c.is_control()) {
            return Err(TenantIdError::InvalidCharacter);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address of one of this tenant's collections.
    pub fn collection(&self, collection: Collection) -> CollectionPath {
        CollectionPath::new(self.clone(), collection)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenantIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// `users/{tenant}/{collection}`: the only way the store can be addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    tenant: TenantId,
    collection: Collection,
}

impl CollectionPath {
    pub fn new(tenant: TenantId, collection: Collection) -> Self {
        Self { tenant, collection }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "users/{}/{}", self.tenant, self.collection)
    }
}

//! # Core Type Definitions
//!
//! Identifiers, arena handles, in-batch references and the error type shared
//! by every stage of a discovery cycle.
//!
//! ## Identifiers vs. Handles
//!
//! - Identifiers (`ItemId`, `ApplicationId`, ...) are assigned by the store.
//!   The value `0` means "not assigned yet".
//! - Handles (`RowHandle`, `ItemHandle`, `ApplicationHandle`) are indexes into
//!   vectors owned by a single cycle. They are never persisted.
//!
//! All types implement `Ord` so they can key `BTreeMap`/`BTreeSet`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// STORE IDENTIFIERS
// =============================================================================

/// Monitored host owning items and applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub u64);

/// Discovery rule whose execution yields rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u64);

/// Item prototype belonging to a discovery rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrototypeId(pub u64);

/// Application prototype belonging to a discovery rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationPrototypeId(pub u64);

/// Concrete monitored item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ItemId(pub u64);

/// Concrete application (named item group).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ApplicationId(pub u64);

/// Record linking an application to the application prototype that discovered it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct DiscoveryId(pub u64);

/// Persisted item-application membership.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LinkId(pub u64);

impl ItemId {
    /// True until the store assigns an id.
    #[must_use]
    pub const fn is_unassigned(self) -> bool {
        self.0 == 0
    }
}

impl ApplicationId {
    /// True until the store assigns an id.
    #[must_use]
    pub const fn is_unassigned(self) -> bool {
        self.0 == 0
    }
}

impl DiscoveryId {
    /// True while the application has no discovery record for this rule.
    #[must_use]
    pub const fn is_unassigned(self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// ARENA HANDLES
// =============================================================================

/// Index of a row in the slice handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowHandle(pub usize);

/// Index of an item in the cycle's item arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemHandle(pub usize);

/// Index of an application in the cycle's application arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationHandle(pub usize);

// =============================================================================
// IN-BATCH REFERENCES
// =============================================================================

/// Reference to an item that may not have an id yet.
///
/// Links are created before persistence assigns ids to new items, so a link
/// either names a stored id or points into the item arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemRef {
    ById(ItemId),
    ByHandle(ItemHandle),
}

impl ItemRef {
    /// Build a reference, preferring the id when one is assigned.
    #[must_use]
    pub const fn new(id: ItemId, handle: ItemHandle) -> Self {
        if id.is_unassigned() {
            Self::ByHandle(handle)
        } else {
            Self::ById(id)
        }
    }
}

/// Reference to an application that may not have an id yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApplicationRef {
    ById(ApplicationId),
    ByHandle(ApplicationHandle),
}

impl ApplicationRef {
    /// Build a reference, preferring the id when one is assigned.
    #[must_use]
    pub const fn new(id: ApplicationId, handle: ApplicationHandle) -> Self {
        if id.is_unassigned() {
            Self::ByHandle(handle)
        } else {
            Self::ById(id)
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that abort a discovery cycle or a store operation.
///
/// Domain rejections (too long values, duplicate keys, naming conflicts) are
/// not errors: they are appended to the cycle's `ErrorReport` instead.
#[derive(Debug, Error)]
pub enum LldError {
    /// The host was deleted while the cycle was running.
    #[error("Host not found: {0:?}")]
    HostNotFound(HostId),

    /// The discovery rule does not exist in the store.
    #[error("Discovery rule not found: {0:?}")]
    RuleNotFound(RuleId),

    /// Declarative configuration or CLI settings are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Discovered rows could not be interpreted.
    #[error("Invalid rows: {0}")]
    InvalidRows(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// The storage backend failed.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================

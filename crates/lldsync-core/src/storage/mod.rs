//! # Storage
//!
//! The collaborator boundary of a discovery cycle. The engine reads
//! prototypes and existing entities through `DiscoveryStore`, asks it the
//! cross-rule conflict questions, and hands it exactly two write batches:
//! a `ChangeSet` (persist) and a `SweepPlan` (lifecycle).
//!
//! Backends:
//! - `MemoryStore`: a `Catalog` held in memory (tests, snapshot files)
//! - `RedbStore`: a `Catalog` mirrored into redb tables

pub mod catalog;
pub mod memory;
pub mod redb_store;

pub use catalog::{
    ApplicationKind, Catalog, CatalogStats, DiscoveryConfig, HostRecord, ItemKind, Mutation,
    RuleRecord,
};
pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::field::FieldSet;
use crate::model::{
    ApplicationAssociation, ApplicationPrototype, ItemConfig, ItemPrototype, ItemText,
    StoredApplication, StoredItem, StoredLink,
};
use crate::types::{
    ApplicationHandle, ApplicationId, ApplicationPrototypeId, ApplicationRef, DiscoveryId, HostId,
    ItemHandle, ItemId, ItemRef, LinkId, LldError, PrototypeId, RuleId,
};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// QUERY RESULTS
// =============================================================================

/// A host application found by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostApplication {
    pub id: ApplicationId,
    pub name: String,
    /// Whether the application was created by discovery.
    pub discovered: bool,
}

// =============================================================================
// CHANGE SET
// =============================================================================

/// An item to insert, with its discovery record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub handle: ItemHandle,
    pub prototype_id: PrototypeId,
    pub key_template: String,
    pub text: ItemText,
    pub config: ItemConfig,
    pub status: u8,
}

/// A sparse update of an existing item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemUpdate {
    pub item_id: ItemId,
    /// Only these columns are written.
    pub changed: FieldSet,
    pub text: ItemText,
    /// Source of the scalar columns in `changed`.
    pub config: ItemConfig,
    /// New key template for the discovery record, set when the key moved.
    pub key_template: Option<String>,
}

/// An application row to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApplication {
    pub handle: ApplicationHandle,
    pub name: String,
}

/// A discovery record binding an application to a prototype of this rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryInsert {
    /// Arena entry that receives the assigned record id.
    pub owner: ApplicationHandle,
    pub application: ApplicationRef,
    pub prototype_id: ApplicationPrototypeId,
    pub name_template: String,
}

/// A rename of an application this rule discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRename {
    pub application_id: ApplicationId,
    pub discovery_id: DiscoveryId,
    pub name: String,
    pub name_template: String,
}

/// Every write of one cycle, applied in a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub new_items: Vec<NewItem>,
    pub updated_items: Vec<ItemUpdate>,
    pub new_applications: Vec<NewApplication>,
    pub discovery_inserts: Vec<DiscoveryInsert>,
    pub renames: Vec<ApplicationRename>,
    pub removed_applications: Vec<ApplicationId>,
    pub removed_discoveries: Vec<DiscoveryId>,
    pub link_inserts: Vec<(ItemRef, ApplicationRef)>,
    pub link_deletes: Vec<LinkId>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_items.is_empty()
            && self.updated_items.is_empty()
            && self.new_applications.is_empty()
            && self.discovery_inserts.is_empty()
            && self.renames.is_empty()
            && self.removed_applications.is_empty()
            && self.removed_discoveries.is_empty()
            && self.link_inserts.is_empty()
            && self.link_deletes.is_empty()
    }
}

/// Ids assigned by `persist`, keyed by arena handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignedIds {
    pub items: BTreeMap<ItemHandle, ItemId>,
    pub applications: BTreeMap<ApplicationHandle, ApplicationId>,
    pub discoveries: BTreeMap<ApplicationHandle, DiscoveryId>,
}

impl AssignedIds {
    /// Resolve an item reference to a stored id.
    #[must_use]
    pub fn item(&self, item: ItemRef) -> Option<ItemId> {
        match item {
            ItemRef::ById(id) => Some(id),
            ItemRef::ByHandle(handle) => self.items.get(&handle).copied(),
        }
    }

    /// Resolve an application reference to a stored id.
    #[must_use]
    pub fn application(&self, application: ApplicationRef) -> Option<ApplicationId> {
        match application {
            ApplicationRef::ById(id) => Some(id),
            ApplicationRef::ByHandle(handle) => self.applications.get(&handle).copied(),
        }
    }
}

// =============================================================================
// SWEEP PLAN
// =============================================================================

/// Lifecycle writes of one cycle, applied in a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepPlan {
    pub now: i64,
    /// Stamp `last_seen = now` and clear `delete_at`.
    pub items_seen: Vec<ItemId>,
    /// Set `delete_at`.
    pub items_scheduled: Vec<(ItemId, i64)>,
    pub items_expired: Vec<ItemId>,
    pub discoveries_seen: Vec<DiscoveryId>,
    pub discoveries_scheduled: Vec<(DiscoveryId, i64)>,
    pub discoveries_expired: Vec<DiscoveryId>,
    /// Expired applications no other rule holds on to.
    pub applications_expired: Vec<ApplicationId>,
}

impl SweepPlan {
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items_seen.is_empty()
            && self.items_scheduled.is_empty()
            && self.items_expired.is_empty()
            && self.discoveries_seen.is_empty()
            && self.discoveries_scheduled.is_empty()
            && self.discoveries_expired.is_empty()
            && self.applications_expired.is_empty()
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Storage collaborator of the reconciliation engine.
///
/// Reads are answered from a consistent view; the two write methods are
/// atomic. Every method returns `LldError` on backend failure.
pub trait DiscoveryStore {
    /// Item prototypes of a rule. Fails with `RuleNotFound` for unknown rules.
    fn item_prototypes(&self, rule: RuleId) -> Result<Vec<ItemPrototype>, LldError>;

    /// Application prototypes of a rule.
    fn application_prototypes(&self, rule: RuleId)
    -> Result<Vec<ApplicationPrototype>, LldError>;

    /// Application memberships configured on the given item prototypes.
    fn item_application_prototypes(
        &self,
        prototypes: &[PrototypeId],
    ) -> Result<Vec<(PrototypeId, ApplicationAssociation)>, LldError>;

    /// Items discovered from the given prototypes, sorted by id.
    fn existing_items(&self, prototypes: &[PrototypeId]) -> Result<Vec<StoredItem>, LldError>;

    /// Applications with a discovery record from a prototype of `rule`.
    fn existing_applications(&self, rule: RuleId) -> Result<Vec<StoredApplication>, LldError>;

    /// Links whose item was discovered by `rule`.
    fn existing_item_application_links(&self, rule: RuleId) -> Result<Vec<StoredLink>, LldError>;

    /// Which of `keys` are used by host items outside `exclude`.
    fn conflicting_item_keys(
        &self,
        host: HostId,
        keys: &[String],
        exclude: &BTreeSet<ItemId>,
    ) -> Result<Vec<String>, LldError>;

    /// Host applications whose name is in `names`.
    fn host_applications_named(
        &self,
        host: HostId,
        names: &[String],
    ) -> Result<Vec<HostApplication>, LldError>;

    /// Which of `names` belong to host applications discovered by a
    /// prototype of a rule other than `rule`.
    fn names_shared_with_other_rules(
        &self,
        host: HostId,
        rule: RuleId,
        names: &[String],
    ) -> Result<Vec<String>, LldError>;

    /// Which of `applications` still have a discovery record from a
    /// prototype of a rule other than `rule`.
    fn applications_claimed_elsewhere(
        &self,
        rule: RuleId,
        applications: &[ApplicationId],
    ) -> Result<BTreeSet<ApplicationId>, LldError>;

    /// Apply a change set atomically, under the host lock.
    fn persist(&mut self, host: HostId, changes: &ChangeSet) -> Result<AssignedIds, LldError>;

    /// Apply a lifecycle plan atomically, under the host lock.
    fn apply_sweep(&mut self, host: HostId, plan: &SweepPlan) -> Result<(), LldError>;
}

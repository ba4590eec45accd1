//! # lldsync-core
//!
//! The low-level discovery reconciliation engine.
//!
//! A discovery rule reports one row of macro values per discovered entity.
//! This crate combines those rows with the rule's prototypes, reconciles the
//! result against what earlier cycles persisted, and hands the store a
//! minimal change set: new and updated items, applications and their
//! discovery records, item-application links, and the lifecycle writes that
//! age out entities discovery no longer reports.
//!
//! ## Architectural Constraints
//!
//! - Synchronous, single-threaded, non-reentrant: one cycle is one pass
//! - Deterministic: `BTreeMap`/`BTreeSet` only, no floats, no randomness
//! - Storage lives behind the `DiscoveryStore` trait (memory, redb)
//! - Partial failures are report lines, never errors; storage failures are
//!   errors and abort the cycle before anything is swept

// =============================================================================
// MODULES
// =============================================================================

pub mod batch;
pub mod conflict;
pub mod diff;
pub mod engine;
pub mod field;
pub mod formats;
pub mod index;
pub mod lifecycle;
pub mod links;
pub mod merge;
pub mod model;
pub mod primitives;
pub mod report;
pub mod row;
pub mod storage;
pub mod template;
pub mod types;
pub mod validate;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ApplicationHandle, ApplicationId, ApplicationPrototypeId, ApplicationRef, DiscoveryId, HostId,
    ItemHandle, ItemId, ItemRef, LinkId, LldError, PrototypeId, RowHandle, RuleId,
};

// =============================================================================
// RE-EXPORTS: Entity Model
// =============================================================================

pub use field::{FieldSet, ItemField, Tracked};
pub use model::{
    Application, ApplicationAssociation, ApplicationFlag, ApplicationFlags, ApplicationPrototype,
    Item, ItemApplicationLink, ItemConfig, ItemPrototype, ItemText, StoredApplication, StoredItem,
    StoredLink,
};
pub use report::ErrorReport;
pub use row::{ItemLink, Row};
pub use template::{LldMacros, MacroContext, MacroResolver};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use engine::{CycleRequest, CycleStats, Reconciler};
pub use lifecycle::Lifetime;
pub use validate::{is_valid_utf8, is_within_length};

// =============================================================================
// RE-EXPORTS: Storage & Formats
// =============================================================================

pub use formats::{SnapshotHeader, catalog_from_bytes, catalog_to_bytes};
pub use storage::{
    Catalog, CatalogStats, ChangeSet, DiscoveryConfig, DiscoveryStore, MemoryStore, RedbStore,
    SweepPlan,
};

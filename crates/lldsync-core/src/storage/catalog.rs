//! # Catalog
//!
//! The relational state behind every store backend, held as ordered tables
//! keyed by a single id sequence:
//!
//! | table | key | content |
//! |---|---|---|
//! | hosts | host id | `HostRecord` |
//! | rules | rule id | `RuleRecord` |
//! | item_prototypes | prototype id | `ItemPrototype` |
//! | application_prototypes | prototype id | `ApplicationPrototype` |
//! | item_application_prototypes | record id | `MembershipRecord` |
//! | items | item id | `ItemRecord` |
//! | item_discovery | item id | `ItemDiscoveryRecord` |
//! | applications | application id | `ApplicationRecord` |
//! | application_discovery | record id | `ApplicationDiscoveryRecord` |
//! | items_applications | link id | `StoredLink` |
//!
//! Every write method returns the keys it touched. Backends that mirror the
//! catalog elsewhere (redb) replay exactly those keys from the new state.

use crate::field::ItemField;
use crate::model::{
    ApplicationAssociation, ApplicationPrototype, ItemConfig, ItemPrototype, ItemText,
    StoredApplication, StoredItem, StoredLink,
};
use crate::storage::{AssignedIds, ChangeSet, HostApplication, SweepPlan};
use crate::types::{
    ApplicationId, ApplicationPrototypeId, ApplicationRef, DiscoveryId, HostId, ItemId, ItemRef,
    LinkId, LldError, PrototypeId, RuleId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: HostId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: RuleId,
    pub host_id: HostId,
    pub name: String,
    /// Lifetime of lost entities; the caller's default applies when unset.
    pub lifetime_days: Option<u16>,
    /// Report of the last cycle, empty if it was clean.
    pub last_error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Normal,
    Discovered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub host_id: HostId,
    pub kind: ItemKind,
    pub text: ItemText,
    pub config: ItemConfig,
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDiscoveryRecord {
    pub item_id: ItemId,
    pub prototype_id: PrototypeId,
    pub key_template: String,
    pub last_seen: i64,
    pub delete_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationKind {
    Normal,
    Discovered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub host_id: HostId,
    pub name: String,
    pub kind: ApplicationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDiscoveryRecord {
    pub id: DiscoveryId,
    pub application_id: ApplicationId,
    pub prototype_id: ApplicationPrototypeId,
    pub name_template: String,
    pub last_seen: i64,
    pub delete_at: i64,
}

/// Application membership of an item prototype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub id: u64,
    pub prototype_id: PrototypeId,
    pub association: ApplicationAssociation,
}

// =============================================================================
// JOURNAL
// =============================================================================

/// Catalog tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Hosts,
    Rules,
    ItemPrototypes,
    ApplicationPrototypes,
    ItemApplicationPrototypes,
    Items,
    ItemDiscovery,
    Applications,
    ApplicationDiscovery,
    ItemsApplications,
}

impl Table {
    pub const ALL: [Self; 10] = [
        Self::Hosts,
        Self::Rules,
        Self::ItemPrototypes,
        Self::ApplicationPrototypes,
        Self::ItemApplicationPrototypes,
        Self::Items,
        Self::ItemDiscovery,
        Self::Applications,
        Self::ApplicationDiscovery,
        Self::ItemsApplications,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hosts => "hosts",
            Self::Rules => "rules",
            Self::ItemPrototypes => "item_prototypes",
            Self::ApplicationPrototypes => "application_prototypes",
            Self::ItemApplicationPrototypes => "item_application_prototypes",
            Self::Items => "items",
            Self::ItemDiscovery => "item_discovery",
            Self::Applications => "applications",
            Self::ApplicationDiscovery => "application_discovery",
            Self::ItemsApplications => "items_applications",
        }
    }
}

/// A key touched by a write. The record's new state is read back from the
/// catalog; an absent record means it was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mutation {
    pub table: Table,
    pub id: u64,
}

#[derive(Debug, Default)]
struct Journal(BTreeSet<Mutation>);

impl Journal {
    fn touch(&mut self, table: Table, id: u64) {
        self.0.insert(Mutation { table, id });
    }

    fn into_vec(self) -> Vec<Mutation> {
        self.0.into_iter().collect()
    }
}

fn encode<T: Serialize>(record: Option<&T>) -> Result<Option<Vec<u8>>, LldError> {
    record
        .map(|r| postcard::to_allocvec(r).map_err(|e| LldError::SerializationError(e.to_string())))
        .transpose()
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LldError> {
    postcard::from_bytes(bytes).map_err(|e| LldError::DeserializationError(e.to_string()))
}

// =============================================================================
// DECLARATIVE CONFIGURATION
// =============================================================================

/// An item prototype in declarative form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPrototypeConfig {
    pub id: u64,
    pub rule_id: u64,
    #[serde(flatten)]
    pub templates: ItemText,
    #[serde(default)]
    pub status: u8,
    #[serde(default)]
    pub config: ItemConfig,
    /// Application prototypes resolved per row.
    #[serde(default)]
    pub application_prototypes: Vec<u64>,
    /// Fixed applications.
    #[serde(default)]
    pub applications: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub id: u64,
    pub host_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemConfigEntry {
    pub id: u64,
    pub host_id: u64,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: u64,
    pub host_id: u64,
    pub name: String,
    #[serde(default)]
    pub lifetime_days: Option<u16>,
}

/// Hosts, rules, prototypes and manually managed entities, as loaded from a
/// JSON document by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub hosts: Vec<HostRecord>,
    pub rules: Vec<RuleConfig>,
    pub item_prototypes: Vec<ItemPrototypeConfig>,
    pub application_prototypes: Vec<ApplicationPrototype>,
    /// Manually created applications.
    pub applications: Vec<ApplicationConfig>,
    /// Manually created items.
    pub items: Vec<ItemConfigEntry>,
}

// =============================================================================
// CATALOG
// =============================================================================

/// Row counts for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub hosts: usize,
    pub rules: usize,
    pub item_prototypes: usize,
    pub application_prototypes: usize,
    pub items: usize,
    pub discovered_items: usize,
    pub applications: usize,
    pub discovered_applications: usize,
    pub links: usize,
}

/// In-memory relational state shared by all backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    next_id: u64,
    hosts: BTreeMap<u64, HostRecord>,
    rules: BTreeMap<u64, RuleRecord>,
    item_prototypes: BTreeMap<u64, ItemPrototype>,
    application_prototypes: BTreeMap<u64, ApplicationPrototype>,
    memberships: BTreeMap<u64, MembershipRecord>,
    items: BTreeMap<u64, ItemRecord>,
    item_discovery: BTreeMap<u64, ItemDiscoveryRecord>,
    applications: BTreeMap<u64, ApplicationRecord>,
    application_discovery: BTreeMap<u64, ApplicationDiscoveryRecord>,
    links: BTreeMap<u64, StoredLink>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id the sequence will hand out.
    #[must_use]
    pub const fn next_id(&self) -> u64 {
        self.next_id
    }

    fn allocate(&mut self) -> u64 {
        self.next_id = self.next_id.max(1);
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    fn reserve(&mut self, id: u64) {
        self.next_id = self.next_id.max(id.saturating_add(1));
    }

    #[must_use]
    pub fn contains_host(&self, host: HostId) -> bool {
        self.hosts.contains_key(&host.0)
    }

    #[must_use]
    pub fn rule(&self, rule: RuleId) -> Option<&RuleRecord> {
        self.rules.get(&rule.0)
    }

    pub fn rules(&self) -> impl Iterator<Item = &RuleRecord> {
        self.rules.values()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.values()
    }

    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&ItemRecord> {
        self.items.get(&id.0)
    }

    #[must_use]
    pub fn item_discovery(&self, id: ItemId) -> Option<&ItemDiscoveryRecord> {
        self.item_discovery.get(&id.0)
    }

    #[must_use]
    pub fn application(&self, id: ApplicationId) -> Option<&ApplicationRecord> {
        self.applications.get(&id.0)
    }

    pub fn application_discoveries(&self) -> impl Iterator<Item = &ApplicationDiscoveryRecord> {
        self.application_discovery.values()
    }

    pub fn links(&self) -> impl Iterator<Item = &StoredLink> {
        self.links.values()
    }

    #[must_use]
    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            hosts: self.hosts.len(),
            rules: self.rules.len(),
            item_prototypes: self.item_prototypes.len(),
            application_prototypes: self.application_prototypes.len(),
            items: self.items.len(),
            discovered_items: self.item_discovery.len(),
            applications: self.applications.len(),
            discovered_applications: self
                .applications
                .values()
                .filter(|a| a.kind == ApplicationKind::Discovered)
                .count(),
            links: self.links.len(),
        }
    }

    /// Discovered items of a rule with their discovery records, by id.
    #[must_use]
    pub fn discovered_items(&self, rule: RuleId) -> Vec<(&ItemRecord, &ItemDiscoveryRecord)> {
        let prototypes = self.rule_item_prototypes(rule);
        self.item_discovery
            .values()
            .filter(|d| prototypes.contains(&d.prototype_id))
            .filter_map(|d| self.items.get(&d.item_id.0).map(|item| (item, d)))
            .collect()
    }

    fn rule_item_prototypes(&self, rule: RuleId) -> BTreeSet<PrototypeId> {
        self.item_prototypes
            .values()
            .filter(|p| p.rule_id == rule)
            .map(|p| p.id)
            .collect()
    }

    fn application_prototype_rule(&self, prototype: ApplicationPrototypeId) -> Option<RuleId> {
        self.application_prototypes
            .get(&prototype.0)
            .map(|p| p.rule_id)
    }

    fn require_rule(&self, rule: RuleId) -> Result<(), LldError> {
        if self.rules.contains_key(&rule.0) {
            Ok(())
        } else {
            Err(LldError::RuleNotFound(rule))
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn item_prototypes(&self, rule: RuleId) -> Result<Vec<ItemPrototype>, LldError> {
        self.require_rule(rule)?;
        Ok(self
            .item_prototypes
            .values()
            .filter(|p| p.rule_id == rule)
            .cloned()
            .collect())
    }

    pub fn application_prototypes(
        &self,
        rule: RuleId,
    ) -> Result<Vec<ApplicationPrototype>, LldError> {
        self.require_rule(rule)?;
        Ok(self
            .application_prototypes
            .values()
            .filter(|p| p.rule_id == rule)
            .cloned()
            .collect())
    }

    #[must_use]
    pub fn item_application_prototypes(
        &self,
        prototypes: &[PrototypeId],
    ) -> Vec<(PrototypeId, ApplicationAssociation)> {
        let wanted: BTreeSet<PrototypeId> = prototypes.iter().copied().collect();
        self.memberships
            .values()
            .filter(|m| wanted.contains(&m.prototype_id))
            .map(|m| (m.prototype_id, m.association))
            .collect()
    }

    #[must_use]
    pub fn existing_items(&self, prototypes: &[PrototypeId]) -> Vec<StoredItem> {
        let wanted: BTreeSet<PrototypeId> = prototypes.iter().copied().collect();
        self.item_discovery
            .values()
            .filter(|d| wanted.contains(&d.prototype_id))
            .filter_map(|d| {
                self.items.get(&d.item_id.0).map(|item| StoredItem {
                    id: item.id,
                    prototype_id: d.prototype_id,
                    key_template: d.key_template.clone(),
                    text: item.text.clone(),
                    config: item.config.clone(),
                    last_seen: d.last_seen,
                    delete_at: d.delete_at,
                })
            })
            .collect()
    }

    #[must_use]
    pub fn existing_applications(&self, rule: RuleId) -> Vec<StoredApplication> {
        let mut found: Vec<StoredApplication> = self
            .application_discovery
            .values()
            .filter(|d| self.application_prototype_rule(d.prototype_id) == Some(rule))
            .filter_map(|d| {
                self.applications
                    .get(&d.application_id.0)
                    .map(|app| StoredApplication {
                        id: app.id,
                        prototype_id: d.prototype_id,
                        discovery_id: d.id,
                        name: app.name.clone(),
                        name_template: d.name_template.clone(),
                        last_seen: d.last_seen,
                        delete_at: d.delete_at,
                    })
            })
            .collect();
        found.sort_by_key(|a| (a.id, a.discovery_id));
        found
    }

    #[must_use]
    pub fn existing_item_application_links(&self, rule: RuleId) -> Vec<StoredLink> {
        let prototypes = self.rule_item_prototypes(rule);
        self.links
            .values()
            .filter(|link| {
                self.item_discovery
                    .get(&link.item_id.0)
                    .is_some_and(|d| prototypes.contains(&d.prototype_id))
            })
            .copied()
            .collect()
    }

    #[must_use]
    pub fn conflicting_item_keys(
        &self,
        host: HostId,
        keys: &[String],
        exclude: &BTreeSet<ItemId>,
    ) -> Vec<String> {
        let wanted: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
        let taken: BTreeSet<String> = self
            .items
            .values()
            .filter(|item| item.host_id == host && !exclude.contains(&item.id))
            .filter(|item| wanted.contains(item.text.key.as_str()))
            .map(|item| item.text.key.clone())
            .collect();
        taken.into_iter().collect()
    }

    #[must_use]
    pub fn host_applications_named(&self, host: HostId, names: &[String]) -> Vec<HostApplication> {
        let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        self.applications
            .values()
            .filter(|app| app.host_id == host && wanted.contains(app.name.as_str()))
            .map(|app| HostApplication {
                id: app.id,
                name: app.name.clone(),
                discovered: app.kind == ApplicationKind::Discovered,
            })
            .collect()
    }

    /// Discovery records of `application` held by prototypes of other rules.
    fn claimed_elsewhere(&self, application: ApplicationId, rule: RuleId) -> bool {
        self.application_discovery.values().any(|d| {
            d.application_id == application
                && self
                    .application_prototype_rule(d.prototype_id)
                    .is_some_and(|owner| owner != rule)
        })
    }

    #[must_use]
    pub fn names_shared_with_other_rules(
        &self,
        host: HostId,
        rule: RuleId,
        names: &[String],
    ) -> Vec<String> {
        let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let shared: BTreeSet<String> = self
            .applications
            .values()
            .filter(|app| app.host_id == host && wanted.contains(app.name.as_str()))
            .filter(|app| self.claimed_elsewhere(app.id, rule))
            .map(|app| app.name.clone())
            .collect();
        shared.into_iter().collect()
    }

    #[must_use]
    pub fn applications_claimed_elsewhere(
        &self,
        rule: RuleId,
        applications: &[ApplicationId],
    ) -> BTreeSet<ApplicationId> {
        applications
            .iter()
            .copied()
            .filter(|&id| self.claimed_elsewhere(id, rule))
            .collect()
    }

    // =========================================================================
    // CYCLE WRITES
    // =========================================================================

    /// Apply a change set. Fails without touching anything if the host is gone.
    pub fn persist(
        &mut self,
        host: HostId,
        changes: &ChangeSet,
    ) -> Result<(AssignedIds, Vec<Mutation>), LldError> {
        if !self.contains_host(host) {
            return Err(LldError::HostNotFound(host));
        }
        let mut journal = Journal::default();
        let mut assigned = AssignedIds::default();

        let removed: BTreeSet<ApplicationId> =
            changes.removed_applications.iter().copied().collect();
        self.delete_applications(&removed, &mut journal);
        for id in &changes.removed_discoveries {
            if self.application_discovery.remove(&id.0).is_some() {
                journal.touch(Table::ApplicationDiscovery, id.0);
            }
        }

        for new in &changes.new_items {
            let id = ItemId(self.allocate());
            self.items.insert(
                id.0,
                ItemRecord {
                    id,
                    host_id: host,
                    kind: ItemKind::Discovered,
                    text: new.text.clone(),
                    config: new.config.clone(),
                    status: new.status,
                },
            );
            self.item_discovery.insert(
                id.0,
                ItemDiscoveryRecord {
                    item_id: id,
                    prototype_id: new.prototype_id,
                    key_template: new.key_template.clone(),
                    last_seen: 0,
                    delete_at: 0,
                },
            );
            journal.touch(Table::Items, id.0);
            journal.touch(Table::ItemDiscovery, id.0);
            assigned.items.insert(new.handle, id);
        }

        for update in &changes.updated_items {
            let Some(item) = self.items.get_mut(&update.item_id.0) else {
                tracing::error!(
                    item = update.item_id.0,
                    "this should never happen: update of a missing item"
                );
                continue;
            };
            for &field in &update.changed {
                if let (Some(target), Some(value)) =
                    (item.text.get_mut(field), update.text.get(field))
                {
                    value.clone_into(target);
                }
            }
            item.config.apply(&update.config, &update.changed);
            journal.touch(Table::Items, update.item_id.0);

            if let Some(template) = &update.key_template
                && update.changed.contains(&ItemField::Key)
                && let Some(discovery) = self.item_discovery.get_mut(&update.item_id.0)
            {
                template.clone_into(&mut discovery.key_template);
                journal.touch(Table::ItemDiscovery, update.item_id.0);
            }
        }

        for new in &changes.new_applications {
            let id = ApplicationId(self.allocate());
            self.applications.insert(
                id.0,
                ApplicationRecord {
                    id,
                    host_id: host,
                    name: new.name.clone(),
                    kind: ApplicationKind::Discovered,
                },
            );
            journal.touch(Table::Applications, id.0);
            assigned.applications.insert(new.handle, id);
        }

        for rename in &changes.renames {
            if let Some(app) = self.applications.get_mut(&rename.application_id.0) {
                rename.name.clone_into(&mut app.name);
                journal.touch(Table::Applications, rename.application_id.0);
            }
            if let Some(discovery) = self.application_discovery.get_mut(&rename.discovery_id.0) {
                rename.name_template.clone_into(&mut discovery.name_template);
                journal.touch(Table::ApplicationDiscovery, rename.discovery_id.0);
            }
        }

        for insert in &changes.discovery_inserts {
            let Some(application_id) = assigned.application(insert.application) else {
                tracing::error!("this should never happen: discovery record for an unsaved application");
                continue;
            };
            let id = DiscoveryId(self.allocate());
            self.application_discovery.insert(
                id.0,
                ApplicationDiscoveryRecord {
                    id,
                    application_id,
                    prototype_id: insert.prototype_id,
                    name_template: insert.name_template.clone(),
                    last_seen: 0,
                    delete_at: 0,
                },
            );
            journal.touch(Table::ApplicationDiscovery, id.0);
            assigned.discoveries.insert(insert.owner, id);
        }

        for id in &changes.link_deletes {
            if self.links.remove(&id.0).is_some() {
                journal.touch(Table::ItemsApplications, id.0);
            }
        }
        if !changes.link_inserts.is_empty() {
            let mut pairs: BTreeSet<(ItemId, ApplicationId)> = self
                .links
                .values()
                .map(|l| (l.item_id, l.application_id))
                .collect();
            for (item, application) in &changes.link_inserts {
                self.insert_link(*item, *application, &assigned, &mut pairs, &mut journal);
            }
        }

        Ok((assigned, journal.into_vec()))
    }

    fn insert_link(
        &mut self,
        item: ItemRef,
        application: ApplicationRef,
        assigned: &AssignedIds,
        pairs: &mut BTreeSet<(ItemId, ApplicationId)>,
        journal: &mut Journal,
    ) {
        let (Some(item_id), Some(application_id)) =
            (assigned.item(item), assigned.application(application))
        else {
            tracing::error!("this should never happen: link to an unsaved entity");
            return;
        };
        if !self.items.contains_key(&item_id.0) || !self.applications.contains_key(&application_id.0)
        {
            tracing::warn!(
                item = item_id.0,
                application = application_id.0,
                "skipping link to a removed entity"
            );
            return;
        }
        if !pairs.insert((item_id, application_id)) {
            return;
        }
        let id = LinkId(self.allocate());
        self.links.insert(
            id.0,
            StoredLink {
                id,
                item_id,
                application_id,
            },
        );
        journal.touch(Table::ItemsApplications, id.0);
    }

    fn delete_items(&mut self, ids: &BTreeSet<ItemId>, journal: &mut Journal) {
        if ids.is_empty() {
            return;
        }
        for id in ids {
            if self.items.remove(&id.0).is_some() {
                journal.touch(Table::Items, id.0);
            }
            if self.item_discovery.remove(&id.0).is_some() {
                journal.touch(Table::ItemDiscovery, id.0);
            }
        }
        self.drop_links(|l| ids.contains(&l.item_id), journal);
    }

    fn delete_applications(&mut self, ids: &BTreeSet<ApplicationId>, journal: &mut Journal) {
        if ids.is_empty() {
            return;
        }
        for id in ids {
            if self.applications.remove(&id.0).is_some() {
                journal.touch(Table::Applications, id.0);
            }
        }
        let records: Vec<u64> = self
            .application_discovery
            .values()
            .filter(|d| ids.contains(&d.application_id))
            .map(|d| d.id.0)
            .collect();
        for record in records {
            self.application_discovery.remove(&record);
            journal.touch(Table::ApplicationDiscovery, record);
        }
        self.drop_links(|l| ids.contains(&l.application_id), journal);
    }

    /// Remove every link matching `doomed` in one pass over the table.
    fn drop_links(&mut self, doomed: impl Fn(&StoredLink) -> bool, journal: &mut Journal) {
        let links: Vec<u64> = self
            .links
            .values()
            .filter(|l| doomed(*l))
            .map(|l| l.id.0)
            .collect();
        for link in links {
            self.links.remove(&link);
            journal.touch(Table::ItemsApplications, link);
        }
    }

    /// Apply a lifecycle plan. Fails without touching anything if the host
    /// is gone.
    pub fn sweep(&mut self, host: HostId, plan: &SweepPlan) -> Result<Vec<Mutation>, LldError> {
        if !self.contains_host(host) {
            return Err(LldError::HostNotFound(host));
        }
        let mut journal = Journal::default();

        for id in &plan.items_seen {
            if let Some(d) = self.item_discovery.get_mut(&id.0) {
                d.last_seen = plan.now;
                d.delete_at = 0;
                journal.touch(Table::ItemDiscovery, id.0);
            }
        }
        for (id, due) in &plan.items_scheduled {
            if let Some(d) = self.item_discovery.get_mut(&id.0) {
                d.delete_at = *due;
                journal.touch(Table::ItemDiscovery, id.0);
            }
        }
        let expired: BTreeSet<ItemId> = plan.items_expired.iter().copied().collect();
        self.delete_items(&expired, &mut journal);

        for id in &plan.discoveries_seen {
            if let Some(d) = self.application_discovery.get_mut(&id.0) {
                d.last_seen = plan.now;
                d.delete_at = 0;
                journal.touch(Table::ApplicationDiscovery, id.0);
            }
        }
        for (id, due) in &plan.discoveries_scheduled {
            if let Some(d) = self.application_discovery.get_mut(&id.0) {
                d.delete_at = *due;
                journal.touch(Table::ApplicationDiscovery, id.0);
            }
        }
        for id in &plan.discoveries_expired {
            if self.application_discovery.remove(&id.0).is_some() {
                journal.touch(Table::ApplicationDiscovery, id.0);
            }
        }
        let expired: BTreeSet<ApplicationId> = plan.applications_expired.iter().copied().collect();
        self.delete_applications(&expired, &mut journal);

        Ok(journal.into_vec())
    }

    /// Delete a host record. Entities on the host are left for the caller.
    pub fn remove_host(&mut self, host: HostId) -> Option<Mutation> {
        self.hosts.remove(&host.0).map(|_| Mutation {
            table: Table::Hosts,
            id: host.0,
        })
    }

    /// Store the report of the last cycle on the rule.
    pub fn set_rule_error(&mut self, rule: RuleId, error: &str) -> Result<Vec<Mutation>, LldError> {
        let record = self
            .rules
            .get_mut(&rule.0)
            .ok_or(LldError::RuleNotFound(rule))?;
        if record.last_error == error {
            return Ok(Vec::new());
        }
        error.clone_into(&mut record.last_error);
        Ok(vec![Mutation {
            table: Table::Rules,
            id: rule.0,
        }])
    }

    // =========================================================================
    // DECLARATIVE CONFIGURATION
    // =========================================================================

    /// Insert or replace the configured records. References are checked
    /// against the configuration merged with the current catalog.
    pub fn apply_config(&mut self, config: &DiscoveryConfig) -> Result<Vec<Mutation>, LldError> {
        let mut next = self.clone();
        let mut journal = Journal::default();

        for host in &config.hosts {
            next.reserve(host.id.0);
            next.hosts.insert(host.id.0, host.clone());
            journal.touch(Table::Hosts, host.id.0);
        }

        for rule in &config.rules {
            if !next.hosts.contains_key(&rule.host_id) {
                return Err(LldError::InvalidConfig(format!(
                    "rule {} references unknown host {}",
                    rule.id, rule.host_id
                )));
            }
            if rule
                .lifetime_days
                .is_some_and(|days| days > crate::primitives::MAX_LIFETIME_DAYS)
            {
                return Err(LldError::InvalidConfig(format!(
                    "rule {} lifetime exceeds {} days",
                    rule.id,
                    crate::primitives::MAX_LIFETIME_DAYS
                )));
            }
            let last_error = next
                .rules
                .get(&rule.id)
                .map(|r| r.last_error.clone())
                .unwrap_or_default();
            next.reserve(rule.id);
            next.rules.insert(
                rule.id,
                RuleRecord {
                    id: RuleId(rule.id),
                    host_id: HostId(rule.host_id),
                    name: rule.name.clone(),
                    lifetime_days: rule.lifetime_days,
                    last_error,
                },
            );
            journal.touch(Table::Rules, rule.id);
        }

        for app in &config.applications {
            if !next.hosts.contains_key(&app.host_id) {
                return Err(LldError::InvalidConfig(format!(
                    "application {} references unknown host {}",
                    app.id, app.host_id
                )));
            }
            next.reserve(app.id);
            next.applications.insert(
                app.id,
                ApplicationRecord {
                    id: ApplicationId(app.id),
                    host_id: HostId(app.host_id),
                    name: app.name.clone(),
                    kind: ApplicationKind::Normal,
                },
            );
            journal.touch(Table::Applications, app.id);
        }

        for item in &config.items {
            if !next.hosts.contains_key(&item.host_id) {
                return Err(LldError::InvalidConfig(format!(
                    "item {} references unknown host {}",
                    item.id, item.host_id
                )));
            }
            next.reserve(item.id);
            next.items.insert(
                item.id,
                ItemRecord {
                    id: ItemId(item.id),
                    host_id: HostId(item.host_id),
                    kind: ItemKind::Normal,
                    text: ItemText {
                        name: item.name.clone(),
                        key: item.key.clone(),
                        ..ItemText::default()
                    },
                    config: ItemConfig::default(),
                    status: 0,
                },
            );
            journal.touch(Table::Items, item.id);
        }

        for prototype in &config.application_prototypes {
            if !next.rules.contains_key(&prototype.rule_id.0) {
                return Err(LldError::InvalidConfig(format!(
                    "application prototype {} references unknown rule {}",
                    prototype.id.0, prototype.rule_id.0
                )));
            }
            next.reserve(prototype.id.0);
            next.application_prototypes
                .insert(prototype.id.0, prototype.clone());
            journal.touch(Table::ApplicationPrototypes, prototype.id.0);
        }

        for prototype in &config.item_prototypes {
            next.apply_item_prototype(prototype, &mut journal)?;
        }

        *self = next;
        Ok(journal.into_vec())
    }

    fn apply_item_prototype(
        &mut self,
        prototype: &ItemPrototypeConfig,
        journal: &mut Journal,
    ) -> Result<(), LldError> {
        if !self.rules.contains_key(&prototype.rule_id) {
            return Err(LldError::InvalidConfig(format!(
                "item prototype {} references unknown rule {}",
                prototype.id, prototype.rule_id
            )));
        }
        self.reserve(prototype.id);
        self.item_prototypes.insert(
            prototype.id,
            ItemPrototype {
                id: PrototypeId(prototype.id),
                rule_id: RuleId(prototype.rule_id),
                templates: prototype.templates.clone(),
                status: prototype.status,
                config: prototype.config.clone(),
            },
        );
        journal.touch(Table::ItemPrototypes, prototype.id);

        // Memberships are replaced wholesale.
        let stale: Vec<u64> = self
            .memberships
            .values()
            .filter(|m| m.prototype_id.0 == prototype.id)
            .map(|m| m.id)
            .collect();
        for id in stale {
            self.memberships.remove(&id);
            journal.touch(Table::ItemApplicationPrototypes, id);
        }

        let mut associations = Vec::new();
        for &id in &prototype.application_prototypes {
            let owner = self.application_prototype_rule(ApplicationPrototypeId(id));
            if owner != Some(RuleId(prototype.rule_id)) {
                return Err(LldError::InvalidConfig(format!(
                    "item prototype {} references application prototype {id} of another rule",
                    prototype.id
                )));
            }
            associations.push(ApplicationAssociation::Prototype(ApplicationPrototypeId(id)));
        }
        for &id in &prototype.applications {
            if !self.applications.contains_key(&id) {
                return Err(LldError::InvalidConfig(format!(
                    "item prototype {} references unknown application {id}",
                    prototype.id
                )));
            }
            associations.push(ApplicationAssociation::Application(ApplicationId(id)));
        }
        for association in associations {
            let id = self.allocate();
            self.memberships.insert(
                id,
                MembershipRecord {
                    id,
                    prototype_id: PrototypeId(prototype.id),
                    association,
                },
            );
            journal.touch(Table::ItemApplicationPrototypes, id);
        }
        Ok(())
    }

    // =========================================================================
    // RECORD ENCODING
    // =========================================================================

    /// Serialized state of a record, `None` if it does not exist.
    pub fn encode(&self, table: Table, id: u64) -> Result<Option<Vec<u8>>, LldError> {
        match table {
            Table::Hosts => encode(self.hosts.get(&id)),
            Table::Rules => encode(self.rules.get(&id)),
            Table::ItemPrototypes => encode(self.item_prototypes.get(&id)),
            Table::ApplicationPrototypes => encode(self.application_prototypes.get(&id)),
            Table::ItemApplicationPrototypes => encode(self.memberships.get(&id)),
            Table::Items => encode(self.items.get(&id)),
            Table::ItemDiscovery => encode(self.item_discovery.get(&id)),
            Table::Applications => encode(self.applications.get(&id)),
            Table::ApplicationDiscovery => encode(self.application_discovery.get(&id)),
            Table::ItemsApplications => encode(self.links.get(&id)),
        }
    }

    /// Every key of a table, for full exports.
    #[must_use]
    pub fn keys(&self, table: Table) -> Vec<u64> {
        match table {
            Table::Hosts => self.hosts.keys().copied().collect(),
            Table::Rules => self.rules.keys().copied().collect(),
            Table::ItemPrototypes => self.item_prototypes.keys().copied().collect(),
            Table::ApplicationPrototypes => self.application_prototypes.keys().copied().collect(),
            Table::ItemApplicationPrototypes => self.memberships.keys().copied().collect(),
            Table::Items => self.items.keys().copied().collect(),
            Table::ItemDiscovery => self.item_discovery.keys().copied().collect(),
            Table::Applications => self.applications.keys().copied().collect(),
            Table::ApplicationDiscovery => self.application_discovery.keys().copied().collect(),
            Table::ItemsApplications => self.links.keys().copied().collect(),
        }
    }

    /// Load a serialized record, as written by `encode`.
    pub fn load(&mut self, table: Table, id: u64, bytes: &[u8]) -> Result<(), LldError> {
        match table {
            Table::Hosts => {
                self.hosts.insert(id, decode(bytes)?);
            }
            Table::Rules => {
                self.rules.insert(id, decode(bytes)?);
            }
            Table::ItemPrototypes => {
                self.item_prototypes.insert(id, decode(bytes)?);
            }
            Table::ApplicationPrototypes => {
                self.application_prototypes.insert(id, decode(bytes)?);
            }
            Table::ItemApplicationPrototypes => {
                self.memberships.insert(id, decode(bytes)?);
            }
            Table::Items => {
                self.items.insert(id, decode(bytes)?);
            }
            Table::ItemDiscovery => {
                self.item_discovery.insert(id, decode(bytes)?);
            }
            Table::Applications => {
                self.applications.insert(id, decode(bytes)?);
            }
            Table::ApplicationDiscovery => {
                self.application_discovery.insert(id, decode(bytes)?);
            }
            Table::ItemsApplications => {
                self.links.insert(id, decode(bytes)?);
            }
        }
        self.reserve(id);
        Ok(())
    }

    /// Restore the id sequence from persisted metadata.
    pub fn set_next_id(&mut self, next_id: u64) {
        self.next_id = self.next_id.max(next_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ItemUpdate, NewApplication, NewItem};
    use crate::types::{ApplicationHandle, ItemHandle};

    fn seeded() -> Catalog {
        let mut catalog = Catalog::new();
        let config: DiscoveryConfig = DiscoveryConfig {
            hosts: vec![HostRecord {
                id: HostId(1),
                name: "web-01".into(),
            }],
            rules: vec![
                RuleConfig {
                    id: 10,
                    host_id: 1,
                    name: "fs".into(),
                    lifetime_days: Some(7),
                },
                RuleConfig {
                    id: 11,
                    host_id: 1,
                    name: "db".into(),
                    lifetime_days: None,
                },
            ],
            item_prototypes: vec![ItemPrototypeConfig {
                id: 20,
                rule_id: 10,
                templates: ItemText {
                    name: "Free on {#FSNAME}".into(),
                    key: "fs[{#FSNAME}]".into(),
                    ..ItemText::default()
                },
                status: 0,
                config: ItemConfig::default(),
                application_prototypes: vec![30],
                applications: vec![40],
            }],
            application_prototypes: vec![
                ApplicationPrototype {
                    id: ApplicationPrototypeId(30),
                    rule_id: RuleId(10),
                    name: "FS {#FSNAME}".into(),
                },
                ApplicationPrototype {
                    id: ApplicationPrototypeId(31),
                    rule_id: RuleId(11),
                    name: "DB".into(),
                },
            ],
            applications: vec![ApplicationConfig {
                id: 40,
                host_id: 1,
                name: "Filesystems".into(),
            }],
            items: vec![ItemConfigEntry {
                id: 50,
                host_id: 1,
                name: "Agent ping".into(),
                key: "agent.ping".into(),
            }],
        };
        catalog.apply_config(&config).expect("seed");
        catalog
    }

    #[test]
    fn config_seeds_records_and_sequence() {
        let catalog = seeded();
        let stats = catalog.stats();
        assert_eq!(stats.hosts, 1);
        assert_eq!(stats.rules, 2);
        assert_eq!(stats.item_prototypes, 1);
        assert_eq!(stats.items, 1);
        assert!(catalog.next_id() > 50);
        assert_eq!(
            catalog
                .item_application_prototypes(&[PrototypeId(20)])
                .len(),
            2
        );
    }

    #[test]
    fn config_rejects_dangling_references() {
        let mut catalog = Catalog::new();
        let config = DiscoveryConfig {
            rules: vec![RuleConfig {
                id: 10,
                host_id: 99,
                name: "fs".into(),
                lifetime_days: None,
            }],
            ..DiscoveryConfig::default()
        };
        assert!(matches!(
            catalog.apply_config(&config),
            Err(LldError::InvalidConfig(_))
        ));
        assert_eq!(catalog, Catalog::new());
    }

    #[test]
    fn unknown_rule_is_reported() {
        let catalog = seeded();
        assert!(matches!(
            catalog.item_prototypes(RuleId(999)),
            Err(LldError::RuleNotFound(RuleId(999)))
        ));
    }

    #[test]
    fn persist_assigns_ids_and_journals_keys() {
        let mut catalog = seeded();
        let changes = ChangeSet {
            new_items: vec![NewItem {
                handle: ItemHandle(0),
                prototype_id: PrototypeId(20),
                key_template: "fs[{#FSNAME}]".into(),
                text: ItemText {
                    name: "Free on /".into(),
                    key: "fs[/]".into(),
                    ..ItemText::default()
                },
                config: ItemConfig::default(),
                status: 0,
            }],
            new_applications: vec![NewApplication {
                handle: ApplicationHandle(0),
                name: "FS /".into(),
            }],
            link_inserts: vec![(
                ItemRef::ByHandle(ItemHandle(0)),
                ApplicationRef::ByHandle(ApplicationHandle(0)),
            )],
            ..ChangeSet::default()
        };
        let (assigned, journal) = catalog.persist(HostId(1), &changes).expect("persist");
        let item = assigned.items[&ItemHandle(0)];
        assert_eq!(catalog.existing_items(&[PrototypeId(20)])[0].id, item);
        assert_eq!(catalog.links().count(), 1);
        assert!(journal.contains(&Mutation {
            table: Table::ItemDiscovery,
            id: item.0
        }));
        assert_eq!(
            catalog.conflicting_item_keys(HostId(1), &["fs[/]".into()], &BTreeSet::new()),
            vec!["fs[/]".to_string()]
        );
    }

    #[test]
    fn persist_rejects_lost_host() {
        let mut catalog = seeded();
        let before = catalog.clone();
        let result = catalog.persist(HostId(2), &ChangeSet::default());
        assert!(matches!(result, Err(LldError::HostNotFound(HostId(2)))));
        assert_eq!(catalog, before);
    }

    fn new_item(handle: usize, key: &str) -> NewItem {
        NewItem {
            handle: ItemHandle(handle),
            prototype_id: PrototypeId(20),
            key_template: "fs[{#FSNAME}]".into(),
            text: ItemText {
                name: key.into(),
                key: key.into(),
                ..ItemText::default()
            },
            config: ItemConfig::default(),
            status: 0,
        }
    }

    #[test]
    fn duplicate_link_inserts_are_stored_once() {
        let mut catalog = seeded();
        let item = ItemRef::ByHandle(ItemHandle(0));
        let fixed = ApplicationRef::ById(ApplicationId(40));
        let changes = ChangeSet {
            new_items: vec![new_item(0, "fs[/]")],
            link_inserts: vec![(item, fixed), (item, fixed)],
            ..ChangeSet::default()
        };
        let (assigned, _) = catalog.persist(HostId(1), &changes).expect("persist");
        assert_eq!(catalog.links().count(), 1);

        let again = ChangeSet {
            link_inserts: vec![(ItemRef::ById(assigned.items[&ItemHandle(0)]), fixed)],
            ..ChangeSet::default()
        };
        catalog.persist(HostId(1), &again).expect("again");
        assert_eq!(catalog.links().count(), 1);
    }

    #[test]
    fn sweep_drops_links_of_expired_items_only() {
        let mut catalog = seeded();
        let fixed = ApplicationRef::ById(ApplicationId(40));
        let changes = ChangeSet {
            new_items: vec![new_item(0, "fs[/]"), new_item(1, "fs[/tmp]")],
            link_inserts: vec![
                (ItemRef::ByHandle(ItemHandle(0)), fixed),
                (ItemRef::ByHandle(ItemHandle(1)), fixed),
            ],
            ..ChangeSet::default()
        };
        let (assigned, _) = catalog.persist(HostId(1), &changes).expect("persist");
        let gone = assigned.items[&ItemHandle(0)];
        let kept = assigned.items[&ItemHandle(1)];

        let mut plan = SweepPlan::new(100);
        plan.items_expired.push(gone);
        let journal = catalog.sweep(HostId(1), &plan).expect("sweep");

        assert!(catalog.item(gone).is_none());
        assert!(catalog.item(kept).is_some());
        assert_eq!(catalog.links().map(|l| l.item_id).collect::<Vec<_>>(), vec![kept]);
        assert!(journal.iter().any(|m| m.table == Table::ItemsApplications));
    }

    #[test]
    fn sweep_rejects_lost_host() {
        let mut catalog = seeded();
        let before = catalog.clone();
        let mut plan = SweepPlan::new(100);
        plan.items_expired.push(ItemId(50));
        assert!(matches!(
            catalog.sweep(HostId(2), &plan),
            Err(LldError::HostNotFound(HostId(2)))
        ));
        assert_eq!(catalog, before);
    }

    #[test]
    fn sparse_update_writes_only_changed_columns() {
        let mut catalog = seeded();
        let mut changed = crate::field::FieldSet::new();
        changed.insert(ItemField::Name);
        let update = ItemUpdate {
            item_id: ItemId(50),
            changed,
            text: ItemText {
                name: "Renamed".into(),
                key: "ignored".into(),
                ..ItemText::default()
            },
            config: ItemConfig::default(),
            key_template: None,
        };
        catalog
            .persist(
                HostId(1),
                &ChangeSet {
                    updated_items: vec![update],
                    ..ChangeSet::default()
                },
            )
            .expect("persist");
        let item = catalog.item(ItemId(50)).expect("item");
        assert_eq!(item.text.name, "Renamed");
        assert_eq!(item.text.key, "agent.ping");
    }

    #[test]
    fn records_survive_encoding() {
        let catalog = seeded();
        let mut copy = Catalog::new();
        for table in Table::ALL {
            for id in catalog.keys(table) {
                let bytes = catalog.encode(table, id).expect("encode").expect("present");
                copy.load(table, id, &bytes).expect("load");
            }
        }
        copy.set_next_id(catalog.next_id());
        assert_eq!(copy, catalog);
    }

    #[test]
    fn claims_from_other_rules() {
        let mut catalog = seeded();
        let changes = ChangeSet {
            discovery_inserts: vec![crate::storage::DiscoveryInsert {
                owner: ApplicationHandle(0),
                application: ApplicationRef::ById(ApplicationId(40)),
                prototype_id: ApplicationPrototypeId(31),
                name_template: "DB".into(),
            }],
            ..ChangeSet::default()
        };
        catalog.persist(HostId(1), &changes).expect("persist");
        assert!(
            catalog
                .applications_claimed_elsewhere(RuleId(10), &[ApplicationId(40)])
                .contains(&ApplicationId(40))
        );
        assert!(
            catalog
                .applications_claimed_elsewhere(RuleId(11), &[ApplicationId(40)])
                .is_empty()
        );
        assert_eq!(
            catalog.names_shared_with_other_rules(HostId(1), RuleId(10), &["Filesystems".into()]),
            vec!["Filesystems".to_string()]
        );
    }
}

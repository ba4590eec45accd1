//! # In-Memory Store
//!
//! A `Catalog` held in process memory. Writes are staged on a copy and
//! swapped in only when the whole batch applied, so a failed write leaves
//! the store untouched.

use super::catalog::{Catalog, DiscoveryConfig};
use super::{AssignedIds, ChangeSet, DiscoveryStore, HostApplication, SweepPlan};
use crate::model::{
    ApplicationAssociation, ApplicationPrototype, ItemPrototype, StoredApplication, StoredItem,
    StoredLink,
};
use crate::types::{ApplicationId, HostId, ItemId, LldError, PrototypeId, RuleId};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    catalog: Catalog,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn from_catalog(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, LldError> {
        let mut store = Self::new();
        store.apply_config(config)?;
        Ok(store)
    }

    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }

    pub fn apply_config(&mut self, config: &DiscoveryConfig) -> Result<(), LldError> {
        self.catalog.apply_config(config).map(|_| ())
    }

    pub fn set_rule_error(&mut self, rule: RuleId, error: &str) -> Result<(), LldError> {
        self.catalog.set_rule_error(rule, error).map(|_| ())
    }

    /// Remove a host record. Its entities stay; later cycles fail to persist.
    pub fn remove_host(&mut self, host: HostId) -> bool {
        self.catalog.remove_host(host).is_some()
    }
}

impl DiscoveryStore for MemoryStore {
    fn item_prototypes(&self, rule: RuleId) -> Result<Vec<ItemPrototype>, LldError> {
        self.catalog.item_prototypes(rule)
    }

    fn application_prototypes(
        &self,
        rule: RuleId,
    ) -> Result<Vec<ApplicationPrototype>, LldError> {
        self.catalog.application_prototypes(rule)
    }

    fn item_application_prototypes(
        &self,
        prototypes: &[PrototypeId],
    ) -> Result<Vec<(PrototypeId, ApplicationAssociation)>, LldError> {
        Ok(self.catalog.item_application_prototypes(prototypes))
    }

    fn existing_items(&self, prototypes: &[PrototypeId]) -> Result<Vec<StoredItem>, LldError> {
        Ok(self.catalog.existing_items(prototypes))
    }

    fn existing_applications(&self, rule: RuleId) -> Result<Vec<StoredApplication>, LldError> {
        Ok(self.catalog.existing_applications(rule))
    }

    fn existing_item_application_links(&self, rule: RuleId) -> Result<Vec<StoredLink>, LldError> {
        Ok(self.catalog.existing_item_application_links(rule))
    }

    fn conflicting_item_keys(
        &self,
        host: HostId,
        keys: &[String],
        exclude: &BTreeSet<ItemId>,
    ) -> Result<Vec<String>, LldError> {
        Ok(self.catalog.conflicting_item_keys(host, keys, exclude))
    }

    fn host_applications_named(
        &self,
        host: HostId,
        names: &[String],
    ) -> Result<Vec<HostApplication>, LldError> {
        Ok(self.catalog.host_applications_named(host, names))
    }

    fn names_shared_with_other_rules(
        &self,
        host: HostId,
        rule: RuleId,
        names: &[String],
    ) -> Result<Vec<String>, LldError> {
        Ok(self
            .catalog
            .names_shared_with_other_rules(host, rule, names))
    }

    fn applications_claimed_elsewhere(
        &self,
        rule: RuleId,
        applications: &[ApplicationId],
    ) -> Result<BTreeSet<ApplicationId>, LldError> {
        Ok(self
            .catalog
            .applications_claimed_elsewhere(rule, applications))
    }

    fn persist(&mut self, host: HostId, changes: &ChangeSet) -> Result<AssignedIds, LldError> {
        let mut staged = self.catalog.clone();
        let (assigned, _) = staged.persist(host, changes)?;
        self.catalog = staged;
        Ok(assigned)
    }

    fn apply_sweep(&mut self, host: HostId, plan: &SweepPlan) -> Result<(), LldError> {
        self.catalog.sweep(host, plan).map(|_| ())
    }
}

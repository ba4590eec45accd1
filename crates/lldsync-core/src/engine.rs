//! # Reconciler
//!
//! One discovery cycle, end to end:
//!
//! ```text
//! load -> merge (items, applications) -> validate -> resolve conflicts
//!      -> resolve links -> persist -> publish row links -> lifecycle sweep
//! ```
//!
//! The cycle is a single synchronous pass over a `Batch`. The store sees
//! exactly two write batches: the change set and the sweep plan. Either may
//! be skipped when empty. A storage error aborts the cycle before the sweep;
//! rejections of individual entities only add lines to the report.

use crate::batch::Batch;
use crate::conflict::{ConflictResolver, ConflictStats};
use crate::field::ItemField;
use crate::lifecycle::{Lifetime, LifecycleSweep};
use crate::links::LinkResolver;
use crate::merge::{ApplicationMerger, ItemMerger};
use crate::model::{Application, ApplicationFlag, Item};
use crate::report::ErrorReport;
use crate::row::{ItemLink, Row};
use crate::storage::{
    ApplicationRename, AssignedIds, ChangeSet, DiscoveryInsert, DiscoveryStore, ItemUpdate,
    NewApplication, NewItem,
};
use crate::template::MacroResolver;
use crate::types::{ApplicationHandle, ApplicationRef, HostId, ItemHandle, LldError, RuleId};
use crate::validate::{ApplicationValidator, ItemValidator};
use serde::{Deserialize, Serialize};

// =============================================================================
// REQUEST & STATS
// =============================================================================

/// Parameters of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleRequest {
    pub host_id: HostId,
    pub rule_id: RuleId,
    /// How long lost entities are kept.
    pub lifetime: Lifetime,
    /// Cycle timestamp, unix seconds.
    pub now: i64,
}

/// Counters of a completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub rows: usize,
    pub items_created: usize,
    pub items_updated: usize,
    pub items_discovered: usize,
    pub items_expired: usize,
    pub items_scheduled: usize,
    pub applications_created: usize,
    pub applications_renamed: usize,
    pub applications_discovered: usize,
    pub applications_expired: usize,
    pub applications_merged: usize,
    pub applications_adopted: usize,
    pub applications_split: usize,
    pub links_created: usize,
    pub links_deleted: usize,
    pub rejections: usize,
    /// Whether a change set was written.
    pub persisted: bool,
    /// Whether a sweep plan was written.
    pub swept: bool,
}

impl CycleStats {
    fn absorb_conflicts(&mut self, stats: ConflictStats) {
        self.applications_merged = stats.merged;
        self.applications_adopted = stats.adopted;
        self.applications_split = stats.split;
    }
}

// =============================================================================
// RECONCILER
// =============================================================================

/// Runs discovery cycles against a store.
pub struct Reconciler;

impl Reconciler {
    /// Reconcile `rows` of `request.rule_id` on `request.host_id`.
    ///
    /// On success every row lists the items discovered from it, sorted by
    /// `(prototype, item)`. Rejections are appended to `report`.
    pub fn run<S, R>(
        store: &mut S,
        resolver: &R,
        request: &CycleRequest,
        rows: &mut [Row],
        report: &mut ErrorReport,
    ) -> Result<CycleStats, LldError>
    where
        S: DiscoveryStore + ?Sized,
        R: MacroResolver + ?Sized,
    {
        let reported_before = report.len();
        let mut stats = CycleStats {
            rows: rows.len(),
            ..CycleStats::default()
        };
        tracing::debug!(
            host = request.host_id.0,
            rule = request.rule_id.0,
            rows = rows.len(),
            "discovery cycle started"
        );

        let mut batch = Self::load(&*store, request, rows.len())?;

        ItemMerger::merge(&mut batch, rows, resolver);
        ApplicationMerger::merge(&mut batch, rows, resolver);

        ItemValidator::validate(&mut batch, &*store, report)?;
        ApplicationValidator::validate(&mut batch, report);
        let conflicts = ConflictResolver::resolve(&mut batch, &*store, report)?;
        stats.absorb_conflicts(conflicts);

        let links = LinkResolver::discover(&mut batch);
        stats.links_created = links.created;

        let changes = Self::change_set(&batch);
        stats.items_created = changes.new_items.len();
        stats.items_updated = changes.updated_items.len();
        stats.applications_created = changes.new_applications.len();
        stats.applications_renamed = changes.renames.len();
        stats.links_deleted = changes.link_deletes.len();

        if !changes.is_empty() {
            let assigned = store.persist(request.host_id, &changes)?;
            Self::assign(&mut batch, &assigned);
            stats.persisted = true;
        }

        Self::publish_item_links(&batch, rows);

        stats.items_discovered = batch.items.iter().filter(|i| i.discovered).count();
        stats.applications_discovered = batch
            .applications
            .iter()
            .filter(|a| a.is_discovered())
            .count();

        let plan = LifecycleSweep::plan(&batch, &*store, request.lifetime, request.now)?;
        stats.items_expired = plan.items_expired.len();
        stats.items_scheduled = plan.items_scheduled.len();
        stats.applications_expired = plan.applications_expired.len();
        if !plan.is_empty() {
            store.apply_sweep(request.host_id, &plan)?;
            stats.swept = true;
        }

        stats.rejections = report.len() - reported_before;
        tracing::debug!(?stats, "discovery cycle finished");
        Ok(stats)
    }

    /// Build the batch from prototypes and everything this rule discovered
    /// before.
    fn load<S: DiscoveryStore + ?Sized>(
        store: &S,
        request: &CycleRequest,
        row_count: usize,
    ) -> Result<Batch, LldError> {
        let prototypes = store.item_prototypes(request.rule_id)?;
        let application_prototypes = store.application_prototypes(request.rule_id)?;
        let prototype_ids: Vec<_> = prototypes.iter().map(|p| p.id).collect();
        let associations = store.item_application_prototypes(&prototype_ids)?;

        let mut batch = Batch::new(
            request.host_id,
            request.rule_id,
            row_count,
            prototypes,
            application_prototypes,
            &associations,
        );

        for stored in store.existing_items(&prototype_ids)? {
            let Some(prototype) = batch.prototype(stored.prototype_id) else {
                tracing::error!(
                    item = stored.id.0,
                    "this should never happen: stored item without prototype"
                );
                continue;
            };
            let item = Item::from_stored(stored, prototype);
            batch.push_item(item);
        }
        for stored in store.existing_applications(request.rule_id)? {
            batch.push_application(Application::from_stored(stored));
        }
        batch.seed_links(&store.existing_item_application_links(request.rule_id)?);

        tracing::debug!(
            prototypes = batch.prototypes.len(),
            items = batch.items.len(),
            applications = batch.applications.len(),
            links = batch.links.len(),
            "batch loaded"
        );
        Ok(batch)
    }

    /// Collect every write of the cycle.
    #[must_use]
    pub fn change_set(batch: &Batch) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for (index, item) in batch.items.iter().enumerate() {
            if !item.discovered {
                continue;
            }
            let Some(prototype) = batch.prototype(item.prototype_id) else {
                continue;
            };
            if item.is_new() {
                changes.new_items.push(NewItem {
                    handle: ItemHandle(index),
                    prototype_id: item.prototype_id,
                    key_template: item.key_template.clone(),
                    text: item.text(),
                    config: prototype.config.clone(),
                    status: prototype.status,
                });
            } else if !item.changed.is_empty() {
                changes.updated_items.push(ItemUpdate {
                    item_id: item.id,
                    changed: item.changed.clone(),
                    text: item.text(),
                    config: prototype.config.clone(),
                    key_template: item
                        .changed
                        .contains(&ItemField::Key)
                        .then(|| prototype.templates.key.clone()),
                });
            }
        }

        for (index, app) in batch.applications.iter().enumerate() {
            let handle = ApplicationHandle(index);
            if app.flags.contains(ApplicationFlag::Remove) {
                changes.removed_applications.push(app.id);
                continue;
            }
            if app.flags.contains(ApplicationFlag::RemoveDiscoveryLink) {
                changes.removed_discoveries.push(app.discovery_id);
                continue;
            }
            if !app.is_discovered() {
                continue;
            }
            let template = batch
                .application_prototype(app.prototype_id)
                .map_or_else(|| app.name_template.clone(), |p| p.name.clone());

            if app.is_new() {
                changes.new_applications.push(NewApplication {
                    handle,
                    name: app.name.current().clone(),
                });
            } else if app.flags.contains(ApplicationFlag::NameChanged) {
                changes.renames.push(ApplicationRename {
                    application_id: app.id,
                    discovery_id: app.discovery_id,
                    name: app.name.current().clone(),
                    name_template: template.clone(),
                });
            }
            if app.flags.contains(ApplicationFlag::AddDiscoveryLink) {
                changes.discovery_inserts.push(DiscoveryInsert {
                    owner: handle,
                    application: ApplicationRef::new(app.id, handle),
                    prototype_id: app.prototype_id,
                    name_template: template,
                });
            }
        }

        changes.link_deletes = LinkResolver::deletions(batch);
        changes.link_inserts = LinkResolver::insertions(batch);
        changes
    }

    /// Write assigned ids back into the arenas.
    fn assign(batch: &mut Batch, assigned: &AssignedIds) {
        for (&handle, &id) in &assigned.items {
            if let Some(item) = batch.item_mut(handle) {
                item.id = id;
            }
        }
        for (&handle, &id) in &assigned.applications {
            if let Some(app) = batch.application_mut(handle) {
                app.id = id;
            }
        }
        for (&handle, &id) in &assigned.discoveries {
            if let Some(app) = batch.application_mut(handle) {
                app.discovery_id = id;
            }
        }
    }

    fn publish_item_links(batch: &Batch, rows: &mut [Row]) {
        for item in &batch.items {
            if !item.discovered || item.is_new() {
                continue;
            }
            let Some(row) = item.row.and_then(|handle| rows.get_mut(handle.0)) else {
                continue;
            };
            row.push_item_link(ItemLink {
                prototype_id: item.prototype_id,
                item_id: item.id,
            });
        }
        for row in rows.iter_mut() {
            row.sort_item_links();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::storage::catalog::{DiscoveryConfig, HostRecord, RuleConfig};
    use crate::template::LldMacros;

    fn store() -> MemoryStore {
        MemoryStore::from_config(&DiscoveryConfig {
            hosts: vec![HostRecord {
                id: HostId(1),
                name: "web-01".into(),
            }],
            rules: vec![RuleConfig {
                id: 2,
                host_id: 1,
                name: "empty".into(),
                lifetime_days: None,
            }],
            ..DiscoveryConfig::default()
        })
        .expect("seed")
    }

    fn request(rule: u64) -> CycleRequest {
        CycleRequest {
            host_id: HostId(1),
            rule_id: RuleId(rule),
            lifetime: Lifetime::days(30),
            now: 1_000,
        }
    }

    #[test]
    fn unknown_rule_fails_before_any_write() {
        let mut store = store();
        let before = store.clone();
        let mut report = ErrorReport::new();
        let result = Reconciler::run(
            &mut store,
            &LldMacros,
            &request(99),
            &mut [Row::new()],
            &mut report,
        );
        assert!(matches!(result, Err(LldError::RuleNotFound(RuleId(99)))));
        assert_eq!(store, before);
    }

    #[test]
    fn rule_without_prototypes_writes_nothing() {
        let mut store = store();
        let before = store.clone();
        let mut report = ErrorReport::new();
        let stats = Reconciler::run(
            &mut store,
            &LldMacros,
            &request(2),
            &mut [Row::new().with("{#A}", "1")],
            &mut report,
        )
        .expect("cycle");
        assert!(!stats.persisted);
        assert!(!stats.swept);
        assert_eq!(stats.rows, 1);
        assert!(report.is_empty());
        assert_eq!(store, before);
    }
}

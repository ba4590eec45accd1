//! # Link Resolution
//!
//! Derives item-application links from the application memberships of each
//! discovered item's prototype and decides which persisted links go away.
//!
//! Retention: a persisted link that was not rediscovered survives only while
//! its item is discovered and its application is not. Entities missing from
//! the batch count as not discovered.

use crate::batch::Batch;
use crate::model::{ApplicationAssociation, ItemApplicationLink};
use crate::types::{ApplicationId, ApplicationRef, ItemHandle, ItemId, ItemRef, LinkId};
use std::collections::BTreeSet;

/// Link counters of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub discovered: usize,
    pub created: usize,
}

/// Stored ids of the batch entries discovered this cycle, collected once so
/// retention checks do not scan the arenas per link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredIds {
    items: BTreeSet<ItemId>,
    applications: BTreeSet<ApplicationId>,
}

impl DiscoveredIds {
    #[must_use]
    pub fn of(batch: &Batch) -> Self {
        Self {
            items: batch
                .items
                .iter()
                .filter(|item| item.discovered && !item.is_new())
                .map(|item| item.id)
                .collect(),
            applications: batch
                .applications
                .iter()
                .filter(|app| app.is_discovered() && !app.flags.is_pseudo() && !app.is_new())
                .map(|app| app.id)
                .collect(),
        }
    }

    #[must_use]
    pub fn item(&self, id: ItemId) -> bool {
        self.items.contains(&id)
    }

    #[must_use]
    pub fn application(&self, id: ApplicationId) -> bool {
        self.applications.contains(&id)
    }
}

/// Builds and prunes the batch's link set.
pub struct LinkResolver;

impl LinkResolver {
    /// Mark or create a link for every membership of every discovered item.
    pub fn discover(batch: &mut Batch) -> LinkStats {
        let mut pairs: Vec<(ItemRef, ApplicationRef)> = Vec::new();

        for (index, item) in batch.items.iter().enumerate() {
            if !item.discovered {
                continue;
            }
            let Some(pos) = batch.prototype_position(item.prototype_id) else {
                tracing::error!(
                    prototype = item.prototype_id.0,
                    "this should never happen: discovered item without prototype"
                );
                continue;
            };
            let Some(row) = item.row else {
                tracing::error!("this should never happen: discovered item without row");
                continue;
            };
            let item_ref = ItemRef::new(item.id, ItemHandle(index));

            for association in &batch.prototypes[pos].associations {
                let application = match *association {
                    ApplicationAssociation::Application(id) => ApplicationRef::ById(id),
                    ApplicationAssociation::Prototype(prototype) => {
                        let Some(handle) = batch.application_index.get(prototype, row) else {
                            continue;
                        };
                        match batch.application(handle) {
                            Some(app) if app.is_discovered() => ApplicationRef::new(app.id, handle),
                            _ => continue,
                        }
                    }
                };
                pairs.push((item_ref, application));
            }
        }

        let mut stats = LinkStats::default();
        for (item, application) in pairs {
            stats.discovered += 1;
            if batch.links.discover(item, application) {
                stats.created += 1;
            }
        }
        tracing::debug!(
            discovered = stats.discovered,
            created = stats.created,
            "links resolved"
        );
        stats
    }

    /// Whether an undiscovered persisted link is kept.
    #[must_use]
    pub fn is_retained(
        batch: &Batch,
        discovered: &DiscoveredIds,
        link: &ItemApplicationLink,
    ) -> bool {
        if link.discovered {
            return true;
        }
        let item_discovered = match link.item {
            ItemRef::ById(id) => discovered.item(id),
            ItemRef::ByHandle(handle) => batch.item(handle).is_some_and(|item| item.discovered),
        };
        let application_discovered = match link.application {
            ApplicationRef::ById(id) => discovered.application(id),
            ApplicationRef::ByHandle(handle) => batch
                .application(handle)
                .is_some_and(|app| app.is_discovered()),
        };
        item_discovered && !application_discovered
    }

    /// Persisted links to delete.
    #[must_use]
    pub fn deletions(batch: &Batch) -> Vec<LinkId> {
        let discovered = DiscoveredIds::of(batch);
        batch
            .links
            .iter()
            .filter(|link| link.id.0 != 0 && !Self::is_retained(batch, &discovered, link))
            .map(|link| link.id)
            .collect()
    }

    /// New links whose endpoints are both still discovered.
    #[must_use]
    pub fn insertions(batch: &Batch) -> Vec<(ItemRef, ApplicationRef)> {
        batch
            .links
            .iter()
            .filter(|link| link.id.0 == 0 && link.discovered)
            .map(|link| (link.item, link.application))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Application, ApplicationFlag, ApplicationPrototype, Item, ItemConfig, ItemPrototype,
        ItemText, StoredLink,
    };
    use crate::types::{
        ApplicationHandle, ApplicationId, ApplicationPrototypeId, HostId, ItemId, PrototypeId,
        RowHandle, RuleId,
    };

    fn batch() -> Batch {
        let prototype = ItemPrototype {
            id: PrototypeId(1),
            rule_id: RuleId(1),
            templates: ItemText::default(),
            status: 0,
            config: ItemConfig::default(),
        };
        let app_prototype = ApplicationPrototype {
            id: ApplicationPrototypeId(2),
            rule_id: RuleId(1),
            name: "App".into(),
        };
        Batch::new(
            HostId(1),
            RuleId(1),
            1,
            vec![prototype],
            vec![app_prototype],
            &[
                (
                    PrototypeId(1),
                    ApplicationAssociation::Prototype(ApplicationPrototypeId(2)),
                ),
                (
                    PrototypeId(1),
                    ApplicationAssociation::Application(ApplicationId(77)),
                ),
            ],
        )
    }

    fn item(id: u64, discovered: bool) -> Item {
        let mut item = Item::new(PrototypeId(1), RowHandle(0));
        item.id = ItemId(id);
        item.discovered = discovered;
        item
    }

    fn app(id: u64, discovered: bool) -> Application {
        let prototype = ApplicationPrototype {
            id: ApplicationPrototypeId(2),
            rule_id: RuleId(1),
            name: "App".into(),
        };
        let mut app = Application::new(&prototype, "App".into(), RowHandle(0));
        app.id = ApplicationId(id);
        if !discovered {
            app.flags.remove(ApplicationFlag::Discovered);
        }
        app
    }

    #[test]
    fn discover_links_prototype_and_fixed_applications() {
        let mut batch = batch();
        batch.push_item(item(0, true));
        let handle = batch.push_application(app(0, true));
        batch
            .application_index
            .bind(ApplicationPrototypeId(2), RowHandle(0), handle);

        let stats = LinkResolver::discover(&mut batch);
        assert_eq!(stats.created, 2);
        let inserts = LinkResolver::insertions(&batch);
        assert!(inserts.contains(&(
            ItemRef::ByHandle(ItemHandle(0)),
            ApplicationRef::ByHandle(ApplicationHandle(0))
        )));
        assert!(inserts.contains(&(
            ItemRef::ByHandle(ItemHandle(0)),
            ApplicationRef::ById(ApplicationId(77))
        )));
    }

    #[test]
    fn undiscovered_application_gets_no_link() {
        let mut batch = batch();
        batch.push_item(item(5, true));
        let handle = batch.push_application(app(9, false));
        batch
            .application_index
            .bind(ApplicationPrototypeId(2), RowHandle(0), handle);
        LinkResolver::discover(&mut batch);
        assert_eq!(LinkResolver::insertions(&batch).len(), 1);
    }

    fn stored_link(id: u64, item: u64, app: u64) -> StoredLink {
        StoredLink {
            id: LinkId(id),
            item_id: ItemId(item),
            application_id: ApplicationId(app),
        }
    }

    #[test]
    fn retention_follows_discovery_of_both_ends() {
        let mut batch = batch();
        batch.push_item(item(10, true));
        batch.push_item(item(11, false));
        batch.push_application(app(20, true));
        batch.push_application(app(21, false));
        batch.seed_links(&[
            stored_link(1, 10, 20),
            stored_link(2, 10, 21),
            stored_link(3, 11, 20),
            stored_link(4, 11, 21),
            stored_link(5, 10, 99),
        ]);

        let deleted = LinkResolver::deletions(&batch);
        assert_eq!(deleted, vec![LinkId(1), LinkId(3), LinkId(4)]);
    }

    #[test]
    fn removal_entry_does_not_hide_a_discovered_application() {
        let mut batch = batch();
        batch.push_item(item(10, true));
        batch.push_application(Application::removal(ApplicationId(20)));
        batch.push_application(app(20, true));
        batch.seed_links(&[stored_link(1, 10, 20)]);

        let discovered = DiscoveredIds::of(&batch);
        assert!(discovered.item(ItemId(10)));
        assert!(discovered.application(ApplicationId(20)));
        assert_eq!(LinkResolver::deletions(&batch), vec![LinkId(1)]);
    }

    #[test]
    fn rediscovered_links_are_kept() {
        let mut batch = batch();
        batch.push_item(item(10, true));
        batch.seed_links(&[stored_link(1, 10, 77)]);
        LinkResolver::discover(&mut batch);
        assert!(LinkResolver::deletions(&batch).is_empty());
        assert!(LinkResolver::insertions(&batch).is_empty());
    }
}

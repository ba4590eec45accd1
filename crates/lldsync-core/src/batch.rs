//! # Cycle State
//!
//! `Batch` owns every entity of one discovery cycle: prototypes with their
//! working row sets, the item and application arenas, both indexes and the
//! link set. Stages borrow it mutably in turn.

use crate::index::{ApplicationIndex, ItemIndex, LinkSet};
use crate::model::{
    Application, ApplicationAssociation, ApplicationPrototype, Item, ItemPrototype, StoredLink,
};
use crate::types::{
    ApplicationHandle, ApplicationPrototypeId, HostId, ItemHandle, PrototypeId, RowHandle, RuleId,
};

/// An item prototype with its per-cycle working collections.
#[derive(Debug, Clone)]
pub struct PrototypeSlot {
    pub prototype: ItemPrototype,
    /// Rows not yet matched to an existing item.
    pub remaining: Vec<RowHandle>,
    /// Application memberships inherited by discovered items.
    pub associations: Vec<ApplicationAssociation>,
}

/// All in-memory state of one discovery cycle.
#[derive(Debug, Clone)]
pub struct Batch {
    pub host_id: HostId,
    pub rule_id: RuleId,
    pub row_count: usize,
    /// Sorted by prototype id.
    pub prototypes: Vec<PrototypeSlot>,
    /// Sorted by application prototype id.
    pub application_prototypes: Vec<ApplicationPrototype>,
    pub items: Vec<Item>,
    pub applications: Vec<Application>,
    pub item_index: ItemIndex,
    pub application_index: ApplicationIndex,
    pub links: LinkSet,
}

impl Batch {
    /// Assemble a batch from loaded prototypes; every prototype starts with
    /// all `row_count` rows unmatched.
    #[must_use]
    pub fn new(
        host_id: HostId,
        rule_id: RuleId,
        row_count: usize,
        mut prototypes: Vec<ItemPrototype>,
        mut application_prototypes: Vec<ApplicationPrototype>,
        associations: &[(PrototypeId, ApplicationAssociation)],
    ) -> Self {
        prototypes.sort_by_key(|p| p.id);
        application_prototypes.sort_by_key(|p| p.id);

        let prototypes = prototypes
            .into_iter()
            .map(|prototype| {
                let mut own: Vec<ApplicationAssociation> = associations
                    .iter()
                    .filter(|(id, _)| *id == prototype.id)
                    .map(|(_, association)| *association)
                    .collect();
                own.sort();
                own.dedup();
                PrototypeSlot {
                    prototype,
                    remaining: (0..row_count).map(RowHandle).collect(),
                    associations: own,
                }
            })
            .collect();

        Self {
            host_id,
            rule_id,
            row_count,
            prototypes,
            application_prototypes,
            items: Vec::new(),
            applications: Vec::new(),
            item_index: ItemIndex::new(),
            application_index: ApplicationIndex::new(),
            links: LinkSet::new(),
        }
    }

    /// Replace the link set with persisted links of this rule.
    pub fn seed_links(&mut self, stored: &[StoredLink]) {
        self.links = LinkSet::from_stored(stored);
    }

    #[must_use]
    pub fn prototype_position(&self, id: PrototypeId) -> Option<usize> {
        self.prototypes
            .binary_search_by_key(&id, |slot| slot.prototype.id)
            .ok()
    }

    #[must_use]
    pub fn prototype(&self, id: PrototypeId) -> Option<&ItemPrototype> {
        self.prototype_position(id)
            .and_then(|pos| self.prototypes.get(pos))
            .map(|slot| &slot.prototype)
    }

    #[must_use]
    pub fn application_prototype(&self, id: ApplicationPrototypeId) -> Option<&ApplicationPrototype> {
        self.application_prototypes
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .and_then(|pos| self.application_prototypes.get(pos))
    }

    /// Add an item to the arena.
    pub fn push_item(&mut self, item: Item) -> ItemHandle {
        self.items.push(item);
        ItemHandle(self.items.len() - 1)
    }

    /// Add an application to the arena.
    pub fn push_application(&mut self, application: Application) -> ApplicationHandle {
        self.applications.push(application);
        ApplicationHandle(self.applications.len() - 1)
    }

    #[must_use]
    pub fn item(&self, handle: ItemHandle) -> Option<&Item> {
        self.items.get(handle.0)
    }

    pub fn item_mut(&mut self, handle: ItemHandle) -> Option<&mut Item> {
        self.items.get_mut(handle.0)
    }

    #[must_use]
    pub fn application(&self, handle: ApplicationHandle) -> Option<&Application> {
        self.applications.get(handle.0)
    }

    pub fn application_mut(&mut self, handle: ApplicationHandle) -> Option<&mut Application> {
        self.applications.get_mut(handle.0)
    }

    /// Item handles ordered by id; new items (id 0) first, in creation order.
    #[must_use]
    pub fn items_by_id(&self) -> Vec<ItemHandle> {
        let mut order: Vec<ItemHandle> = (0..self.items.len()).map(ItemHandle).collect();
        order.sort_by_key(|h| self.items[h.0].id);
        order
    }

    /// Application handles ordered by id; new applications first, in
    /// creation order. Conflict resolution relies on this ordering: an entry
    /// yields to any same-named entry placed after it.
    #[must_use]
    pub fn applications_by_id(&self) -> Vec<ApplicationHandle> {
        let mut order: Vec<ApplicationHandle> =
            (0..self.applications.len()).map(ApplicationHandle).collect();
        order.sort_by_key(|h| self.applications[h.0].id);
        order
    }
}

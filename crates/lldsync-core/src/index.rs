//! # Lookup Indexes
//!
//! - `ItemIndex`: `(prototype, row) -> item`
//! - `ApplicationIndex`: `(application prototype, row) -> application`
//! - `LinkSet`: item-application links, unique on `(ItemRef, ApplicationRef)`
//!
//! Rows are keyed by `RowHandle`, their position in the cycle's row slice, so
//! two rows with identical values remain distinct.

use crate::model::{ItemApplicationLink, StoredLink};
use crate::types::{
    ApplicationHandle, ApplicationPrototypeId, ApplicationRef, ItemHandle, ItemRef, LinkId,
    PrototypeId, RowHandle,
};
use std::collections::BTreeMap;

/// Items bound to the row they were discovered from.
#[derive(Debug, Clone, Default)]
pub struct ItemIndex {
    entries: BTreeMap<(PrototypeId, RowHandle), ItemHandle>,
}

impl ItemIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a pair; an existing binding is kept.
    pub fn bind(&mut self, prototype: PrototypeId, row: RowHandle, item: ItemHandle) -> bool {
        match self.entries.entry((prototype, row)) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(item);
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, prototype: PrototypeId, row: RowHandle) -> Option<ItemHandle> {
        self.entries.get(&(prototype, row)).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Applications bound to the rows that resolve to them.
///
/// Unlike items, several rows may bind to one application.
#[derive(Debug, Clone, Default)]
pub struct ApplicationIndex {
    entries: BTreeMap<(ApplicationPrototypeId, RowHandle), ApplicationHandle>,
}

impl ApplicationIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a pair; an existing binding is kept.
    pub fn bind(
        &mut self,
        prototype: ApplicationPrototypeId,
        row: RowHandle,
        application: ApplicationHandle,
    ) -> bool {
        match self.entries.entry((prototype, row)) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(application);
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, prototype: ApplicationPrototypeId, row: RowHandle) -> Option<ApplicationHandle> {
        self.entries.get(&(prototype, row)).copied()
    }

    /// Point an existing binding at another application.
    ///
    /// Returns `false` if the pair was never bound.
    pub fn repoint(
        &mut self,
        prototype: ApplicationPrototypeId,
        row: RowHandle,
        application: ApplicationHandle,
    ) -> bool {
        match self.entries.get_mut(&(prototype, row)) {
            Some(slot) => {
                *slot = application;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deduplicated item-application links.
#[derive(Debug, Clone, Default)]
pub struct LinkSet {
    positions: BTreeMap<(ItemRef, ApplicationRef), usize>,
    links: Vec<ItemApplicationLink>,
}

impl LinkSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the set with persisted links; all start undiscovered.
    #[must_use]
    pub fn from_stored(stored: &[StoredLink]) -> Self {
        let mut set = Self::new();
        for link in stored {
            let key = (
                ItemRef::ById(link.item_id),
                ApplicationRef::ById(link.application_id),
            );
            if set.positions.contains_key(&key) {
                continue;
            }
            set.positions.insert(key, set.links.len());
            set.links.push(ItemApplicationLink {
                id: link.id,
                item: key.0,
                application: key.1,
                discovered: false,
            });
        }
        set
    }

    /// Mark the pair discovered, inserting a new link if needed.
    ///
    /// Returns `true` if a new link was created.
    pub fn discover(&mut self, item: ItemRef, application: ApplicationRef) -> bool {
        if let Some(&pos) = self.positions.get(&(item, application)) {
            if let Some(link) = self.links.get_mut(pos) {
                link.discovered = true;
            }
            return false;
        }
        self.positions.insert((item, application), self.links.len());
        self.links.push(ItemApplicationLink {
            id: LinkId(0),
            item,
            application,
            discovered: true,
        });
        true
    }

    #[must_use]
    pub fn get(&self, item: ItemRef, application: ApplicationRef) -> Option<&ItemApplicationLink> {
        self.positions
            .get(&(item, application))
            .and_then(|&pos| self.links.get(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemApplicationLink> {
        self.links.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApplicationId, ItemId};

    #[test]
    fn item_index_keeps_first_binding() {
        let mut index = ItemIndex::new();
        assert!(index.bind(PrototypeId(1), RowHandle(0), ItemHandle(3)));
        assert!(!index.bind(PrototypeId(1), RowHandle(0), ItemHandle(4)));
        assert_eq!(index.get(PrototypeId(1), RowHandle(0)), Some(ItemHandle(3)));
        assert_eq!(index.get(PrototypeId(1), RowHandle(1)), None);
    }

    #[test]
    fn rows_are_distinct_by_handle() {
        let mut index = ApplicationIndex::new();
        index.bind(ApplicationPrototypeId(1), RowHandle(0), ApplicationHandle(0));
        index.bind(ApplicationPrototypeId(1), RowHandle(1), ApplicationHandle(0));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn repoint_requires_binding() {
        let mut index = ApplicationIndex::new();
        assert!(!index.repoint(ApplicationPrototypeId(1), RowHandle(0), ApplicationHandle(2)));
        index.bind(ApplicationPrototypeId(1), RowHandle(0), ApplicationHandle(1));
        assert!(index.repoint(ApplicationPrototypeId(1), RowHandle(0), ApplicationHandle(2)));
        assert_eq!(
            index.get(ApplicationPrototypeId(1), RowHandle(0)),
            Some(ApplicationHandle(2))
        );
    }

    #[test]
    fn link_set_marks_existing_links() {
        let mut links = LinkSet::from_stored(&[StoredLink {
            id: LinkId(7),
            item_id: ItemId(1),
            application_id: ApplicationId(2),
        }]);
        let item = ItemRef::ById(ItemId(1));
        let app = ApplicationRef::ById(ApplicationId(2));
        assert!(!links.get(item, app).expect("seeded").discovered);
        assert!(!links.discover(item, app));
        assert!(links.get(item, app).expect("seeded").discovered);
        assert!(links.discover(item, ApplicationRef::ByHandle(ApplicationHandle(0))));
        assert_eq!(links.len(), 2);
    }
}

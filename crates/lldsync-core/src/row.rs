//! # Discovered Rows
//!
//! One row per entity reported by a discovery rule execution: a map from
//! macro name (`{#FSNAME}`) to raw value bytes. Values stay as bytes because
//! endpoints may report data that is not valid UTF-8; encoding problems are
//! detected later, per field, by validation.
//!
//! Rows are read-only inputs except for the item link list, which the engine
//! fills with every item discovered from the row.

use crate::types::{ItemId, PrototypeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An item discovered from a row, published for dependent prototype expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemLink {
    pub prototype_id: PrototypeId,
    pub item_id: ItemId,
}

/// A single discovered entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    macros: BTreeMap<String, Vec<u8>>,
    item_links: Vec<ItemLink>,
}

impl Row {
    /// Create an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a row from `(macro, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            macros: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            item_links: Vec::new(),
        }
    }

    /// Builder-style macro assignment.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.macros.insert(name.into(), value.into());
        self
    }

    /// Raw value of a macro, e.g. `row.get("{#FSNAME}")`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.macros.get(name).map(Vec::as_slice)
    }

    /// Iterate macros in name order.
    pub fn macros(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.macros.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Items discovered from this row, sorted after a cycle completes.
    #[must_use]
    pub fn item_links(&self) -> &[ItemLink] {
        &self.item_links
    }

    pub(crate) fn push_item_link(&mut self, link: ItemLink) {
        self.item_links.push(link);
    }

    pub(crate) fn sort_item_links(&mut self) {
        self.item_links.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_lookup() {
        let row = Row::new().with("{#FSNAME}", "/tmp").with("{#FSTYPE}", "ext4");
        assert_eq!(row.get("{#FSNAME}"), Some(b"/tmp".as_slice()));
        assert_eq!(row.get("{#MISSING}"), None);
        assert_eq!(row.macros().count(), 2);
    }

    #[test]
    fn raw_bytes_are_preserved() {
        let row = Row::from_pairs([("{#NAME}", vec![0xff, 0x41])]);
        assert_eq!(row.get("{#NAME}"), Some([0xff, 0x41].as_slice()));
    }

    #[test]
    fn item_links_sort_by_prototype_then_item() {
        let mut row = Row::new();
        row.push_item_link(ItemLink {
            prototype_id: PrototypeId(2),
            item_id: ItemId(1),
        });
        row.push_item_link(ItemLink {
            prototype_id: PrototypeId(1),
            item_id: ItemId(9),
        });
        row.sort_item_links();
        assert_eq!(row.item_links()[0].prototype_id, PrototypeId(1));
    }
}

//! # Matching & Merge
//!
//! Binds previously persisted entities to the rows that still produce them
//! and synthesizes new entities for the remaining `(prototype, row)` pairs.
//!
//! - Items are matched on their raw key: the item's stored key template is
//!   re-rendered against each unmatched row of its prototype. A matched row
//!   is consumed.
//! - Applications are matched on their name and never consume rows, since
//!   an application may group items from many rows (and many rules).

use crate::batch::Batch;
use crate::diff::{ItemDiff, render};
use crate::model::{Application, ApplicationFlag};
use crate::row::Row;
use crate::template::{MacroContext, MacroResolver};
use crate::types::{ApplicationHandle, ItemHandle, RowHandle};

/// Matching and merge of items.
pub struct ItemMerger;

impl ItemMerger {
    /// Bind existing items to rows, then make or update every
    /// `(prototype, row)` pair.
    pub fn merge<R: MacroResolver + ?Sized>(batch: &mut Batch, rows: &[Row], resolver: &R) {
        let bound = Self::bind_existing(batch, rows, resolver);
        let (created, updated) = Self::make(batch, rows, resolver);
        tracing::debug!(
            bound,
            created,
            updated,
            items = batch.items.len(),
            "items merged"
        );
    }

    /// Bind each existing item to the first remaining row of its prototype
    /// that renders its stored key. Returns the number of bound items.
    fn bind_existing<R: MacroResolver + ?Sized>(
        batch: &mut Batch,
        rows: &[Row],
        resolver: &R,
    ) -> usize {
        let Batch {
            prototypes,
            items,
            item_index,
            ..
        } = batch;
        let mut bound = 0;

        // Rows tend to arrive in the same order every cycle, so scanning both
        // sides from the back usually hits on the first comparison.
        for handle in (0..items.len()).rev() {
            let item = &items[handle];
            let Ok(pos) = prototypes.binary_search_by_key(&item.prototype_id, |s| s.prototype.id)
            else {
                tracing::error!(
                    item = item.id.0,
                    prototype = item.prototype_id.0,
                    "this should never happen: item references an unknown prototype"
                );
                continue;
            };
            let slot = &mut prototypes[pos];
            let key = item.key.current().as_bytes();
            let matched = slot.remaining.iter().rposition(|row| {
                rows.get(row.0).is_some_and(|row| {
                    resolver.substitute(&item.key_template, row, MacroContext::ItemKey) == key
                })
            });
            if let Some(index) = matched {
                let row = slot.remaining.swap_remove(index);
                item_index.bind(slot.prototype.id, row, ItemHandle(handle));
                bound += 1;
            }
        }
        bound
    }

    /// Create items for unbound pairs and re-render bound ones.
    fn make<R: MacroResolver + ?Sized>(
        batch: &mut Batch,
        rows: &[Row],
        resolver: &R,
    ) -> (usize, usize) {
        let Batch {
            prototypes,
            items,
            item_index,
            ..
        } = batch;
        let (mut created, mut updated) = (0, 0);

        for slot in prototypes.iter() {
            let prototype = &slot.prototype;
            for (index, row) in rows.iter().enumerate() {
                let row_handle = RowHandle(index);
                match item_index.get(prototype.id, row_handle) {
                    None => {
                        items.push(ItemDiff::make(prototype, row, row_handle, resolver));
                        item_index.bind(prototype.id, row_handle, ItemHandle(items.len() - 1));
                        created += 1;
                    }
                    Some(handle) => {
                        let Some(item) = items.get_mut(handle.0) else {
                            tracing::error!("this should never happen: dangling item index entry");
                            continue;
                        };
                        ItemDiff::update(item, prototype, row, row_handle, resolver);
                        updated += 1;
                    }
                }
            }
        }
        (created, updated)
    }
}

/// Matching and merge of applications.
pub struct ApplicationMerger;

impl ApplicationMerger {
    /// Bind existing applications to every row rendering their name, then
    /// make or rename for every `(application prototype, row)` pair.
    pub fn merge<R: MacroResolver + ?Sized>(batch: &mut Batch, rows: &[Row], resolver: &R) {
        Self::bind_existing(batch, rows, resolver);

        let mut created = 0;
        for pos in 0..batch.application_prototypes.len() {
            let prototype = batch.application_prototypes[pos].clone();
            for (index, row) in rows.iter().enumerate() {
                let row_handle = RowHandle(index);
                let name = render(resolver, &prototype.name, row, MacroContext::Text, true);
                match batch.application_index.get(prototype.id, row_handle) {
                    None => {
                        let mut application = Application::new(&prototype, name.text, row_handle);
                        application.malformed = !name.valid_utf8;
                        let handle = batch.push_application(application);
                        batch.application_index.bind(prototype.id, row_handle, handle);
                        created += 1;
                    }
                    Some(handle) => {
                        let Some(app) = batch.application_mut(handle) else {
                            tracing::error!(
                                "this should never happen: dangling application index entry"
                            );
                            continue;
                        };
                        // A rename recorded for an earlier row is kept.
                        if !app.flags.contains(ApplicationFlag::NameChanged)
                            && app.name.set(name.text)
                        {
                            app.flags.insert(ApplicationFlag::NameChanged);
                            app.malformed = !name.valid_utf8;
                        }
                        app.flags.insert(ApplicationFlag::Discovered);
                    }
                }
            }
        }
        tracing::debug!(
            created,
            applications = batch.applications.len(),
            "applications merged"
        );
    }

    fn bind_existing<R: MacroResolver + ?Sized>(batch: &mut Batch, rows: &[Row], resolver: &R) {
        let Batch {
            applications,
            application_index,
            ..
        } = batch;
        for (handle, app) in applications.iter_mut().enumerate() {
            for (index, row) in rows.iter().enumerate() {
                let name = render(resolver, &app.name_template, row, MacroContext::Text, true);
                if name.text == *app.name.current() {
                    application_index.bind(app.prototype_id, RowHandle(index), ApplicationHandle(handle));
                    app.row = Some(RowHandle(index));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ItemField;
    use crate::model::{
        ApplicationPrototype, Item, ItemConfig, ItemPrototype, ItemText,
        StoredApplication, StoredItem,
    };
    use crate::template::LldMacros;
    use crate::types::{
        ApplicationId, ApplicationPrototypeId, DiscoveryId, HostId, ItemId, PrototypeId, RuleId,
    };

    fn prototype() -> ItemPrototype {
        ItemPrototype {
            id: PrototypeId(10),
            rule_id: RuleId(1),
            templates: ItemText {
                name: "Free on {#FSNAME}".into(),
                key: "fs[{#FSNAME}]".into(),
                ..ItemText::default()
            },
            status: 0,
            config: ItemConfig::default(),
        }
    }

    fn stored(id: u64, key: &str) -> StoredItem {
        StoredItem {
            id: ItemId(id),
            prototype_id: PrototypeId(10),
            key_template: "fs[{#FSNAME}]".into(),
            text: ItemText {
                name: format!("Free on {}", &key[3..key.len() - 1]),
                key: key.into(),
                ..ItemText::default()
            },
            config: ItemConfig::default(),
            last_seen: 0,
            delete_at: 0,
        }
    }

    fn rows(names: &[&str]) -> Vec<Row> {
        names
            .iter()
            .map(|n| Row::new().with("{#FSNAME}", *n))
            .collect()
    }

    fn item_batch(rows: &[Row], existing: Vec<StoredItem>) -> Batch {
        let mut batch = Batch::new(HostId(1), RuleId(1), rows.len(), vec![prototype()], Vec::new(), &[]);
        for item in existing {
            let proto = prototype();
            batch.push_item(Item::from_stored(item, &proto));
        }
        batch
    }

    #[test]
    fn new_rows_create_items() {
        let rows = rows(&["/", "/tmp"]);
        let mut batch = item_batch(&rows, Vec::new());
        ItemMerger::merge(&mut batch, &rows, &LldMacros);
        assert_eq!(batch.items.len(), 2);
        assert!(batch.items.iter().all(|i| i.is_new() && i.discovered));
        assert_eq!(batch.items[1].key.current(), "fs[/tmp]");
    }

    #[test]
    fn existing_items_are_matched_and_rows_consumed() {
        let rows = rows(&["/", "/tmp"]);
        let mut batch = item_batch(&rows, vec![stored(5, "fs[/tmp]")]);
        ItemMerger::merge(&mut batch, &rows, &LldMacros);
        assert_eq!(batch.items.len(), 2);
        let existing = &batch.items[0];
        assert!(existing.discovered);
        assert_eq!(existing.row, Some(RowHandle(1)));
        assert!(existing.changed.is_empty());
        assert_eq!(batch.prototypes[0].remaining, vec![RowHandle(0)]);
    }

    #[test]
    fn unmatched_existing_items_stay_undiscovered() {
        let rows = rows(&["/"]);
        let mut batch = item_batch(&rows, vec![stored(5, "fs[/gone]")]);
        ItemMerger::merge(&mut batch, &rows, &LldMacros);
        assert!(!batch.items[0].discovered);
        assert_eq!(batch.items[0].row, None);
        assert_eq!(batch.items.len(), 2);
    }

    #[test]
    fn changed_name_is_recorded() {
        let rows = rows(&["/tmp"]);
        let mut item = stored(5, "fs[/tmp]");
        item.text.name = "stale".into();
        let mut batch = item_batch(&rows, vec![item]);
        ItemMerger::merge(&mut batch, &rows, &LldMacros);
        assert!(batch.items[0].changed.contains(&ItemField::Name));
        assert_eq!(batch.items.len(), 1);
    }

    fn app_prototype(id: u64, name: &str) -> ApplicationPrototype {
        ApplicationPrototype {
            id: ApplicationPrototypeId(id),
            rule_id: RuleId(1),
            name: name.into(),
        }
    }

    #[test]
    fn applications_created_per_row() {
        let rows: Vec<Row> = vec![Row::new().with("{#NUM}", "1"), Row::new().with("{#NUM}", "2")];
        let mut batch = Batch::new(
            HostId(1),
            RuleId(1),
            rows.len(),
            Vec::new(),
            vec![app_prototype(3, "App-{#NUM}")],
            &[],
        );
        ApplicationMerger::merge(&mut batch, &rows, &LldMacros);
        assert_eq!(batch.applications.len(), 2);
        assert_eq!(batch.applications[1].name.current(), "App-2");
        assert!(batch.applications[0].flags.contains(ApplicationFlag::AddDiscoveryLink));
    }

    #[test]
    fn existing_application_binds_many_rows() {
        let rows: Vec<Row> = vec![Row::new().with("{#X}", "a"), Row::new().with("{#X}", "b")];
        let mut batch = Batch::new(
            HostId(1),
            RuleId(1),
            rows.len(),
            Vec::new(),
            vec![app_prototype(3, "Shared")],
            &[],
        );
        batch.push_application(Application::from_stored(StoredApplication {
            id: ApplicationId(40),
            prototype_id: ApplicationPrototypeId(3),
            discovery_id: DiscoveryId(8),
            name: "Shared".into(),
            name_template: "Shared".into(),
            last_seen: 0,
            delete_at: 0,
        }));
        ApplicationMerger::merge(&mut batch, &rows, &LldMacros);
        assert_eq!(batch.applications.len(), 1);
        assert!(batch.applications[0].is_discovered());
        assert_eq!(batch.application_index.len(), 2);
    }

    #[test]
    fn moved_application_template_renames() {
        let rows: Vec<Row> = vec![Row::new().with("{#DB}", "main")];
        let mut batch = Batch::new(
            HostId(1),
            RuleId(1),
            1,
            Vec::new(),
            vec![app_prototype(3, "Database {#DB}")],
            &[],
        );
        batch.push_application(Application::from_stored(StoredApplication {
            id: ApplicationId(40),
            prototype_id: ApplicationPrototypeId(3),
            discovery_id: DiscoveryId(8),
            name: "DB main".into(),
            name_template: "DB {#DB}".into(),
            last_seen: 0,
            delete_at: 0,
        }));
        ApplicationMerger::merge(&mut batch, &rows, &LldMacros);
        let app = &batch.applications[0];
        assert!(app.flags.contains(ApplicationFlag::NameChanged));
        assert_eq!(app.name.current(), "Database main");
        assert_eq!(app.name.original().map(String::as_str), Some("DB main"));
    }
}

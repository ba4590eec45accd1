//! # Validation
//!
//! Rejects rendered values the store would not accept. Rejections never
//! abort the cycle: each one is reported and then either rolled back
//! (existing entities) or excluded from discovery (new entities).

use crate::batch::Batch;
use crate::field::ItemField;
use crate::model::{ApplicationFlag, Item};
use crate::primitives::APPLICATION_NAME_LEN;
use crate::report::ErrorReport;
use crate::storage::DiscoveryStore;
use crate::types::{ItemHandle, ItemId, LldError};
use std::collections::BTreeSet;

// =============================================================================
// PRIMITIVES
// =============================================================================

/// Whether `bytes` is a well-formed UTF-8 sequence.
#[must_use]
pub fn is_valid_utf8(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes).is_ok()
}

/// Whether `value` holds at most `max` Unicode scalar values.
#[must_use]
pub fn is_within_length(value: &str, max: usize) -> bool {
    value.chars().count() <= max
}

const fn verb(is_new: bool) -> &'static str {
    if is_new { "create" } else { "update" }
}

/// Undo a rejected change: roll back the field of an existing item, or drop
/// a new item from discovery.
fn reject(item: &mut Item, field: ItemField) {
    if item.is_new() {
        item.discovered = false;
    } else {
        item.rollback(field);
    }
}

// =============================================================================
// ITEMS
// =============================================================================

/// Field and key validation of discovered items.
pub struct ItemValidator;

impl ItemValidator {
    /// Validate every discovered item, then enforce key uniqueness within the
    /// batch and against the host.
    pub fn validate<S: DiscoveryStore + ?Sized>(
        batch: &mut Batch,
        store: &S,
        report: &mut ErrorReport,
    ) -> Result<(), LldError> {
        let order = batch.items_by_id();
        for &handle in &order {
            if let Some(item) = batch.item_mut(handle) {
                Self::validate_fields(item, report);
            }
        }
        Self::unique_in_batch(batch, &order, report);
        Self::unique_on_host(batch, &order, store, report)
    }

    fn validate_fields(item: &mut Item, report: &mut ErrorReport) {
        for field in ItemField::TEMPLATED {
            if !item.discovered {
                return;
            }
            if !item.is_new() && !item.changed.contains(&field) {
                continue;
            }
            let Some(value) = item.field(field).map(|tracked| tracked.current().clone()) else {
                continue;
            };
            let message = if item.malformed.contains(&field) {
                format!(
                    "Cannot {} item: value \"{value}\" has invalid UTF-8 sequence.",
                    verb(item.is_new())
                )
            } else if field
                .max_len()
                .is_some_and(|max| !is_within_length(&value, max))
            {
                format!(
                    "Cannot {} item: value \"{value}\" is too long.",
                    verb(item.is_new())
                )
            } else {
                continue;
            };
            tracing::debug!(item = item.id.0, ?field, "rejected item field");
            report.push(message);
            reject(item, field);
        }
    }

    /// Whether the item's key takes part in uniqueness checks.
    fn key_is_candidate(item: &Item) -> bool {
        item.discovered && (item.is_new() || item.changed.contains(&ItemField::Key))
    }

    fn unique_in_batch(batch: &mut Batch, order: &[ItemHandle], report: &mut ErrorReport) {
        let mut keys: BTreeSet<String> = batch
            .items
            .iter()
            .filter(|item| item.discovered && !Self::key_is_candidate(item))
            .map(|item| item.key.current().clone())
            .collect();

        for &handle in order {
            let Some(item) = batch.item_mut(handle) else {
                continue;
            };
            if !Self::key_is_candidate(item) {
                continue;
            }
            let key = item.key.current().clone();
            if keys.contains(&key) {
                report.push(format!(
                    "Cannot {} item: item with the same key \"{key}\" already exists.",
                    verb(item.is_new())
                ));
                reject(item, ItemField::Key);
            } else {
                keys.insert(key);
            }
        }
    }

    fn unique_on_host<S: DiscoveryStore + ?Sized>(
        batch: &mut Batch,
        order: &[ItemHandle],
        store: &S,
        report: &mut ErrorReport,
    ) -> Result<(), LldError> {
        let mut exclude: BTreeSet<ItemId> = BTreeSet::new();
        let mut keys: Vec<String> = Vec::new();
        for item in batch.items.iter().filter(|item| item.discovered) {
            if !item.is_new() {
                exclude.insert(item.id);
            }
            if Self::key_is_candidate(item) {
                keys.push(item.key.current().clone());
            }
        }
        if keys.is_empty() {
            return Ok(());
        }
        keys.sort();
        keys.dedup();

        let taken: BTreeSet<String> = store
            .conflicting_item_keys(batch.host_id, &keys, &exclude)?
            .into_iter()
            .collect();
        if taken.is_empty() {
            return Ok(());
        }

        for &handle in order {
            let Some(item) = batch.item_mut(handle) else {
                continue;
            };
            if !Self::key_is_candidate(item) || !taken.contains(item.key.current()) {
                continue;
            }
            report.push(format!(
                "Cannot {} item: item with the same key \"{}\" already exists.",
                verb(item.is_new()),
                item.key.current()
            ));
            reject(item, ItemField::Key);
        }
        Ok(())
    }
}

// =============================================================================
// APPLICATIONS
// =============================================================================

/// Name validation of new and renamed applications.
pub struct ApplicationValidator;

impl ApplicationValidator {
    pub fn validate(batch: &mut Batch, report: &mut ErrorReport) {
        for app in &mut batch.applications {
            if !app.is_discovered() {
                continue;
            }
            let renamed = app.flags.contains(ApplicationFlag::NameChanged);
            if !app.is_new() && !renamed {
                continue;
            }
            let name = app.name.current();
            let message = if app.malformed {
                format!(
                    "Cannot {} application: value \"{name}\" has invalid UTF-8 sequence.",
                    verb(app.is_new())
                )
            } else if !is_within_length(name, APPLICATION_NAME_LEN) {
                format!(
                    "Cannot {} application: value \"{name}\" is too long.",
                    verb(app.is_new())
                )
            } else {
                continue;
            };
            report.push(message);
            app.malformed = false;
            if app.is_new() {
                app.flags.remove(ApplicationFlag::Discovered);
            } else {
                app.name.rollback();
                app.flags.remove(ApplicationFlag::NameChanged);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_primitive() {
        assert!(is_valid_utf8("héllo".as_bytes()));
        assert!(!is_valid_utf8(&[b'a', 0xc3]));
        assert!(is_valid_utf8(&[]));
    }

    #[test]
    fn length_counts_characters() {
        assert!(is_within_length("ééé", 3));
        assert!(!is_within_length("éééé", 3));
        assert!(is_within_length("", 0));
    }
}

//! # Field Rendering & Diff
//!
//! Renders prototype templates against a row and applies the result to an
//! item: wholesale for new items, field by field (recording shadows and the
//! changed set) for existing ones.

use crate::field::{ItemField, Tracked};
use crate::model::{Item, ItemPrototype};
use crate::primitives::{ITEM_TYPE_CALCULATED, TRIM_CHARS};
use crate::row::Row;
use crate::template::{MacroContext, MacroResolver};
use crate::types::RowHandle;
use crate::validate::is_valid_utf8;

/// A rendered template value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// False if the substituted bytes were not valid UTF-8; `text` then holds
    /// a lossy rendition for reporting.
    pub valid_utf8: bool,
}

/// Substitute `template` against `row` and optionally trim the result.
pub fn render<R: MacroResolver + ?Sized>(
    resolver: &R,
    template: &str,
    row: &Row,
    context: MacroContext,
    trim: bool,
) -> Rendered {
    let bytes = resolver.substitute(template, row, context);
    let valid_utf8 = is_valid_utf8(&bytes);
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let text = if trim {
        text.trim_matches(TRIM_CHARS).to_string()
    } else {
        text
    };
    Rendered { text, valid_utf8 }
}

/// Substitution context of a templated field for a given prototype.
#[must_use]
pub fn context_for(field: ItemField, prototype: &ItemPrototype) -> MacroContext {
    match field {
        ItemField::Key => MacroContext::ItemKey,
        ItemField::SnmpOid => MacroContext::SnmpOid,
        ItemField::Params if prototype.config.item_type == ITEM_TYPE_CALCULATED => {
            MacroContext::Formula
        }
        _ => MacroContext::Text,
    }
}

fn render_field<R: MacroResolver + ?Sized>(
    resolver: &R,
    prototype: &ItemPrototype,
    field: ItemField,
    row: &Row,
) -> Rendered {
    let template = prototype.templates.get(field).unwrap_or_default();
    render(
        resolver,
        template,
        row,
        context_for(field, prototype),
        field.is_trimmed(),
    )
}

/// Creates and updates items from prototypes.
pub struct ItemDiff;

impl ItemDiff {
    /// Synthesize a new item for `(prototype, row)`.
    pub fn make<R: MacroResolver + ?Sized>(
        prototype: &ItemPrototype,
        row: &Row,
        handle: RowHandle,
        resolver: &R,
    ) -> Item {
        let mut item = Item::new(prototype.id, handle);
        item.key_template.clone_from(&prototype.templates.key);
        for field in ItemField::TEMPLATED {
            let rendered = render_field(resolver, prototype, field, row);
            if !rendered.valid_utf8 {
                item.malformed.insert(field);
            }
            if let Some(tracked) = item.field_mut(field) {
                *tracked = Tracked::new(rendered.text);
            }
        }
        item
    }

    /// Re-render a matched existing item, recording every changed field.
    pub fn update<R: MacroResolver + ?Sized>(
        item: &mut Item,
        prototype: &ItemPrototype,
        row: &Row,
        handle: RowHandle,
        resolver: &R,
    ) {
        for field in ItemField::TEMPLATED {
            // The key is re-rendered only when the prototype's key template moved.
            if field == ItemField::Key && item.key_template == prototype.templates.key {
                continue;
            }
            let rendered = render_field(resolver, prototype, field, row);
            let Some(tracked) = item.field_mut(field) else {
                continue;
            };
            if tracked.set(rendered.text) {
                item.changed.insert(field);
                if !rendered.valid_utf8 {
                    item.malformed.insert(field);
                }
            }
        }
        item.discovered = true;
        item.row = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemConfig, ItemText, StoredItem};
    use crate::template::LldMacros;
    use crate::types::{ItemId, PrototypeId, RuleId};

    fn prototype() -> ItemPrototype {
        ItemPrototype {
            id: PrototypeId(10),
            rule_id: RuleId(1),
            templates: ItemText {
                name: "  Free on {#FSNAME} ".into(),
                key: "fs[{#FSNAME}]".into(),
                units: "B".into(),
                params: String::new(),
                ipmi_sensor: " {#SENSOR} ".into(),
                snmp_oid: String::new(),
                description: "Filesystem {#FSNAME}\n".into(),
            },
            status: 0,
            config: ItemConfig::default(),
        }
    }

    fn row() -> Row {
        Row::new().with("{#FSNAME}", "/tmp").with("{#SENSOR}", "s1")
    }

    #[test]
    fn make_renders_and_trims() {
        let item = ItemDiff::make(&prototype(), &row(), RowHandle(0), &LldMacros);
        assert!(item.is_new());
        assert!(item.discovered);
        assert_eq!(item.name.current(), "Free on /tmp");
        assert_eq!(item.key.current(), "fs[/tmp]");
        assert_eq!(item.ipmi_sensor.current(), " s1 ");
        assert_eq!(item.description.current(), "Filesystem /tmp");
        assert_eq!(item.key_template, "fs[{#FSNAME}]");
        assert!(!item.name.is_changed());
        assert!(item.malformed.is_empty());
    }

    #[test]
    fn make_flags_invalid_utf8() {
        let row = Row::from_pairs([("{#FSNAME}", vec![b'/', 0xff])]);
        let item = ItemDiff::make(&prototype(), &row, RowHandle(0), &LldMacros);
        assert!(item.malformed.contains(&ItemField::Name));
        assert!(item.malformed.contains(&ItemField::Key));
        assert!(!item.malformed.contains(&ItemField::Units));
    }

    #[test]
    fn render_keeps_a_lossy_copy_of_invalid_bytes() {
        let row = Row::from_pairs([("{#X}", vec![b'a', 0xff])]);
        let rendered = render(&LldMacros, " v={#X} ", &row, MacroContext::Text, true);
        assert!(!rendered.valid_utf8);
        assert_eq!(rendered.text, "v=a\u{fffd}");

        let rendered = render(&LldMacros, " v ", &row, MacroContext::Text, false);
        assert!(rendered.valid_utf8);
        assert_eq!(rendered.text, " v ");
    }

    #[test]
    fn calculated_params_use_formula_context() {
        let mut proto = prototype();
        proto.config.item_type = ITEM_TYPE_CALCULATED;
        proto.templates.params = "last(fs[{#FSNAME}])".into();
        let item = ItemDiff::make(&proto, &row(), RowHandle(0), &LldMacros);
        assert_eq!(item.params.current(), "last(fs[/tmp])");
        assert_eq!(context_for(ItemField::Params, &prototype()), MacroContext::Text);
    }

    fn existing(name: &str, key_template: &str) -> Item {
        Item::from_stored(
            StoredItem {
                id: ItemId(100),
                prototype_id: PrototypeId(10),
                key_template: key_template.into(),
                text: ItemText {
                    name: name.into(),
                    key: "fs[/tmp]".into(),
                    units: "B".into(),
                    ipmi_sensor: " s1 ".into(),
                    description: "Filesystem /tmp".into(),
                    ..ItemText::default()
                },
                config: ItemConfig::default(),
                last_seen: 0,
                delete_at: 0,
            },
            &prototype(),
        )
    }

    #[test]
    fn update_records_changed_fields_only() {
        let mut item = existing("Old name", "fs[{#FSNAME}]");
        ItemDiff::update(&mut item, &prototype(), &row(), RowHandle(2), &LldMacros);
        assert!(item.discovered);
        assert_eq!(item.row, Some(RowHandle(2)));
        assert_eq!(item.changed.iter().copied().collect::<Vec<_>>(), vec![ItemField::Name]);
        assert_eq!(item.name.original().map(String::as_str), Some("Old name"));
    }

    #[test]
    fn update_is_a_no_op_for_identical_values() {
        let mut item = existing("Free on /tmp", "fs[{#FSNAME}]");
        ItemDiff::update(&mut item, &prototype(), &row(), RowHandle(0), &LldMacros);
        assert!(item.changed.is_empty());
    }

    #[test]
    fn key_rerendered_when_template_moves() {
        let mut item = existing("Free on /tmp", "filesystem[{#FSNAME}]");
        let mut proto = prototype();
        proto.templates.key = "fs.v2[{#FSNAME}]".into();
        ItemDiff::update(&mut item, &proto, &row(), RowHandle(0), &LldMacros);
        assert!(item.changed.contains(&ItemField::Key));
        assert_eq!(item.key.current(), "fs.v2[/tmp]");
        assert_eq!(item.key.original().map(String::as_str), Some("fs[/tmp]"));
    }
}

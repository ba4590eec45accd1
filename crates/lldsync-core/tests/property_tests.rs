//! # Property-Based Tests
//!
//! Invariants of the discovery cycle under arbitrary row sets.

use lldsync_core::lifecycle::{Verdict, verdict};
use lldsync_core::storage::HostRecord;
use lldsync_core::storage::catalog::{ItemConfigEntry, ItemPrototypeConfig, RuleConfig};
use lldsync_core::{
    CycleRequest, CycleStats, DiscoveryConfig, ErrorReport, HostId, ItemConfig, ItemText,
    Lifetime, LldMacros, MemoryStore, Reconciler, Row, RuleId,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeSet;

const HOST: HostId = HostId(1);
const RULE: RuleId = RuleId(10);
const T0: i64 = 1_700_000_000;

fn store() -> MemoryStore {
    MemoryStore::from_config(&DiscoveryConfig {
        hosts: vec![HostRecord {
            id: HOST,
            name: "db-01".into(),
        }],
        rules: vec![RuleConfig {
            id: RULE.0,
            host_id: HOST.0,
            name: "Disks".into(),
            lifetime_days: Some(7),
        }],
        item_prototypes: vec![ItemPrototypeConfig {
            id: 100,
            rule_id: RULE.0,
            templates: ItemText {
                name: "Disk {#DEV}".into(),
                key: "disk[{#DEV}]".into(),
                description: "{#LABEL}".into(),
                ..ItemText::default()
            },
            status: 0,
            config: ItemConfig::default(),
            application_prototypes: Vec::new(),
            applications: Vec::new(),
        }],
        items: vec![ItemConfigEntry {
            id: 400,
            host_id: HOST.0,
            name: "Boot disk".into(),
            key: "disk[sda]".into(),
        }],
        ..DiscoveryConfig::default()
    })
    .expect("seed")
}

fn rows(devices: &[String]) -> Vec<Row> {
    devices
        .iter()
        .map(|dev| Row::new().with("{#DEV}", dev.as_str()))
        .collect()
}

fn cycle(store: &mut MemoryStore, rows: &mut [Row], now: i64) -> (CycleStats, ErrorReport) {
    let mut report = ErrorReport::new();
    let request = CycleRequest {
        host_id: HOST,
        rule_id: RULE,
        lifetime: Lifetime::days(7),
        now,
    };
    let stats = Reconciler::run(store, &LldMacros, &request, rows, &mut report).expect("cycle");
    (stats, report)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Replaying the same rows at the same time writes nothing new.
    #[test]
    fn identical_cycles_are_idempotent(devices in vec("[a-z]{1,6}", 0..12)) {
        let mut store = store();
        cycle(&mut store, &mut rows(&devices), T0);
        let first = store.catalog().clone();

        let (stats, _) = cycle(&mut store, &mut rows(&devices), T0);
        prop_assert!(!stats.persisted);
        prop_assert_eq!(stats.items_created, 0);
        prop_assert_eq!(stats.items_updated, 0);
        prop_assert_eq!(store.catalog(), &first);
    }

    /// No two items on the host ever share a key.
    #[test]
    fn keys_stay_unique_on_host(
        first in vec("[a-d]{1,3}", 0..10),
        second in vec("[a-d]{1,3}", 0..10),
    ) {
        let mut store = store();
        cycle(&mut store, &mut rows(&first), T0);
        cycle(&mut store, &mut rows(&second), T0 + 60);

        let mut keys: Vec<String> = store
            .catalog()
            .discovered_items(RULE)
            .into_iter()
            .map(|(item, _)| item.text.key.clone())
            .collect();
        keys.push("disk[sda]".into());
        let distinct: BTreeSet<&String> = keys.iter().collect();
        prop_assert_eq!(distinct.len(), keys.len());
    }

    /// Every row publishes at most one item per prototype, and only items
    /// that exist.
    #[test]
    fn published_links_point_at_stored_items(devices in vec("[a-c]{1,2}", 0..10)) {
        let mut store = store();
        let mut batch = rows(&devices);
        cycle(&mut store, &mut batch, T0);

        for row in &batch {
            prop_assert!(row.item_links().len() <= 1);
            for link in row.item_links() {
                prop_assert!(store.catalog().item(link.item_id).is_some());
            }
        }
    }

    /// A rejected update leaves the stored item as it was.
    #[test]
    fn rejected_updates_roll_back(extra in 1usize..64) {
        let mut store = store();
        let label = |value: &str| vec![Row::new().with("{#DEV}", "sdb").with("{#LABEL}", value)];
        cycle(&mut store, &mut label("data"), T0);
        let before = store.catalog().clone();

        let long = "l".repeat(65_535 + extra);
        let (stats, report) = cycle(&mut store, &mut label(&long), T0);
        prop_assert_eq!(stats.items_updated, 0);
        prop_assert!(report.mentions("is too long."));
        prop_assert_eq!(store.catalog(), &before);
    }

    /// Once lost, an entity's fate only moves forward as time passes.
    #[test]
    fn verdicts_are_monotonic(
        last_seen in 0i64..1_000_000,
        days in 0u16..30,
        steps in vec(0i64..200_000, 1..20),
    ) {
        let lifetime = Lifetime::days(days);
        let due = last_seen + lifetime.as_secs();
        let mut now = last_seen;
        let mut delete_at = 0;
        let mut expired = false;

        for step in steps {
            now += step;
            match verdict(false, last_seen, delete_at, lifetime, now) {
                Verdict::Expired => expired = true,
                Verdict::Schedule(at) => {
                    prop_assert!(!expired);
                    prop_assert_eq!(at, due);
                    delete_at = at;
                }
                Verdict::Unchanged => {
                    prop_assert!(!expired);
                    prop_assert_eq!(delete_at, due);
                }
                Verdict::Seen => prop_assert!(false, "undiscovered entity reported as seen"),
            }
        }
    }
}

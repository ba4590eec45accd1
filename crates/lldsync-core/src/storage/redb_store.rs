//! # redb-backed Store
//!
//! A `Catalog` mirrored into a redb database: one table per catalog table,
//! `u64` keys, postcard-encoded records.
//!
//! Reads are served from the in-memory catalog. Every write runs in a single
//! redb write transaction: the catalog is updated on a staged copy, the
//! touched keys are written (or removed) from that copy, and the copy only
//! replaces the live catalog after the commit succeeded.
//!
//! redb admits one writer at a time, so the write transaction doubles as the
//! host lock: `persist` re-checks the host record inside it.

use super::catalog::{Catalog, DiscoveryConfig, Mutation, Table as CatalogTable};
use super::{AssignedIds, ChangeSet, DiscoveryStore, HostApplication, SweepPlan};
use crate::model::{
    ApplicationAssociation, ApplicationPrototype, ItemPrototype, StoredApplication, StoredItem,
    StoredLink,
};
use crate::types::{ApplicationId, HostId, ItemId, LldError, PrototypeId, RuleId};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use std::collections::BTreeSet;
use std::path::Path;

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_ID: &str = "next_id";
const SCHEMA_VERSION: &str = "schema_version";

/// Definition of the redb table mirroring a catalog table.
const fn definition(table: CatalogTable) -> TableDefinition<'static, u64, &'static [u8]> {
    TableDefinition::new(table.name())
}

/// A disk-backed discovery store.
pub struct RedbStore {
    db: Database,
    catalog: Catalog,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("stats", &self.catalog.stats())
            .field("next_id", &self.catalog.next_id())
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LldError> {
        let db = Database::create(path.as_ref()).map_err(|e| LldError::IoError(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| LldError::IoError(e.to_string()))?;
            for table in CatalogTable::ALL {
                let _ = write_txn
                    .open_table(definition(table))
                    .map_err(|e| LldError::IoError(e.to_string()))?;
            }
            {
                let mut meta = write_txn
                    .open_table(METADATA)
                    .map_err(|e| LldError::IoError(e.to_string()))?;
                let version = meta
                    .get(SCHEMA_VERSION)
                    .map_err(|e| LldError::IoError(e.to_string()))?
                    .map(|v| v.value());
                match version {
                    None => {
                        meta.insert(SCHEMA_VERSION, u64::from(crate::primitives::FORMAT_VERSION))
                            .map_err(|e| LldError::IoError(e.to_string()))?;
                    }
                    Some(v) if v == u64::from(crate::primitives::FORMAT_VERSION) => {}
                    Some(v) => {
                        return Err(LldError::DeserializationError(format!(
                            "unsupported schema version {v}"
                        )));
                    }
                }
            }
            write_txn
                .commit()
                .map_err(|e| LldError::IoError(e.to_string()))?;
        }

        let catalog = Self::load(&db)?;
        tracing::debug!(stats = ?catalog.stats(), "redb store opened");
        Ok(Self { db, catalog })
    }

    fn load(db: &Database) -> Result<Catalog, LldError> {
        let read_txn = db
            .begin_read()
            .map_err(|e| LldError::IoError(e.to_string()))?;
        let mut catalog = Catalog::new();

        for table in CatalogTable::ALL {
            let records = read_txn
                .open_table(definition(table))
                .map_err(|e| LldError::IoError(e.to_string()))?;
            for entry in records
                .iter()
                .map_err(|e| LldError::IoError(e.to_string()))?
            {
                let (key, value) = entry.map_err(|e| LldError::IoError(e.to_string()))?;
                catalog.load(table, key.value(), value.value())?;
            }
        }

        let next_id = {
            let meta = read_txn
                .open_table(METADATA)
                .map_err(|e| LldError::IoError(e.to_string()))?;
            meta.get(NEXT_ID)
                .map_err(|e| LldError::IoError(e.to_string()))?
                .map(|v| v.value())
                .unwrap_or(0)
        };
        catalog.set_next_id(next_id);
        Ok(catalog)
    }

    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<bool, LldError> {
        self.db
            .compact()
            .map_err(|e| LldError::IoError(e.to_string()))
    }

    pub fn apply_config(&mut self, config: &DiscoveryConfig) -> Result<(), LldError> {
        self.transact(None, |catalog| Ok(((), catalog.apply_config(config)?)))
    }

    pub fn set_rule_error(&mut self, rule: RuleId, error: &str) -> Result<(), LldError> {
        self.transact(None, |catalog| Ok(((), catalog.set_rule_error(rule, error)?)))
    }

    pub fn remove_host(&mut self, host: HostId) -> Result<bool, LldError> {
        self.transact(None, |catalog| {
            let mutation = catalog.remove_host(host);
            Ok((mutation.is_some(), mutation.into_iter().collect()))
        })
    }

    /// Replace the whole content with `catalog`, e.g. from a snapshot file.
    pub fn import(&mut self, catalog: Catalog) -> Result<(), LldError> {
        let mut mutations = Vec::new();
        for table in CatalogTable::ALL {
            let keys: BTreeSet<u64> = self
                .catalog
                .keys(table)
                .into_iter()
                .chain(catalog.keys(table))
                .collect();
            mutations.extend(keys.into_iter().map(|id| Mutation { table, id }));
        }
        self.transact(None, move |staged| {
            *staged = catalog;
            Ok(((), mutations))
        })
    }

    /// Run `update` on a staged copy of the catalog and commit the keys it
    /// touched. With `host` set, the host record is checked first, inside
    /// the transaction.
    fn transact<T>(
        &mut self,
        host: Option<HostId>,
        update: impl FnOnce(&mut Catalog) -> Result<(T, Vec<Mutation>), LldError>,
    ) -> Result<T, LldError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| LldError::IoError(e.to_string()))?;

        if let Some(host) = host {
            let hosts = write_txn
                .open_table(definition(CatalogTable::Hosts))
                .map_err(|e| LldError::IoError(e.to_string()))?;
            let found = hosts
                .get(host.0)
                .map_err(|e| LldError::IoError(e.to_string()))?
                .is_some();
            if !found {
                return Err(LldError::HostNotFound(host));
            }
        }

        let mut staged = self.catalog.clone();
        let (value, mutations) = update(&mut staged)?;
        Self::write(&write_txn, &staged, &mutations)?;
        write_txn
            .commit()
            .map_err(|e| LldError::IoError(e.to_string()))?;

        tracing::trace!(keys = mutations.len(), "redb transaction committed");
        self.catalog = staged;
        Ok(value)
    }

    fn write(
        write_txn: &WriteTransaction,
        staged: &Catalog,
        mutations: &[Mutation],
    ) -> Result<(), LldError> {
        for table in CatalogTable::ALL {
            let mut touched = mutations.iter().filter(|m| m.table == table).peekable();
            if touched.peek().is_none() {
                continue;
            }
            let mut records = write_txn
                .open_table(definition(table))
                .map_err(|e| LldError::IoError(e.to_string()))?;
            for mutation in touched {
                match staged.encode(table, mutation.id)? {
                    Some(bytes) => {
                        records
                            .insert(mutation.id, bytes.as_slice())
                            .map_err(|e| LldError::IoError(e.to_string()))?;
                    }
                    None => {
                        records
                            .remove(mutation.id)
                            .map_err(|e| LldError::IoError(e.to_string()))?;
                    }
                }
            }
        }

        let mut meta = write_txn
            .open_table(METADATA)
            .map_err(|e| LldError::IoError(e.to_string()))?;
        meta.insert(NEXT_ID, staged.next_id())
            .map_err(|e| LldError::IoError(e.to_string()))?;
        Ok(())
    }
}

impl DiscoveryStore for RedbStore {
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
        self.transact(Some(host), |catalog| catalog.persist(host, changes))
    }

    fn apply_sweep(&mut self, host: HostId, plan: &SweepPlan) -> Result<(), LldError> {
        self.transact(Some(host), |catalog| Ok(((), catalog.sweep(host, plan)?)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::catalog::{ApplicationConfig, HostRecord, RuleConfig};
    use crate::storage::NewApplication;
    use crate::types::ApplicationHandle;
    use tempfile::tempdir;

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            hosts: vec![HostRecord {
                id: HostId(1),
                name: "web-01".into(),
            }],
            rules: vec![RuleConfig {
                id: 10,
                host_id: 1,
                name: "fs".into(),
                lifetime_days: None,
            }],
            applications: vec![ApplicationConfig {
                id: 40,
                host_id: 1,
                name: "Filesystems".into(),
            }],
            ..DiscoveryConfig::default()
        }
    }

    #[test]
    fn state_survives_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("lld.redb");

        let expected = {
            let mut store = RedbStore::open(&db_path).expect("open db");
            store.apply_config(&config()).expect("seed");
            let changes = ChangeSet {
                new_applications: vec![NewApplication {
                    handle: ApplicationHandle(0),
                    name: "FS /".into(),
                }],
                ..ChangeSet::default()
            };
            store.persist(HostId(1), &changes).expect("persist");
            store.set_rule_error(RuleId(10), "boom").expect("error");
            store.catalog().clone()
        };

        let store = RedbStore::open(&db_path).expect("reopen db");
        assert_eq!(store.catalog(), &expected);
        assert_eq!(
            store.catalog().rule(RuleId(10)).map(|r| r.last_error.as_str()),
            Some("boom")
        );
    }

    #[test]
    fn persist_for_removed_host_fails_without_writes() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("lld.redb")).expect("open db");
        store.apply_config(&config()).expect("seed");
        assert!(store.remove_host(HostId(1)).expect("remove"));

        let before = store.catalog().clone();
        let changes = ChangeSet {
            new_applications: vec![NewApplication {
                handle: ApplicationHandle(0),
                name: "FS /".into(),
            }],
            ..ChangeSet::default()
        };
        let result = store.persist(HostId(1), &changes);
        assert!(matches!(result, Err(LldError::HostNotFound(HostId(1)))));
        assert_eq!(store.catalog(), &before);
    }

    #[test]
    fn deletions_reach_disk() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("lld.redb");
        {
            let mut store = RedbStore::open(&db_path).expect("open db");
            store.apply_config(&config()).expect("seed");
            store
                .persist(
                    HostId(1),
                    &ChangeSet {
                        removed_applications: vec![ApplicationId(40)],
                        ..ChangeSet::default()
                    },
                )
                .expect("persist");
        }
        let store = RedbStore::open(&db_path).expect("reopen db");
        assert!(store.catalog().application(ApplicationId(40)).is_none());
    }

    #[test]
    fn import_replaces_content() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("lld.redb")).expect("open db");
        store.apply_config(&config()).expect("seed");

        let replacement = Catalog::new();
        store.import(replacement.clone()).expect("import");
        assert_eq!(store.catalog(), &replacement);
    }
}

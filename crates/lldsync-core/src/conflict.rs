//! # Application Conflict Resolution
//!
//! Application names are unique per host, but applications are shared
//! between discovery rules and with manually created ones. Resolution runs
//! in three passes:
//!
//! 1. Within the batch: same-named discovered applications collapse onto
//!    the later entry in id order, or are rejected when their prototypes
//!    differ.
//! 2. New names against the host: a name held by a discovery-created
//!    application of another rule is adopted; a name held by a manual
//!    application is rejected.
//! 3. Old names against other rules: renaming an application another rule
//!    also discovered creates a new application instead, and only this
//!    rule's discovery record is dropped from the shared one.

use crate::batch::Batch;
use crate::model::{Application, ApplicationFlag, ApplicationFlags};
use crate::report::ErrorReport;
use crate::storage::DiscoveryStore;
use crate::types::{ApplicationHandle, ApplicationId, DiscoveryId, LldError};

/// Outcome counters of a resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictStats {
    /// Entries folded into a same-named entry of the same prototype.
    pub merged: usize,
    /// Entries rejected with a report line.
    pub rejected: usize,
    /// Entries that adopted an application of another rule.
    pub adopted: usize,
    /// Renames of shared applications turned into new applications.
    pub split: usize,
}

/// Resolves application naming conflicts.
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn resolve<S: DiscoveryStore + ?Sized>(
        batch: &mut Batch,
        store: &S,
        report: &mut ErrorReport,
    ) -> Result<ConflictStats, LldError> {
        let mut stats = ConflictStats::default();
        if batch.applications.is_empty() {
            return Ok(stats);
        }

        let order = batch.applications_by_id();
        let (names_new, names_old) = Self::within_batch(batch, &order, report, &mut stats);

        if !names_new.is_empty() {
            Self::against_host(batch, &order, store, names_new, report, &mut stats)?;
        }
        if !names_old.is_empty() {
            Self::against_other_rules(batch, &order, store, names_old, &mut stats)?;
        }

        tracing::debug!(
            merged = stats.merged,
            rejected = stats.rejected,
            adopted = stats.adopted,
            split = stats.split,
            "application conflicts resolved"
        );
        Ok(stats)
    }

    /// Collapse same-named entries of the batch. Returns the new names and
    /// the pre-rename names of the surviving new or renamed entries.
    fn within_batch(
        batch: &mut Batch,
        order: &[ApplicationHandle],
        report: &mut ErrorReport,
        stats: &mut ConflictStats,
    ) -> (Vec<String>, Vec<String>) {
        let mut names_new = Vec::new();
        let mut names_old = Vec::new();

        for (i, &handle) in order.iter().enumerate() {
            let Some(app) = batch.application(handle) else {
                continue;
            };
            if !app.is_discovered() {
                continue;
            }
            if !app.is_new() && !app.flags.contains(ApplicationFlag::NameChanged) {
                continue;
            }

            // Scanning from the back favours existing entries over new ones.
            let name = app.name.current();
            let rival = order
                .iter()
                .skip(i + 1)
                .rev()
                .copied()
                .find(|&other| {
                    batch
                        .application(other)
                        .is_some_and(|candidate| candidate.name.current() == name)
                });

            let Some(rival) = rival else {
                names_new.push(name.clone());
                if let Some(original) = app.name.original() {
                    names_old.push(original.clone());
                }
                continue;
            };

            let (prototype_id, row, is_new, name) =
                (app.prototype_id, app.row, app.is_new(), name.clone());
            let rival_prototype = batch
                .application(rival)
                .map(|candidate| candidate.prototype_id);
            if let Some(app) = batch.application_mut(handle) {
                app.flags.remove(ApplicationFlag::Discovered);
            }

            if rival_prototype != Some(prototype_id) {
                report.push(format!(
                    "Cannot {} application: application with the same name \"{name}\" already exists.",
                    if is_new { "create" } else { "update" }
                ));
                stats.rejected += 1;
                continue;
            }

            let repointed = row.is_some_and(|row| {
                batch
                    .application_index
                    .repoint(prototype_id, row, rival)
            });
            if repointed {
                stats.merged += 1;
            } else {
                tracing::error!(
                    prototype = prototype_id.0,
                    "this should never happen: merged application has no index entry"
                );
            }
        }

        (names_new, names_old)
    }

    fn against_host<S: DiscoveryStore + ?Sized>(
        batch: &mut Batch,
        order: &[ApplicationHandle],
        store: &S,
        mut names: Vec<String>,
        report: &mut ErrorReport,
        stats: &mut ConflictStats,
    ) -> Result<(), LldError> {
        names.sort();
        names.dedup();

        for hit in store.host_applications_named(batch.host_id, &names)? {
            let candidate = order.iter().copied().find(|&handle| {
                batch
                    .application(handle)
                    .is_some_and(|app| app.is_discovered() && *app.name.current() == hit.name)
            });
            let Some(candidate) = candidate else {
                tracing::error!(
                    application = hit.id.0,
                    "this should never happen: no discovered application carries a queried name"
                );
                continue;
            };

            let mut removal = None;
            if let Some(app) = batch.application_mut(candidate) {
                if !hit.discovered {
                    app.flags.clear();
                    report.push(format!(
                        "Cannot create application: non-discovered application with the same name \"{}\" already exists.",
                        hit.name
                    ));
                    stats.rejected += 1;
                    continue;
                }

                // Renamed onto another rule's application: drop the old
                // one and attach to the shared one through a new record.
                if app.flags.contains(ApplicationFlag::NameChanged) {
                    removal = Some(Application::removal(app.id));
                    app.discovery_id = DiscoveryId(0);
                    app.flags.remove(ApplicationFlag::NameChanged);
                    app.flags.insert(ApplicationFlag::AddDiscoveryLink);
                }
                app.id = hit.id;
                stats.adopted += 1;
            }
            if let Some(removal) = removal {
                batch.push_application(removal);
            }
        }
        Ok(())
    }

    fn against_other_rules<S: DiscoveryStore + ?Sized>(
        batch: &mut Batch,
        order: &[ApplicationHandle],
        store: &S,
        mut names: Vec<String>,
        stats: &mut ConflictStats,
    ) -> Result<(), LldError> {
        names.sort();
        names.dedup();

        for name in store.names_shared_with_other_rules(batch.host_id, batch.rule_id, &names)? {
            let candidate = order.iter().copied().find(|&handle| {
                batch.application(handle).is_some_and(|app| {
                    app.is_discovered() && app.name.original().is_some_and(|orig| *orig == name)
                })
            });
            let Some(candidate) = candidate else {
                tracing::error!(
                    name = %name,
                    "this should never happen: no renamed application carries a shared name"
                );
                continue;
            };

            let mut removal = None;
            if let Some(app) = batch.application_mut(candidate) {
                removal = Some(Application::discovery_removal(
                    app.id,
                    app.prototype_id,
                    app.discovery_id,
                ));
                app.id = ApplicationId(0);
                app.discovery_id = DiscoveryId(0);
                app.flags = ApplicationFlags::of(&[
                    ApplicationFlag::AddDiscoveryLink,
                    ApplicationFlag::Discovered,
                ]);
                stats.split += 1;
            }
            if let Some(removal) = removal {
                batch.push_application(removal);
            }
        }
        Ok(())
    }
}

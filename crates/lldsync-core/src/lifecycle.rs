//! # Lifecycle Sweep
//!
//! After persistence every entity of the batch is either stamped as seen or
//! aged: entities discovery stopped reporting get a deletion time of
//! `last_seen + lifetime`, and are deleted once that time has passed.
//!
//! Applications age through this rule's discovery record. An expired record
//! is always removed; the application itself only when no other rule still
//! discovers it.

use crate::batch::Batch;
use crate::primitives::{MAX_LIFETIME_DAYS, SEC_PER_DAY};
use crate::storage::{DiscoveryStore, SweepPlan};
use crate::types::{ApplicationId, DiscoveryId, LldError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How long an undiscovered entity is kept, in whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lifetime(u16);

impl Lifetime {
    #[must_use]
    pub const fn days(days: u16) -> Self {
        Self(days)
    }

    /// Validated constructor for user input.
    pub fn try_days(days: u16) -> Result<Self, LldError> {
        if days > MAX_LIFETIME_DAYS {
            return Err(LldError::InvalidConfig(format!(
                "lifetime of {days} days exceeds the maximum of {MAX_LIFETIME_DAYS}"
            )));
        }
        Ok(Self(days))
    }

    #[must_use]
    pub const fn as_days(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn as_secs(self) -> i64 {
        self.0 as i64 * SEC_PER_DAY
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self(30)
    }
}

/// Lifetime decision for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Discovered this cycle.
    Seen,
    /// Past its lifetime.
    Expired,
    /// Deletion time must be (re)set to the contained timestamp.
    Schedule(i64),
    /// Already scheduled correctly.
    Unchanged,
}

/// Decide the fate of an entity from its timestamps.
#[must_use]
pub fn verdict(discovered: bool, last_seen: i64, delete_at: i64, lifetime: Lifetime, now: i64) -> Verdict {
    if discovered {
        return Verdict::Seen;
    }
    let lifetime = lifetime.as_secs();
    if now.saturating_sub(last_seen) > lifetime {
        return Verdict::Expired;
    }
    let due = last_seen.saturating_add(lifetime);
    if delete_at != due {
        Verdict::Schedule(due)
    } else {
        Verdict::Unchanged
    }
}

/// Builds the lifecycle plan of a persisted batch.
pub struct LifecycleSweep;

impl LifecycleSweep {
    pub fn plan<S: DiscoveryStore + ?Sized>(
        batch: &Batch,
        store: &S,
        lifetime: Lifetime,
        now: i64,
    ) -> Result<SweepPlan, LldError> {
        let mut plan = SweepPlan::new(now);

        for item in &batch.items {
            if item.is_new() {
                continue;
            }
            match verdict(item.discovered, item.last_seen, item.delete_at, lifetime, now) {
                Verdict::Seen => plan.items_seen.push(item.id),
                Verdict::Expired => plan.items_expired.push(item.id),
                Verdict::Schedule(due) => plan.items_scheduled.push((item.id, due)),
                Verdict::Unchanged => {}
            }
        }

        let mut visited: BTreeSet<DiscoveryId> = BTreeSet::new();
        let mut expired: Vec<ApplicationId> = Vec::new();
        for app in &batch.applications {
            if app.is_new() || app.flags.is_pseudo() || app.discovery_id.is_unassigned() {
                continue;
            }
            if !visited.insert(app.discovery_id) {
                continue;
            }
            match verdict(app.is_discovered(), app.last_seen, app.delete_at, lifetime, now) {
                Verdict::Seen => plan.discoveries_seen.push(app.discovery_id),
                Verdict::Expired => {
                    plan.discoveries_expired.push(app.discovery_id);
                    expired.push(app.id);
                }
                Verdict::Schedule(due) => plan.discoveries_scheduled.push((app.discovery_id, due)),
                Verdict::Unchanged => {}
            }
        }

        if !expired.is_empty() {
            expired.sort();
            expired.dedup();
            let claimed = store.applications_claimed_elsewhere(batch.rule_id, &expired)?;
            plan.applications_expired = expired
                .into_iter()
                .filter(|id| !claimed.contains(id))
                .collect();
        }

        tracing::debug!(
            items_seen = plan.items_seen.len(),
            items_scheduled = plan.items_scheduled.len(),
            items_expired = plan.items_expired.len(),
            applications_expired = plan.applications_expired.len(),
            "lifecycle planned"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = SEC_PER_DAY;

    #[test]
    fn discovered_entities_are_seen() {
        assert_eq!(verdict(true, 0, 55, Lifetime::days(7), 100), Verdict::Seen);
    }

    #[test]
    fn expiry_supersedes_rescheduling() {
        let t0 = 1_000_000;
        assert_eq!(
            verdict(false, t0, 0, Lifetime::days(7), t0 + 8 * DAY),
            Verdict::Expired
        );
    }

    #[test]
    fn lost_entities_are_scheduled_once() {
        let t0 = 1_000_000;
        let due = t0 + 7 * DAY;
        assert_eq!(
            verdict(false, t0, 0, Lifetime::days(7), t0 + DAY),
            Verdict::Schedule(due)
        );
        assert_eq!(
            verdict(false, t0, due, Lifetime::days(7), t0 + 2 * DAY),
            Verdict::Unchanged
        );
    }

    #[test]
    fn exact_lifetime_is_not_expired() {
        let t0 = 1_000_000;
        assert_eq!(
            verdict(false, t0, t0 + 7 * DAY, Lifetime::days(7), t0 + 7 * DAY),
            Verdict::Unchanged
        );
    }

    #[test]
    fn zero_lifetime_expires_immediately() {
        assert_eq!(verdict(false, 10, 0, Lifetime::days(0), 11), Verdict::Expired);
    }

    #[test]
    fn lifetime_bounds() {
        assert!(Lifetime::try_days(MAX_LIFETIME_DAYS).is_ok());
        assert!(Lifetime::try_days(MAX_LIFETIME_DAYS + 1).is_err());
        assert_eq!(Lifetime::days(2).as_secs(), 2 * DAY);
    }
}

//! Observer-facing read model.
//!
//! Every observer derives the remaining time from the stored absolute end time
//! at the moment it asks, so dashboards polling at different phases agree.

use chrono::{DateTime, Utc};
use tracing::warn;

use super::state::DiscountStateStore;
use crate::model::{DiscountRecord, DrinkId};

/// What a dashboard shows about the discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountStatus {
    None,
    Active { drink: DrinkId, remaining_secs: u64 },
}

impl DiscountStatus {
    /// Derive the status of `record` at `now`.
    ///
    /// Remaining time is truncated to whole seconds, like every other
    /// dashboard countdown.
    pub fn derive(record: Option<DiscountRecord>, now: DateTime<Utc>) -> Self {
        match record {
            Some(record) if !record.is_expired(now) => DiscountStatus::Active {
                drink: record.drink,
                remaining_secs: whole_secs_until(record.ends_at, now),
            },
            _ => DiscountStatus::None,
        }
    }

    pub fn drink(&self) -> Option<DrinkId> {
        match self {
            DiscountStatus::Active { drink, .. } => Some(*drink),
            DiscountStatus::None => None,
        }
    }
}

/// Whole seconds from `now` until `deadline`, zero once it has passed.
pub(crate) fn whole_secs_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((deadline - now).num_seconds()).unwrap_or(0)
}

/// Result of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub status: DiscountStatus,
    /// Expired record this read removed from the store, if any.
    pub expired: Option<DiscountRecord>,
}

/// Everything a dashboard polls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardSnapshot {
    pub discount: DiscountStatus,
    pub next_evaluation_in_secs: u64,
}

/// Read-only view over the discount store.
#[derive(Debug, Clone, Copy)]
pub struct DiscountQuery<'a> {
    store: &'a DiscountStateStore,
}

impl<'a> DiscountQuery<'a> {
    pub fn new(store: &'a DiscountStateStore) -> Self {
        Self { store }
    }

    /// Current status at `now`. An expired record is removed on the way out;
    /// read failures degrade to no discount.
    pub fn query(&self, now: DateTime<Utc>) -> Observation {
        let record = match self.store.get() {
            Ok(record) => record,
            Err(e) => {
                warn!(reason = %e, "discount read failed, reporting no discount");
                return Observation {
                    status: DiscountStatus::None,
                    expired: None,
                };
            }
        };

        let expired = match record {
            Some(r) if r.is_expired(now) => self.store.clear_if_expired(now).unwrap_or_else(|e| {
                warn!(reason = %e, "could not remove expired discount");
                None
            }),
            _ => None,
        };

        Observation {
            status: DiscountStatus::derive(record, now),
            expired,
        }
    }
}

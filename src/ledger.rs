//! Sales ledger: the append-only log of sale events and its two running
//! aggregates.
//!
//! The lifetime totals never reset on their own. The since-evaluation totals
//! are drained by every evaluation, automatic or manual.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, TimeDelta, Utc};

use crate::engine::StorageError;
use crate::model::{DrinkId, SaleEvent};

/// Units sold per drink.
pub type SalesTotals = BTreeMap<DrinkId, u64>;

/// Storage for sale events.
pub trait SalesLedger: Send + Sync {
    /// Append a sale; it counts towards both aggregates.
    fn append(&self, event: SaleEvent) -> Result<(), StorageError>;

    /// Lifetime totals.
    fn totals(&self) -> Result<SalesTotals, StorageError>;

    /// Totals since the last evaluation.
    fn since_evaluation(&self) -> Result<SalesTotals, StorageError>;

    /// Return the since-evaluation totals and reset them in one step.
    fn drain_since_evaluation(&self) -> Result<SalesTotals, StorageError>;

    /// Events that occurred at or after `cutoff`, oldest first.
    fn events_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SaleEvent>, StorageError>;

    /// Forget everything: both aggregates and the event log.
    fn reset_all(&self) -> Result<(), StorageError>;
}

/// Both aggregates, as reported to dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: SalesTotals,
    pub since_evaluation: SalesTotals,
}

impl Stats {
    pub fn total_of(&self, drink: DrinkId) -> u64 {
        self.total.get(&drink).copied().unwrap_or(0)
    }

    pub fn since_evaluation_of(&self, drink: DrinkId) -> u64 {
        self.since_evaluation.get(&drink).copied().unwrap_or(0)
    }
}

/// Trailing time window for raw sale queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SalesWindow {
    TenMinutes,
    OneHour,
    #[default]
    TwoHours,
    ThreeHours,
    Day,
}

impl SalesWindow {
    /// Parse a window name, falling back to two hours for anything unknown.
    pub fn parse(name: &str) -> Self {
        match name {
            "10min" => SalesWindow::TenMinutes,
            "1hr" => SalesWindow::OneHour,
            "3hrs" => SalesWindow::ThreeHours,
            "24hrs" => SalesWindow::Day,
            _ => SalesWindow::TwoHours,
        }
    }

    pub fn duration(self) -> TimeDelta {
        match self {
            SalesWindow::TenMinutes => TimeDelta::minutes(10),
            SalesWindow::OneHour => TimeDelta::hours(1),
            SalesWindow::TwoHours => TimeDelta::hours(2),
            SalesWindow::ThreeHours => TimeDelta::hours(3),
            SalesWindow::Day => TimeDelta::hours(24),
        }
    }

    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    events: Vec<SaleEvent>,
    total: SalesTotals,
    since_evaluation: SalesTotals,
}

/// In-process ledger.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, StorageError> {
        self.state.read().map_err(|_poisoned| StorageError::Poisoned("ledger"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, StorageError> {
        self.state.write().map_err(|_poisoned| StorageError::Poisoned("ledger"))
    }
}

impl SalesLedger for MemoryLedger {
    fn append(&self, event: SaleEvent) -> Result<(), StorageError> {
        let mut state = self.write()?;
        let bump = |totals: &SalesTotals| {
            totals
                .get(&event.drink)
                .copied()
                .unwrap_or(0)
                .checked_add(event.amount)
                .ok_or(StorageError::TotalsOverflow(event.drink))
        };
        let total = bump(&state.total)?;
        let since_evaluation = bump(&state.since_evaluation)?;

        state.total.insert(event.drink, total);
        state.since_evaluation.insert(event.drink, since_evaluation);
        state.events.push(event);
        Ok(())
    }

    fn totals(&self) -> Result<SalesTotals, StorageError> {
        Ok(self.read()?.total.clone())
    }

    fn since_evaluation(&self) -> Result<SalesTotals, StorageError> {
        Ok(self.read()?.since_evaluation.clone())
    }

    fn drain_since_evaluation(&self) -> Result<SalesTotals, StorageError> {
        Ok(std::mem::take(&mut self.write()?.since_evaluation))
    }

    fn events_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SaleEvent>, StorageError> {
        let state = self.read()?;
        // appended in arrival order, which is time order for a single clock
        let start = state.events.partition_point(|e| e.occurred_at < cutoff);
        Ok(state.events[start..].to_vec())
    }

    fn reset_all(&self) -> Result<(), StorageError> {
        let mut state = self.write()?;
        *state = LedgerState::default();
        Ok(())
    }
}

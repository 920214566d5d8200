use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::StorageError;
use crate::model::DiscountRecord;

/// State of the discount subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountState {
    NoDiscount,
    Active(DiscountRecord),
}

impl From<Option<DiscountRecord>> for DiscountState {
    fn from(record: Option<DiscountRecord>) -> Self {
        record.map_or(DiscountState::NoDiscount, DiscountState::Active)
    }
}

/// Single-slot holder of the active discount.
///
/// Every write replaces the whole slot under one lock, so there is never more
/// than one live record and the last writer wins.
#[derive(Debug, Default)]
pub struct DiscountStateStore {
    slot: RwLock<Option<DiscountRecord>>,
}

impl DiscountStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Result<Option<DiscountRecord>, StorageError> {
        Ok(*self.read()?)
    }

    /// Replace the slot, returning the record it superseded.
    pub fn set(&self, record: DiscountRecord) -> Result<Option<DiscountRecord>, StorageError> {
        Ok(self.write()?.replace(record))
    }

    /// Empty the slot, returning the record it held.
    pub fn clear(&self) -> Result<Option<DiscountRecord>, StorageError> {
        Ok(self.write()?.take())
    }

    /// Empty the slot only if its record has expired at `now`.
    ///
    /// The check and the removal happen under the same write lock, so a record
    /// written concurrently by an evaluation is never removed by a stale reader.
    pub fn clear_if_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<DiscountRecord>, StorageError> {
        let mut slot = self.write()?;
        match *slot {
            Some(record) if record.is_expired(now) => Ok(slot.take()),
            _ => Ok(None),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Option<DiscountRecord>>, StorageError> {
        self.slot.read().map_err(|_poisoned| StorageError::Poisoned("discount store"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Option<DiscountRecord>>, StorageError> {
        self.slot.write().map_err(|_poisoned| StorageError::Poisoned("discount store"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn record(drink: u32, ends_at: i64) -> DiscountRecord {
        DiscountRecord {
            drink,
            ends_at: DateTime::from_timestamp(ends_at, 0).unwrap(),
        }
    }

    #[test]
    fn store_starts_empty() {
        let store = DiscountStateStore::new();
        assert_eq!(store.get().unwrap(), None);
        assert_eq!(DiscountState::from(store.get().unwrap()), DiscountState::NoDiscount);
    }

    #[test]
    fn set_replaces_previous_record() {
        let store = DiscountStateStore::new();
        assert_eq!(store.set(record(1, 100)).unwrap(), None);
        assert_eq!(store.set(record(2, 200)).unwrap(), Some(record(1, 100)));
        assert_eq!(store.get().unwrap(), Some(record(2, 200)));
    }

    #[test]
    fn clear_is_idempotent() {
        let store = DiscountStateStore::new();
        store.set(record(1, 100)).unwrap();
        assert_eq!(store.clear().unwrap(), Some(record(1, 100)));
        assert_eq!(store.clear().unwrap(), None);
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn clear_if_expired_keeps_live_record() {
        let store = DiscountStateStore::new();
        store.set(record(1, 100)).unwrap();

        let before = DateTime::from_timestamp(99, 0).unwrap();
        assert_eq!(store.clear_if_expired(before).unwrap(), None);
        assert_eq!(store.get().unwrap(), Some(record(1, 100)));

        let at_end = DateTime::from_timestamp(100, 0).unwrap();
        assert_eq!(store.clear_if_expired(at_end).unwrap(), Some(record(1, 100)));
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn concurrent_writers_leave_one_record() {
        let store = Arc::new(DiscountStateStore::new());
        let handles: Vec<_> = (0..8)
            .map(|drink| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.set(record(drink, i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let last = store.get().unwrap().unwrap();
        assert_eq!(last.ends_at, DateTime::from_timestamp(99, 0).unwrap());
    }
}

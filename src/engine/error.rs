//! Error types for the discount engine.

use thiserror::Error;

use crate::model::DrinkId;

/// Top-level error returned by [`Scheduler`](super::Scheduler) operations.
#[derive(Debug, Error)]
pub enum BourseError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Authorization(#[from] AuthorizationError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl BourseError {
    /// Storage failures may succeed on retry, everything else will not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BourseError::Storage(StorageError::Unavailable(_) | StorageError::Poisoned(_))
        )
    }
}

/// Input rejected before touching any state.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown drink {0}")]
    UnknownDrink(DrinkId),
    #[error("non-positive amount {1} for drink {0}")]
    NonPositiveAmount(DrinkId, i64),
    #[error("amount {1} for drink {0} exceeds the per-sale limit")]
    AmountTooLarge(DrinkId, i64),
    #[error("duplicate drink id {0}")]
    DuplicateDrink(DrinkId),
    #[error("catalog has no drinks")]
    EmptyCatalog,
    #[error("scheduled time out of range")]
    TimeOutOfRange,
}

/// Bad credential on an administrative action.
#[derive(Debug, Error)]
#[error("credential rejected")]
pub struct AuthorizationError;

/// The ledger or the discount store could not be used.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0} unavailable")]
    Unavailable(String),
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
    #[error("sales total overflow for drink {0}")]
    TotalsOverflow(DrinkId),
}

//! Discount engine.
//!
//! The [`Scheduler`] owns the single active discount and is the only writer of
//! it. Every mutation (automatic tick, manual evaluation, manual override,
//! manual clear, sales reset) runs inside one critical section, so two
//! evaluations can never both consume the same since-evaluation totals and an
//! override is never overwritten halfway by a concurrent tick.
//!
//! Reads never take that critical section. Observers derive the remaining time
//! from the stored end time, see [`DiscountQuery`].

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::auth::CredentialCheck;
use crate::clock::{Clock, next_boundary};
use crate::ledger::{SalesLedger, SalesTotals, SalesWindow, Stats};
use crate::model::{Catalog, DiscountRecord, DrinkId, SaleEvent, SaleRequest, Trigger};

mod cadence;

mod error;
pub use error::{AuthorizationError, BourseError, StorageError, ValidationError};

mod query;
use query::whole_secs_until;
pub use query::{DashboardSnapshot, DiscountQuery, DiscountStatus, Observation};

mod select;
pub use select::select_discount_target;

mod state;
pub use state::{DiscountState, DiscountStateStore};

/// Timing and pricing knobs of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Interval between automatic evaluations, aligned to the wall clock.
    pub cadence: TimeDelta,
    /// Lifetime of every discount, automatic or manual.
    pub discount_duration: TimeDelta,
    /// Tokens taken off the price of the discounted drink.
    pub price_reduction: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cadence: TimeDelta::minutes(30),
            discount_duration: TimeDelta::minutes(10),
            price_reduction: 1,
        }
    }
}

/// Notifications pushed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BourseEvent {
    DiscountStarted {
        drink: DrinkId,
        ends_at: DateTime<Utc>,
        trigger: Trigger,
    },
    DiscountCleared {
        drink: DrinkId,
    },
    DiscountExpired {
        drink: DrinkId,
    },
    Evaluated {
        selected: Option<DrinkId>,
        trigger: Trigger,
    },
    SalesReset,
    Celebration,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub trigger: Trigger,
    pub evaluated_at: DateTime<Utc>,
    /// Totals the selection ran on; empty when nothing was sold.
    pub considered: SalesTotals,
    /// The discount this evaluation started, if it picked a drink.
    pub discount: Option<DiscountRecord>,
}

/// One line of the price board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceEntry {
    pub drink: DrinkId,
    pub name: String,
    pub price: u32,
    pub effective_price: u32,
    pub discounted: bool,
}

const EVENT_CAPACITY: usize = 64;

/// Largest amount a single sale line may carry.
pub const MAX_SALE_AMOUNT: u64 = 10_000;

/// The discount scheduler.
pub struct Scheduler {
    catalog: Catalog,
    ledger: Arc<dyn SalesLedger>,
    store: DiscountStateStore,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialCheck>,
    config: SchedulerConfig,
    /// Critical section shared by every mutation of the discount state.
    transitions: Mutex<()>,
    /// Instant of the next automatic evaluation.
    next_tick: watch::Sender<DateTime<Utc>>,
    /// Wakes the cadence loop when a deadline moved.
    wake: Notify,
    events: broadcast::Sender<BourseEvent>,
}

/// Public API
impl Scheduler {
    pub fn new(
        catalog: Catalog,
        ledger: Arc<dyn SalesLedger>,
        clock: Arc<dyn Clock>,
        credentials: Arc<dyn CredentialCheck>,
        config: SchedulerConfig,
    ) -> Self {
        let first_tick = next_boundary(clock.now(), config.cadence);
        let (next_tick, _) = watch::channel(first_tick);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            catalog,
            ledger,
            store: DiscountStateStore::new(),
            clock,
            credentials,
            config,
            transitions: Mutex::new(()),
            next_tick,
            wake: Notify::new(),
            events,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Record a sale from a point-of-sale terminal.
    pub fn record_sale(&self, drink: DrinkId, amount: i64) -> Result<SaleEvent, BourseError> {
        let result = self.try_record_sale(drink, amount);
        Self::log_sale(drink, amount, &result);
        result
    }

    /// Record a whole terminal submission. Zero lines are skipped; any other
    /// invalid line rejects the batch before anything is stored.
    pub fn record_batch(&self, lines: &[SaleRequest]) -> Result<Vec<SaleEvent>, BourseError> {
        let lines: Vec<_> = lines.iter().filter(|line| line.amount != 0).collect();
        for line in &lines {
            self.validate(line.drink, line.amount)?;
        }
        lines
            .into_iter()
            .map(|line| self.record_sale(line.drink, line.amount))
            .collect()
    }

    /// Record every sale from `stream`, skipping rejected ones.
    /// Returns the number of recorded sales.
    pub async fn ingest(&self, mut stream: impl Stream<Item = SaleRequest> + Unpin) -> usize {
        let mut recorded = 0;
        while let Some(request) = stream.next().await {
            // a rejected sale must not stop ingestion, it is already logged
            if self.record_sale(request.drink, request.amount).is_ok() {
                recorded += 1;
            }
        }
        recorded
    }

    /// Lifetime and since-evaluation totals.
    pub fn stats(&self) -> Result<Stats, BourseError> {
        Ok(Stats {
            total: self.ledger.totals()?,
            since_evaluation: self.ledger.since_evaluation()?,
        })
    }

    /// Raw sales within a trailing window of the lifetime log.
    pub fn sales_in_window(&self, window: SalesWindow) -> Result<Vec<SaleEvent>, BourseError> {
        let cutoff = window.cutoff(self.clock.now());
        Ok(self.ledger.events_since(cutoff)?)
    }

    pub fn current_discount(&self) -> DiscountStatus {
        self.current_discount_at(self.clock.now())
    }

    /// Discount status at `now`; expired records are removed as a side effect.
    pub fn current_discount_at(&self, now: DateTime<Utc>) -> DiscountStatus {
        let observation = DiscountQuery::new(&self.store).query(now);
        if let Some(expired) = observation.expired {
            self.note_expired(expired);
        }
        observation.status
    }

    /// State of the discount state machine, with expiry applied.
    pub fn state(&self) -> DiscountState {
        let now = self.clock.now();
        self.current_discount_at(now);
        match self.store.get() {
            Ok(Some(record)) if !record.is_expired(now) => DiscountState::Active(record),
            _ => DiscountState::NoDiscount,
        }
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot_at(self.clock.now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> DashboardSnapshot {
        DashboardSnapshot {
            discount: self.current_discount_at(now),
            next_evaluation_in_secs: whole_secs_until(self.next_evaluation_at(), now),
        }
    }

    pub fn next_evaluation_at(&self) -> DateTime<Utc> {
        *self.next_tick.borrow()
    }

    /// Current prices, with the discounted drink reduced.
    pub fn price_board(&self) -> Vec<PriceEntry> {
        let discounted = self.current_discount().drink();
        self.catalog
            .drinks()
            .map(|drink| {
                let on_discount = discounted == Some(drink.id);
                PriceEntry {
                    drink: drink.id,
                    name: drink.name.clone(),
                    price: drink.price,
                    effective_price: if on_discount {
                        drink.discounted_price(self.config.price_reduction)
                    } else {
                        drink.price
                    },
                    discounted: on_discount,
                }
            })
            .collect()
    }

    /// Evaluate now, outside the cadence. The next automatic tick moves to one
    /// full cadence after this call.
    pub async fn trigger_evaluation_now(&self) -> Result<Evaluation, BourseError> {
        let _guard = self.transitions.lock().await;
        let now = self.clock.now();
        let next_tick = now
            .checked_add_signed(self.config.cadence)
            .ok_or(ValidationError::TimeOutOfRange)?;
        let evaluation = self.evaluate_locked(Trigger::ManualEvaluation, now)?;
        self.next_tick.send_replace(next_tick);
        self.wake.notify_one();
        info!(next_tick = %next_tick, "automatic cadence rescheduled");
        Ok(evaluation)
    }

    /// Put `drink` on discount immediately, superseding any active discount.
    /// The automatic cadence keeps its schedule.
    pub async fn set_manual_discount(
        &self,
        drink: DrinkId,
        credential: &str,
    ) -> Result<DiscountRecord, BourseError> {
        self.authorize("set manual discount", credential)?;
        if !self.catalog.contains(drink) {
            return Err(ValidationError::UnknownDrink(drink).into());
        }
        let _guard = self.transitions.lock().await;
        let now = self.clock.now();
        let ends_at = self.discount_end(now)?;
        let record = self.start_discount(drink, ends_at, Trigger::ManualOverride, now)?;
        Ok(record)
    }

    /// End the active discount. Clearing when nothing is active succeeds.
    /// Returns the discount that was ended, if one was live.
    pub async fn clear_manual_discount(
        &self,
        credential: &str,
    ) -> Result<Option<DiscountRecord>, BourseError> {
        self.authorize("clear manual discount", credential)?;
        let _guard = self.transitions.lock().await;
        let now = self.clock.now();
        let cleared = self.store.clear()?.filter(|record| !record.is_expired(now));
        match cleared {
            Some(record) => {
                info!(drink = %record.drink, "discount cleared");
                self.announce(BourseEvent::DiscountCleared { drink: record.drink });
                self.wake.notify_one();
            }
            None => info!("clear requested with no active discount"),
        }
        Ok(cleared)
    }

    /// Wipe both aggregates and the sales log. The discount is left alone.
    pub async fn reset_all_sales(&self, credential: &str) -> Result<(), BourseError> {
        self.authorize("reset sales", credential)?;
        let _guard = self.transitions.lock().await;
        self.ledger.reset_all()?;
        info!("all sales reset");
        self.announce(BourseEvent::SalesReset);
        Ok(())
    }

    /// Ask every connected dashboard to celebrate.
    pub fn trigger_celebration(&self) {
        info!(observers = self.events.receiver_count(), "celebration triggered");
        self.announce(BourseEvent::Celebration);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BourseEvent> {
        self.events.subscribe()
    }
}

/// Private API
impl Scheduler {
    fn validate(&self, drink: DrinkId, amount: i64) -> Result<u64, ValidationError> {
        if !self.catalog.contains(drink) {
            return Err(ValidationError::UnknownDrink(drink));
        }
        match u64::try_from(amount) {
            Ok(0) | Err(_) => Err(ValidationError::NonPositiveAmount(drink, amount)),
            Ok(units) if units > MAX_SALE_AMOUNT => {
                Err(ValidationError::AmountTooLarge(drink, amount))
            }
            Ok(units) => Ok(units),
        }
    }

    fn try_record_sale(&self, drink: DrinkId, amount: i64) -> Result<SaleEvent, BourseError> {
        let amount = self.validate(drink, amount)?;
        let event = SaleEvent {
            drink,
            amount,
            occurred_at: self.clock.now(),
        };
        self.ledger.append(event)?;
        Ok(event)
    }

    fn log_sale(drink: DrinkId, amount: i64, result: &Result<SaleEvent, BourseError>) {
        match result {
            Ok(_) => info!(drink = %drink, amount, "sale recorded"),
            Err(e) => warn!(drink = %drink, amount, reason = %e, "sale rejected"),
        }
    }

    fn authorize(&self, action: &'static str, credential: &str) -> Result<(), AuthorizationError> {
        if self.credentials.verify(credential) {
            Ok(())
        } else {
            warn!(action, "administrative action rejected");
            Err(AuthorizationError)
        }
    }

    /// Drain, select, transition. Callers hold `transitions`.
    ///
    /// The since-evaluation totals are consumed by the drain itself, so they
    /// are reset even when nothing gets selected. Once anything was sold, every
    /// catalog drink competes, unsold ones with zero.
    fn evaluate_locked(
        &self,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, BourseError> {
        let ends_at = self.discount_end(now)?;
        let recent = self.ledger.drain_since_evaluation()?;
        let considered: SalesTotals = if recent.is_empty() {
            recent
        } else {
            self.catalog
                .ids()
                .map(|id| (id, recent.get(&id).copied().unwrap_or(0)))
                .collect()
        };

        let discount = match select_discount_target(&considered) {
            Some(drink) => Some(self.start_discount(drink, ends_at, trigger, now)?),
            None => {
                info!(?trigger, "no sales since last evaluation, discount left untouched");
                None
            }
        };

        self.announce(BourseEvent::Evaluated {
            selected: discount.map(|d| d.drink),
            trigger,
        });
        Ok(Evaluation {
            trigger,
            evaluated_at: now,
            considered,
            discount,
        })
    }

    /// End time of a discount starting at `now`.
    fn discount_end(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
        now.checked_add_signed(self.config.discount_duration)
            .ok_or(ValidationError::TimeOutOfRange)
    }

    /// Replace whatever is in the store with a fresh discount on `drink`.
    fn start_discount(
        &self,
        drink: DrinkId,
        ends_at: DateTime<Utc>,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<DiscountRecord, StorageError> {
        let record = DiscountRecord { drink, ends_at };
        let previous = self.store.set(record)?;
        if let Some(previous) = previous.filter(|p| !p.is_expired(now)) {
            info!(drink = %previous.drink, "active discount superseded");
        }
        info!(drink = %drink, ends_at = %record.ends_at, ?trigger, "discount started");
        self.announce(BourseEvent::DiscountStarted {
            drink,
            ends_at: record.ends_at,
            trigger,
        });
        self.wake.notify_one();
        Ok(record)
    }

    fn note_expired(&self, record: DiscountRecord) {
        info!(drink = %record.drink, "discount expired");
        self.announce(BourseEvent::DiscountExpired { drink: record.drink });
    }

    fn announce(&self, event: BourseEvent) {
        // no subscribers is fine, dashboards come and go
        let _ = self.events.send(event);
    }
}

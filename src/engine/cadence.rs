//! Automatic evaluation cadence.
//!
//! One loop per process. It sleeps until the earlier of the next tick and the
//! active discount's end time, and re-plans whenever a mutation moves either
//! deadline. Shutdown is only observed between wake-ups, so an evaluation that
//! already started always completes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{BourseError, Evaluation, Scheduler};
use crate::clock::next_tick_after;
use crate::model::Trigger;

impl Scheduler {
    /// Drive automatic evaluations until `shutdown` turns true or its sender
    /// is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(next_tick = %self.next_evaluation_at(), "cadence started");
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            let wait = self.time_until_wake(self.clock.now());
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.wake.notified() => {}
                () = tokio::time::sleep(wait) => self.on_wake().await,
            }
        }
        info!("cadence stopped");
    }

    /// Run the automatic evaluation if its tick is due.
    ///
    /// Returns `Ok(None)` when a manual evaluation moved the tick in the
    /// meantime. The next tick advances by whole cadences even when the
    /// evaluation fails, so one bad tick never stalls the schedule.
    pub(crate) async fn auto_evaluate(&self) -> Result<Option<Evaluation>, BourseError> {
        let _guard = self.transitions.lock().await;
        let now = self.clock.now();
        let tick = self.next_evaluation_at();
        if tick > now {
            return Ok(None);
        }

        let result = self.evaluate_locked(Trigger::Automatic, now);
        self.next_tick.send_replace(next_tick_after(tick, now, self.config.cadence));

        result.map(Some)
    }

    fn time_until_wake(&self, now: DateTime<Utc>) -> Duration {
        let tick = self.next_evaluation_at();
        let expiry = match self.store.get() {
            Ok(record) => record.map(|r| r.ends_at).filter(|&end| end > now),
            Err(e) => {
                warn!(reason = %e, "discount read failed, planning next tick only");
                None
            }
        };
        let wake_at = expiry.map_or(tick, |end| end.min(tick));
        (wake_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    async fn on_wake(&self) {
        let now = self.clock.now();
        match self.store.clear_if_expired(now) {
            Ok(Some(expired)) => self.note_expired(expired),
            Ok(None) => {}
            Err(e) => warn!(reason = %e, "expiry sweep failed"),
        }

        if self.next_evaluation_at() > now {
            return;
        }
        match self.auto_evaluate().await {
            Ok(Some(evaluation)) => info!(
                selected = ?evaluation.discount.map(|d| d.drink),
                next_tick = %self.next_evaluation_at(),
                "automatic evaluation done"
            ),
            Ok(None) => {}
            Err(e) => error!(
                reason = %e,
                retryable = e.is_retryable(),
                next_tick = %self.next_evaluation_at(),
                "automatic evaluation failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use tokio::time::Instant;

    use super::*;
    use crate::auth::AdminPin;
    use crate::clock::Clock;
    use crate::engine::{BourseEvent, DiscountStatus, SchedulerConfig, StorageError};
    use crate::ledger::{MemoryLedger, SalesLedger, SalesTotals};
    use crate::model::{Catalog, Drink, SaleEvent};

    /// Wall clock that follows tokio's (pausable) time.
    struct TokioClock {
        base: DateTime<Utc>,
        origin: Instant,
    }

    impl TokioClock {
        fn starting_at(base: DateTime<Utc>) -> Self {
            Self {
                base,
                origin: Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = Instant::now() - self.origin;
            self.base + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::zero())
        }
    }

    /// Ledger whose drain always fails.
    #[derive(Default)]
    struct BrokenLedger(MemoryLedger);

    impl SalesLedger for BrokenLedger {
        fn append(&self, event: SaleEvent) -> Result<(), StorageError> {
            self.0.append(event)
        }
        fn totals(&self) -> Result<SalesTotals, StorageError> {
            self.0.totals()
        }
        fn since_evaluation(&self) -> Result<SalesTotals, StorageError> {
            self.0.since_evaluation()
        }
        fn drain_since_evaluation(&self) -> Result<SalesTotals, StorageError> {
            Err(StorageError::Unavailable("ledger".to_string()))
        }
        fn events_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SaleEvent>, StorageError> {
            self.0.events_since(cutoff)
        }
        fn reset_all(&self) -> Result<(), StorageError> {
            self.0.reset_all()
        }
    }

    const PIN: &str = "2233";

    /// One minute before the 20:30 boundary.
    fn base() -> DateTime<Utc> {
        "2025-06-14T20:29:00Z".parse().unwrap()
    }

    fn scheduler_with(ledger: Arc<dyn SalesLedger>) -> Arc<Scheduler> {
        let catalog = Catalog::new([Drink::new(1, "Bier", 2), Drink::new(2, "Lillet", 3)]).unwrap();
        Arc::new(Scheduler::new(
            catalog,
            ledger,
            Arc::new(TokioClock::starting_at(base())),
            Arc::new(AdminPin::new(PIN)),
            SchedulerConfig::default(),
        ))
    }

    fn start(scheduler: &Arc<Scheduler>) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(scheduler).run(rx));
        (tx, handle)
    }

    async fn sleep_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    fn at(hms: &str) -> DateTime<Utc> {
        format!("2025-06-14T{hms}Z").parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn tick_fires_on_clock_boundary() {
        let scheduler = scheduler_with(Arc::new(MemoryLedger::new()));
        scheduler.record_sale(1, 4).unwrap();
        scheduler.record_sale(2, 1).unwrap();
        let (shutdown, handle) = start(&scheduler);

        sleep_secs(59).await;
        assert_eq!(scheduler.current_discount(), DiscountStatus::None);
        assert_eq!(scheduler.stats().unwrap().since_evaluation_of(1), 4);

        sleep_secs(2).await;
        assert_eq!(scheduler.current_discount().drink(), Some(2));
        assert!(scheduler.stats().unwrap().since_evaluation.is_empty());
        assert_eq!(scheduler.next_evaluation_at(), at("21:00:00"));

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn tick_without_sales_still_advances() {
        let scheduler = scheduler_with(Arc::new(MemoryLedger::new()));
        let mut events = scheduler.subscribe();
        let (shutdown, handle) = start(&scheduler);

        sleep_secs(61).await;

        assert_eq!(
            events.try_recv().unwrap(),
            BourseEvent::Evaluated {
                selected: None,
                trigger: Trigger::Automatic
            }
        );
        assert_eq!(scheduler.current_discount(), DiscountStatus::None);
        assert_eq!(scheduler.next_evaluation_at(), at("21:00:00"));

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_swept_eagerly() {
        let scheduler = scheduler_with(Arc::new(MemoryLedger::new()));
        let (shutdown, handle) = start(&scheduler);
        let mut events = scheduler.subscribe();

        scheduler.set_manual_discount(1, PIN).await.unwrap();
        sleep_secs(10 * 60 + 1).await;

        // nobody queried, the loop removed it on its own
        assert_eq!(scheduler.store.get().unwrap(), None);
        let expired = std::iter::from_fn(|| events.try_recv().ok())
            .any(|event| event == BourseEvent::DiscountExpired { drink: 1 });
        assert!(expired);

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_evaluation_rephases_running_cadence() {
        let scheduler = scheduler_with(Arc::new(MemoryLedger::new()));
        let (shutdown, handle) = start(&scheduler);

        // 20:29:30, half a minute before the aligned boundary
        sleep_secs(30).await;
        scheduler.record_sale(1, 1).unwrap();
        scheduler.trigger_evaluation_now().await.unwrap();
        assert_eq!(scheduler.next_evaluation_at(), at("20:59:30"));

        // the 20:30 boundary passes without a second evaluation
        scheduler.record_sale(2, 5).unwrap();
        sleep_secs(60).await;
        assert_eq!(scheduler.stats().unwrap().since_evaluation_of(2), 5);

        // the rephased tick consumes it
        sleep_secs(29 * 60 + 1).await;
        assert!(scheduler.stats().unwrap().since_evaluation.is_empty());
        assert_eq!(scheduler.next_evaluation_at(), at("21:29:30"));

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_does_not_stop_cadence() {
        let scheduler = scheduler_with(Arc::new(BrokenLedger::default()));
        let (shutdown, handle) = start(&scheduler);

        sleep_secs(61).await;
        assert_eq!(scheduler.next_evaluation_at(), at("21:00:00"));

        sleep_secs(30 * 60).await;
        assert_eq!(scheduler.next_evaluation_at(), at("21:30:00"));
        assert!(!handle.is_finished());

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_shutdown_sender_stops_loop() {
        let scheduler = scheduler_with(Arc::new(MemoryLedger::new()));
        let (shutdown, handle) = start(&scheduler);

        drop(shutdown);

        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn auto_evaluate_skips_when_not_due() {
        let scheduler = scheduler_with(Arc::new(MemoryLedger::new()));
        scheduler.record_sale(1, 1).unwrap();

        assert_eq!(scheduler.auto_evaluate().await.unwrap(), None);
        assert_eq!(scheduler.stats().unwrap().since_evaluation_of(1), 1);
    }
}

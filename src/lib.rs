pub mod auth;
pub mod clock;
pub mod config;
pub mod csv;
pub mod engine;
pub mod ledger;
pub mod model;

pub use auth::{AdminPin, CredentialCheck};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{BourseError, BourseEvent, DiscountStatus, Scheduler, SchedulerConfig};
pub use ledger::{MemoryLedger, SalesLedger, SalesWindow, Stats};
pub use model::{Catalog, DiscountRecord, Drink, DrinkId, SaleEvent, SaleRequest, Trigger};

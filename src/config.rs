//! Runtime settings read from the environment.

use std::env;

use chrono::TimeDelta;

use crate::engine::SchedulerConfig;

/// Used when `BOURSE_ADMIN_PIN` is not set.
pub const DEFAULT_ADMIN_PIN: &str = "2233";

const DEFAULT_CADENCE_MINUTES: i64 = 30;
const DEFAULT_DISCOUNT_MINUTES: i64 = 10;
const DEFAULT_PRICE_REDUCTION: u32 = 1;
const DEFAULT_LOG_FILTER: &str = "info";
/// Upper bound for both the cadence and the discount duration: one day.
const MAX_MINUTES: i64 = 24 * 60;

/// Load a .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub admin_pin: String,
    /// False when the pin fell back to [`DEFAULT_ADMIN_PIN`].
    pub admin_pin_configured: bool,
    pub cadence_minutes: i64,
    pub discount_minutes: i64,
    pub price_reduction: u32,
    pub log_filter: String,
}

impl Settings {
    /// Build settings from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup. Empty values count as unset;
    /// unparsable or out-of-range numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let minutes = |key: &str, default: i64| {
            get(key)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|v| (1..=MAX_MINUTES).contains(v))
                .unwrap_or(default)
        };

        let admin_pin = get("BOURSE_ADMIN_PIN");
        Self {
            admin_pin_configured: admin_pin.is_some(),
            admin_pin: admin_pin.unwrap_or_else(|| DEFAULT_ADMIN_PIN.to_string()),
            cadence_minutes: minutes("BOURSE_CADENCE_MINUTES", DEFAULT_CADENCE_MINUTES),
            discount_minutes: minutes("BOURSE_DISCOUNT_MINUTES", DEFAULT_DISCOUNT_MINUTES),
            price_reduction: get("BOURSE_DISCOUNT_REDUCTION")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_PRICE_REDUCTION),
            log_filter: get("BOURSE_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            cadence: TimeDelta::minutes(self.cadence_minutes),
            discount_duration: TimeDelta::minutes(self.discount_minutes),
            price_reduction: self.price_reduction,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

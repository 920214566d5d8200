//! Core domain types for the drink exchange.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::engine::ValidationError;

/// Drink identifier.
pub type DrinkId = u32;

/// A drink on the static menu. Prices are in tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drink {
    pub id: DrinkId,
    pub name: String,
    pub price: u32,
}

impl Drink {
    pub fn new(id: DrinkId, name: impl Into<String>, price: u32) -> Self {
        Self {
            id,
            name: name.into(),
            price,
        }
    }

    /// Price while the drink is on discount, never below zero.
    pub fn discounted_price(&self, reduction: u32) -> u32 {
        self.price.saturating_sub(reduction)
    }
}

/// The fixed menu, loaded once and immutable afterwards.
///
/// Iteration is in ascending id order, which is also the tie-break order
/// used when selecting a discount target.
#[derive(Debug, Clone)]
pub struct Catalog {
    drinks: BTreeMap<DrinkId, Drink>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate ids and empty menus.
    pub fn new(drinks: impl IntoIterator<Item = Drink>) -> Result<Self, ValidationError> {
        let mut map = BTreeMap::new();
        for drink in drinks {
            let id = drink.id;
            if map.insert(id, drink).is_some() {
                return Err(ValidationError::DuplicateDrink(id));
            }
        }
        if map.is_empty() {
            return Err(ValidationError::EmptyCatalog);
        }
        Ok(Self { drinks: map })
    }

    pub fn get(&self, id: DrinkId) -> Option<&Drink> {
        self.drinks.get(&id)
    }

    pub fn contains(&self, id: DrinkId) -> bool {
        self.drinks.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = DrinkId> + '_ {
        self.drinks.keys().copied()
    }

    pub fn drinks(&self) -> impl Iterator<Item = &Drink> + '_ {
        self.drinks.values()
    }

    pub fn len(&self) -> usize {
        self.drinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drinks.is_empty()
    }
}

/// A request coming from a point-of-sale terminal, not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleRequest {
    pub drink: DrinkId,
    pub amount: i64,
}

/// A validated sale. Never mutated once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleEvent {
    pub drink: DrinkId,
    pub amount: u64,
    pub occurred_at: DateTime<Utc>,
}

/// The single active promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscountRecord {
    pub drink: DrinkId,
    pub ends_at: DateTime<Utc>,
}

impl DiscountRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at
    }
}

/// What caused a transition of the discount state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The recurring cadence tick.
    Automatic,
    /// An administrator asked for an evaluation now.
    ManualEvaluation,
    /// An administrator picked the drink directly.
    ManualOverride,
}

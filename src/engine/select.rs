use crate::ledger::SalesTotals;
use crate::model::DrinkId;

/// Pick the least-sold drink from the recent totals.
///
/// Returns `None` when nothing was sold since the last evaluation. Ties go to
/// the lowest drink id.
pub fn select_discount_target(recent: &SalesTotals) -> Option<DrinkId> {
    recent
        .iter()
        .min_by_key(|&(&drink, &sold)| (sold, drink))
        .map(|(&drink, _)| drink)
}

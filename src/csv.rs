use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::engine::{DiscountStatus, ValidationError};
use crate::ledger::Stats;
use crate::model::{Catalog, Drink, DrinkId, SaleRequest};

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("{path}: cannot open: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: {source}")]
    InvalidRow {
        line: usize,
        source: ValidationError,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("failed to write row: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush output: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    id: DrinkId,
    name: String,
    price: u32,
}

#[derive(Debug, Deserialize)]
struct SaleRow {
    drink: DrinkId,
    amount: i64,
}

#[derive(Debug, Serialize)]
struct StatsRow<'a> {
    drink: DrinkId,
    name: &'a str,
    price: u32,
    total: u64,
    since_evaluation: u64,
    discounted: bool,
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, CsvError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// Read the drink menu (`id,name,price`) from a csv file
pub fn read_catalog(path: impl AsRef<Path>) -> Result<Catalog, CsvError> {
    let reader = open(path.as_ref())?;
    let mut seen = HashSet::new();
    let mut drinks = Vec::new();

    for (idx, result) in reader.into_deserialize::<CatalogRow>().enumerate() {
        let line = idx + 2; // 1-indexed, skip header
        let row = result.map_err(|source| CsvError::Parse { line, source })?;
        if !seen.insert(row.id) {
            return Err(CsvError::InvalidRow {
                line,
                source: ValidationError::DuplicateDrink(row.id),
            });
        }
        drinks.push(Drink::new(row.id, row.name, row.price));
    }

    Ok(Catalog::new(drinks)?)
}

/// Read point-of-sale submissions (`drink,amount`) from a csv file.
///
/// Rows are parsed lazily; a bad row yields an error and reading continues.
pub fn read_sales(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<SaleRequest, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<SaleRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2;
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            Ok(SaleRequest {
                drink: row.drink,
                amount: row.amount,
            })
        }))
}

/// Write one row per catalog drink with both sales totals
pub fn write_stats(
    writer: impl io::Write,
    catalog: &Catalog,
    stats: &Stats,
    discount: DiscountStatus,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for drink in catalog.drinks() {
        writer.serialize(StatsRow {
            drink: drink.id,
            name: &drink.name,
            price: drink.price,
            total: stats.total_of(drink.id),
            since_evaluation: stats.since_evaluation_of(drink.id),
            discounted: discount.drink() == Some(drink.id),
        })?;
    }

    writer.flush()?;
    Ok(())
}

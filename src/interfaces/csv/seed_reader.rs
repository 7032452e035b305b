use crate::domain::order::{ProductId, UserId};
use crate::domain::ports::ProductSnapshot;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::io::Read;

/// One row of a catalog export: `id,name,price,active`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl From<ProductRecord> for ProductSnapshot {
    fn from(record: ProductRecord) -> Self {
        ProductSnapshot {
            id: record.id,
            name: record.name,
            price: record.price,
            is_active: record.active,
        }
    }
}

/// One row of a user export: `id`.
#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
pub struct UserRecord {
    pub id: UserId,
}

/// Reads catalog and user seed data from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths, and
/// deserializes lazily so large exports are streamed.
pub struct SeedReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> SeedReader<R> {
    /// Creates a new `SeedReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    fn records<T: DeserializeOwned>(self) -> impl Iterator<Item = Result<T>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EngineError::from))
    }

    pub fn products(self) -> impl Iterator<Item = Result<ProductSnapshot>> {
        self.records::<ProductRecord>()
            .map(|record| record.map(ProductSnapshot::from))
    }

    pub fn users(self) -> impl Iterator<Item = Result<UserId>> {
        self.records::<UserRecord>().map(|record| record.map(|r| r.id))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Product;
use crate::Error;

/// One row of a product's stock ledger.
///
/// A product may own several rows; each holds the counters that were added
/// to it. Rows are appended or incremented, never deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub id: i64,
    pub product: Product,
    pub available: i64,
    pub pending: i64,
    pub reserved: i64,
    pub sold: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Inventory {
    /// First ledger row of a freshly created product.
    pub fn seed(product: Product, available: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            product,
            available,
            pending: 0,
            reserved: 0,
            sold: 0,
            created_at,
            updated_at: None,
        }
    }

    /// New unsaved row for the same product carrying this row's counters and
    /// creation time.
    pub fn copy_counters(&self) -> Self {
        Self {
            id: 0,
            product: self.product.clone(),
            available: self.available,
            pending: self.pending,
            reserved: self.reserved,
            sold: self.sold,
            created_at: self.created_at,
            updated_at: None,
        }
    }

    /// Add `delta` to every counter. Nothing changes when any sum overflows.
    pub fn apply(&mut self, delta: &StockDelta, updated_at: DateTime<Utc>) -> Result<(), Error> {
        let available = add_counter("available", self.available, delta.available)?;
        let pending = add_counter("pending", self.pending, delta.pending)?;
        let reserved = add_counter("reserved", self.reserved, delta.reserved)?;
        let sold = add_counter("sold", self.sold, delta.sold)?;

        self.available = available;
        self.pending = pending;
        self.reserved = reserved;
        self.sold = sold;
        self.updated_at = Some(updated_at);
        Ok(())
    }

    /// This row's counters plus `delta`, leaving `self` untouched.
    pub fn merged(&self, delta: &StockDelta, updated_at: DateTime<Utc>) -> Result<Self, Error> {
        let mut merged = self.clone();
        merged.apply(delta, updated_at)?;
        Ok(merged)
    }
}

fn add_counter(field: &str, current: i64, delta: i64) -> Result<i64, Error> {
    current
        .checked_add(delta)
        .ok_or_else(|| Error::BadRequest(format!("{field} out of range")))
}

/// Counters to add to a product's stock, addressed by sku.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockDelta {
    pub sku: String,
    pub available: i64,
    pub pending: i64,
    pub reserved: i64,
    pub sold: i64,
}

impl StockDelta {
    pub fn new(sku: &str) -> Self {
        Self {
            sku: sku.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.sku.trim().is_empty() {
            return Err(Error::BadRequest("sku must not be empty".to_string()));
        }
        for (field, value) in [
            ("available", self.available),
            ("pending", self.pending),
            ("reserved", self.reserved),
            ("sold", self.sold),
        ] {
            if value < 0 {
                return Err(Error::BadRequest(format!("{field} must not be negative")));
            }
        }
        Ok(())
    }
}

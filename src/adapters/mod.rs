pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    model::{Inventory, Product, StockDelta},
};

/// Connection pool counters reported by `/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_conns: u32,
    pub idle_conns: u32,
    pub max_conns: u32,
}

/// -----------------------------
/// Adapter contract
/// -----------------------------
///
/// Storage contract for products and their stock ledger.
///
/// Writes run inside a caller-owned transaction `Tx`. Implementors MUST:
/// 1. Roll back and release the underlying connection when a `Tx` is dropped
///    without being committed.
/// 2. Never block in [`claim_and_adjust_one_row`](Self::claim_and_adjust_one_row)
///    on a row locked by another transaction; such rows are skipped.
/// 3. Report a duplicate sku as [`Error::Conflict`].
/// 4. Run every `&mut Tx` method on the connection owned by `tx`.
#[async_trait]
pub trait InventoryAdapter: Send + Sync + 'static {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, Error>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), Error>;
    async fn rollback(&self, tx: Self::Tx) -> Result<(), Error>;

    async fn create_product(&self, tx: &mut Self::Tx, product: Product) -> Result<Product, Error>;
    async fn find_product_by_sku(&self, sku: &str) -> Result<Product, Error>;
    async fn find_product_by_id(&self, id: i64) -> Result<Product, Error>;

    /// Append a ledger row for `row.product.id` with all four counters.
    async fn create_ledger_row(&self, tx: &mut Self::Tx, row: Inventory)
    -> Result<Inventory, Error>;

    /// The most recently created ledger row of the product, with the product embedded.
    async fn find_ledger_by_product_sku(&self, sku: &str) -> Result<Inventory, Error>;

    /// Same lookup on the transaction's own connection, so a caller holding
    /// `tx` never waits on the pool for a second one.
    async fn find_ledger_by_product_sku_in_tx(
        &self,
        tx: &mut Self::Tx,
        sku: &str,
    ) -> Result<Inventory, Error>;

    /// Lock the lowest-id ledger row of `product_id` that no other transaction
    /// holds and add `delta` to it.
    ///
    /// Returns the number of rows updated: `1` on a claim, `0` when every row is
    /// locked elsewhere or the product has no row yet.
    async fn claim_and_adjust_one_row(
        &self,
        tx: &mut Self::Tx,
        product_id: i64,
        delta: &StockDelta,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, Error>;

    async fn ping(&self) -> Result<(), Error>;
    fn pool_stats(&self) -> PoolStats;
}

// src/adapters/memory.rs
use crate::{
    Error, Inventory, Product, StockDelta,
    adapters::{InventoryAdapter, PoolStats},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Adapter operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    CreateProduct,
    CreateLedgerRow,
    ClaimAndAdjust,
    Ping,
}

#[derive(Default)]
struct MemoryState {
    products: BTreeMap<i64, Product>,
    rows: BTreeMap<i64, Inventory>,
    // Row ids claimed by in-flight transactions.
    locked: HashSet<i64>,
    // Skus inserted by in-flight transactions.
    pending_skus: HashSet<String>,
    next_product_id: i64,
    next_row_id: i64,
    faults: HashSet<Fault>,
    claim_latency: Option<Duration>,
}

#[derive(Clone, Default)]
struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    fn lock(&self, op: &'static str) -> Result<MutexGuard<'_, MemoryState>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::internal(op, "memory store poisoned"))
    }

    fn check_fault(&self, op: &'static str, fault: Fault) -> Result<(), Error> {
        if self.lock(op)?.faults.contains(&fault) {
            return Err(Error::internal(op, "injected fault"));
        }
        Ok(())
    }
}

struct Adjustment {
    row_id: i64,
    delta: StockDelta,
    updated_at: DateTime<Utc>,
}

/// Uncommitted writes and row claims of one in-memory transaction.
///
/// Dropping it without [`InventoryAdapter::commit`] discards the writes and
/// releases every claim, like a rolled back Postgres transaction.
pub struct MemoryTx {
    store: MemoryStore,
    products: Vec<Product>,
    rows: Vec<Inventory>,
    adjustments: Vec<Adjustment>,
    claimed: Vec<i64>,
    skus: Vec<String>,
}

impl MemoryTx {
    fn release(&mut self, state: &mut MemoryState) {
        for id in self.claimed.drain(..) {
            state.locked.remove(&id);
        }
        for sku in self.skus.drain(..) {
            state.pending_skus.remove(&sku);
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.claimed.is_empty() && self.skus.is_empty() {
            return;
        }
        let store = self.store.clone();
        if let Ok(mut state) = store.state.lock() {
            self.release(&mut state);
        }
    }
}

/// In-process store with the same claim semantics as the Postgres adapter:
/// a row claimed by one open transaction is skipped by every other one.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    store: MemoryStore,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_fault(&self, fault: Fault) {
        if let Ok(mut state) = self.store.state.lock() {
            state.faults.insert(fault);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut state) = self.store.state.lock() {
            state.faults.clear();
        }
    }

    /// Delay every claim, to drive callers past their deadline.
    pub fn set_claim_latency(&self, latency: Duration) {
        if let Ok(mut state) = self.store.state.lock() {
            state.claim_latency = Some(latency);
        }
    }

    /// Committed ledger rows of a product, oldest first.
    pub fn ledger_rows(&self, product_id: i64) -> Vec<Inventory> {
        match self.store.state.lock() {
            Ok(state) => state
                .rows
                .values()
                .filter(|row| row.product.id == product_id)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl InventoryAdapter for MemoryAdapter {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, Error> {
        Ok(MemoryTx {
            store: self.store.clone(),
            products: Vec::new(),
            rows: Vec::new(),
            adjustments: Vec::new(),
            claimed: Vec::new(),
            skus: Vec::new(),
        })
    }

    async fn commit(&self, mut tx: MemoryTx) -> Result<(), Error> {
        let mut state = self.store.lock("database.commit")?;

        // Compute every adjusted row first so a failing sum commits nothing.
        let mut adjusted: BTreeMap<i64, Inventory> = BTreeMap::new();
        for adjustment in &tx.adjustments {
            let current = match adjusted.get(&adjustment.row_id) {
                Some(row) => row,
                None => match state.rows.get(&adjustment.row_id) {
                    Some(row) => row,
                    None => continue,
                },
            };
            let next = current.merged(&adjustment.delta, adjustment.updated_at)?;
            adjusted.insert(adjustment.row_id, next);
        }

        for product in tx.products.drain(..) {
            state.products.insert(product.id, product);
        }
        for row in tx.rows.drain(..) {
            state.rows.insert(row.id, row);
        }
        state.rows.extend(adjusted);
        tx.adjustments.clear();
        tx.release(&mut state);

        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), Error> {
        drop(tx);
        Ok(())
    }

    async fn create_product(&self, tx: &mut MemoryTx, product: Product) -> Result<Product, Error> {
        self.store
            .check_fault("database.create_product", Fault::CreateProduct)?;
        let mut state = self.store.lock("database.create_product")?;

        let taken = state.pending_skus.contains(&product.sku)
            || state.products.values().any(|p| p.sku == product.sku);
        if taken {
            return Err(Error::Conflict(format!("sku {} already exists", product.sku)));
        }

        state.next_product_id += 1;
        let product = Product {
            id: state.next_product_id,
            ..product
        };
        state.pending_skus.insert(product.sku.clone());
        tx.skus.push(product.sku.clone());
        tx.products.push(product.clone());

        Ok(product)
    }

    async fn find_product_by_sku(&self, sku: &str) -> Result<Product, Error> {
        let state = self.store.lock("database.find_product_by_sku")?;
        state
            .products
            .values()
            .find(|p| p.sku == sku)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn find_product_by_id(&self, id: i64) -> Result<Product, Error> {
        let state = self.store.lock("database.find_product_by_id")?;
        state.products.get(&id).cloned().ok_or(Error::NotFound)
    }

    async fn create_ledger_row(
        &self,
        tx: &mut MemoryTx,
        row: Inventory,
    ) -> Result<Inventory, Error> {
        self.store
            .check_fault("database.create_ledger_row", Fault::CreateLedgerRow)?;
        let mut state = self.store.lock("database.create_ledger_row")?;

        let product_id = row.product.id;
        let known = state.products.contains_key(&product_id)
            || tx.products.iter().any(|p| p.id == product_id);
        if !known {
            return Err(Error::internal(
                "database.create_ledger_row",
                format!("product {product_id} does not exist"),
            ));
        }

        state.next_row_id += 1;
        let row = Inventory {
            id: state.next_row_id,
            ..row
        };
        tx.rows.push(row.clone());

        Ok(row)
    }

    async fn find_ledger_by_product_sku(&self, sku: &str) -> Result<Inventory, Error> {
        let state = self.store.lock("database.find_ledger_by_product_sku")?;
        let product = state
            .products
            .values()
            .find(|p| p.sku == sku)
            .ok_or(Error::NotFound)?;

        state
            .rows
            .values()
            .rev()
            .find(|row| row.product.id == product.id)
            .map(|row| Inventory {
                product: product.clone(),
                ..row.clone()
            })
            .ok_or(Error::NotFound)
    }

    async fn find_ledger_by_product_sku_in_tx(
        &self,
        tx: &mut MemoryTx,
        sku: &str,
    ) -> Result<Inventory, Error> {
        let state = self.store.lock("database.find_ledger_by_product_sku_in_tx")?;
        let product = state
            .products
            .values()
            .chain(tx.products.iter())
            .find(|p| p.sku == sku)
            .ok_or(Error::NotFound)?;

        state
            .rows
            .values()
            .chain(tx.rows.iter())
            .filter(|row| row.product.id == product.id)
            .max_by_key(|row| row.id)
            .map(|row| Inventory {
                product: product.clone(),
                ..row.clone()
            })
            .ok_or(Error::NotFound)
    }

    async fn claim_and_adjust_one_row(
        &self,
        tx: &mut MemoryTx,
        product_id: i64,
        delta: &StockDelta,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, Error> {
        const OP: &str = "database.claim_and_adjust_one_row";
        self.store.check_fault(OP, Fault::ClaimAndAdjust)?;

        let latency = self.store.lock(OP)?.claim_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.store.lock(OP)?;

        // Rows written by this transaction are visible and unlocked to it.
        let own = tx
            .rows
            .iter()
            .filter(|row| row.product.id == product_id)
            .map(|row| row.id);
        let committed = state
            .rows
            .values()
            .filter(|row| row.product.id == product_id)
            .map(|row| row.id);
        let mut candidates: Vec<i64> = committed.chain(own).collect();
        candidates.sort_unstable();

        let Some(row_id) = candidates
            .into_iter()
            .find(|id| !state.locked.contains(id) || tx.claimed.contains(id))
        else {
            return Ok(0);
        };

        if let Some(row) = tx.rows.iter_mut().find(|row| row.id == row_id) {
            row.apply(delta, updated_at)?;
            return Ok(1);
        }

        // Reject a sum that cannot fit before taking the row, as the UPDATE would.
        if let Some(row) = state.rows.get(&row_id) {
            let mut preview = row.clone();
            for earlier in tx.adjustments.iter().filter(|a| a.row_id == row_id) {
                preview.apply(&earlier.delta, earlier.updated_at)?;
            }
            preview.apply(delta, updated_at)?;
        }

        if state.locked.insert(row_id) {
            tx.claimed.push(row_id);
        }
        tx.adjustments.push(Adjustment {
            row_id,
            delta: delta.clone(),
            updated_at,
        });

        Ok(1)
    }

    async fn ping(&self) -> Result<(), Error> {
        self.store.check_fault("database.ping", Fault::Ping)
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats::default()
    }
}

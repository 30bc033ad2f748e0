//! Stock service: transaction boundaries around the ledger adapter.
//!
//! Every public operation runs under the configured request deadline. When the
//! deadline elapses the operation future is dropped mid-flight, which drops the
//! open transaction; adapters roll back and release the connection on drop.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use tracing::{Instrument, Span};

use crate::{
    Error, Inventory, Product, StockDelta,
    adapters::{InventoryAdapter, PoolStats},
    config::StockConfig,
};

pub struct StockService<A: InventoryAdapter> {
    adapter: A,
    initial_available: i64,
    request_timeout: Duration,
    span: Span,
}

impl<A: InventoryAdapter> StockService<A> {
    pub fn new(adapter: A, config: &StockConfig) -> Self {
        let span = tracing::info_span!("domain.service");
        span.in_scope(|| tracing::info!(initial_available = config.initial_available, "stock service ready"));

        Self {
            adapter,
            initial_available: config.initial_available,
            request_timeout: config.request_timeout(),
            span,
        }
    }

    /// Create a product together with its first ledger row.
    ///
    /// Both inserts share one transaction: either the product and its seed row
    /// exist afterwards, or neither does.
    pub async fn add_product(&self, product: Product) -> Result<Inventory, Error> {
        let span = tracing::info_span!(parent: &self.span, "service.add_product", sku = %product.sku);
        self.bounded("service.add_product", self.add_product_tx(product))
            .instrument(span)
            .await
    }

    /// Add `delta` to the product's stock and return the merged view.
    ///
    /// The returned counters are the baseline row read at the start of the call
    /// plus `delta`, whichever physical row absorbed the write.
    pub async fn adjust_inventory(&self, delta: StockDelta) -> Result<Inventory, Error> {
        let span = tracing::info_span!(parent: &self.span, "service.adjust_inventory", sku = %delta.sku);
        self.bounded("service.adjust_inventory", self.adjust_inventory_tx(delta))
            .instrument(span)
            .await
    }

    pub async fn get_product(&self, sku: &str) -> Result<Product, Error> {
        let span = tracing::info_span!(parent: &self.span, "service.get_product", sku);
        self.bounded("service.get_product", self.adapter.find_product_by_sku(sku))
            .instrument(span)
            .await
    }

    pub async fn get_product_by_id(&self, id: i64) -> Result<Product, Error> {
        let span = tracing::info_span!(parent: &self.span, "service.get_product_by_id", id);
        self.bounded("service.get_product_by_id", self.adapter.find_product_by_id(id))
            .instrument(span)
            .await
    }

    pub async fn get_inventory(&self, sku: &str) -> Result<Inventory, Error> {
        let span = tracing::info_span!(parent: &self.span, "service.get_inventory", sku);
        self.bounded(
            "service.get_inventory",
            self.adapter.find_ledger_by_product_sku(sku),
        )
        .instrument(span)
        .await
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        let span = tracing::info_span!(parent: &self.span, "service.health_check");
        async {
            match tokio::time::timeout(self.request_timeout, self.adapter.ping()).await {
                Ok(Ok(())) => {
                    tracing::info!("database health check successful");
                    Ok(())
                }
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "database health check failed");
                    Err(Error::HealthCheckFailed(err.to_string()))
                }
                Err(_) => {
                    tracing::error!("database health check timed out");
                    Err(Error::HealthCheckFailed("ping timed out".to_string()))
                }
            }
        }
        .instrument(span)
        .await
    }

    pub fn stat(&self) -> PoolStats {
        self.adapter.pool_stats()
    }

    async fn add_product_tx(&self, mut product: Product) -> Result<Inventory, Error> {
        product.validate()?;

        let mut tx = self.adapter.begin().await?;

        let now = Utc::now();
        product.created_at = now;
        product.updated_at = None;

        let result = async {
            let product = self.adapter.create_product(&mut tx, product).await?;
            let seed = Inventory::seed(product, self.initial_available, now);
            self.adapter.create_ledger_row(&mut tx, seed).await
        }
        .await;

        self.resolve(tx, result).await
    }

    async fn adjust_inventory_tx(&self, delta: StockDelta) -> Result<Inventory, Error> {
        delta.validate()?;

        let mut tx = self.adapter.begin().await?;

        let result = async {
            let baseline = self
                .adapter
                .find_ledger_by_product_sku_in_tx(&mut tx, &delta.sku)
                .await?;
            let updated_at = Utc::now();
            let merged = baseline.merged(&delta, updated_at)?;

            let claimed = self
                .adapter
                .claim_and_adjust_one_row(&mut tx, baseline.product.id, &delta, updated_at)
                .await?;

            if claimed == 0 {
                // Every row is held by another writer, or none exists: append one
                // so the product keeps a claimable row.
                tracing::info!(
                    product_id = baseline.product.id,
                    "no ledger row claimable, appending recovery row"
                );
                counter!("inventory.recovery_insert.total").increment(1);
                self.adapter
                    .create_ledger_row(&mut tx, baseline.copy_counters())
                    .await?;
            }

            counter!("inventory.adjust.total",
                "path" => if claimed == 0 { "appended" } else { "claimed" }
            )
            .increment(1);

            Ok::<_, Error>(merged)
        }
        .await;

        self.resolve(tx, result).await
    }

    /// Commit on success, roll back on failure.
    async fn resolve<T>(&self, tx: A::Tx, result: Result<T, Error>) -> Result<T, Error> {
        match result {
            Ok(value) => {
                self.adapter.commit(tx).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.adapter.rollback(tx).await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        tracing::debug!(op, "called");
        let start = Instant::now();

        let result = match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(op)),
        };

        histogram!("stock.operation.duration_ms", "op" => op)
            .record(start.elapsed().as_secs_f64() * 1000.0);
        counter!("stock.operations.total",
            "op" => op,
            "status" => if result.is_ok() { "success" } else { "failed" }
        )
        .increment(1);

        match &result {
            Err(Error::NotFound) => tracing::warn!(op, "not found"),
            Err(err) => tracing::error!(op, error = %err, "operation failed"),
            Ok(_) => {}
        }

        result
    }
}

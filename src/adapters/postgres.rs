use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Postgres, Row,
    postgres::{PgPoolOptions, PgRow},
};

use crate::{
    Error, Inventory, Product, StockDelta,
    adapters::{InventoryAdapter, PoolStats},
    config::DatabaseConfig,
};

// Newest ledger row of a product, joined with the product.
const LEDGER_BY_PRODUCT_SKU: &str = r#"
    SELECT p.id AS product_id,
           p.sku,
           p.type,
           p.name,
           p.status,
           p.created_at AS product_created_at,
           p.updated_at AS product_updated_at,
           i.id,
           i.available,
           i.pending,
           i.reserved,
           i.sold,
           i.created_at,
           i.updated_at
    FROM product p
    JOIN inventory i ON i.fk_product_id = p.id
    WHERE p.sku = $1
    ORDER BY i.id DESC
    LIMIT 1
"#;

/// PostgreSQL adapter for the product catalog and its stock ledger.
///
/// Schema:
/// ```sql
/// CREATE TABLE product (
///     id BIGSERIAL PRIMARY KEY,
///     sku TEXT NOT NULL UNIQUE,
///     type TEXT NOT NULL,
///     name TEXT NOT NULL,
///     status TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ
/// );
///
/// -- many rows per product; the stock of a product is spread across them
/// CREATE TABLE inventory (
///     id BIGSERIAL PRIMARY KEY,
///     fk_product_id BIGINT NOT NULL REFERENCES product(id),
///     available BIGINT NOT NULL DEFAULT 0,
///     pending BIGINT NOT NULL DEFAULT 0,
///     reserved BIGINT NOT NULL DEFAULT 0,
///     sold BIGINT NOT NULL DEFAULT 0,
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ
/// );
///
/// -- claim order: lowest id first within a product
/// CREATE INDEX idx_inventory_product ON inventory(fk_product_id, id);
/// ```
#[derive(Clone)]
pub struct PostgresAdapter {
    pub(crate) pool: PgPool,
}

fn storage(op: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |err| {
        tracing::error!(op, error = %err, "database call failed");
        Error::internal(op, err.to_string())
    }
}

// SQLSTATE numeric_value_out_of_range: a counter sum left the BIGINT range.
const OUT_OF_RANGE: &str = "22003";

fn storage_or_out_of_range(op: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |err| {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some(OUT_OF_RANGE) {
                tracing::warn!(op, error = %err, "counter out of range");
                return Error::BadRequest("counter out of range".to_string());
            }
        }
        storage(op)(err)
    }
}

fn storage_or_conflict(op: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |err| {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                tracing::warn!(op, error = %err, "unique constraint violated");
                return Error::Conflict(db.message().to_string());
            }
        }
        storage(op)(err)
    }
}

impl PostgresAdapter {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open the pool, retrying `connect_attempts` times with a fixed backoff.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, Error> {
        let mut attempt = 1;
        loop {
            let result = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
                .connect(&config.url)
                .await;

            match result {
                Ok(pool) => {
                    tracing::info!(attempt, "database pool ready");
                    return Ok(Self::from_pool(pool));
                }
                Err(err) if attempt < config.connect_attempts => {
                    tracing::warn!(attempt, error = %err, "error opening database, trying again");
                    tokio::time::sleep(Duration::from_secs(config.connect_backoff_secs)).await;
                    attempt += 1;
                }
                Err(err) => return Err(storage("database.connect")(err)),
            }
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<(), Error> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("database.init_schema"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS product (
                id BIGSERIAL PRIMARY KEY,
                sku TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage("database.init_schema"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inventory (
                id BIGSERIAL PRIMARY KEY,
                fk_product_id BIGINT NOT NULL REFERENCES product(id),
                available BIGINT NOT NULL DEFAULT 0,
                pending BIGINT NOT NULL DEFAULT 0,
                reserved BIGINT NOT NULL DEFAULT 0,
                sold BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage("database.init_schema"))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_inventory_product
            ON inventory(fk_product_id, id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage("database.init_schema"))?;

        tx.commit().await.map_err(storage("database.init_schema"))?;

        Ok(())
    }

    fn map_row_to_product(row: &PgRow, op: &'static str) -> Result<Product, Error> {
        Ok(Product {
            id: row.try_get("id").map_err(storage(op))?,
            sku: row.try_get("sku").map_err(storage(op))?,
            kind: row.try_get("type").map_err(storage(op))?,
            name: row.try_get("name").map_err(storage(op))?,
            status: row.try_get("status").map_err(storage(op))?,
            created_at: row.try_get("created_at").map_err(storage(op))?,
            updated_at: row.try_get("updated_at").map_err(storage(op))?,
        })
    }

    fn map_row_to_inventory(row: &PgRow, op: &'static str) -> Result<Inventory, Error> {
        let product = Product {
            id: row.try_get("product_id").map_err(storage(op))?,
            sku: row.try_get("sku").map_err(storage(op))?,
            kind: row.try_get("type").map_err(storage(op))?,
            name: row.try_get("name").map_err(storage(op))?,
            status: row.try_get("status").map_err(storage(op))?,
            created_at: row.try_get("product_created_at").map_err(storage(op))?,
            updated_at: row.try_get("product_updated_at").map_err(storage(op))?,
        };

        Ok(Inventory {
            id: row.try_get("id").map_err(storage(op))?,
            product,
            available: row.try_get("available").map_err(storage(op))?,
            pending: row.try_get("pending").map_err(storage(op))?,
            reserved: row.try_get("reserved").map_err(storage(op))?,
            sold: row.try_get("sold").map_err(storage(op))?,
            created_at: row.try_get("created_at").map_err(storage(op))?,
            updated_at: row.try_get("updated_at").map_err(storage(op))?,
        })
    }
}

#[async_trait::async_trait]
impl InventoryAdapter for PostgresAdapter {
    type Tx = sqlx::Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, Error> {
        self.pool.begin().await.map_err(storage("database.begin"))
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), Error> {
        tx.commit().await.map_err(storage("database.commit"))
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), Error> {
        tx.rollback().await.map_err(storage("database.rollback"))
    }

    #[tracing::instrument(name = "database.create_product", skip_all, fields(sku = %product.sku))]
    async fn create_product(&self, tx: &mut Self::Tx, product: Product) -> Result<Product, Error> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO product (sku, type, name, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&product.sku)
        .bind(&product.kind)
        .bind(&product.name)
        .bind(&product.status)
        .bind(product.created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage_or_conflict("database.create_product"))?;

        Ok(Product { id, ..product })
    }

    #[tracing::instrument(name = "database.find_product_by_sku", skip(self))]
    async fn find_product_by_sku(&self, sku: &str) -> Result<Product, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, sku, type, name, status, created_at, updated_at
            FROM product
            WHERE sku = $1
            "#,
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("database.find_product_by_sku"))?
        .ok_or(Error::NotFound)?;

        Self::map_row_to_product(&row, "database.find_product_by_sku")
    }

    #[tracing::instrument(name = "database.find_product_by_id", skip(self))]
    async fn find_product_by_id(&self, id: i64) -> Result<Product, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, sku, type, name, status, created_at, updated_at
            FROM product
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("database.find_product_by_id"))?
        .ok_or(Error::NotFound)?;

        Self::map_row_to_product(&row, "database.find_product_by_id")
    }

    #[tracing::instrument(
        name = "database.create_ledger_row",
        skip_all,
        fields(product_id = row.product.id)
    )]
    async fn create_ledger_row(
        &self,
        tx: &mut Self::Tx,
        row: Inventory,
    ) -> Result<Inventory, Error> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO inventory (fk_product_id, available, pending, reserved, sold, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(row.product.id)
        .bind(row.available)
        .bind(row.pending)
        .bind(row.reserved)
        .bind(row.sold)
        .bind(row.created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage("database.create_ledger_row"))?;

        Ok(Inventory { id, ..row })
    }

    #[tracing::instrument(name = "database.find_ledger_by_product_sku", skip(self))]
    async fn find_ledger_by_product_sku(&self, sku: &str) -> Result<Inventory, Error> {
        const OP: &str = "database.find_ledger_by_product_sku";
        let row = sqlx::query(LEDGER_BY_PRODUCT_SKU)
            .bind(sku)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage(OP))?
            .ok_or(Error::NotFound)?;

        Self::map_row_to_inventory(&row, OP)
    }

    #[tracing::instrument(name = "database.find_ledger_by_product_sku_in_tx", skip(self, tx))]
    async fn find_ledger_by_product_sku_in_tx(
        &self,
        tx: &mut Self::Tx,
        sku: &str,
    ) -> Result<Inventory, Error> {
        const OP: &str = "database.find_ledger_by_product_sku_in_tx";
        let row = sqlx::query(LEDGER_BY_PRODUCT_SKU)
            .bind(sku)
            .fetch_optional(&mut **tx)
            .await
            .map_err(storage(OP))?
            .ok_or(Error::NotFound)?;

        Self::map_row_to_inventory(&row, OP)
    }

    #[tracing::instrument(
        name = "database.claim_and_adjust_one_row",
        skip(self, tx, delta, updated_at)
    )]
    async fn claim_and_adjust_one_row(
        &self,
        tx: &mut Self::Tx,
        product_id: i64,
        delta: &StockDelta,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, Error> {
        // SKIP LOCKED: a row held by another transaction is passed over, never waited on.
        let result = sqlx::query(
            r#"
            UPDATE inventory
            SET available = available + $3,
                pending = pending + $4,
                reserved = reserved + $5,
                sold = sold + $6,
                updated_at = $2
            WHERE id = (
                SELECT id
                FROM inventory
                WHERE fk_product_id = $1
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(product_id)
        .bind(updated_at)
        .bind(delta.available)
        .bind(delta.pending)
        .bind(delta.reserved)
        .bind(delta.sold)
        .execute(&mut **tx)
        .await
        .map_err(storage_or_out_of_range("database.claim_and_adjust_one_row"))?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage("database.ping"))?;
        Ok(())
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            total_conns: self.pool.size(),
            idle_conns: self.pool.num_idle() as u32,
            max_conns: self.pool.options().get_max_connections(),
        }
    }
}

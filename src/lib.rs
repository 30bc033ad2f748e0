//! # stockledger
//!
//! Product catalog with a stock ledger that tolerates many concurrent writers
//! on the same product.
//!
//! ## Ledger rows
//! A product's stock is not a single counter row. It is spread across one or
//! more **ledger rows**, each carrying `available`, `pending`, `reserved` and
//! `sold` counters. The first row is created together with the product.
//!
//! ## Adjusting stock
//! An adjustment claims one ledger row with `SELECT ... FOR UPDATE SKIP LOCKED`
//! and adds the delta to it. Rows held by other transactions are skipped, never
//! waited on. When no row can be claimed, a fresh row is appended in the same
//! transaction, so writers always make progress:
//!
//! ```rust,ignore
//! let service = StockService::new(PostgresAdapter::from_pool(pool), &StockConfig::default());
//! service.add_product(Product::new("SKU-1", "book", "Rust", "active")).await?;
//!
//! let delta = StockDelta { available: 5, ..StockDelta::new("SKU-1") };
//! let merged = service.adjust_inventory(delta).await?;
//! assert_eq!(merged.available, 1005);
//! ```
//!
//! The value returned by an adjustment is the row read at the start of the
//! call plus the caller's delta, regardless of which row absorbed the write.
//!
//! ## Feature flags
//!
//! | Flag       | Default | Description                     |
//! |------------|---------|---------------------------------|
//! | `postgres` | ✓       | PostgreSQL adapter via sqlx     |

pub mod adapters;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod service;
pub mod telemetry;

pub use crate::adapters::{InventoryAdapter, PoolStats, memory::MemoryAdapter};
pub use crate::error::Error;
pub use crate::model::{Inventory, Product, StockDelta};
pub use crate::service::StockService;

#[cfg(feature = "postgres")]
pub use crate::adapters::postgres::PostgresAdapter;

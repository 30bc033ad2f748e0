mod inventory;
mod product;

pub use inventory::{Inventory, StockDelta};
pub use product::Product;

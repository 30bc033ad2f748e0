use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// A catalog entry. `sku` is the business key and is unique across the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    pub fn new(sku: &str, kind: &str, name: &str, status: &str) -> Self {
        Self {
            id: 0,
            sku: sku.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.sku.trim().is_empty() {
            return Err(Error::BadRequest("sku must not be empty".to_string()));
        }
        Ok(())
    }
}

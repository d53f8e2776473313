//! Cart snapshot types.
//!
//! A snapshot is the full, point-in-time view of one cart: the ordered item
//! list plus derived totals. Sync requests always carry whole snapshots,
//! never deltas.

use crate::{error::Result, DeviceId, Error, ProductId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Currency used when a snapshot does not name one.
pub const DEFAULT_CURRENCY: &str = "BDT";

/// A single line in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
    /// When the item first entered the cart
    pub added_at: Timestamp,
    /// Device that added the item, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_device_id: Option<DeviceId>,
}

impl CartItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, added_at: Timestamp) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            added_at,
            origin_device_id: None,
        }
    }

    /// Tag the item with the device it came from.
    pub fn from_device(mut self, device_id: impl Into<DeviceId>) -> Self {
        self.origin_device_id = Some(device_id.into());
        self
    }
}

/// Totals and bookkeeping for a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CartMetadata {
    /// Sum of all item quantities
    pub total_items: u64,
    /// Price estimate, owned by the pricing side of the cart store
    pub estimated_total: f64,
    pub currency: String,
    pub last_modified: Timestamp,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl Default for CartMetadata {
    fn default() -> Self {
        Self {
            total_items: 0,
            estimated_total: 0.0,
            currency: default_currency(),
            last_modified: 0,
        }
    }
}

/// Full point-in-time cart contents.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub metadata: CartMetadata,
}

impl CartSnapshot {
    /// An empty cart.
    pub fn empty(now: Timestamp) -> Self {
        Self {
            items: Vec::new(),
            metadata: CartMetadata {
                last_modified: now,
                ..CartMetadata::default()
            },
        }
    }

    /// Build a snapshot from items, deriving the item total.
    pub fn from_items(items: Vec<CartItem>, now: Timestamp) -> Self {
        let mut snapshot = Self::empty(now);
        snapshot.items = items;
        snapshot.metadata.total_items = snapshot.total_quantity();
        snapshot
    }

    /// Replace the items, keeping currency and price estimate.
    pub fn with_items(&self, items: Vec<CartItem>, now: Timestamp) -> Self {
        let mut snapshot = Self {
            items,
            metadata: self.metadata.clone(),
        };
        snapshot.metadata.total_items = snapshot.total_quantity();
        snapshot.metadata.last_modified = now;
        snapshot
    }

    pub fn item(&self, product_id: &str) -> Option<&CartItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    pub fn quantity_of(&self, product_id: &str) -> Option<u32> {
        self.item(product_id).map(|i| i.quantity)
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.item(product_id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }

    /// True when both snapshots hold the same products in the same
    /// quantities, ignoring order, timestamps and metadata.
    pub fn same_contents(&self, other: &CartSnapshot) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .all(|i| other.quantity_of(&i.product_id) == Some(i.quantity))
    }

    /// Check structural invariants: non-empty ids, positive quantities, one
    /// line per product.
    pub fn validate(&self) -> Result<()> {
        validate_items(&self.items)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}

/// Validate a bare item list (used for snapshots and user selections).
pub(crate) fn validate_items(items: &[CartItem]) -> Result<()> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if item.product_id.is_empty() {
            return Err(Error::EmptyProductId);
        }
        if item.quantity == 0 {
            return Err(Error::InvalidQuantity {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            });
        }
        if !seen.insert(item.product_id.as_str()) {
            return Err(Error::DuplicateProduct(item.product_id.clone()));
        }
    }
    Ok(())
}

//! Conflict detection between two cart snapshots.
//!
//! Detection is a pure diff of the committed snapshot against the one a
//! device submitted:
//!
//! 1. A product in both with different quantities is a quantity mismatch
//! 2. A product in the committed snapshot but missing from the incoming one
//!    is a removal
//! 3. A product only in the incoming snapshot is an addition, never a
//!    conflict
//!
//! An empty incoming cart therefore reports one removal per committed item,
//! which is how "clear cart" shows up.

use crate::{CartSnapshot, ProductId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Discriminant of a [`Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    QuantityMismatch,
    ItemRemoved,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::QuantityMismatch => f.write_str("quantity_mismatch"),
            ConflictKind::ItemRemoved => f.write_str("item_removed"),
        }
    }
}

/// A disagreement between the committed cart and an incoming snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Conflict {
    /// Both sides hold the product with different quantities.
    QuantityMismatch {
        product_id: ProductId,
        current_quantity: u32,
        incoming_quantity: u32,
        /// Last modification of the committed snapshot
        last_modified: Timestamp,
    },
    /// The incoming side dropped a product the committed side still holds.
    ItemRemoved {
        product_id: ProductId,
        current_quantity: u32,
    },
}

impl Conflict {
    pub fn kind(&self) -> ConflictKind {
        match self {
            Conflict::QuantityMismatch { .. } => ConflictKind::QuantityMismatch,
            Conflict::ItemRemoved { .. } => ConflictKind::ItemRemoved,
        }
    }

    pub fn product_id(&self) -> &ProductId {
        match self {
            Conflict::QuantityMismatch { product_id, .. } => product_id,
            Conflict::ItemRemoved { product_id, .. } => product_id,
        }
    }

    pub fn current_quantity(&self) -> u32 {
        match self {
            Conflict::QuantityMismatch {
                current_quantity, ..
            } => *current_quantity,
            Conflict::ItemRemoved {
                current_quantity, ..
            } => *current_quantity,
        }
    }

    /// Quantity on the incoming side; a removal counts as zero.
    pub fn incoming_quantity(&self) -> u32 {
        match self {
            Conflict::QuantityMismatch {
                incoming_quantity, ..
            } => *incoming_quantity,
            Conflict::ItemRemoved { .. } => 0,
        }
    }
}

/// Diff `current` (committed) against `incoming` (submitted by a device).
///
/// The result follows the item order of `current`, so the same inputs always
/// yield the same list.
pub fn detect_conflicts(current: &CartSnapshot, incoming: &CartSnapshot) -> Vec<Conflict> {
    let mut incoming_quantities: HashMap<&str, u32> = HashMap::with_capacity(incoming.len());
    for item in &incoming.items {
        // First line wins if a malformed snapshot repeats a product
        incoming_quantities
            .entry(item.product_id.as_str())
            .or_insert(item.quantity);
    }

    let mut conflicts = Vec::new();
    let mut seen = Vec::with_capacity(current.len());

    for item in &current.items {
        if seen.contains(&item.product_id.as_str()) {
            continue;
        }
        seen.push(item.product_id.as_str());

        match incoming_quantities.get(item.product_id.as_str()) {
            Some(&incoming_quantity) if incoming_quantity != item.quantity => {
                conflicts.push(Conflict::QuantityMismatch {
                    product_id: item.product_id.clone(),
                    current_quantity: item.quantity,
                    incoming_quantity,
                    last_modified: current.metadata.last_modified,
                });
            }
            Some(_) => {}
            None => conflicts.push(Conflict::ItemRemoved {
                product_id: item.product_id.clone(),
                current_quantity: item.quantity,
            }),
        }
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CartItem;

    fn cart(items: &[(&str, u32)]) -> CartSnapshot {
        CartSnapshot::from_items(
            items
                .iter()
                .map(|(id, qty)| CartItem::new(*id, *qty, 1000))
                .collect(),
            1000,
        )
    }

    #[test]
    fn identical_carts_have_no_conflicts() {
        let a = cart(&[("A", 1), ("B", 2)]);
        assert!(detect_conflicts(&a, &a.clone()).is_empty());
    }

    #[test]
    fn quantity_change_is_mismatch() {
        let conflicts = detect_conflicts(&cart(&[("A", 2)]), &cart(&[("A", 3)]));
        assert_eq!(
            conflicts,
            vec![Conflict::QuantityMismatch {
                product_id: "A".into(),
                current_quantity: 2,
                incoming_quantity: 3,
                last_modified: 1000,
            }]
        );
    }

    #[test]
    fn addition_is_not_a_conflict() {
        let conflicts = detect_conflicts(&cart(&[("A", 1)]), &cart(&[("A", 1), ("B", 2)]));
        assert!(conflicts.is_empty());
    }

    #[test]
    fn missing_item_is_removal() {
        let conflicts = detect_conflicts(&cart(&[("A", 1), ("B", 2)]), &cart(&[("A", 1)]));
        assert_eq!(
            conflicts,
            vec![Conflict::ItemRemoved {
                product_id: "B".into(),
                current_quantity: 2,
            }]
        );
    }

    #[test]
    fn empty_incoming_clears_every_item() {
        let conflicts = detect_conflicts(&cart(&[("A", 1), ("B", 2), ("C", 3)]), &cart(&[]));
        assert_eq!(conflicts.len(), 3);
        assert!(conflicts
            .iter()
            .all(|c| c.kind() == ConflictKind::ItemRemoved));
        let ids: Vec<_> = conflicts.iter().map(|c| c.product_id().as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn empty_current_accepts_anything() {
        assert!(detect_conflicts(&cart(&[]), &cart(&[("A", 4)])).is_empty());
    }

    #[test]
    fn conflict_serializes_as_tagged_object() {
        let conflict = Conflict::QuantityMismatch {
            product_id: "A".into(),
            current_quantity: 2,
            incoming_quantity: 5,
            last_modified: 42,
        };
        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["type"], "quantity_mismatch");
        assert_eq!(json["productId"], "A");
        assert_eq!(json["currentQuantity"], 2);
        assert_eq!(json["incomingQuantity"], 5);

        let removed = Conflict::ItemRemoved {
            product_id: "B".into(),
            current_quantity: 1,
        };
        let json = serde_json::to_value(&removed).unwrap();
        assert_eq!(json["type"], "item_removed");
        assert_eq!(removed.incoming_quantity(), 0);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeMap;

        fn arb_cart() -> impl Strategy<Value = BTreeMap<u8, u32>> {
            prop::collection::btree_map(0u8..12, 1u32..6, 0..8)
        }

        fn to_snapshot(items: &BTreeMap<u8, u32>) -> CartSnapshot {
            CartSnapshot::from_items(
                items
                    .iter()
                    .map(|(id, qty)| CartItem::new(format!("p{}", id), *qty, 1))
                    .collect(),
                1,
            )
        }

        proptest! {
            #[test]
            fn prop_conflicts_are_complete(current in arb_cart(), incoming in arb_cart()) {
                let conflicts = detect_conflicts(&to_snapshot(&current), &to_snapshot(&incoming));

                let expected_mismatches = current
                    .iter()
                    .filter(|&(id, qty)| incoming.get(id).is_some_and(|q| q != qty))
                    .count();
                let expected_removals = current.keys().filter(|id| !incoming.contains_key(*id)).count();

                let mismatches = conflicts.iter().filter(|c| c.kind() == ConflictKind::QuantityMismatch).count();
                let removals = conflicts.iter().filter(|c| c.kind() == ConflictKind::ItemRemoved).count();

                prop_assert_eq!(mismatches, expected_mismatches);
                prop_assert_eq!(removals, expected_removals);

                // One conflict per product at most
                let mut ids: Vec<_> = conflicts.iter().map(|c| c.product_id().clone()).collect();
                ids.sort();
                ids.dedup();
                prop_assert_eq!(ids.len(), conflicts.len());
            }

            #[test]
            fn prop_detection_is_deterministic(current in arb_cart(), incoming in arb_cart()) {
                let a = detect_conflicts(&to_snapshot(&current), &to_snapshot(&incoming));
                let b = detect_conflicts(&to_snapshot(&current), &to_snapshot(&incoming));
                prop_assert_eq!(a, b);
            }
        }
    }
}

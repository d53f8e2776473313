//! Conflict resolution strategies.
//!
//! A [`Resolver`] turns the committed snapshot, an incoming snapshot and the
//! conflicts between them into the one snapshot that gets committed next.
//! The strategy is always chosen by the caller; the resolver keeps no state
//! between calls.

use crate::{
    error::Result, snapshot::validate_items, CartItem, CartSnapshot, Conflict, Error, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How to settle a non-empty conflict set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The incoming snapshot replaces the committed one unchanged.
    LastWriteWins,
    /// Quantities of products held on both sides are added together;
    /// everything else follows the incoming snapshot.
    MergeQuantities,
    /// The result is exactly the selection the user made.
    UserChoice,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LastWriteWins => "last_write_wins",
            ResolutionStrategy::MergeQuantities => "merge_quantities",
            ResolutionStrategy::UserChoice => "user_choice",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "last_write_wins" => Ok(ResolutionStrategy::LastWriteWins),
            "merge_quantities" => Ok(ResolutionStrategy::MergeQuantities),
            "user_choice" => Ok(ResolutionStrategy::UserChoice),
            other => Err(format!("unknown resolution strategy: {}", other)),
        }
    }
}

/// Applies one [`ResolutionStrategy`].
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    strategy: ResolutionStrategy,
}

impl Resolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Produce the authoritative snapshot.
    ///
    /// `current` must be the last committed snapshot and `conflicts` the
    /// output of [`crate::detect_conflicts`] for the same pair.
    /// `user_choice` is only read by [`ResolutionStrategy::UserChoice`], which
    /// fails with [`Error::MissingUserChoice`] when it is absent.
    pub fn resolve(
        &self,
        current: &CartSnapshot,
        incoming: &CartSnapshot,
        conflicts: &[Conflict],
        user_choice: Option<&[CartItem]>,
        now: Timestamp,
    ) -> Result<CartSnapshot> {
        match self.strategy {
            ResolutionStrategy::LastWriteWins => Ok(incoming.clone()),
            ResolutionStrategy::MergeQuantities if conflicts.is_empty() => Ok(incoming.clone()),
            ResolutionStrategy::MergeQuantities => Ok(merge_quantities(current, incoming, now)),
            ResolutionStrategy::UserChoice => {
                let selection = user_choice.ok_or(Error::MissingUserChoice)?;
                validate_items(selection)?;
                Ok(current.with_items(selection.to_vec(), now))
            }
        }
    }
}

/// Sum committed and incoming quantities for every shared product.
///
/// Removals and additions follow the incoming side.
fn merge_quantities(current: &CartSnapshot, incoming: &CartSnapshot, now: Timestamp) -> CartSnapshot {
    let committed: HashMap<&str, u32> = current
        .items
        .iter()
        .map(|item| (item.product_id.as_str(), item.quantity))
        .collect();

    let items = incoming
        .items
        .iter()
        .map(|item| match committed.get(item.product_id.as_str()) {
            Some(previous) => CartItem {
                quantity: item.quantity.saturating_add(*previous),
                ..item.clone()
            },
            None => item.clone(),
        })
        .collect();

    incoming.with_items(items, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect_conflicts;

    fn cart(items: &[(&str, u32)]) -> CartSnapshot {
        CartSnapshot::from_items(
            items
                .iter()
                .map(|(id, qty)| CartItem::new(*id, *qty, 1000))
                .collect(),
            1000,
        )
    }

    fn resolve(
        strategy: ResolutionStrategy,
        current: &CartSnapshot,
        incoming: &CartSnapshot,
        choice: Option<&[CartItem]>,
    ) -> Result<CartSnapshot> {
        let conflicts = detect_conflicts(current, incoming);
        Resolver::new(strategy).resolve(current, incoming, &conflicts, choice, 2000)
    }

    #[test]
    fn last_write_wins_takes_incoming() {
        let resolved = resolve(
            ResolutionStrategy::LastWriteWins,
            &cart(&[("A", 2)]),
            &cart(&[("A", 3)]),
            None,
        )
        .unwrap();
        assert_eq!(resolved, cart(&[("A", 3)]));
    }

    #[test]
    fn merge_adds_conflicting_quantities() {
        let resolved = resolve(
            ResolutionStrategy::MergeQuantities,
            &cart(&[("A", 2)]),
            &cart(&[("A", 3)]),
            None,
        )
        .unwrap();
        assert_eq!(resolved.quantity_of("A"), Some(5));
        assert_eq!(resolved.metadata.total_items, 5);
        assert_eq!(resolved.metadata.last_modified, 2000);
    }

    #[test]
    fn merge_passes_non_shared_items_through() {
        let resolved = resolve(
            ResolutionStrategy::MergeQuantities,
            &cart(&[("A", 2), ("B", 1)]),
            &cart(&[("A", 3), ("C", 7)]),
            None,
        )
        .unwrap();
        assert_eq!(resolved.quantity_of("A"), Some(5));
        assert_eq!(resolved.quantity_of("B"), None);
        assert_eq!(resolved.quantity_of("C"), Some(7));
    }

    #[test]
    fn merge_sums_every_shared_product() {
        let resolved = resolve(
            ResolutionStrategy::MergeQuantities,
            &cart(&[("A", 2), ("B", 4)]),
            &cart(&[("A", 3), ("B", 4)]),
            None,
        )
        .unwrap();
        assert_eq!(resolved.quantity_of("A"), Some(5));
        assert_eq!(resolved.quantity_of("B"), Some(8));
        assert_eq!(resolved.metadata.total_items, 13);
    }

    #[test]
    fn merge_without_conflicts_keeps_incoming() {
        let current = cart(&[("A", 2)]);
        let resolved = Resolver::new(ResolutionStrategy::MergeQuantities)
            .resolve(&current, &current, &[], None, 2000)
            .unwrap();
        assert_eq!(resolved, current);
    }

    #[test]
    fn merge_saturates() {
        let resolved = resolve(
            ResolutionStrategy::MergeQuantities,
            &cart(&[("A", u32::MAX)]),
            &cart(&[("A", 3)]),
            None,
        )
        .unwrap();
        assert_eq!(resolved.quantity_of("A"), Some(u32::MAX));
    }

    #[test]
    fn user_choice_uses_selection_exactly() {
        let selection = vec![CartItem::new("Z", 9, 1500)];
        let resolved = resolve(
            ResolutionStrategy::UserChoice,
            &cart(&[("A", 2)]),
            &cart(&[("A", 3)]),
            Some(selection.as_slice()),
        )
        .unwrap();
        assert_eq!(resolved.items, selection);
        assert_eq!(resolved.metadata.total_items, 9);
    }

    #[test]
    fn user_choice_without_selection_fails() {
        let result = resolve(
            ResolutionStrategy::UserChoice,
            &cart(&[("A", 2)]),
            &cart(&[("A", 3)]),
            None,
        );
        assert_eq!(result, Err(Error::MissingUserChoice));
    }

    #[test]
    fn user_choice_rejects_malformed_selection() {
        let selection = vec![CartItem::new("A", 1, 1), CartItem::new("A", 2, 1)];
        let result = resolve(
            ResolutionStrategy::UserChoice,
            &cart(&[("A", 2)]),
            &cart(&[("A", 3)]),
            Some(selection.as_slice()),
        );
        assert_eq!(result, Err(Error::DuplicateProduct("A".into())));
    }

    #[test]
    fn strategy_parses_from_wire_names() {
        for strategy in [
            ResolutionStrategy::LastWriteWins,
            ResolutionStrategy::MergeQuantities,
            ResolutionStrategy::UserChoice,
        ] {
            assert_eq!(strategy.as_str().parse::<ResolutionStrategy>(), Ok(strategy));
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json, format!("\"{}\"", strategy));
        }
        assert!("newest".parse::<ResolutionStrategy>().is_err());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_merge_is_deterministic(
                current_qty in 1u32..1000,
                incoming_qty in 1u32..1000,
            ) {
                let current = cart(&[("A", current_qty)]);
                let incoming = cart(&[("A", incoming_qty)]);

                let a = resolve(ResolutionStrategy::MergeQuantities, &current, &incoming, None).unwrap();
                let b = resolve(ResolutionStrategy::MergeQuantities, &current, &incoming, None).unwrap();
                prop_assert_eq!(&a, &b);

                let expected = if current_qty == incoming_qty { incoming_qty } else { current_qty + incoming_qty };
                prop_assert_eq!(a.quantity_of("A"), Some(expected));
            }

            #[test]
            fn prop_merge_sums_agreeing_products_alongside_conflicts(
                shared_qty in 1u32..1000,
                current_qty in 1u32..1000,
                delta in 1u32..1000,
            ) {
                let current = cart(&[("A", current_qty), ("B", shared_qty)]);
                let incoming = cart(&[("A", current_qty + delta), ("B", shared_qty)]);

                let merged = resolve(ResolutionStrategy::MergeQuantities, &current, &incoming, None).unwrap();
                prop_assert_eq!(merged.quantity_of("A"), Some(2 * current_qty + delta));
                prop_assert_eq!(merged.quantity_of("B"), Some(2 * shared_qty));
            }

            #[test]
            fn prop_last_write_wins_is_incoming(
                current_qty in 1u32..1000,
                incoming_qty in 1u32..1000,
            ) {
                let incoming = cart(&[("A", incoming_qty), ("B", 1)]);
                let resolved = resolve(
                    ResolutionStrategy::LastWriteWins,
                    &cart(&[("A", current_qty)]),
                    &incoming,
                    None,
                ).unwrap();
                prop_assert_eq!(resolved, incoming);
            }
        }
    }
}

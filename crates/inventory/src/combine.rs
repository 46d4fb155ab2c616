//! Pair-aware combination of per-SKU deltas into display rows.
//!
//! A customer receiving a full container hands back an empty one, and that
//! exchange is never logged against the empty SKU. The empty row therefore
//! takes its entries and exits from the full side of the pair.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use depot_core::ProductId;
use depot_products::{GroupMembers, PairingIssue, Product, ProductKind, SkuGroup};

use crate::aggregate::AggregatedDelta;

/// Signed movement totals of one displayed row, before reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedRow {
    pub product_id: ProductId,
    pub name: String,
    pub display_kind: ProductKind,
    pub counterpart_id: Option<ProductId>,
    pub on_hand: i64,
    pub entries: i64,
    pub exits: i64,
    pub sales: i64,
    pub damages: i64,
    pub issues: Vec<PairingIssue>,
    /// A total feeding this row left the `i64` range; its figures are saturated.
    #[serde(default, skip_serializing_if = "core::ops::Not::not")]
    pub overflowed: bool,
}

impl CombinedRow {
    fn new(product: &Product, display_kind: ProductKind, counterpart_id: Option<ProductId>) -> Self {
        Self {
            product_id: product.id,
            name: product.name.clone(),
            display_kind,
            counterpart_id,
            on_hand: product.on_hand,
            entries: 0,
            exits: 0,
            sales: 0,
            damages: 0,
            issues: vec![],
            overflowed: false,
        }
    }

    /// Full and standalone convention: the SKU's own movements.
    fn own_movements(mut self, d: &AggregatedDelta) -> Self {
        self.entries = self.sum(d.purchases, d.manual_in);
        self.exits = d.manual_out;
        self.sales = d.sales;
        self.damages = d.damages;
        self.overflowed |= d.overflowed;
        self
    }

    /// Empty convention: exchange inferred from the full side, breakage from
    /// the empty's own damage records. Empties are never sold.
    fn inferred_from_full(mut self, full: &AggregatedDelta, empty: &AggregatedDelta) -> Self {
        self.entries = self.sum(full.manual_out, full.sales);
        self.exits = self.sum(full.purchases, full.manual_in);
        self.sales = 0;
        self.damages = empty.damages;
        self.overflowed |= full.overflowed || empty.overflowed;
        self
    }

    fn sum(&mut self, a: i64, b: i64) -> i64 {
        a.checked_add(b).unwrap_or_else(|| {
            self.overflowed = true;
            a.saturating_add(b)
        })
    }
}

/// Rows for one resolved group: full then empty for a pair, one row otherwise.
///
/// Missing entries in `deltas` count as no movement.
pub fn combine_group(group: &SkuGroup, deltas: &HashMap<ProductId, AggregatedDelta>) -> Vec<CombinedRow> {
    let delta_of = |id: &ProductId| deltas.get(id).copied().unwrap_or_default();

    let mut rows = match &group.members {
        GroupMembers::Pair { full, empty } => {
            let full_delta = delta_of(&full.id);
            let empty_delta = delta_of(&empty.id);
            vec![
                CombinedRow::new(full, ProductKind::Full, Some(empty.id)).own_movements(&full_delta),
                CombinedRow::new(empty, ProductKind::Empty, Some(full.id))
                    .inferred_from_full(&full_delta, &empty_delta),
            ]
        }
        GroupMembers::Singleton(product) => {
            vec![CombinedRow::new(product, ProductKind::Standalone, None).own_movements(&delta_of(&product.id))]
        }
    };

    for issue in &group.issues {
        if let Some(row) = rows.iter_mut().find(|r| r.product_id == issue.product_id()) {
            row.issues.push(issue.clone());
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::UnitId;
    use depot_products::ContainerType;

    fn pair_group(full_stock: i64, empty_stock: i64) -> (SkuGroup, Product, Product) {
        let unit = UnitId::new();
        let mut full = Product::new(unit, "P13 Cheio", Some(ContainerType::Full)).with_stock(full_stock);
        let mut empty = Product::new(unit, "P13 Vazio", Some(ContainerType::Empty)).with_stock(empty_stock);
        Product::pair(&mut full, &mut empty);
        let group = SkuGroup {
            key: "p13".to_string(),
            members: GroupMembers::Pair {
                full: full.clone(),
                empty: empty.clone(),
            },
            issues: vec![],
        };
        (group, full, empty)
    }

    #[test]
    fn empty_row_is_inferred_from_full_side() {
        let (group, full, empty) = pair_group(10, 10);
        let deltas: HashMap<ProductId, AggregatedDelta> = [
            (
                full.id,
                AggregatedDelta { sales: 7, manual_out: 2, purchases: 3, manual_in: 0, damages: 0, overflowed: false },
            ),
            (
                empty.id,
                AggregatedDelta { sales: 0, manual_out: 40, purchases: 0, manual_in: 15, damages: 1, overflowed: false },
            ),
        ]
        .into_iter()
        .collect();

        let rows = combine_group(&group, &deltas);
        assert_eq!(rows.len(), 2);

        let empty_row = &rows[1];
        assert_eq!(empty_row.display_kind, ProductKind::Empty);
        assert_eq!(empty_row.entries, 9);
        assert_eq!(empty_row.exits, 3);
        assert_eq!(empty_row.sales, 0);
        assert_eq!(empty_row.damages, 1);
        assert_eq!(empty_row.counterpart_id, Some(full.id));
    }

    #[test]
    fn full_row_uses_own_movements() {
        let (group, full, _) = pair_group(40, 55);
        let deltas: HashMap<ProductId, AggregatedDelta> = [(
            full.id,
            AggregatedDelta { sales: 25, purchases: 10, manual_in: 2, manual_out: 3, damages: 1, overflowed: false },
        )]
        .into_iter()
        .collect();

        let full_row = &combine_group(&group, &deltas)[0];
        assert_eq!(full_row.display_kind, ProductKind::Full);
        assert_eq!(full_row.entries, 12);
        assert_eq!(full_row.exits, 3);
        assert_eq!(full_row.sales, 25);
        assert_eq!(full_row.damages, 1);
        assert_eq!(full_row.on_hand, 40);
    }

    #[test]
    fn singleton_uses_standalone_convention() {
        let unit = UnitId::new();
        let lone_empty = Product::new(unit, "P8 Vazio", Some(ContainerType::Empty)).with_stock(4);
        let group = SkuGroup {
            key: "p8".to_string(),
            members: GroupMembers::Singleton(lone_empty.clone()),
            issues: vec![],
        };
        let deltas: HashMap<ProductId, AggregatedDelta> = [(
            lone_empty.id,
            AggregatedDelta { sales: 1, purchases: 2, manual_in: 3, manual_out: 4, damages: 5, overflowed: false },
        )]
        .into_iter()
        .collect();

        let rows = combine_group(&group, &deltas);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].display_kind, ProductKind::Standalone);
        assert_eq!(rows[0].entries, 5);
        assert_eq!(rows[0].exits, 4);
        assert_eq!(rows[0].sales, 1);
        assert_eq!(rows[0].damages, 5);
        assert_eq!(rows[0].counterpart_id, None);
    }

    #[test]
    fn overflowing_totals_mark_the_row() {
        let (group, full, empty) = pair_group(0, 0);
        let deltas: HashMap<ProductId, AggregatedDelta> = [(
            full.id,
            AggregatedDelta { sales: i64::MAX, manual_out: 1, ..Default::default() },
        )]
        .into_iter()
        .collect();

        let rows = combine_group(&group, &deltas);
        assert!(!rows[0].overflowed);
        assert_eq!(rows[1].product_id, empty.id);
        assert_eq!(rows[1].entries, i64::MAX);
        assert!(rows[1].overflowed);
    }

    #[test]
    fn group_issues_land_on_their_row() {
        let unit = UnitId::new();
        let product = Product::new(unit, "P13 Cheio", Some(ContainerType::Full));
        let issue = PairingIssue::MissingCounterpart {
            product_id: product.id,
            declared: ProductId::new(),
        };
        let group = SkuGroup {
            key: "p13".to_string(),
            members: GroupMembers::Singleton(product),
            issues: vec![issue.clone()],
        };

        let rows = combine_group(&group, &HashMap::new());
        assert_eq!(rows[0].issues, vec![issue]);
    }
}

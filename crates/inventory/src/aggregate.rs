//! Per-SKU movement totals over a window.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use depot_core::ProductId;

use crate::movement::{MovementEvent, MovementType};
use crate::window::TimeWindow;

/// Sum of each movement kind for one SKU over one window.
///
/// Totals saturate instead of wrapping; `overflowed` records that a sum hit
/// the `i64` range so the ledger can flag the line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregatedDelta {
    pub sales: i64,
    pub purchases: i64,
    pub manual_in: i64,
    pub manual_out: i64,
    pub damages: i64,
    #[serde(default, skip_serializing_if = "core::ops::Not::not")]
    pub overflowed: bool,
}

impl AggregatedDelta {
    pub fn record(&mut self, movement_type: MovementType, quantity: i64) {
        let slot = match movement_type {
            MovementType::Sale => &mut self.sales,
            MovementType::Purchase => &mut self.purchases,
            MovementType::ManualIn => &mut self.manual_in,
            MovementType::ManualOut => &mut self.manual_out,
            MovementType::Damage => &mut self.damages,
        };
        self.overflowed |= add_into(slot, quantity);
    }

    pub fn merge(&mut self, other: &AggregatedDelta) {
        let mut overflowed = other.overflowed;
        overflowed |= add_into(&mut self.sales, other.sales);
        overflowed |= add_into(&mut self.purchases, other.purchases);
        overflowed |= add_into(&mut self.manual_in, other.manual_in);
        overflowed |= add_into(&mut self.manual_out, other.manual_out);
        overflowed |= add_into(&mut self.damages, other.damages);
        self.overflowed |= overflowed;
    }

    pub fn is_zero(&self) -> bool {
        *self == AggregatedDelta::default()
    }
}

/// Saturating `*slot += quantity`; true when the sum left the `i64` range.
fn add_into(slot: &mut i64, quantity: i64) -> bool {
    match slot.checked_add(quantity) {
        Some(sum) => {
            *slot = sum;
            false
        }
        None => {
            *slot = slot.saturating_add(quantity);
            true
        }
    }
}

/// Totals of one SKU's movements inside `window`.
pub fn aggregate<'a>(
    product_id: ProductId,
    window: &TimeWindow,
    events: impl IntoIterator<Item = &'a MovementEvent>,
) -> AggregatedDelta {
    let mut delta = AggregatedDelta::default();
    for e in events {
        if e.product_id == product_id && window.contains(e.occurred_at) {
            delta.record(e.movement_type, e.quantity);
        }
    }
    delta
}

/// Totals per SKU inside `window`, in one pass.
///
/// Events referring to products outside `known` are skipped: orphaned history
/// must not break the ledger.
pub fn aggregate_by_product<'a>(
    events: impl IntoIterator<Item = &'a MovementEvent>,
    window: &TimeWindow,
    known: &HashSet<ProductId>,
) -> HashMap<ProductId, AggregatedDelta> {
    let mut totals: HashMap<ProductId, AggregatedDelta> = HashMap::new();
    for e in events {
        if !window.contains(e.occurred_at) {
            continue;
        }
        if !known.contains(&e.product_id) {
            tracing::debug!(
                movement_id = %e.id,
                product_id = %e.product_id,
                "skipping movement for unknown product"
            );
            continue;
        }
        totals.entry(e.product_id).or_default().record(e.movement_type, e.quantity);
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use depot_core::{MovementId, UnitId};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, hour, 0, 0).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::new(at(0), at(23)).unwrap()
    }

    fn mv(product_id: ProductId, movement_type: MovementType, quantity: i64, occurred_at: DateTime<Utc>) -> MovementEvent {
        MovementEvent {
            id: MovementId::new(),
            unit_id: UnitId::new(),
            product_id,
            movement_type,
            quantity,
            occurred_at,
            note: None,
        }
    }

    #[test]
    fn no_events_is_all_zero() {
        let delta = aggregate(ProductId::new(), &window(), &Vec::<MovementEvent>::new());
        assert!(delta.is_zero());
    }

    #[test]
    fn sums_each_kind_inside_window_only() {
        let p = ProductId::new();
        let other = ProductId::new();
        let events = vec![
            mv(p, MovementType::Sale, 3, at(8)),
            mv(p, MovementType::Sale, 4, at(9)),
            mv(p, MovementType::Purchase, 10, at(0)),
            mv(p, MovementType::ManualIn, 1, at(23)),
            mv(p, MovementType::ManualOut, 2, at(12)),
            mv(p, MovementType::Damage, 1, at(13)),
            mv(p, MovementType::Sale, 100, at(23) + Duration::seconds(1)),
            mv(other, MovementType::Sale, 50, at(10)),
        ];

        let delta = aggregate(p, &window(), &events);
        assert_eq!(
            delta,
            AggregatedDelta {
                sales: 7,
                purchases: 10,
                manual_in: 1,
                manual_out: 2,
                damages: 1,
                overflowed: false,
            }
        );
    }

    #[test]
    fn batch_form_skips_unknown_products() {
        let p = ProductId::new();
        let orphan = ProductId::new();
        let events = vec![
            mv(p, MovementType::Sale, 2, at(8)),
            mv(orphan, MovementType::Sale, 9, at(8)),
        ];
        let known: HashSet<ProductId> = [p].into_iter().collect();

        let totals = aggregate_by_product(&events, &window(), &known);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[&p].sales, 2);
    }

    #[test]
    fn batch_and_single_forms_agree() {
        let a = ProductId::new();
        let b = ProductId::new();
        let events = vec![
            mv(a, MovementType::Sale, 2, at(8)),
            mv(b, MovementType::Purchase, 5, at(9)),
            mv(a, MovementType::Damage, 1, at(10)),
        ];
        let known: HashSet<ProductId> = [a, b].into_iter().collect();
        let totals = aggregate_by_product(&events, &window(), &known);

        assert_eq!(totals[&a], aggregate(a, &window(), &events));
        assert_eq!(totals[&b], aggregate(b, &window(), &events));
    }

    #[test]
    fn merge_adds_fieldwise() {
        let mut a = AggregatedDelta { sales: 1, purchases: 2, manual_in: 3, manual_out: 4, damages: 5, overflowed: false };
        a.merge(&AggregatedDelta { sales: 10, ..Default::default() });
        assert_eq!(a.sales, 11);
        assert_eq!(a.damages, 5);
        assert!(!a.overflowed);
    }

    #[test]
    fn huge_quantities_saturate_and_flag_overflow() {
        let p = ProductId::new();
        let half = i64::MAX / 2 + 1;
        let events = vec![mv(p, MovementType::Sale, half, at(8)), mv(p, MovementType::Sale, half, at(9))];

        let delta = aggregate(p, &window(), &events);
        assert_eq!(delta.sales, i64::MAX);
        assert!(delta.overflowed);

        let mut merged = AggregatedDelta { purchases: i64::MAX, ..Default::default() };
        merged.merge(&AggregatedDelta { purchases: 1, ..Default::default() });
        assert_eq!(merged.purchases, i64::MAX);
        assert!(merged.overflowed);
    }
}

//! Planning of manual stock movements.
//!
//! A plan is computed from a snapshot of the affected products and holds
//! everything the store must commit together: the movement record and the
//! versioned stock writes for the product and its paired counterpart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult, ExpectedVersion, MovementId, ProductId, UnitId};
use depot_products::{Product, check_counterpart};

use crate::ledger::ConsistencyWarning;
use crate::movement::{MovementEvent, MovementType};

/// Request to register a manual movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMovement {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub note: Option<String>,
    /// Defaults to the planning instant.
    pub occurred_at: Option<DateTime<Utc>>,
}

impl RegisterMovement {
    pub fn new(product_id: ProductId, movement_type: MovementType, quantity: i64) -> Self {
        Self {
            product_id,
            movement_type,
            quantity,
            note: None,
            occurred_at: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Checks that need no stock snapshot: a manual kind and a positive quantity.
    pub fn validate(&self) -> DomainResult<()> {
        if !self.movement_type.is_manual() {
            return Err(DomainError::validation(format!(
                "movement type {} cannot be registered manually",
                self.movement_type
            )));
        }
        if self.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        Ok(())
    }
}

/// A stock counter write guarded by the version it was planned against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockWrite {
    pub product_id: ProductId,
    pub expected_version: ExpectedVersion,
    pub new_on_hand: i64,
}

/// Before/after stock of one product touched by a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub product_id: ProductId,
    pub before: i64,
    pub after: i64,
}

impl StockChange {
    pub fn delta(&self) -> i64 {
        self.after - self.before
    }
}

/// Everything one manual movement commits, primary product first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementPlan {
    pub event: MovementEvent,
    pub writes: Vec<StockWrite>,
    pub changes: Vec<StockChange>,
    pub warnings: Vec<ConsistencyWarning>,
}

impl MovementPlan {
    pub fn primary(&self) -> &StockChange {
        &self.changes[0]
    }

    pub fn counterpart(&self) -> Option<&StockChange> {
        self.changes.get(1)
    }

    fn touch(&mut self, product: &Product, new_on_hand: i64) {
        self.writes.push(StockWrite {
            product_id: product.id,
            expected_version: ExpectedVersion(product.version),
            new_on_hand,
        });
        self.changes.push(StockChange {
            product_id: product.id,
            before: product.on_hand,
            after: new_on_hand,
        });
    }
}

/// Plan a manual movement on `product`.
///
/// `counterpart` is whatever the caller found under `product.pair_id` in the
/// same unit (`None` if nothing). Manual entries and exits move the opposite
/// side of a declared pair; damage only ever touches the product itself.
/// Decrements are floored at zero on either side.
///
/// A broken pairing declaration does not block the movement: the product is
/// written alone and the plan carries a warning.
pub fn plan_movement(
    unit_id: UnitId,
    request: &RegisterMovement,
    product: &Product,
    counterpart: Option<&Product>,
) -> DomainResult<MovementPlan> {
    request.validate()?;
    if product.id != request.product_id {
        return Err(DomainError::invariant(format!(
            "snapshot of {} supplied for movement on {}",
            product.id, request.product_id
        )));
    }
    if product.unit_id != unit_id || !product.active {
        return Err(DomainError::not_found());
    }

    let q = request.quantity;
    let increments = request.movement_type == MovementType::ManualIn;
    let primary_after = if increments {
        product
            .on_hand
            .checked_add(q)
            .ok_or_else(|| DomainError::validation(format!("stock of {} would overflow", product.id)))?
    } else {
        floor_sub(product.on_hand, q)
    };

    let mut plan = MovementPlan {
        event: MovementEvent {
            id: MovementId::new(),
            unit_id,
            product_id: product.id,
            movement_type: request.movement_type,
            quantity: q,
            occurred_at: request.occurred_at.unwrap_or_else(Utc::now),
            note: request.note.clone(),
        },
        writes: Vec::with_capacity(2),
        changes: Vec::with_capacity(2),
        warnings: vec![],
    };
    plan.touch(product, primary_after);

    if request.movement_type == MovementType::Damage || product.pair_id.is_none() {
        return Ok(plan);
    }

    let counterpart = counterpart.filter(|c| c.unit_id == unit_id);
    if let Some(issue) = check_counterpart(product, counterpart) {
        plan.warnings.push(ConsistencyWarning::Pairing { issue });
        return Ok(plan);
    }
    // check_counterpart only passes for a present, symmetric, complementary side.
    let Some(other) = counterpart else {
        return Ok(plan);
    };

    let other_after = if increments {
        floor_sub(other.on_hand, q)
    } else {
        other
            .on_hand
            .checked_add(q)
            .ok_or_else(|| DomainError::validation(format!("stock of {} would overflow", other.id)))?
    };
    plan.touch(other, other_after);
    Ok(plan)
}

fn floor_sub(on_hand: i64, q: i64) -> i64 {
    on_hand.saturating_sub(q).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_products::{ContainerType, PairingIssue};
    use proptest::prelude::*;

    fn paired(unit: UnitId, full_stock: i64, empty_stock: i64) -> (Product, Product) {
        let mut full = Product::new(unit, "P13 Cheio", Some(ContainerType::Full)).with_stock(full_stock);
        let mut empty = Product::new(unit, "P13 Vazio", Some(ContainerType::Empty)).with_stock(empty_stock);
        Product::pair(&mut full, &mut empty);
        (full, empty)
    }

    #[test]
    fn manual_in_on_full_draws_down_the_empty() {
        let unit = UnitId::new();
        let (full, empty) = paired(unit, 10, 4);
        let req = RegisterMovement::new(full.id, MovementType::ManualIn, 6).with_note("refill truck");

        let plan = plan_movement(unit, &req, &full, Some(&empty)).unwrap();
        assert_eq!(plan.primary(), &StockChange { product_id: full.id, before: 10, after: 16 });
        assert_eq!(plan.counterpart(), Some(&StockChange { product_id: empty.id, before: 4, after: 0 }));
        assert_eq!(plan.event.note.as_deref(), Some("refill truck"));
        assert_eq!(plan.writes[0].expected_version, ExpectedVersion(full.version));
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn manual_out_on_empty_adds_to_the_full() {
        let unit = UnitId::new();
        let (full, empty) = paired(unit, 10, 4);
        let req = RegisterMovement::new(empty.id, MovementType::ManualOut, 3);

        let plan = plan_movement(unit, &req, &empty, Some(&full)).unwrap();
        assert_eq!(plan.primary().after, 1);
        assert_eq!(plan.counterpart().map(|c| c.after), Some(13));
    }

    #[test]
    fn decrement_is_floored_at_zero() {
        let unit = UnitId::new();
        let lone = Product::new(unit, "Carvao 5kg", None).with_stock(2);
        let req = RegisterMovement::new(lone.id, MovementType::ManualOut, 5);

        let plan = plan_movement(unit, &req, &lone, None).unwrap();
        assert_eq!(plan.primary().after, 0);
        assert_eq!(plan.writes.len(), 1);
    }

    #[test]
    fn damage_never_touches_the_counterpart() {
        let unit = UnitId::new();
        let (full, empty) = paired(unit, 10, 4);
        let req = RegisterMovement::new(full.id, MovementType::Damage, 1);

        let plan = plan_movement(unit, &req, &full, Some(&empty)).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.primary().after, 9);
    }

    #[test]
    fn missing_counterpart_warns_and_writes_primary_only() {
        let unit = UnitId::new();
        let (full, _) = paired(unit, 10, 4);
        let req = RegisterMovement::new(full.id, MovementType::ManualIn, 1);

        let plan = plan_movement(unit, &req, &full, None).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert!(matches!(
            plan.warnings.as_slice(),
            [ConsistencyWarning::Pairing { issue: PairingIssue::MissingCounterpart { .. } }]
        ));
    }

    #[test]
    fn counterpart_from_another_unit_counts_as_missing() {
        let unit = UnitId::new();
        let (full, mut empty) = paired(unit, 10, 4);
        empty.unit_id = UnitId::new();
        let req = RegisterMovement::new(full.id, MovementType::ManualIn, 1);

        let plan = plan_movement(unit, &req, &full, Some(&empty)).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn rejects_non_manual_types_and_bad_quantities() {
        let unit = UnitId::new();
        let p = Product::new(unit, "Agua 20L", None).with_stock(5);

        for t in [MovementType::Sale, MovementType::Purchase] {
            let err = plan_movement(unit, &RegisterMovement::new(p.id, t, 1), &p, None).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
        for q in [0, -3] {
            let err = plan_movement(unit, &RegisterMovement::new(p.id, MovementType::ManualIn, q), &p, None)
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn foreign_or_inactive_product_is_not_found() {
        let unit = UnitId::new();
        let foreign = Product::new(UnitId::new(), "Agua 20L", None);
        let req = RegisterMovement::new(foreign.id, MovementType::ManualIn, 1);
        assert_eq!(plan_movement(unit, &req, &foreign, None), Err(DomainError::NotFound));

        let retired = Product::new(unit, "Agua 10L", None).inactive();
        let req = RegisterMovement::new(retired.id, MovementType::ManualIn, 1);
        assert_eq!(plan_movement(unit, &req, &retired, None), Err(DomainError::NotFound));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: decrements never drive either side below zero, and a
        /// manual movement on a pair moves the sides in opposite directions.
        #[test]
        fn floors_hold_on_both_sides(
            full_stock in 0i64..500,
            empty_stock in 0i64..500,
            q in 1i64..1_000,
            on_full in any::<bool>(),
            movement_type in prop::sample::select(vec![
                MovementType::ManualIn,
                MovementType::ManualOut,
                MovementType::Damage,
            ]),
        ) {
            let unit = UnitId::new();
            let (full, empty) = paired(unit, full_stock, empty_stock);
            let (primary, other) = if on_full { (&full, &empty) } else { (&empty, &full) };

            let req = RegisterMovement::new(primary.id, movement_type, q);
            let plan = plan_movement(unit, &req, primary, Some(other)).unwrap();

            for change in &plan.changes {
                prop_assert!(change.after >= 0);
            }
            if movement_type == MovementType::Damage {
                prop_assert_eq!(plan.changes.len(), 1);
            } else {
                prop_assert_eq!(plan.changes.len(), 2);
                prop_assert!(plan.changes[0].delta() * plan.changes[1].delta() <= 0);
            }
        }
    }
}

//! Backward reconstruction of the daily stock ledger.
//!
//! Current stock is known and so are the window's movements; the opening
//! balance is what makes the balance equation close on current stock:
//!
//! ```text
//! opening = on_hand - entries + exits + sales + damages
//! closing = opening + entries - exits - sales - damages   (== on_hand)
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use depot_core::ProductId;
use depot_products::{PairingIssue, ProductKind, SkuGroup};

use crate::aggregate::AggregatedDelta;
use crate::combine::{CombinedRow, combine_group};

/// Data anomaly attached to a ledger line. The line is still reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ConsistencyWarning {
    /// Current stock is below zero (over-selling upstream).
    NegativeStock { on_hand: i64 },
    /// The product's declared pairing is broken.
    Pairing { issue: PairingIssue },
    /// The balance equation did not close, or a movement total overflowed.
    BalanceMismatch { closing: i64, on_hand: i64 },
}

/// One reconstructed row of the daily stock view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub product_id: ProductId,
    pub name: String,
    pub display_kind: ProductKind,
    pub counterpart_id: Option<ProductId>,
    pub opening: i64,
    pub entries: i64,
    pub exits: i64,
    pub sales: i64,
    pub damages: i64,
    pub closing: i64,
    pub on_hand: i64,
    pub warnings: Vec<ConsistencyWarning>,
}

impl LedgerLine {
    pub fn is_balanced(&self) -> bool {
        self.closing == self.on_hand
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Solve one combined row for its opening balance.
pub fn reconstruct(row: &CombinedRow) -> LedgerLine {
    // Empties are never sold; their exchange is already in entries/exits.
    let sales = match row.display_kind {
        ProductKind::Empty => 0,
        ProductKind::Full | ProductKind::Standalone => row.sales,
    };

    let opening = row
        .on_hand
        .checked_sub(row.entries)
        .and_then(|v| v.checked_add(row.exits))
        .and_then(|v| v.checked_add(sales))
        .and_then(|v| v.checked_add(row.damages));

    let closing = opening.and_then(|o| {
        o.checked_add(row.entries)
            .and_then(|v| v.checked_sub(row.exits))
            .and_then(|v| v.checked_sub(sales))
            .and_then(|v| v.checked_sub(row.damages))
    });

    let mut warnings: Vec<ConsistencyWarning> = Vec::new();
    if row.on_hand < 0 {
        warnings.push(ConsistencyWarning::NegativeStock { on_hand: row.on_hand });
    }
    warnings.extend(
        row.issues
            .iter()
            .cloned()
            .map(|issue| ConsistencyWarning::Pairing { issue }),
    );

    let opening = opening.unwrap_or(row.on_hand);
    let closing = closing.unwrap_or(i64::MIN);
    if closing != row.on_hand || row.overflowed {
        warnings.push(ConsistencyWarning::BalanceMismatch {
            closing,
            on_hand: row.on_hand,
        });
    }

    LedgerLine {
        product_id: row.product_id,
        name: row.name.clone(),
        display_kind: row.display_kind,
        counterpart_id: row.counterpart_id,
        opening,
        entries: row.entries,
        exits: row.exits,
        sales,
        damages: row.damages,
        closing,
        on_hand: row.on_hand,
        warnings,
    }
}

/// Ledger lines for resolved groups, in group order.
pub fn build_daily_ledger(
    groups: &[SkuGroup],
    deltas: &HashMap<ProductId, AggregatedDelta>,
) -> Vec<LedgerLine> {
    groups
        .iter()
        .flat_map(|g| combine_group(g, deltas))
        .map(|row| reconstruct(&row))
        .collect()
}

//! Ledger service: the daily stock view and manual movement dispatch.
//!
//! ## Read path
//!
//! ```text
//! unit + window
//!   ↓
//! 1. Load the active catalog of the unit
//!   ↓
//! 2. Aggregate the window's movements per product (one grouped store query)
//!   ↓
//! 3. Resolve full/empty groups, combine deltas per group
//!   ↓
//! 4. Reconstruct opening balances backwards from current stock
//! ```
//!
//! ## Write path
//!
//! ```text
//! RegisterMovement
//!   ↓
//! 1. Validate the request (manual kind, positive quantity)
//!   ↓
//! 2. Load the product and its declared counterpart
//!   ↓
//! 3. Plan the movement and its versioned stock writes (pure)
//!   ↓
//! 4. Commit atomically; on a version conflict start over from 1
//! ```
//!
//! The service holds no state of its own; it composes a `StockStore`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use depot_core::{DomainError, ProductId, UnitId};
use depot_events::Event;
use depot_inventory::{
    ConsistencyWarning, LedgerLine, MovementEvent, RegisterMovement, StockChange, TimeWindow,
    build_daily_ledger, plan_movement,
};
use depot_products::{PairingIssue, Product, resolve_groups, validate_pairing};

use crate::config::LedgerConfig;
use crate::store::{LedgerSnapshot, MovementCommit, StockStore, StoreError};

/// Error surfaced by the ledger service.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Bad request; retrying the same request cannot succeed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The product does not exist in the unit or is inactive.
    #[error("product not found: {0}")]
    NotFound(ProductId),

    /// The atomic write did not happen; nothing was applied.
    #[error("transaction failed: {reason}")]
    TransactionFailure { reason: String, retryable: bool },

    /// Store failure on the read path.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::TransactionFailure { retryable, .. } => *retryable,
            LedgerError::Store(StoreError::Concurrency(_) | StoreError::Storage(_)) => true,
            _ => false,
        }
    }

    fn from_domain(product_id: ProductId, err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::NotFound => LedgerError::NotFound(product_id),
            DomainError::InvariantViolation(reason) | DomainError::Conflict(reason) => {
                LedgerError::TransactionFailure {
                    reason,
                    retryable: false,
                }
            }
        }
    }

    fn from_commit(product_id: ProductId, err: StoreError) -> Self {
        match err {
            // Kept as-is so the retry loop can recognise it.
            StoreError::Concurrency(_) => LedgerError::Store(err),
            StoreError::NotFound(_) => LedgerError::NotFound(product_id),
            StoreError::Storage(reason) => LedgerError::TransactionFailure {
                reason,
                retryable: true,
            },
            StoreError::Corrupt(reason) => LedgerError::TransactionFailure {
                reason,
                retryable: false,
            },
        }
    }
}

/// Outcome of a committed manual movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerImpact {
    pub event: MovementEvent,
    pub primary: StockChange,
    pub counterpart: Option<StockChange>,
    pub warnings: Vec<ConsistencyWarning>,
}

/// Valuation of one product's current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValuationLine {
    pub product_id: ProductId,
    pub name: String,
    pub on_hand: i64,
    pub unit_price: Decimal,
    pub value: Decimal,
}

/// Valuation of a unit's active catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockValuation {
    pub unit_id: UnitId,
    /// Sum of non-negative stock.
    pub total_quantity: i64,
    pub total_value: Decimal,
    /// Sorted by name, then id.
    pub lines: Vec<ValuationLine>,
}

/// Daily stock ledger over a `StockStore`.
#[derive(Debug)]
pub struct LedgerService<S> {
    store: S,
    config: LedgerConfig,
}

impl<S> LedgerService<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn into_parts(self) -> (S, LedgerConfig) {
        (self.store, self.config)
    }
}

impl<S> LedgerService<S>
where
    S: StockStore,
{
    /// Ledger lines of the unit's active catalog over `window`, ordered by
    /// group name.
    pub fn daily_ledger(&self, unit_id: UnitId, window: &TimeWindow) -> Result<Vec<LedgerLine>, LedgerError> {
        let LedgerSnapshot { products, deltas } = self.store.ledger_snapshot(unit_id, window)?;
        let catalog = same_unit(unit_id, products)?;
        let groups = resolve_groups(&catalog, &self.config.markers);
        let lines = build_daily_ledger(&groups, &deltas);

        let flagged = lines.iter().filter(|l| l.has_warnings()).count();
        if flagged > 0 {
            tracing::warn!(
                unit_id = %unit_id,
                flagged,
                "daily ledger has lines with consistency warnings"
            );
        }
        tracing::info!(
            unit_id = %unit_id,
            start = %window.start(),
            end = %window.end(),
            groups = groups.len(),
            lines = lines.len(),
            "daily ledger built"
        );
        Ok(lines)
    }

    /// Ledger over whole local days, in the configured UTC offset.
    pub fn ledger_for_days(
        &self,
        unit_id: UnitId,
        first_day: NaiveDate,
        last_day: NaiveDate,
    ) -> Result<Vec<LedgerLine>, LedgerError> {
        let offset = self
            .config
            .utc_offset()
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        let window = TimeWindow::local_days(first_day, last_day, offset)
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        self.daily_ledger(unit_id, &window)
    }

    /// Movements of one product inside `window`, oldest first.
    pub fn movement_history(
        &self,
        unit_id: UnitId,
        product_id: ProductId,
        window: &TimeWindow,
    ) -> Result<Vec<MovementEvent>, LedgerError> {
        match self.store.get_product(product_id)? {
            Some(p) if p.unit_id == unit_id => {}
            _ => return Err(LedgerError::NotFound(product_id)),
        }
        Ok(self.store.list_movements(&[product_id], window)?)
    }

    /// Register a manual movement and its paired counterpart effect.
    ///
    /// Version conflicts re-run the whole operation (re-validating against
    /// fresh stock) up to `max_retries` extra times.
    pub fn register_movement(
        &self,
        unit_id: UnitId,
        request: RegisterMovement,
    ) -> Result<LedgerImpact, LedgerError> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_register(unit_id, &request) {
                Err(LedgerError::Store(StoreError::Concurrency(reason))) => {
                    if attempt >= self.config.max_retries {
                        tracing::warn!(
                            unit_id = %unit_id,
                            product_id = %request.product_id,
                            attempts = attempt + 1,
                            "giving up on movement after repeated conflicts"
                        );
                        return Err(LedgerError::TransactionFailure {
                            reason,
                            retryable: true,
                        });
                    }
                    attempt += 1;
                    tracing::warn!(
                        unit_id = %unit_id,
                        product_id = %request.product_id,
                        attempt,
                        reason = %reason,
                        "stock changed concurrently; retrying movement"
                    );
                }
                other => return other,
            }
        }
    }

    fn try_register(&self, unit_id: UnitId, request: &RegisterMovement) -> Result<LedgerImpact, LedgerError> {
        let product_id = request.product_id;

        // 1) Validate
        request
            .validate()
            .map_err(|e| LedgerError::from_domain(product_id, e))?;

        // 2) Load snapshot
        let product = self
            .store
            .get_product(product_id)?
            .filter(|p| p.unit_id == unit_id && p.active)
            .ok_or(LedgerError::NotFound(product_id))?;
        let counterpart = match product.pair_id {
            Some(id) => self.store.get_product(id)?,
            None => None,
        };

        // 3) Plan (pure)
        let plan = plan_movement(unit_id, request, &product, counterpart.as_ref())
            .map_err(|e| LedgerError::from_domain(product_id, e))?;

        // 4) Commit (atomic, optimistic)
        let event = self
            .store
            .commit_movement(MovementCommit::from(&plan))
            .map_err(|e| LedgerError::from_commit(product_id, e))?;

        for warning in &plan.warnings {
            tracing::warn!(
                unit_id = %unit_id,
                product_id = %product_id,
                warning = ?warning,
                "movement applied with a consistency warning"
            );
        }
        tracing::info!(
            unit_id = %unit_id,
            movement_id = %event.id,
            product_id = %product_id,
            event_type = event.event_type(),
            quantity = event.quantity,
            counterpart_id = ?plan.counterpart().map(|c| c.product_id.to_string()),
            "movement registered"
        );

        Ok(LedgerImpact {
            primary: *plan.primary(),
            counterpart: plan.counterpart().copied(),
            warnings: plan.warnings,
            event,
        })
    }

    /// Current stock value of the unit's active catalog.
    pub fn stock_valuation(&self, unit_id: UnitId) -> Result<StockValuation, LedgerError> {
        let mut catalog = self.catalog(unit_id)?;
        catalog.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let lines: Vec<ValuationLine> = catalog
            .into_iter()
            .map(|p| ValuationLine {
                value: p.stock_value(),
                product_id: p.id,
                on_hand: p.on_hand,
                unit_price: p.unit_price,
                name: p.name,
            })
            .collect();

        Ok(StockValuation {
            unit_id,
            total_quantity: lines.iter().map(|l| l.on_hand.max(0)).sum(),
            total_value: lines.iter().map(|l| l.value).sum(),
            lines,
        })
    }

    /// Broken pairing declarations in the unit's active catalog.
    pub fn pairing_report(&self, unit_id: UnitId) -> Result<Vec<PairingIssue>, LedgerError> {
        let issues = validate_pairing(&self.catalog(unit_id)?);
        if !issues.is_empty() {
            tracing::warn!(unit_id = %unit_id, issues = issues.len(), "catalog has broken pairings");
        }
        Ok(issues)
    }

    fn catalog(&self, unit_id: UnitId) -> Result<Vec<Product>, LedgerError> {
        same_unit(unit_id, self.store.list_active_products(Some(unit_id))?)
    }
}

/// Never let another unit's rows into the ledger, even from a faulty store.
fn same_unit(unit_id: UnitId, catalog: Vec<Product>) -> Result<Vec<Product>, LedgerError> {
    if let Some(stray) = catalog.iter().find(|p| p.unit_id != unit_id) {
        return Err(LedgerError::Store(StoreError::Corrupt(format!(
            "catalog for unit {unit_id} contains product {} of unit {}",
            stray.id, stray.unit_id
        ))));
    }
    Ok(catalog)
}

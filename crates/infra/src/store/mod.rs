//! Stock storage boundary.
//!
//! The ledger reads the active catalog and the movement log, and writes one
//! manual movement at a time together with the stock counters it implies.
//! Implementations must make that write all-or-nothing.

pub mod in_memory;
pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use depot_core::{ProductId, UnitId};
use depot_inventory::{AggregatedDelta, MovementEvent, MovementPlan, StockWrite, TimeWindow};
use depot_products::Product;

pub use in_memory::{FaultPoint, InMemoryStockStore};
pub use postgres::PostgresStockStore;

/// Stock store operation error.
///
/// These are infrastructure failures; validation and pairing problems are
/// handled before anything reaches the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A written row changed since it was read.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Backend fault (pool, IO, SQL, injected fault).
    #[error("storage failure: {0}")]
    Storage(String),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// One manual movement and the stock writes committed with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementCommit {
    pub event: MovementEvent,
    pub writes: Vec<StockWrite>,
}

impl From<&MovementPlan> for MovementCommit {
    fn from(plan: &MovementPlan) -> Self {
        Self {
            event: plan.event.clone(),
            writes: plan.writes.clone(),
        }
    }
}

/// Active catalog of a unit together with its movement totals over a window,
/// both read at the same point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub products: Vec<Product>,
    pub deltas: HashMap<ProductId, AggregatedDelta>,
}

/// Unit-scoped catalog and movement storage.
///
/// Implementations must:
/// - scope catalog reads by unit when one is given
/// - treat a window as inclusive on both ends
/// - commit the event insert and every stock write of a `MovementCommit`
///   atomically, failing with `StoreError::Concurrency` when any written row
///   is no longer at its expected version
/// - bump a product's `version` by one on each committed stock write
pub trait StockStore: Send + Sync {
    /// Active products, optionally restricted to one unit.
    fn list_active_products(&self, unit_id: Option<UnitId>) -> Result<Vec<Product>, StoreError>;

    /// Any product by id, active or not.
    fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Movements of the given products inside `window`, oldest first.
    fn list_movements(
        &self,
        product_ids: &[ProductId],
        window: &TimeWindow,
    ) -> Result<Vec<MovementEvent>, StoreError>;

    /// Per-product totals of a unit's movements inside `window`.
    fn aggregate_movements(
        &self,
        unit_id: UnitId,
        window: &TimeWindow,
    ) -> Result<HashMap<ProductId, AggregatedDelta>, StoreError>;

    /// The unit's active catalog and its window totals from one consistent
    /// read. Stock committed after the catalog read must not show up in the
    /// totals, or opening balances come out wrong.
    fn ledger_snapshot(&self, unit_id: UnitId, window: &TimeWindow) -> Result<LedgerSnapshot, StoreError>;

    /// Atomically record a movement and apply its stock writes.
    fn commit_movement(&self, commit: MovementCommit) -> Result<MovementEvent, StoreError>;
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn list_active_products(&self, unit_id: Option<UnitId>) -> Result<Vec<Product>, StoreError> {
        (**self).list_active_products(unit_id)
    }

    fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get_product(product_id)
    }

    fn list_movements(
        &self,
        product_ids: &[ProductId],
        window: &TimeWindow,
    ) -> Result<Vec<MovementEvent>, StoreError> {
        (**self).list_movements(product_ids, window)
    }

    fn aggregate_movements(
        &self,
        unit_id: UnitId,
        window: &TimeWindow,
    ) -> Result<HashMap<ProductId, AggregatedDelta>, StoreError> {
        (**self).aggregate_movements(unit_id, window)
    }

    fn ledger_snapshot(&self, unit_id: UnitId, window: &TimeWindow) -> Result<LedgerSnapshot, StoreError> {
        (**self).ledger_snapshot(unit_id, window)
    }

    fn commit_movement(&self, commit: MovementCommit) -> Result<MovementEvent, StoreError> {
        (**self).commit_movement(commit)
    }
}

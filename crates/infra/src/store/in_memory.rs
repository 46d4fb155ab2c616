use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use depot_core::{ProductId, UnitId};
use depot_events::in_unit;
use depot_inventory::{AggregatedDelta, MovementEvent, TimeWindow, aggregate_by_product};
use depot_products::Product;

use super::{LedgerSnapshot, MovementCommit, StockStore, StoreError};

/// Point inside `commit_movement` where an injected fault fires.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultPoint {
    /// Before anything is staged.
    BeforeMovementInsert,
    /// After the movement is staged, before any stock write.
    AfterMovementInsert,
    /// After every stock write is staged, before publishing.
    AfterStockWrite,
}

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    movements: Vec<MovementEvent>,
}

/// In-memory catalog and movement log.
///
/// Intended for tests/dev. A commit stages its changes and publishes them
/// under a single write lock, so a failure at any point leaves nothing behind.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: RwLock<State>,
    fault: Mutex<Option<FaultPoint>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Result<Self, StoreError> {
        let store = Self::new();
        for p in products {
            store.upsert_product(p)?;
        }
        Ok(store)
    }

    /// Insert or replace a catalog row as-is (seeding, catalog maintenance).
    pub fn upsert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.products.insert(product.id, product);
        Ok(())
    }

    /// Record a movement originated outside the ledger (sales, purchases).
    ///
    /// Only the log is appended; the originating system owns the matching
    /// stock update.
    pub fn seed_movement(&self, event: MovementEvent) -> Result<(), StoreError> {
        check_quantity(&event)?;
        let mut state = self.write()?;
        match state.products.get(&event.product_id) {
            Some(p) if p.unit_id == event.unit_id => {}
            _ => {
                return Err(StoreError::NotFound(format!(
                    "product {} in unit {}",
                    event.product_id, event.unit_id
                )));
            }
        }
        state.movements.push(event);
        Ok(())
    }

    /// Make the next commit fail at `point`. One-shot.
    pub fn fail_next_commit(&self, point: FaultPoint) -> Result<(), StoreError> {
        let mut fault = self
            .fault
            .lock()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        *fault = Some(point);
        Ok(())
    }

    /// Full movement log, in commit order.
    pub fn movements(&self) -> Result<Vec<MovementEvent>, StoreError> {
        Ok(self.read()?.movements.clone())
    }

    /// Overwrite a product's stock outside the ledger, bumping its version.
    ///
    /// Simulates a concurrent writer in tests.
    pub fn force_stock(&self, product_id: ProductId, on_hand: i64) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let product = state
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StoreError::NotFound(format!("product {product_id}")))?;
        product.on_hand = on_hand;
        product.version += 1;
        Ok(product.version)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn trip(&self, point: FaultPoint) -> Result<(), StoreError> {
        let mut fault = self
            .fault
            .lock()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        if *fault == Some(point) {
            *fault = None;
            return Err(StoreError::Storage(format!("injected fault at {point:?}")));
        }
        Ok(())
    }
}

impl State {
    fn active_products(&self, unit_id: Option<UnitId>) -> Vec<Product> {
        let mut products: Vec<Product> = in_unit(self.products.values().filter(|p| p.active), unit_id);
        products.sort_by_key(|p| p.id);
        products
    }

    fn aggregates(&self, unit_id: UnitId, window: &TimeWindow) -> HashMap<ProductId, AggregatedDelta> {
        let known: HashSet<ProductId> = self
            .products
            .values()
            .filter(|p| p.unit_id == unit_id)
            .map(|p| p.id)
            .collect();
        let events = self.movements.iter().filter(|e| e.unit_id == unit_id);
        aggregate_by_product(events, window, &known)
    }
}

/// Mirrors the `quantity > 0` check constraint of the SQL schema.
fn check_quantity(event: &MovementEvent) -> Result<(), StoreError> {
    if event.quantity <= 0 {
        return Err(StoreError::Storage(format!(
            "movement {} violates quantity check: {}",
            event.id, event.quantity
        )));
    }
    Ok(())
}

impl StockStore for InMemoryStockStore {
    fn list_active_products(&self, unit_id: Option<UnitId>) -> Result<Vec<Product>, StoreError> {
        Ok(self.read()?.active_products(unit_id))
    }

    fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&product_id).cloned())
    }

    fn list_movements(
        &self,
        product_ids: &[ProductId],
        window: &TimeWindow,
    ) -> Result<Vec<MovementEvent>, StoreError> {
        let wanted: HashSet<&ProductId> = product_ids.iter().collect();
        let state = self.read()?;
        let mut events: Vec<MovementEvent> = state
            .movements
            .iter()
            .filter(|e| wanted.contains(&e.product_id) && window.contains(e.occurred_at))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.occurred_at, e.id));
        Ok(events)
    }

    fn aggregate_movements(
        &self,
        unit_id: UnitId,
        window: &TimeWindow,
    ) -> Result<HashMap<ProductId, AggregatedDelta>, StoreError> {
        Ok(self.read()?.aggregates(unit_id, window))
    }

    fn ledger_snapshot(&self, unit_id: UnitId, window: &TimeWindow) -> Result<LedgerSnapshot, StoreError> {
        let state = self.read()?;
        Ok(LedgerSnapshot {
            products: state.active_products(Some(unit_id)),
            deltas: state.aggregates(unit_id, window),
        })
    }

    fn commit_movement(&self, commit: MovementCommit) -> Result<MovementEvent, StoreError> {
        let MovementCommit { event, writes } = commit;
        let mut state = self.write()?;

        self.trip(FaultPoint::BeforeMovementInsert)?;
        check_quantity(&event)?;
        match state.products.get(&event.product_id) {
            Some(p) if p.unit_id == event.unit_id => {}
            _ => {
                return Err(StoreError::NotFound(format!(
                    "product {} in unit {}",
                    event.product_id, event.unit_id
                )));
            }
        }
        let staged_event = event;
        self.trip(FaultPoint::AfterMovementInsert)?;

        let mut staged: Vec<Product> = Vec::with_capacity(writes.len());
        for w in &writes {
            let mut product = state
                .products
                .get(&w.product_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("product {}", w.product_id)))?;
            if product.unit_id != staged_event.unit_id || !product.active {
                return Err(StoreError::NotFound(format!(
                    "active product {} in unit {}",
                    w.product_id, staged_event.unit_id
                )));
            }
            w.expected_version
                .check(product.version)
                .map_err(|e| StoreError::Concurrency(format!("product {}: {e}", w.product_id)))?;
            product.on_hand = w.new_on_hand;
            product.version += 1;
            staged.push(product);
        }
        self.trip(FaultPoint::AfterStockWrite)?;

        state.movements.push(staged_event.clone());
        for product in staged {
            state.products.insert(product.id, product);
        }
        Ok(staged_event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use depot_core::{ExpectedVersion, MovementId};
    use depot_inventory::{MovementType, StockWrite};
    use depot_products::ContainerType;

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 2, 23, 59, 59).unwrap(),
        )
        .unwrap()
    }

    fn event(unit: UnitId, product: ProductId, t: MovementType, q: i64) -> MovementEvent {
        MovementEvent {
            id: MovementId::new(),
            unit_id: unit,
            product_id: product,
            movement_type: t,
            quantity: q,
            occurred_at: Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
            note: None,
        }
    }

    fn commit_for(p: &Product, new_on_hand: i64) -> MovementCommit {
        MovementCommit {
            event: event(p.unit_id, p.id, MovementType::ManualIn, 1),
            writes: vec![StockWrite {
                product_id: p.id,
                expected_version: ExpectedVersion(p.version),
                new_on_hand,
            }],
        }
    }

    #[test]
    fn catalog_is_unit_scoped_and_active_only() {
        let a = UnitId::new();
        let b = UnitId::new();
        let store = InMemoryStockStore::with_products([
            Product::new(a, "P13 Cheio", Some(ContainerType::Full)),
            Product::new(a, "P45 Cheio", Some(ContainerType::Full)).inactive(),
            Product::new(b, "Agua 20L", None),
        ])
        .unwrap();

        assert_eq!(store.list_active_products(Some(a)).unwrap().len(), 1);
        assert_eq!(store.list_active_products(None).unwrap().len(), 2);
    }

    #[test]
    fn commit_bumps_version_and_appends_event() {
        let unit = UnitId::new();
        let p = Product::new(unit, "Agua 20L", None).with_stock(3);
        let store = InMemoryStockStore::with_products([p.clone()]).unwrap();

        store.commit_movement(commit_for(&p, 4)).unwrap();

        let stored = store.get_product(p.id).unwrap().unwrap();
        assert_eq!(stored.on_hand, 4);
        assert_eq!(stored.version, p.version + 1);
        assert_eq!(store.movements().unwrap().len(), 1);
    }

    #[test]
    fn stale_version_is_a_concurrency_error() {
        let unit = UnitId::new();
        let p = Product::new(unit, "Agua 20L", None).with_stock(3);
        let store = InMemoryStockStore::with_products([p.clone()]).unwrap();
        store.force_stock(p.id, 10).unwrap();

        let err = store.commit_movement(commit_for(&p, 4)).unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert_eq!(store.get_product(p.id).unwrap().unwrap().on_hand, 10);
        assert!(store.movements().unwrap().is_empty());
    }

    #[test]
    fn every_fault_point_leaves_nothing_visible() {
        for point in [
            FaultPoint::BeforeMovementInsert,
            FaultPoint::AfterMovementInsert,
            FaultPoint::AfterStockWrite,
        ] {
            let unit = UnitId::new();
            let p = Product::new(unit, "Agua 20L", None).with_stock(3);
            let store = InMemoryStockStore::with_products([p.clone()]).unwrap();
            store.fail_next_commit(point).unwrap();

            assert!(matches!(store.commit_movement(commit_for(&p, 4)), Err(StoreError::Storage(_))));
            assert_eq!(store.get_product(p.id).unwrap().unwrap(), p);
            assert!(store.movements().unwrap().is_empty());

            // One-shot: the next commit goes through.
            store.commit_movement(commit_for(&p, 4)).unwrap();
        }
    }

    #[test]
    fn aggregation_is_unit_scoped_and_windowed() {
        let a = UnitId::new();
        let b = UnitId::new();
        let pa = Product::new(a, "P13 Cheio", Some(ContainerType::Full));
        let pb = Product::new(b, "P13 Cheio", Some(ContainerType::Full));
        let store = InMemoryStockStore::with_products([pa.clone(), pb.clone()]).unwrap();

        store.seed_movement(event(a, pa.id, MovementType::Sale, 4)).unwrap();
        store.seed_movement(event(b, pb.id, MovementType::Sale, 9)).unwrap();
        let mut late = event(a, pa.id, MovementType::Sale, 100);
        late.occurred_at = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();
        store.seed_movement(late).unwrap();

        let totals = store.aggregate_movements(a, &window()).unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[&pa.id].sales, 4);

        assert_eq!(store.list_movements(&[pa.id], &window()).unwrap().len(), 1);
    }

    #[test]
    fn snapshot_pairs_catalog_with_window_totals() {
        let a = UnitId::new();
        let b = UnitId::new();
        let pa = Product::new(a, "P13 Cheio", Some(ContainerType::Full)).with_stock(7);
        let gone = Product::new(a, "P45 Cheio", Some(ContainerType::Full)).inactive();
        let pb = Product::new(b, "P13 Cheio", Some(ContainerType::Full));
        let store = InMemoryStockStore::with_products([pa.clone(), gone, pb.clone()]).unwrap();
        store.seed_movement(event(a, pa.id, MovementType::Purchase, 3)).unwrap();
        store.seed_movement(event(b, pb.id, MovementType::Purchase, 5)).unwrap();

        let snapshot = store.ledger_snapshot(a, &window()).unwrap();
        assert_eq!(snapshot.products, vec![pa.clone()]);
        assert_eq!(snapshot.deltas.len(), 1);
        assert_eq!(snapshot.deltas[&pa.id].purchases, 3);
    }

    #[test]
    fn commit_against_inactive_product_is_not_found() {
        let unit = UnitId::new();
        let p = Product::new(unit, "Agua 20L", None).with_stock(3);
        let store = InMemoryStockStore::with_products([p.clone()]).unwrap();
        store.upsert_product(p.clone().inactive()).unwrap();

        let err = store.commit_movement(commit_for(&p, 4)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.movements().unwrap().is_empty());
    }

    #[test]
    fn non_positive_quantities_are_rejected_like_the_schema_does() {
        let unit = UnitId::new();
        let p = Product::new(unit, "Agua 20L", None);
        let store = InMemoryStockStore::with_products([p.clone()]).unwrap();

        for quantity in [0, -4] {
            let err = store
                .seed_movement(event(unit, p.id, MovementType::Sale, quantity))
                .unwrap_err();
            assert!(matches!(err, StoreError::Storage(_)));
        }
        assert!(store.movements().unwrap().is_empty());
    }

    #[test]
    fn seeding_rejects_foreign_products() {
        let store = InMemoryStockStore::new();
        let err = store
            .seed_movement(event(UnitId::new(), ProductId::new(), MovementType::Sale, 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}

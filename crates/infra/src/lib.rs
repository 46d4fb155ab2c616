//! Infrastructure layer: stock storage, configuration and the ledger service.

pub mod config;
pub mod movement_dispatcher;
pub mod store;


pub use config::{DatabaseConfig, DepotConfig, LedgerConfig};
pub use movement_dispatcher::{LedgerError, LedgerImpact, LedgerService, StockValuation, ValuationLine};
pub use store::{
    FaultPoint, InMemoryStockStore, LedgerSnapshot, MovementCommit, PostgresStockStore, StockStore, StoreError,
};

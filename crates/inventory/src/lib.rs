//! Inventory domain module: the daily stock ledger.
//!
//! Read side: aggregate the movements of a window, combine them per container
//! pair and solve the balance equation backwards from current stock.
//! Write side: plan a manual movement and the stock writes it implies.
//!
//! Pure, deterministic logic (no IO, no storage).

pub mod adjustment;
pub mod aggregate;
pub mod combine;
pub mod ledger;
pub mod movement;
pub mod window;

pub use adjustment::{MovementPlan, RegisterMovement, StockChange, StockWrite, plan_movement};
pub use aggregate::{AggregatedDelta, aggregate, aggregate_by_product};
pub use combine::{CombinedRow, combine_group};
pub use ledger::{ConsistencyWarning, LedgerLine, build_daily_ledger, reconstruct};
pub use movement::{MovementEvent, MovementType};
pub use window::TimeWindow;

//! Stock facts shared between the catalog, the ledger and the stores.

pub mod event;
pub mod unit;

pub use event::Event;
pub use unit::{UnitScoped, in_unit};

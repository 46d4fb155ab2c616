//! `depot-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the catalog, the
//! stock ledger and the storage adapters (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{MovementId, ProductId, UnitId};
pub use version::ExpectedVersion;

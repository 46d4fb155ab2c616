//! Products domain module: the SKU catalog as seen by the stock ledger.
//!
//! Holds the product record, the full/empty container pairing model and the
//! resolver that groups a catalog into display groups. Pure logic, no IO.

pub mod names;
pub mod pairing;
pub mod product;

pub use names::{NameMarkers, normalize_name};
pub use pairing::{
    GroupMembers, PairingIssue, SkuGroup, check_counterpart, resolve_groups, validate_pairing,
};
pub use product::{ContainerType, Pairing, Product, ProductKind};

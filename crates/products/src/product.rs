use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use depot_core::{ProductId, UnitId};
use depot_events::UnitScoped;

/// Container side of a returnable product, as stored in `container_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Full,
    Empty,
}

impl ContainerType {
    /// Parse the storage attribute. Anything other than "full"/"empty" means the
    /// product is not a container.
    pub fn from_attr(attr: Option<&str>) -> Option<Self> {
        match attr.map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("full") => Some(ContainerType::Full),
            Some(s) if s.eq_ignore_ascii_case("empty") => Some(ContainerType::Empty),
            _ => None,
        }
    }

    pub fn as_attr(self) -> &'static str {
        match self {
            ContainerType::Full => "full",
            ContainerType::Empty => "empty",
        }
    }
}

/// Derived classification of a SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Full,
    Empty,
    Standalone,
}

/// Explicit pairing of a SKU with its counterpart container.
///
/// `FullOf(e)` reads "this SKU is the full side, `e` is its empty".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pairing {
    Standalone,
    FullOf(ProductId),
    EmptyOf(ProductId),
}

/// A stock-keeping unit of the catalog.
///
/// `on_hand` is authoritative and is only ever written through a committed
/// stock movement; `version` increases by one with each such write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub unit_id: UnitId,
    pub name: String,
    pub container: Option<ContainerType>,
    pub pair_id: Option<ProductId>,
    pub on_hand: i64,
    pub unit_price: Decimal,
    pub active: bool,
    pub version: u64,
}

impl Product {
    /// A new active, unpaired product with no stock.
    pub fn new(unit_id: UnitId, name: impl Into<String>, container: Option<ContainerType>) -> Self {
        Self {
            id: ProductId::new(),
            unit_id,
            name: name.into(),
            container,
            pair_id: None,
            on_hand: 0,
            unit_price: Decimal::ZERO,
            active: true,
            version: 0,
        }
    }

    pub fn with_id(mut self, id: ProductId) -> Self {
        self.id = id;
        self
    }

    pub fn with_stock(mut self, on_hand: i64) -> Self {
        self.on_hand = on_hand;
        self
    }

    pub fn with_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = unit_price;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Link a full and an empty product to each other (symmetric).
    pub fn pair(full: &mut Product, empty: &mut Product) {
        full.pair_id = Some(empty.id);
        empty.pair_id = Some(full.id);
    }

    pub fn kind(&self) -> ProductKind {
        match self.container {
            Some(ContainerType::Full) => ProductKind::Full,
            Some(ContainerType::Empty) => ProductKind::Empty,
            None => ProductKind::Standalone,
        }
    }

    /// Declared pairing. A `pair_id` on a non-container product is not a
    /// pairing; the resolver reports it as a kind mismatch.
    pub fn pairing(&self) -> Pairing {
        match (self.container, self.pair_id) {
            (Some(ContainerType::Full), Some(p)) => Pairing::FullOf(p),
            (Some(ContainerType::Empty), Some(p)) => Pairing::EmptyOf(p),
            _ => Pairing::Standalone,
        }
    }

    /// Valuation of the current stock. Negative stock is valued at zero.
    pub fn stock_value(&self) -> Decimal {
        Decimal::from(self.on_hand.max(0)) * self.unit_price
    }
}

impl UnitScoped for Product {
    fn unit_id(&self) -> UnitId {
        self.unit_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_attr_is_case_insensitive_and_lenient() {
        assert_eq!(ContainerType::from_attr(Some("full")), Some(ContainerType::Full));
        assert_eq!(ContainerType::from_attr(Some(" EMPTY ")), Some(ContainerType::Empty));
        assert_eq!(ContainerType::from_attr(Some("refill")), None);
        assert_eq!(ContainerType::from_attr(None), None);
    }

    #[test]
    fn pairing_follows_container_and_pair_id() {
        let unit = UnitId::new();
        let mut full = Product::new(unit, "P13 Full", Some(ContainerType::Full));
        let mut empty = Product::new(unit, "P13 Empty", Some(ContainerType::Empty));
        assert_eq!(full.pairing(), Pairing::Standalone);

        Product::pair(&mut full, &mut empty);
        assert_eq!(full.pairing(), Pairing::FullOf(empty.id));
        assert_eq!(empty.pairing(), Pairing::EmptyOf(full.id));
    }

    #[test]
    fn pair_id_on_plain_product_is_not_a_pairing() {
        let unit = UnitId::new();
        let mut water = Product::new(unit, "Water 20L", None);
        water.pair_id = Some(ProductId::new());
        assert_eq!(water.kind(), ProductKind::Standalone);
        assert_eq!(water.pairing(), Pairing::Standalone);
    }

    #[test]
    fn stock_value_ignores_negative_stock() {
        let unit = UnitId::new();
        let p = Product::new(unit, "P45", None)
            .with_stock(3)
            .with_price(Decimal::new(1250, 1));
        assert_eq!(p.stock_value(), Decimal::new(3750, 1));

        let negative = p.clone().with_stock(-2);
        assert_eq!(negative.stock_value(), Decimal::ZERO);
    }
}

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{DomainError, MovementId, ProductId, UnitId};
use depot_events::{Event, UnitScoped};

/// Kind of stock movement.
///
/// `Sale` and `Purchase` are recorded by the order and purchasing systems; the
/// ledger only reads them. The manual kinds are registered through the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Sale,
    Purchase,
    ManualIn,
    ManualOut,
    Damage,
}

impl MovementType {
    pub const ALL: [MovementType; 5] = [
        MovementType::Sale,
        MovementType::Purchase,
        MovementType::ManualIn,
        MovementType::ManualOut,
        MovementType::Damage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Sale => "sale",
            MovementType::Purchase => "purchase",
            MovementType::ManualIn => "manual_in",
            MovementType::ManualOut => "manual_out",
            MovementType::Damage => "damage",
        }
    }

    /// Whether the movement may be registered by hand.
    pub fn is_manual(self) -> bool {
        matches!(
            self,
            MovementType::ManualIn | MovementType::ManualOut | MovementType::Damage
        )
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| DomainError::validation(format!("unknown movement type: {s}")))
    }
}

/// A recorded stock movement. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEvent {
    pub id: MovementId,
    pub unit_id: UnitId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    /// Always positive; direction comes from `movement_type`.
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl Event for MovementEvent {
    fn event_type(&self) -> &'static str {
        match self.movement_type {
            MovementType::Sale => "inventory.movement.sale",
            MovementType::Purchase => "inventory.movement.purchase",
            MovementType::ManualIn => "inventory.movement.manual_in",
            MovementType::ManualOut => "inventory.movement.manual_out",
            MovementType::Damage => "inventory.movement.damage",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl UnitScoped for MovementEvent {
    fn unit_id(&self) -> UnitId {
        self.unit_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_type_text_round_trips() {
        for t in MovementType::ALL {
            assert_eq!(t.as_str().parse::<MovementType>().unwrap(), t);
        }
        assert!("refill".parse::<MovementType>().is_err());
    }

    #[test]
    fn only_manual_kinds_are_manual() {
        let manual: Vec<_> = MovementType::ALL.into_iter().filter(|t| t.is_manual()).collect();
        assert_eq!(
            manual,
            vec![MovementType::ManualIn, MovementType::ManualOut, MovementType::Damage]
        );
    }

    #[test]
    fn serde_matches_storage_names() {
        let json = serde_json::to_string(&MovementType::ManualOut).unwrap();
        assert_eq!(json, "\"manual_out\"");
    }

    #[test]
    fn event_type_follows_movement_type() {
        let event = MovementEvent {
            id: MovementId::new(),
            unit_id: UnitId::new(),
            product_id: ProductId::new(),
            movement_type: MovementType::Damage,
            quantity: 2,
            occurred_at: Utc::now(),
            note: None,
        };
        assert_eq!(event.event_type(), "inventory.movement.damage");
        assert_eq!(event.version(), 1);
        assert_eq!(Event::occurred_at(&event), event.occurred_at);
    }
}

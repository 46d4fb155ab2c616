//! Grouping of the catalog into full/empty pairs and singletons.
//!
//! Declared `pair_id` links are authoritative. Products without a declared
//! pair are grouped by normalized name, which keeps legacy catalogs (where the
//! pairing only lives in the names) readable.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use depot_core::ProductId;

use crate::names::{NameMarkers, normalize_name};
use crate::product::{Pairing, Product, ProductKind};

/// A broken pairing declaration. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum PairingIssue {
    /// `pair_id` points at a product that is missing or inactive.
    MissingCounterpart { product_id: ProductId, declared: ProductId },
    /// The counterpart exists but does not point back.
    AsymmetricPair {
        product_id: ProductId,
        declared: ProductId,
        counterpart_points_to: Option<ProductId>,
    },
    /// The two sides are not one full and one empty container.
    KindMismatch {
        product_id: ProductId,
        declared: ProductId,
        kind: ProductKind,
        counterpart_kind: ProductKind,
    },
}

impl PairingIssue {
    pub fn product_id(&self) -> ProductId {
        match self {
            PairingIssue::MissingCounterpart { product_id, .. }
            | PairingIssue::AsymmetricPair { product_id, .. }
            | PairingIssue::KindMismatch { product_id, .. } => *product_id,
        }
    }
}

/// Members of a resolved group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMembers {
    Pair { full: Product, empty: Product },
    Singleton(Product),
}

/// One display group of the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuGroup {
    /// Normalized base name (sort key).
    pub key: String,
    pub members: GroupMembers,
    /// Pairing problems of the group's members.
    pub issues: Vec<PairingIssue>,
}

impl SkuGroup {
    fn lead_id(&self) -> ProductId {
        match &self.members {
            GroupMembers::Pair { full, .. } => full.id,
            GroupMembers::Singleton(p) => p.id,
        }
    }

    pub fn is_pair(&self) -> bool {
        matches!(self.members, GroupMembers::Pair { .. })
    }
}

/// Check every declared `pair_id` of the active catalog.
pub fn validate_pairing(catalog: &[Product]) -> Vec<PairingIssue> {
    let active: HashMap<ProductId, &Product> =
        catalog.iter().filter(|p| p.active).map(|p| (p.id, p)).collect();

    let mut ids: Vec<&ProductId> = active.keys().collect();
    ids.sort();

    ids.into_iter()
        .filter_map(|id| diagnose(active[id], &active))
        .collect()
}

fn diagnose(product: &Product, active: &HashMap<ProductId, &Product>) -> Option<PairingIssue> {
    let counterpart = product.pair_id.and_then(|id| active.get(&id).copied());
    check_counterpart(product, counterpart)
}

/// Check one product's declared pairing against the product its `pair_id`
/// resolved to (`None` when the lookup found nothing).
///
/// An inactive counterpart, or one whose id is not the declared one, counts
/// as missing.
pub fn check_counterpart(product: &Product, counterpart: Option<&Product>) -> Option<PairingIssue> {
    let declared = product.pair_id?;
    let Some(counterpart) = counterpart.filter(|c| c.active && c.id == declared) else {
        return Some(PairingIssue::MissingCounterpart {
            product_id: product.id,
            declared,
        });
    };

    if counterpart.pair_id != Some(product.id) {
        return Some(PairingIssue::AsymmetricPair {
            product_id: product.id,
            declared,
            counterpart_points_to: counterpart.pair_id,
        });
    }

    let complementary = matches!(
        (product.kind(), counterpart.kind()),
        (ProductKind::Full, ProductKind::Empty) | (ProductKind::Empty, ProductKind::Full)
    );
    if !complementary {
        return Some(PairingIssue::KindMismatch {
            product_id: product.id,
            declared,
            kind: product.kind(),
            counterpart_kind: counterpart.kind(),
        });
    }

    None
}

#[derive(Default)]
struct NameSlots {
    full: Vec<Product>,
    empty: Vec<Product>,
    standalone: Vec<Product>,
}

/// Resolve the active catalog into display groups sorted by normalized name.
///
/// Inactive products are ignored. The result does not depend on catalog order.
pub fn resolve_groups(catalog: &[Product], markers: &NameMarkers) -> Vec<SkuGroup> {
    let mut active: Vec<&Product> = catalog.iter().filter(|p| p.active).collect();
    active.sort_by_key(|p| p.id);

    let by_id: HashMap<ProductId, &Product> = active.iter().map(|p| (p.id, *p)).collect();
    let mut issues: HashMap<ProductId, PairingIssue> = HashMap::new();
    let mut claimed: HashSet<ProductId> = HashSet::new();
    let mut groups: Vec<SkuGroup> = Vec::new();
    // Keys already taken by container groups; standalones sharing one are shadowed.
    let mut container_keys: HashSet<String> = HashSet::new();

    // Declared pairs.
    for product in &active {
        if product.pair_id.is_none() {
            continue;
        }
        if let Some(issue) = diagnose(product, &by_id) {
            issues.insert(product.id, issue);
            continue;
        }
        // diagnose() guarantees the counterpart exists and is the empty side.
        let Pairing::FullOf(empty_id) = product.pairing() else {
            continue;
        };
        if claimed.contains(&product.id) {
            continue;
        }
        let Some(empty) = by_id.get(&empty_id) else {
            continue;
        };
        claimed.insert(product.id);
        claimed.insert(empty.id);
        let key = normalize_name(&product.name, markers);
        container_keys.insert(key.clone());
        groups.push(SkuGroup {
            key,
            members: GroupMembers::Pair {
                full: (*product).clone(),
                empty: (*empty).clone(),
            },
            issues: vec![],
        });
    }

    // Broken declarations degrade to singletons instead of being name-matched.
    for product in &active {
        if let Some(issue) = issues.remove(&product.id) {
            claimed.insert(product.id);
            let key = normalize_name(&product.name, markers);
            if product.kind() != ProductKind::Standalone {
                container_keys.insert(key.clone());
            }
            groups.push(SkuGroup {
                key,
                members: GroupMembers::Singleton((*product).clone()),
                issues: vec![issue],
            });
        }
    }

    // Name fallback for everything else.
    let mut by_name: BTreeMap<String, NameSlots> = BTreeMap::new();
    for product in active.iter().filter(|p| !claimed.contains(&p.id)) {
        let slots = by_name.entry(normalize_name(&product.name, markers)).or_default();
        match product.kind() {
            ProductKind::Full => slots.full.push((*product).clone()),
            ProductKind::Empty => slots.empty.push((*product).clone()),
            ProductKind::Standalone => slots.standalone.push((*product).clone()),
        }
    }

    for (key, slots) in by_name {
        let NameSlots { full, empty, standalone } = slots;
        let has_containers = !full.is_empty() || !empty.is_empty() || container_keys.contains(&key);
        let mut fulls = full.into_iter();
        let mut empties = empty.into_iter();

        match (fulls.next(), empties.next()) {
            (Some(full), Some(empty)) => groups.push(SkuGroup {
                key: key.clone(),
                members: GroupMembers::Pair { full, empty },
                issues: vec![],
            }),
            (lone_full, lone_empty) => {
                for product in lone_full.into_iter().chain(lone_empty) {
                    groups.push(SkuGroup {
                        key: key.clone(),
                        members: GroupMembers::Singleton(product),
                        issues: vec![],
                    });
                }
            }
        }

        for product in fulls.chain(empties) {
            groups.push(SkuGroup {
                key: key.clone(),
                members: GroupMembers::Singleton(product),
                issues: vec![],
            });
        }

        if has_containers {
            for ignored in &standalone {
                tracing::debug!(
                    product_id = %ignored.id,
                    key = %key,
                    "standalone product shadowed by container products with the same name"
                );
            }
        } else {
            for product in standalone {
                groups.push(SkuGroup {
                    key: key.clone(),
                    members: GroupMembers::Singleton(product),
                    issues: vec![],
                });
            }
        }
    }

    groups.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.lead_id().cmp(&b.lead_id())));
    groups
}

use depot_core::UnitId;

/// Records partitioned by business unit.
///
/// The unit is an opaque partition key: the core never interprets it beyond
/// equality, and it is always passed explicitly rather than read from ambient
/// state.
pub trait UnitScoped {
    fn unit_id(&self) -> UnitId;
}

/// Keep only the records of `unit`, or everything when no unit is given.
pub fn in_unit<'a, T>(records: impl IntoIterator<Item = &'a T>, unit: Option<UnitId>) -> Vec<T>
where
    T: UnitScoped + Clone + 'a,
{
    records
        .into_iter()
        .filter(|r| unit.is_none_or(|u| r.unit_id() == u))
        .cloned()
        .collect()
}

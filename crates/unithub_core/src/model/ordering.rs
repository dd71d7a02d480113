//! Declarations for entities with a managed position inside a scope.
//!
//! # Responsibility
//! - Declare, per ordered table, which columns partition the ordering space.
//! - Carry scope values between repositories and callers.
//!
//! # Invariants
//! - Within one scope, `sort_order` values are `1..=N` with no gaps or
//!   duplicates once a repository operation commits.
//! - Ties are broken by row id, the stable creation key.
//! - Scope declarations are static; nothing is discovered at runtime.

use serde::{Deserialize, Serialize};

/// Static description of one ordered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderedTable {
    /// SQL table name.
    pub table: &'static str,
    /// Integer foreign-key columns partitioning the order. Empty = one global order.
    pub scope_columns: &'static [&'static str],
}

impl OrderedTable {
    pub fn is_global(self) -> bool {
        self.scope_columns.is_empty()
    }
}

/// Platoons share one unit-wide order.
pub const PLATOONS: OrderedTable = OrderedTable {
    table: "platoons",
    scope_columns: &[],
};

/// Sections are ordered per platoon; unattached sections share the null scope.
pub const SECTIONS: OrderedTable = OrderedTable {
    table: "sections",
    scope_columns: &["platoon_id"],
};

/// Slots are ordered per section.
pub const SECTION_SLOTS: OrderedTable = OrderedTable {
    table: "section_slots",
    scope_columns: &["section_id"],
};

/// Criteria are ordered per qualification.
pub const QUALIFICATION_CRITERIA: OrderedTable = OrderedTable {
    table: "qualification_criteria",
    scope_columns: &["qualification_id"],
};

/// Sign-ups are ordered per event.
pub const EVENT_ASSIGNMENTS: OrderedTable = OrderedTable {
    table: "event_assignments",
    scope_columns: &["event_id"],
};

/// Every ordered table known to the core.
pub const ORDERED_TABLES: &[OrderedTable] = &[
    PLATOONS,
    SECTIONS,
    SECTION_SLOTS,
    QUALIFICATION_CRITERIA,
    EVENT_ASSIGNMENTS,
];

/// Values of an entity's scope columns, in declaration order.
///
/// `None` values are significant: all rows whose scope column is null form
/// one scope of their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ScopeKey(pub Vec<Option<i64>>);

impl ScopeKey {
    /// Scope of a globally ordered table.
    pub fn global() -> Self {
        Self(Vec::new())
    }

    /// Scope with one non-null value.
    pub fn of(value: i64) -> Self {
        Self(vec![Some(value)])
    }

    /// Scope with one nullable value.
    pub fn nullable(value: Option<i64>) -> Self {
        Self(vec![value])
    }

    pub fn values(&self) -> &[Option<i64>] {
        &self.0
    }

    /// Whether this key fits the table declaration.
    pub fn matches(&self, table: OrderedTable) -> bool {
        self.0.len() == table.scope_columns.len()
    }
}

/// One positioned row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedItem {
    pub id: i64,
    pub sort_order: i64,
}

/// Returns whether `orders` is exactly `1..=N` in sequence.
pub fn is_contiguous(orders: &[i64]) -> bool {
    orders
        .iter()
        .enumerate()
        .all(|(index, order)| *order == index as i64 + 1)
}

#[cfg(test)]
mod tests {
    use super::{is_contiguous, ScopeKey, PLATOONS, SECTIONS};

    #[test]
    fn scope_key_arity_must_match_declaration() {
        assert!(ScopeKey::global().matches(PLATOONS));
        assert!(!ScopeKey::global().matches(SECTIONS));
        assert!(ScopeKey::nullable(None).matches(SECTIONS));
    }

    #[test]
    fn contiguity_requires_one_based_sequence() {
        assert!(is_contiguous(&[]));
        assert!(is_contiguous(&[1, 2, 3]));
        assert!(!is_contiguous(&[0, 1, 2]));
        assert!(!is_contiguous(&[1, 1, 2]));
        assert!(!is_contiguous(&[1, 3]));
    }
}

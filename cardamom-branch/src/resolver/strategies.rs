//! Legacy identifier matching strategies.
//!
//! Tenant records were tagged with different branch fields over the years.
//! Each strategy names one `(field, transform)` shape; the resolver walks the
//! table in order, newest convention first, so new shapes can be added here
//! without touching the resolution control flow.

use crate::domain::BranchId;
use crate::ports::FieldFilter;

/// Transform from a branch id to the value a legacy field would hold.
pub type ValueTransform = fn(&BranchId) -> String;

/// One field-matching rule used to determine branch ownership of a record.
#[derive(Debug, Clone, Copy)]
pub struct FieldStrategy {
    /// Record field the rule inspects.
    pub field: &'static str,
    /// How the branch id appears in that field.
    pub transform: ValueTransform,
}

impl FieldStrategy {
    /// The query filter this strategy produces for a branch.
    #[must_use]
    pub fn filter(&self, branch_id: &BranchId) -> FieldFilter {
        FieldFilter::new(self.field, (self.transform)(branch_id))
    }
}

fn raw(id: &BranchId) -> String {
    id.as_str().to_string()
}

fn location_prefixed(id: &BranchId) -> String {
    format!("location_{id}")
}

/// Matching strategies in priority order, mirroring the chronological order
/// in which the tagging conventions were introduced.
pub const LEGACY_STRATEGIES: [FieldStrategy; 4] = [
    FieldStrategy {
        field: "branch_id",
        transform: raw,
    },
    FieldStrategy {
        field: "branch",
        transform: raw,
    },
    FieldStrategy {
        field: "location_id",
        transform: location_prefixed,
    },
    FieldStrategy {
        field: "location_id",
        transform: raw,
    },
];

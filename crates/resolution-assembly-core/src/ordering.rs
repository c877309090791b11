use std::cmp::Ordering;

use crate::model::ChangeRecord;

/// Human-readable form of the change ordering, reported alongside assembly output.
#[must_use]
pub fn ordering_rules() -> Vec<String> {
    vec![
        "effective_date asc".to_string(),
        "issuer_year asc".to_string(),
        "issuer_number asc".to_string(),
        "issuer_initial asc".to_string(),
        "change_id asc".to_string(),
    ]
}

/// Total order over changes: effective date, then issuing resolution, then change id.
#[must_use]
pub fn compare_changes(a: &ChangeRecord, b: &ChangeRecord) -> Ordering {
    a.context
        .date
        .cmp(&b.context.date)
        .then_with(|| a.context.issuer.cmp(&b.context.issuer))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_changes(changes: &mut [ChangeRecord]) {
    changes.sort_by(compare_changes);
}

#[must_use]
pub fn sorted_changes(changes: &[ChangeRecord]) -> Vec<ChangeRecord> {
    let mut sorted = changes.to_vec();
    sort_changes(&mut sorted);
    sorted
}

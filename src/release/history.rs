//! Release history bounding: at most `max_history` revisions
//! retained, never fewer than 2 so a corrective rollback target always
//! exists, and `keepFailHistory` handling.

use super::store::{ReleaseRevision, RevisionStatus};

pub const MIN_HISTORY: usize = 2;

/// Decides which revisions to keep after a new one is added.
///
/// Open Question #1 resolution (SPEC_FULL.md): a failed revision kept
/// alive by `keep_fail_history` still counts against `max_history` —
/// the cap is the cap. If honoring that retention would push history
/// over the cap, the oldest *non-failed* revision is trimmed first so
/// the operator-visible failure stays inspectable.
pub fn trim(
    mut revisions: Vec<ReleaseRevision>,
    max_history: usize,
    keep_fail_history: bool,
) -> (Vec<ReleaseRevision>, Vec<u32>) {
    let max_history = max_history.max(MIN_HISTORY);
    revisions.sort_by_key(|r| r.revision);

    if revisions.len() <= max_history {
        return (revisions, Vec::new());
    }

    let mut to_drop = Vec::new();
    while revisions.len() > max_history {
        let drop_at = if keep_fail_history {
            revisions
                .iter()
                .position(|r| r.status != RevisionStatus::Failed)
        } else {
            Some(0)
        };

        let Some(idx) = drop_at else {
            // Every remaining revision is a kept failure; stop trimming
            // rather than discard the last visible failure.
            break;
        };
        let dropped = revisions.remove(idx);
        to_drop.push(dropped.revision);
    }

    (revisions, to_drop)
}

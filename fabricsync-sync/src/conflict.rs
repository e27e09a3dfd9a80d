//! Conflict Detector: timestamp ordering of GUI and Git edits.
//!
//! Errs towards flagging. A false positive costs an operator decision; a
//! false negative loses an edit.

use chrono::{DateTime, Utc};

/// `true` when both the draft and the Git file changed after the last sync.
///
/// - No draft timestamp: nothing to push, never a conflict.
/// - No Git timestamp: the file does not exist, so the push creates it.
/// - No `last_file_sync` while both sides exist: nothing proves the two
///   edits were ordered, so it is flagged.
pub fn detect_conflict(
    draft_updated: Option<DateTime<Utc>>,
    git_updated: Option<DateTime<Utc>>,
    last_file_sync: Option<DateTime<Utc>>,
) -> bool {
    let (Some(draft), Some(git)) = (draft_updated, git_updated) else {
        return false;
    };
    match last_file_sync {
        None => true,
        Some(last) => draft > last && git > last,
    }
}

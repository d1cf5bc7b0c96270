//! Helpers for reshaping a finished run's changes
//!
//! Meant for `Runner::finish_with` transforms, e.g. exposing only the keys a
//! caller cares about under the names it expects.

use crate::runner::Changes;

/// Rename keys according to `renames`, applied in order
///
/// Missing keys are skipped. A rename onto an existing key replaces it.
pub fn rename_keys(mut changes: Changes, renames: &[(&str, &str)]) -> Changes {
    for (from, to) in renames {
        if let Some(value) = changes.remove(*from) {
            changes.insert((*to).to_string(), value);
        }
    }
    changes
}

/// Drop entries whose value is `null`
pub fn compact(mut changes: Changes) -> Changes {
    changes.retain(|_, value| !value.is_null());
    changes
}

/// Keep only the listed keys
pub fn take(mut changes: Changes, keys: &[&str]) -> Changes {
    changes.retain(|key, _| keys.contains(&key.as_str()));
    changes
}

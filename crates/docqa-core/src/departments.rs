//! Department tag options and selection folding.
//!
//! The chat host shows a multi-select of department names with a `"none"`
//! entry first. Selecting `"none"` (or nothing at all) makes the uploaded
//! document visible to every department.

use crate::models::{Departments, SessionMetadata};

/// Tag meaning "no department restriction".
pub const NONE_TAG: &str = "none";

/// Department names offered when the configuration does not override them.
pub const DEFAULT_DEPARTMENTS: [&str; 5] = [
    "Software engineering",
    "DevOps",
    "Project management",
    "Data management",
    "Personal management",
];

/// Build the tag options shown to the user: `"none"` followed by the
/// department names in lexicographic order.
pub fn department_options<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut sorted: Vec<String> = names.iter().map(|s| s.as_ref().to_string()).collect();
    sorted.sort();
    let mut options = Vec::with_capacity(sorted.len() + 1);
    options.push(NONE_TAG.to_string());
    options.extend(sorted);
    options
}

/// Fold a tag selection into department metadata.
///
/// An empty selection, or any selection containing `"none"`, is
/// unrestricted; the other selected tags are discarded in that case.
/// Otherwise the selected names are kept exactly, in the order given.
pub fn fold_selection<S: AsRef<str>>(selected: &[S]) -> Departments {
    if selected.is_empty() || selected.iter().any(|s| s.as_ref() == NONE_TAG) {
        return Departments::Unrestricted;
    }
    Departments::Restricted(selected.iter().map(|s| s.as_ref().to_string()).collect())
}

/// Convenience wrapper producing the full session metadata.
pub fn metadata_for_selection<S: AsRef<str>>(selected: &[S]) -> SessionMetadata {
    SessionMetadata {
        departments: fold_selection(selected),
    }
}

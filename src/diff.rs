//! Record-level difference between two annotation states.
//!
//! A committer that lost a race uses this to see what it would have to re-apply on top
//! of the newer version.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{AnnotationState, RecordId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    /// Ids live in `other` but not in `base`.
    pub added: Vec<RecordId>,
    /// Ids live in `base` but not in `other`.
    pub removed: Vec<RecordId>,
    /// Ids live in both whose record differs.
    pub changed: Vec<RecordId>,
    /// The set of indexed ids differs.
    pub index_changed: bool,
    pub text_changed: bool,
}

impl StateDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && !self.index_changed
            && !self.text_changed
    }
}

impl fmt::Display for StateDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} -{} ~{}",
            self.added.len(),
            self.removed.len(),
            self.changed.len()
        )?;
        if self.index_changed {
            f.write_str(" (index changed)")?;
        }
        if self.text_changed {
            f.write_str(" (text changed)")?;
        }
        Ok(())
    }
}

/// Compare `other` against `base`, keyed by record id.
#[must_use]
pub fn diff(base: &AnnotationState, other: &AnnotationState) -> StateDiff {
    let mut result = StateDiff {
        text_changed: base.text() != other.text(),
        ..StateDiff::default()
    };
    let span = base.capacity().max(other.capacity());
    for raw in 0..span {
        let id = RecordId(u32::try_from(raw).unwrap_or(u32::MAX));
        match (base.get(id), other.get(id)) {
            (None, Some(_)) => result.added.push(id),
            (Some(_), None) => result.removed.push(id),
            (Some(before), Some(after)) if before != after => result.changed.push(id),
            _ => {}
        }
    }
    let mut base_index: Vec<RecordId> = base.index_entries().to_vec();
    let mut other_index: Vec<RecordId> = other.index_entries().to_vec();
    base_index.sort_unstable();
    base_index.dedup();
    other_index.sort_unstable();
    other_index.dedup();
    result.index_changed = base_index != other_index;
    result
}

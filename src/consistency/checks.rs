//! Structural checks over an [`AnnotationState`]. Each is a pure function of the state.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::{AnnotationState, CheckKind, Diagnostic, Record, RecordId, RecordKind};

impl CheckKind {
    #[must_use]
    pub fn run(self, state: &AnnotationState) -> Vec<Diagnostic> {
        match self {
            Self::DuplicateIndexEntries => duplicate_index_entries(state),
            Self::DanglingIndexEntries => dangling_index_entries(state),
            Self::DanglingRelations => dangling_relations(state),
            Self::UnindexedReachable => unindexed_reachable(state),
            Self::OffsetBounds => offset_bounds(state),
            Self::OrphanedRecords => orphaned_records(state),
        }
    }
}

/// Records that must be indexed when something indexed points at them. Metadata-kind
/// records may live unindexed as feature-attached values.
pub(crate) fn must_be_indexed(record: &Record) -> bool {
    !matches!(record.kind, RecordKind::Metadata)
}

/// Every existing record reachable from the index through endpoints and reference
/// features, index entries included.
pub(crate) fn reachable(state: &AnnotationState) -> HashSet<RecordId> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<RecordId> = state
        .index_entries()
        .iter()
        .copied()
        .filter(|id| state.contains(*id))
        .collect();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(record) = state.get(id) {
            queue.extend(record.references().filter(|next| state.contains(*next)));
        }
    }
    seen
}

fn duplicate_index_entries(state: &AnnotationState) -> Vec<Diagnostic> {
    let mut counts: HashMap<RecordId, usize> = HashMap::new();
    for id in state.index_entries() {
        *counts.entry(*id).or_default() += 1;
    }
    let mut duplicates: Vec<_> = counts.into_iter().filter(|(_, n)| *n > 1).collect();
    duplicates.sort_unstable();
    duplicates
        .into_iter()
        .map(|(id, n)| {
            Diagnostic::error(
                CheckKind::DuplicateIndexEntries,
                Some(id),
                format!("record {id} is indexed {n} times"),
            )
        })
        .collect()
}

fn dangling_index_entries(state: &AnnotationState) -> Vec<Diagnostic> {
    let mut reported = HashSet::new();
    state
        .index_entries()
        .iter()
        .filter(|id| !state.contains(**id) && reported.insert(**id))
        .map(|id| {
            Diagnostic::error(
                CheckKind::DanglingIndexEntries,
                Some(*id),
                format!("index refers to missing record {id}"),
            )
        })
        .collect()
}

fn dangling_relations(state: &AnnotationState) -> Vec<Diagnostic> {
    let indexed = state.indexed_ids();
    let mut diagnostics = Vec::new();
    for (id, record) in state.indexed_records() {
        let RecordKind::Relation { source, target } = record.kind else {
            continue;
        };
        for (role, endpoint) in [("source", source), ("target", target)] {
            let problem = if !state.contains(endpoint) {
                "does not exist"
            } else if !indexed.contains(&endpoint) {
                "is not indexed"
            } else {
                continue;
            };
            diagnostics.push(Diagnostic::error(
                CheckKind::DanglingRelations,
                Some(id),
                format!(
                    "relation {id} ({}) {role} {endpoint} {problem}",
                    record.type_name
                ),
            ));
        }
    }
    diagnostics
}

fn unindexed_reachable(state: &AnnotationState) -> Vec<Diagnostic> {
    let indexed = state.indexed_ids();
    let mut diagnostics = Vec::new();
    let mut reported = HashSet::new();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<RecordId> = state.indexed_records().map(|(id, _)| id).collect();

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        let Some(record) = state.get(id) else {
            continue;
        };
        for target in record.feature_refs() {
            match state.get(target) {
                None => {
                    if reported.insert((id, target)) {
                        diagnostics.push(Diagnostic::error(
                            CheckKind::UnindexedReachable,
                            Some(id),
                            format!("record {id} references missing record {target}"),
                        ));
                    }
                }
                Some(referenced) => {
                    if must_be_indexed(referenced)
                        && !indexed.contains(&target)
                        && reported.insert((target, target))
                    {
                        diagnostics.push(Diagnostic::error(
                            CheckKind::UnindexedReachable,
                            Some(target),
                            format!(
                                "record {target} ({}) is reachable from {id} but not indexed",
                                referenced.type_name
                            ),
                        ));
                    }
                    queue.push_back(target);
                }
            }
        }
    }
    diagnostics
}

fn offset_bounds(state: &AnnotationState) -> Vec<Diagnostic> {
    let text_len = state.text_len();
    let mut diagnostics = Vec::new();
    for (id, record) in state.indexed_records() {
        let Some((begin, end)) = record.offsets() else {
            continue;
        };
        if begin > end {
            diagnostics.push(Diagnostic::error(
                CheckKind::OffsetBounds,
                Some(id),
                format!("record {id} begins at {begin} after its end {end}"),
            ));
        } else if end > text_len {
            diagnostics.push(Diagnostic::error(
                CheckKind::OffsetBounds,
                Some(id),
                format!("record {id} ends at {end} beyond text length {text_len}"),
            ));
        }
    }
    diagnostics
}

fn orphaned_records(state: &AnnotationState) -> Vec<Diagnostic> {
    let reachable = reachable(state);
    state
        .records()
        .filter(|(id, _)| !reachable.contains(id))
        .map(|(id, record)| {
            Diagnostic::warning(
                CheckKind::OrphanedRecords,
                Some(id),
                format!("record {id} ({}) is unreachable from the index", record.type_name),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureValue, Severity};

    fn clean() -> (AnnotationState, RecordId, RecordId) {
        let mut state = AnnotationState::new("Alice met Bob.");
        let alice = state.add(Record::span("NamedEntity", 0, 5));
        let bob = state.add(Record::span("NamedEntity", 10, 13));
        state.add(Record::relation("Coreference", alice, bob));
        (state, alice, bob)
    }

    #[test]
    fn clean_state_passes_every_check() {
        let (state, _, _) = clean();
        for check in CheckKind::ALL {
            assert!(check.run(&state).is_empty(), "{check} flagged a clean state");
        }
    }

    #[test]
    fn duplicates_are_reported_once_per_record() {
        let (mut state, alice, _) = clean();
        state.index_mut().push(alice);
        state.index_mut().push(alice);
        let diagnostics = CheckKind::DuplicateIndexEntries.run(&state);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("3 times"));
    }

    #[test]
    fn dangling_index_entry_is_an_error() {
        let (mut state, _, _) = clean();
        state.index_mut().push(RecordId(40));
        let diagnostics = CheckKind::DanglingIndexEntries.run(&state);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn relation_to_removed_endpoint_is_dangling() {
        let (mut state, alice, _) = clean();
        state.remove(alice);
        let diagnostics = CheckKind::DanglingRelations.run(&state);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("does not exist"));
    }

    #[test]
    fn relation_to_unindexed_endpoint_is_dangling() {
        let (mut state, _, bob) = clean();
        state.unindex(bob);
        let diagnostics = CheckKind::DanglingRelations.run(&state);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("not indexed"));
    }

    #[test]
    fn feature_attached_metadata_may_stay_unindexed() {
        let (mut state, alice, _) = clean();
        let link = state.add_unindexed(
            Record::metadata("LinkWithRoleHost").with_feature("role", FeatureValue::Text("arg0".into())),
        );
        state
            .get_mut(alice)
            .expect("alice")
            .features
            .insert("links".into(), FeatureValue::RefList(vec![link]));
        assert!(CheckKind::UnindexedReachable.run(&state).is_empty());
        assert!(CheckKind::OrphanedRecords.run(&state).is_empty());
    }

    #[test]
    fn unindexed_span_behind_a_link_is_reported() {
        let (mut state, alice, _) = clean();
        let hidden = state.add_unindexed(Record::span("NamedEntity", 6, 9));
        let link = state.add_unindexed(
            Record::metadata("LinkWithRoleHost").with_feature("target", FeatureValue::Ref(hidden)),
        );
        state
            .get_mut(alice)
            .expect("alice")
            .features
            .insert("links".into(), FeatureValue::RefList(vec![link]));
        let diagnostics = CheckKind::UnindexedReachable.run(&state);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].record, Some(hidden));
    }

    #[test]
    fn offsets_beyond_text_are_reported() {
        let (mut state, _, _) = clean();
        state.add(Record::token(12, 40));
        state.add(Record::token(5, 2));
        assert_eq!(CheckKind::OffsetBounds.run(&state).len(), 2);
    }

    #[test]
    fn orphan_is_a_warning() {
        let (mut state, _, _) = clean();
        state.add_unindexed(Record::token(0, 5));
        let diagnostics = CheckKind::OrphanedRecords.run(&state);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn long_relation_chain_is_checked_in_linear_time() {
        let records = 40_000_u32;
        let mut state = AnnotationState::new("x".repeat(records as usize));
        let mut previous = state.add(Record::token(0, 1));
        for begin in 1..records {
            let token = state.add(Record::token(begin, begin + 1));
            state.add(Record::relation("Dependency", previous, token));
            previous = token;
        }
        // One dangling endpoint at the far end of the chain
        state.unindex(previous);

        let started = std::time::Instant::now();
        let dangling = CheckKind::DanglingRelations.run(&state);
        let unindexed = CheckKind::UnindexedReachable.run(&state);
        let mut repaired = state.clone();
        let removed = crate::types::RepairKind::RemoveDanglingRelations.apply(&mut repaired);
        let elapsed = started.elapsed();

        assert_eq!(dangling.len(), 1);
        assert!(unindexed.is_empty());
        assert_eq!(removed, 1);
        assert!(CheckKind::DanglingRelations.run(&repaired).is_empty());
        // Scanning the index once per endpoint is quadratic at this size
        assert!(elapsed < std::time::Duration::from_secs(10), "took {elapsed:?}");
    }
}

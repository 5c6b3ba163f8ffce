//! Corrective mutations paired with the checks. Every repair is idempotent and returns
//! the number of changes it made.

use std::collections::HashSet;

use super::checks::{must_be_indexed, reachable};
use crate::types::{AnnotationState, FeatureValue, RecordId, RecordKind, RepairKind};

impl RepairKind {
    pub fn apply(self, state: &mut AnnotationState) -> usize {
        match self {
            Self::DeduplicateIndex => deduplicate_index(state),
            Self::DropDanglingIndexEntries => drop_dangling_index_entries(state),
            Self::RemoveDanglingRelations => remove_dangling_relations(state),
            Self::ReindexReachable => reindex_reachable(state),
            Self::ClampOffsets => clamp_offsets(state),
            Self::RemoveOrphans => remove_orphans(state),
        }
    }
}

fn deduplicate_index(state: &mut AnnotationState) -> usize {
    let mut seen = HashSet::new();
    let index = state.index_mut();
    let before = index.len();
    index.retain(|id| seen.insert(*id));
    before - index.len()
}

fn drop_dangling_index_entries(state: &mut AnnotationState) -> usize {
    let missing: HashSet<RecordId> = state
        .index_entries()
        .iter()
        .copied()
        .filter(|id| !state.contains(*id))
        .collect();
    let index = state.index_mut();
    let before = index.len();
    index.retain(|id| !missing.contains(id));
    before - index.len()
}

fn remove_dangling_relations(state: &mut AnnotationState) -> usize {
    let indexed = state.indexed_ids();
    let dangling: HashSet<RecordId> = state
        .indexed_records()
        .filter_map(|(id, record)| match record.kind {
            RecordKind::Relation { source, target }
                if !indexed.contains(&source) || !indexed.contains(&target) =>
            {
                Some(id)
            }
            _ => None,
        })
        .collect();
    for id in &dangling {
        tracing::debug!(target = "annostore::repair", record = %id, "removing dangling relation");
    }
    state.remove_all(&dangling)
}

/// Index unindexed records reachable through features and null out references to
/// records that no longer exist.
fn reindex_reachable(state: &mut AnnotationState) -> usize {
    let mut changes = 0;

    let holders: Vec<RecordId> = state.records().map(|(id, _)| id).collect();
    for holder in holders {
        let missing: HashSet<RecordId> = state
            .get(holder)
            .map(|record| {
                record
                    .feature_refs()
                    .filter(|target| !state.contains(*target))
                    .collect()
            })
            .unwrap_or_default();
        if missing.is_empty() {
            continue;
        }
        if let Some(record) = state.get_mut(holder) {
            for value in record.features.values_mut() {
                match value {
                    FeatureValue::Ref(target) if missing.contains(target) => {
                        *value = FeatureValue::Null;
                        changes += 1;
                    }
                    FeatureValue::RefList(targets) => {
                        let before = targets.len();
                        targets.retain(|target| !missing.contains(target));
                        changes += before - targets.len();
                    }
                    _ => {}
                }
            }
        }
    }

    let indexed = state.indexed_ids();
    let mut to_index: Vec<RecordId> = reachable(state)
        .into_iter()
        .filter(|id| !indexed.contains(id) && state.get(*id).is_some_and(must_be_indexed))
        .collect();
    to_index.sort_unstable();
    changes += to_index.len();
    state.index_mut().extend(to_index);
    changes
}

fn clamp_offsets(state: &mut AnnotationState) -> usize {
    let text_len = state.text_len();
    let indexed: Vec<RecordId> = state.indexed_records().map(|(id, _)| id).collect();
    let mut changes = 0;
    for id in indexed {
        let Some((begin, end)) = state.get_mut(id).and_then(|record| record.offsets_mut()) else {
            continue;
        };
        let clamped_end = (*end).min(text_len);
        let clamped_begin = (*begin).min(clamped_end);
        if (clamped_begin, clamped_end) != (*begin, *end) {
            *begin = clamped_begin;
            *end = clamped_end;
            changes += 1;
        }
    }
    changes
}

fn remove_orphans(state: &mut AnnotationState) -> usize {
    let reachable = reachable(state);
    let orphans: HashSet<RecordId> = state
        .records()
        .map(|(id, _)| id)
        .filter(|id| !reachable.contains(id))
        .collect();
    state.remove_all(&orphans)
}

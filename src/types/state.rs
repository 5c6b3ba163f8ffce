//! In-memory annotation state: a flat record arena addressed by `RecordId`.
//!
//! Records reference each other by id (relation endpoints, reference features). The
//! index lists the records reachable from the document root; a record can live in the
//! arena without being indexed, which is exactly the class of defect the consistency
//! checks look for. Ids are never reused once freed.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a record inside an [`AnnotationState`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u32);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Ref(RecordId),
    RefList(Vec<RecordId>),
}

/// Structural shape of a record. Offsets are character offsets into the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Token { begin: u32, end: u32 },
    Span { begin: u32, end: u32 },
    Relation { source: RecordId, target: RecordId },
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub type_name: String,
    pub kind: RecordKind,
    #[serde(default)]
    pub features: BTreeMap<String, FeatureValue>,
}

impl Record {
    pub fn token(begin: u32, end: u32) -> Self {
        Self::new("Token", RecordKind::Token { begin, end })
    }

    pub fn span(type_name: impl Into<String>, begin: u32, end: u32) -> Self {
        Self::new(type_name, RecordKind::Span { begin, end })
    }

    pub fn relation(type_name: impl Into<String>, source: RecordId, target: RecordId) -> Self {
        Self::new(type_name, RecordKind::Relation { source, target })
    }

    pub fn metadata(type_name: impl Into<String>) -> Self {
        Self::new(type_name, RecordKind::Metadata)
    }

    fn new(type_name: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
            features: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_feature(mut self, name: impl Into<String>, value: FeatureValue) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    /// `(begin, end)` for anchored records.
    #[must_use]
    pub fn offsets(&self) -> Option<(u32, u32)> {
        match self.kind {
            RecordKind::Token { begin, end } | RecordKind::Span { begin, end } => {
                Some((begin, end))
            }
            RecordKind::Relation { .. } | RecordKind::Metadata => None,
        }
    }

    pub(crate) fn offsets_mut(&mut self) -> Option<(&mut u32, &mut u32)> {
        match &mut self.kind {
            RecordKind::Token { begin, end } | RecordKind::Span { begin, end } => {
                Some((begin, end))
            }
            RecordKind::Relation { .. } | RecordKind::Metadata => None,
        }
    }

    #[must_use]
    pub fn is_relation(&self) -> bool {
        matches!(self.kind, RecordKind::Relation { .. })
    }

    /// Ids held in reference features (not relation endpoints).
    pub fn feature_refs(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.features.values().flat_map(|value| {
            let ids: &[RecordId] = match value {
                FeatureValue::Ref(id) => std::slice::from_ref(id),
                FeatureValue::RefList(ids) => ids,
                _ => &[],
            };
            ids.iter().copied()
        })
    }

    /// Every id this record points at, endpoints first.
    pub fn references(&self) -> impl Iterator<Item = RecordId> + '_ {
        let endpoints = match self.kind {
            RecordKind::Relation { source, target } => vec![source, target],
            _ => Vec::new(),
        };
        endpoints.into_iter().chain(self.feature_refs())
    }
}

/// One annotator's annotations on one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationState {
    text: String,
    records: Vec<Option<Record>>,
    index: Vec<RecordId>,
}

impl AnnotationState {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            records: Vec::new(),
            index: Vec::new(),
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length of the source text in characters.
    #[must_use]
    pub fn text_len(&self) -> u32 {
        u32::try_from(self.text.chars().count()).unwrap_or(u32::MAX)
    }

    /// Add a record and index it.
    pub fn add(&mut self, record: Record) -> RecordId {
        let id = self.add_unindexed(record);
        self.index.push(id);
        id
    }

    /// Add a record to the arena only. Feature-attached values are stored like this
    /// and stay valid as long as an indexed record references them.
    pub fn add_unindexed(&mut self, record: Record) -> RecordId {
        let id = RecordId(u32::try_from(self.records.len()).unwrap_or(u32::MAX));
        self.records.push(Some(record));
        id
    }

    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.records.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.get(id).is_some()
    }

    /// Scans the index. Passes over the whole graph should use [`Self::indexed_ids`].
    #[must_use]
    pub fn is_indexed(&self, id: RecordId) -> bool {
        self.index.contains(&id)
    }

    /// Distinct indexed ids, dangling ones included, for constant-time membership tests.
    #[must_use]
    pub fn indexed_ids(&self) -> HashSet<RecordId> {
        self.index.iter().copied().collect()
    }

    /// Raw index entries in insertion order, duplicates and dangling ids included.
    #[must_use]
    pub fn index_entries(&self) -> &[RecordId] {
        &self.index
    }

    /// Direct access to the index list.
    ///
    /// Nothing is validated here; importers use it to rebuild an index wholesale and the
    /// consistency checks exist to catch what goes wrong.
    pub fn index_mut(&mut self) -> &mut Vec<RecordId> {
        &mut self.index
    }

    /// Index an existing record. Returns `false` if it is missing or already indexed.
    pub fn reindex(&mut self, id: RecordId) -> bool {
        if !self.contains(id) || self.is_indexed(id) {
            return false;
        }
        self.index.push(id);
        true
    }

    /// Drop every index entry for `id`, keeping the record in the arena.
    pub fn unindex(&mut self, id: RecordId) -> bool {
        let before = self.index.len();
        self.index.retain(|entry| *entry != id);
        before != self.index.len()
    }

    /// Remove a record. References to it elsewhere are left untouched.
    pub fn remove(&mut self, id: RecordId) -> Option<Record> {
        self.unindex(id);
        self.records.get_mut(id.0 as usize).and_then(Option::take)
    }

    /// Remove every record in `ids`, rewriting the index once. Returns how many existed.
    pub fn remove_all(&mut self, ids: &HashSet<RecordId>) -> usize {
        self.index.retain(|id| !ids.contains(id));
        ids.iter()
            .filter(|id| {
                self.records
                    .get_mut(id.0 as usize)
                    .and_then(Option::take)
                    .is_some()
            })
            .count()
    }

    /// Remove a record together with every relation that has it as an endpoint.
    pub fn remove_cascade(&mut self, id: RecordId) -> Option<Record> {
        let attached: Vec<RecordId> = self
            .records()
            .filter_map(|(rid, record)| match record.kind {
                RecordKind::Relation { source, target } if source == id || target == id => {
                    Some(rid)
                }
                _ => None,
            })
            .collect();
        for rid in attached {
            self.remove(rid);
        }
        self.remove(id)
    }

    /// Live records in id order.
    pub fn records(&self) -> impl Iterator<Item = (RecordId, &Record)> + '_ {
        self.records.iter().enumerate().filter_map(|(pos, slot)| {
            slot.as_ref()
                .map(|record| (RecordId(u32::try_from(pos).unwrap_or(u32::MAX)), record))
        })
    }

    /// Indexed records that exist, each reported once, in index order.
    pub fn indexed_records(&self) -> impl Iterator<Item = (RecordId, &Record)> + '_ {
        let mut seen = std::collections::HashSet::new();
        self.index.iter().filter_map(move |id| {
            if !seen.insert(*id) {
                return None;
            }
            self.get(*id).map(|record| (*id, record))
        })
    }

    pub fn select<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = (RecordId, &'a Record)> {
        self.indexed_records()
            .filter(move |(_, record)| record.type_name == type_name)
    }

    /// Number of live records in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the arena including freed slots; the next id handed out.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.records.len()
    }
}

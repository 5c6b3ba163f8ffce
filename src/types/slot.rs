//! Slot identity: the (document, annotator) unit of storage and locking.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a source document, assigned by the project service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl From<u64> for DocumentId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the annotator owning a slot (usually a user name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotatorId(String);

impl AnnotatorId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AnnotatorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AnnotatorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for AnnotatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One persisted annotation state per slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub document: DocumentId,
    pub annotator: AnnotatorId,
}

impl Slot {
    pub fn new(document: impl Into<DocumentId>, annotator: impl Into<AnnotatorId>) -> Self {
        Self {
            document: document.into(),
            annotator: annotator.into(),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot(doc={}, user={})", self.document, self.annotator)
    }
}

//! Pluggable validation of cached pool entries.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::PoolEntry;
use crate::error::Result;
use crate::types::{DocumentId, SchemaFingerprint};

/// Supplies the schema fingerprint currently in effect for a document's project.
pub trait SchemaSource: Send + Sync {
    fn fingerprint(&self, document: DocumentId) -> Result<SchemaFingerprint>;
}

impl<T: SchemaSource + ?Sized> SchemaSource for Arc<T> {
    fn fingerprint(&self, document: DocumentId) -> Result<SchemaFingerprint> {
        (**self).fingerprint(document)
    }
}

/// A single schema shared by every document.
impl SchemaSource for SchemaFingerprint {
    fn fingerprint(&self, _document: DocumentId) -> Result<SchemaFingerprint> {
        Ok(*self)
    }
}

/// In-memory schema source: one default fingerprint plus per-document overrides.
///
/// Useful when the schema collaborator pushes changes instead of being polled.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    default: RwLock<SchemaFingerprint>,
    overrides: RwLock<HashMap<DocumentId, SchemaFingerprint>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new(default: SchemaFingerprint) -> Self {
        Self {
            default: RwLock::new(default),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_default(&self, fingerprint: SchemaFingerprint) {
        *self.default.write() = fingerprint;
    }

    pub fn set(&self, document: DocumentId, fingerprint: SchemaFingerprint) {
        self.overrides.write().insert(document, fingerprint);
    }
}

impl SchemaSource for SchemaRegistry {
    fn fingerprint(&self, document: DocumentId) -> Result<SchemaFingerprint> {
        if let Some(fingerprint) = self.overrides.read().get(&document) {
            return Ok(*fingerprint);
        }
        Ok(*self.default.read())
    }
}

/// Decides whether a cached entry may still be handed out.
pub trait EntryValidator: Send + Sync {
    fn validate(&self, entry: &PoolEntry) -> Result<bool>;
}

/// Default validator: not deleted and parsed under the current schema.
pub struct FingerprintValidator<S> {
    schema: S,
}

impl<S: SchemaSource> FingerprintValidator<S> {
    pub fn new(schema: S) -> Self {
        Self { schema }
    }
}

impl<S: SchemaSource> EntryValidator for FingerprintValidator<S> {
    fn validate(&self, entry: &PoolEntry) -> Result<bool> {
        if entry.deleted {
            return Ok(false);
        }
        Ok(self.schema.fingerprint(entry.slot.document)? == entry.fingerprint)
    }
}

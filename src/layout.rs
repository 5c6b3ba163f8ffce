//! Persisted directory layout.
//!
//! ```text
//! <root>/<document>/<annotator>.ann
//! <root>/<document>/backups/<annotator>.<utc-timestamp>.<stamp>.bak
//! <root>/<document>/<annotator>.lock
//! ```
//!
//! Annotator ids made only of `[A-Za-z0-9._-]` (not starting with `.`) are used
//! verbatim; anything else is written as `~` followed by the hex of its UTF-8 bytes so
//! the mapping stays deterministic and reversible.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::constants::{BACKUP_DIR, LOCK_EXTENSION, STATE_EXTENSION};
use crate::error::{Result, StoreError};
use crate::types::{AnnotatorId, DocumentId, Slot};

const ESCAPE_PREFIX: char = '~';

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn document_dir(&self, document: DocumentId) -> PathBuf {
        self.root.join(document.to_string())
    }

    pub fn slot_path(&self, slot: &Slot) -> Result<PathBuf> {
        let stem = file_stem(&slot.annotator)?;
        Ok(self
            .document_dir(slot.document)
            .join(format!("{stem}.{STATE_EXTENSION}")))
    }

    #[must_use]
    pub fn backup_dir(&self, document: DocumentId) -> PathBuf {
        self.document_dir(document).join(BACKUP_DIR)
    }

    /// Advisory lock file guarding writes to one slot across processes.
    pub fn lock_path(&self, slot: &Slot) -> Result<PathBuf> {
        let stem = file_stem(&slot.annotator)?;
        Ok(self
            .document_dir(slot.document)
            .join(format!("{stem}.{LOCK_EXTENSION}")))
    }

    /// Annotators with a persisted value for `document`, sorted.
    pub fn annotators(&self, document: DocumentId) -> Result<Vec<AnnotatorId>> {
        let entries = match fs::read_dir(self.document_dir(document)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut annotators = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(STATE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match parse_stem(stem) {
                Some(annotator) => annotators.push(annotator),
                None => tracing::warn!(
                    target = "annostore::layout",
                    path = %path.display(),
                    "ignoring file with undecodable annotator name"
                ),
            }
        }
        annotators.sort();
        Ok(annotators)
    }
}

/// Deterministic file stem for an annotator.
pub fn file_stem(annotator: &AnnotatorId) -> Result<String> {
    let raw = annotator.as_str();
    if raw.is_empty() {
        return Err(StoreError::InvalidSlot {
            reason: "annotator id must not be empty".into(),
        });
    }
    let verbatim = !raw.starts_with('.')
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if verbatim {
        Ok(raw.to_string())
    } else {
        Ok(format!("{ESCAPE_PREFIX}{}", hex::encode(raw.as_bytes())))
    }
}

/// Inverse of [`file_stem`].
pub fn parse_stem(stem: &str) -> Option<AnnotatorId> {
    match stem.strip_prefix(ESCAPE_PREFIX) {
        Some(encoded) => {
            let bytes = hex::decode(encoded).ok()?;
            String::from_utf8(bytes).ok().map(AnnotatorId::from)
        }
        None if !stem.is_empty() && !stem.starts_with('.') => Some(AnnotatorId::from(stem)),
        None => None,
    }
}

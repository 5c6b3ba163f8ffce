//! Interchange formats for store-level export and import.
//!
//! The storage driver only moves native bytes; these formats sit on top of it so a
//! state can leave or enter the store in a self-describing form.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::io::{decode_state, encode_state};
use crate::types::{AnnotationState, SchemaFingerprint, VersionStamp};

const JSON_FORMAT_VERSION: u16 = 1;

pub trait AnnotationFormat: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, state: &AnnotationState) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<AnnotationState>;
}

/// The on-disk encoding with the stamp cleared; the importing store assigns its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFormat;

impl AnnotationFormat for NativeFormat {
    fn name(&self) -> &'static str {
        "native"
    }

    fn encode(&self, state: &AnnotationState) -> Result<Vec<u8>> {
        encode_state(state, VersionStamp::UNPERSISTED, SchemaFingerprint::default())
    }

    fn decode(&self, bytes: &[u8]) -> Result<AnnotationState> {
        decode_state(bytes).map(|(_, state)| state)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat {
    pub pretty: bool,
}

#[derive(Serialize)]
struct JsonDocumentRef<'a> {
    version: u16,
    state: &'a AnnotationState,
}

#[derive(Deserialize)]
struct JsonDocument {
    version: u16,
    state: AnnotationState,
}

impl AnnotationFormat for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, state: &AnnotationState) -> Result<Vec<u8>> {
        let document = JsonDocumentRef {
            version: JSON_FORMAT_VERSION,
            state,
        };
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&document)?
        } else {
            serde_json::to_vec(&document)?
        };
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<AnnotationState> {
        let document: JsonDocument = serde_json::from_slice(bytes)?;
        if document.version != JSON_FORMAT_VERSION {
            return Err(StoreError::InvalidEncoding {
                reason: format!("unsupported json document version {}", document.version),
            });
        }
        Ok(document.state)
    }
}

/// Look a built-in format up by its name.
#[must_use]
pub fn by_name(name: &str) -> Option<Box<dyn AnnotationFormat>> {
    match name {
        "native" => Some(Box::new(NativeFormat)),
        "json" => Some(Box::new(JsonFormat::default())),
        _ => None,
    }
}

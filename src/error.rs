use std::time::Duration;

use thiserror::Error;

use crate::types::{Diagnostic, Slot, VersionStamp};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Every failure the storage layer can surface.
///
/// Callers match on the variant instead of inspecting messages. Nothing in the crate
/// retries on its own; the only local recovery is evicting a pool entry that failed
/// validation and loading it again.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The slot has never been written, or it was deleted.
    #[error("no persisted annotation state for {slot}")]
    NotFound { slot: Slot },

    #[error("storage I/O failure: {0}")]
    Storage(#[from] std::io::Error),

    /// Another writer committed after the caller took its snapshot.
    #[error(
        "concurrent modification during {context}: expected version {expected}, found {actual}"
    )]
    ConcurrentModification {
        context: String,
        expected: VersionStamp,
        actual: VersionStamp,
    },

    /// A blocking consistency check failed; nothing was written.
    #[error("{slot}: refusing to persist corrupt annotation state ({reason})")]
    Corruption {
        slot: Slot,
        reason: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("timed out after {waited:?} waiting for the lock on {slot}")]
    PoolTimeout { slot: Slot, waited: Duration },

    /// Persisted bytes could not be decoded (bad magic, checksum, or payload).
    #[error("invalid annotation state encoding: {reason}")]
    InvalidEncoding { reason: String },

    #[error("invalid slot: {reason}")]
    InvalidSlot { reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl StoreError {
    /// Whether repeating the same request later may succeed without intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PoolTimeout { .. } | Self::Storage(_)
        )
    }

    /// Whether the caller should reload the slot before trying again.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::InvalidEncoding {
            reason: format!("encode failed: {err}"),
        }
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::InvalidEncoding {
            reason: format!("decode failed: {err}"),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: format!("json: {err}"),
        }
    }
}

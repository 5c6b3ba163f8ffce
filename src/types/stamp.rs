//! Version stamps, schema fingerprints and cheap per-slot metadata.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Monotonic marker of the last persisted version of a slot.
///
/// `UNPERSISTED` stands for "nothing on disk"; the first accepted write produces `1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionStamp(pub u64);

impl VersionStamp {
    pub const UNPERSISTED: Self = Self(0);

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[must_use]
    pub fn is_persisted(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the record-type configuration a state was encoded against.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SchemaFingerprint(pub [u8; 32]);

impl SchemaFingerprint {
    /// Fingerprint over a canonical textual description of the type system.
    #[must_use]
    pub fn of(description: &[u8]) -> Self {
        Self(blake3::hash(description).into())
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaFingerprint({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex()[..12])
    }
}

/// Metadata of a persisted slot, obtained without parsing the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMetadata {
    pub version: VersionStamp,
    /// Size of the persisted file in bytes.
    pub size: u64,
    pub fingerprint: SchemaFingerprint,
    pub modified: SystemTime,
}

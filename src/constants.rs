//! On-disk layout constants and configuration defaults.

/// Magic prefix of a native annotation-state file.
pub const MAGIC: [u8; 8] = *b"ANNOST01";
/// Native encoding revision written into every header.
pub const FORMAT_VERSION: u16 = 1;
/// Fixed size of the native header in bytes.
pub const HEADER_SIZE: usize = 96;

/// Extension of the current persisted value of a slot.
pub const STATE_EXTENSION: &str = "ann";
/// Extension of backup snapshots.
pub const BACKUP_EXTENSION: &str = "bak";
/// Name of the per-document backup directory.
pub const BACKUP_DIR: &str = "backups";
/// Extension of the per-slot advisory lock file.
pub const LOCK_EXTENSION: &str = "lock";
/// Timestamp layout embedded in backup file names (UTC, millisecond precision).
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_POOL_ENTRIES: usize = 256;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_MAX_BACKUPS: usize = 5;

/// Upper bound on a persisted payload; larger headers are treated as corrupt.
pub const MAX_PAYLOAD_BYTES: u64 = 1024 * 1024 * 1024;

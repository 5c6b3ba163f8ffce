#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::useless_vec,
        clippy::uninlined_format_args,
        clippy::cast_possible_truncation,
        clippy::float_cmp,
        clippy::cast_precision_loss
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Strategic lint exceptions - these are allowed project-wide for pragmatic reasons:
//
// Documentation lints: Many internal/self-documenting functions don't need extensive docs.
// Public APIs should still have proper documentation.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Cast safety: casts are bounded by real-world constraints (file sizes, record counts).
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
//
// Style/complexity
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::similar_names)]
//
// Pattern matching: These pedantic lints often suggest changes that reduce clarity.
#![allow(clippy::manual_let_else)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::collapsible_if)]
//
// Performance/ergonomics trade-offs that are acceptable for this codebase:
#![allow(clippy::needless_pass_by_value)] // Handles take owned Arcs intentionally
#![allow(clippy::return_self_not_must_use)] // Builder patterns don't need must_use on every method
#![allow(clippy::significant_drop_tightening)]
//
// Low-value pedantic lints that add noise:
#![allow(clippy::struct_excessive_bools)] // Policy structs naturally have several flags
#![allow(clippy::needless_continue)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::map_unwrap_or)]
//
// Return value wrapping: Many functions use Result for consistency even when they
// currently can't fail, allowing future error conditions to be added without breaking API.
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::unused_self)]

//! Storage and concurrency layer for per-annotator annotation state.
//!
//! One persisted [`AnnotationState`] per [`Slot`] (document, annotator). Writes are
//! optimistic: a caller checks out a slot, edits its copy and commits with the
//! [`VersionStamp`] it started from; a stale stamp is rejected instead of overwriting a
//! concurrent editor's work. Every overwrite is preceded by a backup, parsed states are
//! cached in a validated [`SlotPool`], and a [`ConsistencyPipeline`] refuses to persist
//! structurally corrupt graphs.

/// The annostore-core crate version (matches `Cargo.toml`).
pub const ANNOSTORE_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod backup;
pub mod consistency;
pub mod constants;
pub mod diff;
pub mod error;
pub mod format;
pub mod guard;
pub mod io;
pub mod layout;
mod lock;
pub mod pool;
pub mod storage;
pub mod store;
pub mod types;

pub use backup::{BackupEntry, BackupManager};
pub use consistency::ConsistencyPipeline;
pub use constants::*;
pub use diff::{StateDiff, diff};
pub use error::{Result, StoreError};
pub use format::{AnnotationFormat, JsonFormat, NativeFormat};
pub use guard::{Checkout, ConcurrencyGuard, SlotState};
pub use layout::Layout;
pub use lock::SlotFileLock;
pub use pool::{
    EntryValidator, FingerprintValidator, PoolEntry, PoolLease, PoolStats, PoolSweeper,
    SchemaRegistry, SchemaSource, SlotPool, SweepReport,
};
pub use storage::{FsStorage, MetadataStore, StorageDriver};
pub use store::AnnotationStore;
pub use types::{
    AnnotationState, AnnotatorId, CheckKind, CheckPolicy, Diagnostic, DiagnosticReport,
    DocumentId, FeatureValue, PoolOptions, Record, RecordId, RecordKind, RepairKind,
    RepairOptions, RepairOutcome, RepairReport, RepairReportStatus, RepairStatus,
    RetentionPolicy, SchemaFingerprint, Severity, Slot, SlotMetadata, StoreOptions,
    VersionStamp,
};

//! Public types exposed by the `annostore-core` crate.

pub mod options;
pub mod slot;
pub mod stamp;
pub mod state;
pub mod verification;

pub use options::{CheckPolicy, PoolOptions, RetentionPolicy, StoreOptions};
pub use slot::{AnnotatorId, DocumentId, Slot};
pub use stamp::{SchemaFingerprint, SlotMetadata, VersionStamp};
pub use state::{AnnotationState, FeatureValue, Record, RecordId, RecordKind};
pub use verification::{
    CheckKind, Diagnostic, DiagnosticReport, RepairKind, RepairOptions, RepairOutcome,
    RepairReport, RepairReportStatus, RepairStatus, Severity,
};

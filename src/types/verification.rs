//! Diagnostics produced by the consistency checks and reports produced by repairs.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::slot::Slot;
use super::stamp::VersionStamp;
use super::state::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// The structural checks known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// The same id appears more than once in the index.
    DuplicateIndexEntries,
    /// The index names an id that has no record.
    DanglingIndexEntries,
    /// A relation endpoint is missing or not indexed.
    DanglingRelations,
    /// A record referenced from an indexed record's features is itself neither indexed
    /// nor present.
    UnindexedReachable,
    /// Anchored record with `begin > end` or beyond the end of the text.
    OffsetBounds,
    /// A record nothing indexed can reach.
    OrphanedRecords,
}

impl CheckKind {
    /// Default pipeline order. Index hygiene runs first so the later checks see a
    /// deduplicated, resolvable index.
    pub const ALL: [CheckKind; 6] = [
        CheckKind::DuplicateIndexEntries,
        CheckKind::DanglingIndexEntries,
        CheckKind::DanglingRelations,
        CheckKind::UnindexedReachable,
        CheckKind::OffsetBounds,
        CheckKind::OrphanedRecords,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::DuplicateIndexEntries => "duplicate_index_entries",
            Self::DanglingIndexEntries => "dangling_index_entries",
            Self::DanglingRelations => "dangling_relations",
            Self::UnindexedReachable => "unindexed_reachable",
            Self::OffsetBounds => "offset_bounds",
            Self::OrphanedRecords => "orphaned_records",
        }
    }

    /// The repair paired with this check.
    #[must_use]
    pub fn repair(self) -> Option<RepairKind> {
        Some(match self {
            Self::DuplicateIndexEntries => RepairKind::DeduplicateIndex,
            Self::DanglingIndexEntries => RepairKind::DropDanglingIndexEntries,
            Self::DanglingRelations => RepairKind::RemoveDanglingRelations,
            Self::UnindexedReachable => RepairKind::ReindexReachable,
            Self::OffsetBounds => RepairKind::ClampOffsets,
            Self::OrphanedRecords => RepairKind::RemoveOrphans,
        })
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairKind {
    DeduplicateIndex,
    DropDanglingIndexEntries,
    RemoveDanglingRelations,
    ReindexReachable,
    ClampOffsets,
    RemoveOrphans,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub check: CheckKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixable_by: Option<RepairKind>,
}

impl Diagnostic {
    pub fn error(check: CheckKind, record: Option<RecordId>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, check, record, message)
    }

    pub fn warning(check: CheckKind, record: Option<RecordId>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, check, record, message)
    }

    pub fn info(check: CheckKind, record: Option<RecordId>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, check, record, message)
    }

    fn new(
        severity: Severity,
        check: CheckKind,
        record: Option<RecordId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            check,
            message: message.into(),
            record,
            fixable_by: check.repair(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "[{level}] {}: {}", self.check, self.message)
    }
}

/// Read-only check results for administrative tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub slot: Slot,
    pub version: VersionStamp,
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity == severity)
            .count()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairOptions {
    /// Run checks and repairs on a copy but persist nothing.
    #[serde(default)]
    pub dry_run: bool,
    /// Restrict repairs to these checks. Every check is still re-run afterwards.
    #[serde(default)]
    pub only: Option<Vec<CheckKind>>,
}

/// Outcome of one check's repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    /// The check found nothing; the repair did not run.
    Clean,
    /// Every defect the check reported is gone.
    Repaired,
    /// Some defects remain after the repair.
    Partial,
    /// The repair ran and nothing improved.
    Failed,
    /// Defects exist but the check has no repair or was excluded.
    NoRepair,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub check: CheckKind,
    pub repair: Option<RepairKind>,
    pub status: RepairStatus,
    pub defects_before: usize,
    pub defects_after: usize,
    /// Number of individual mutations the repair made.
    pub changes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairReportStatus {
    /// Nothing to repair.
    Clean,
    /// All defects repaired (and persisted unless dry-run).
    Healed,
    /// Repairs ran but defects remain.
    Partial,
    /// Blocking errors remain; nothing was persisted.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairReport {
    pub status: RepairReportStatus,
    pub outcomes: Vec<RepairOutcome>,
    /// Diagnostics of every check re-run after the repairs.
    pub diagnostics: Vec<Diagnostic>,
    /// Version written by the repair, if anything was persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed: Option<VersionStamp>,
}

//! Ordered consistency checks with optional paired repairs.
//!
//! The pipeline is assembled from explicit [`CheckPolicy`] entries at startup. It runs
//! on load (advisory, logged) and before every commit (errors from blocking checks refuse
//! the write). Repairs only run when an administrator asks for them, and every repair is
//! re-validated by running its check again.

pub mod checks;
pub mod repair;

use crate::error::{Result, StoreError};
use crate::types::{
    AnnotationState, CheckKind, CheckPolicy, Diagnostic, RepairOptions, RepairOutcome,
    RepairStatus, Severity, Slot,
};

#[derive(Debug, Clone)]
pub struct ConsistencyPipeline {
    policies: Vec<CheckPolicy>,
}

impl Default for ConsistencyPipeline {
    fn default() -> Self {
        Self::new(CheckPolicy::defaults())
    }
}

impl ConsistencyPipeline {
    #[must_use]
    pub fn new(policies: Vec<CheckPolicy>) -> Self {
        Self { policies }
    }

    #[must_use]
    pub fn policies(&self) -> &[CheckPolicy] {
        &self.policies
    }

    fn policy(&self, check: CheckKind) -> Option<&CheckPolicy> {
        self.policies.iter().find(|policy| policy.check == check)
    }

    /// Every configured check, regardless of when it is scheduled.
    #[must_use]
    pub fn run_all(&self, state: &AnnotationState) -> Vec<Diagnostic> {
        self.policies
            .iter()
            .flat_map(|policy| policy.check.run(state))
            .collect()
    }

    /// Read-time checks. Findings are logged and returned; they never fail the read.
    pub fn check_on_load(&self, slot: &Slot, state: &AnnotationState) -> Vec<Diagnostic> {
        let diagnostics: Vec<Diagnostic> = self
            .policies
            .iter()
            .filter(|policy| policy.on_load)
            .flat_map(|policy| policy.check.run(state))
            .collect();
        for diagnostic in &diagnostics {
            match diagnostic.severity {
                Severity::Error | Severity::Warning => tracing::warn!(
                    target = "annostore::consistency",
                    %slot,
                    check = %diagnostic.check,
                    "{}",
                    diagnostic.message
                ),
                Severity::Info => tracing::info!(
                    target = "annostore::consistency",
                    %slot,
                    check = %diagnostic.check,
                    "{}",
                    diagnostic.message
                ),
            }
        }
        diagnostics
    }

    /// Pre-commit checks. Returns the advisory findings, or `Corruption` carrying the
    /// blocking ones.
    pub fn check_on_save(&self, slot: &Slot, state: &AnnotationState) -> Result<Vec<Diagnostic>> {
        let diagnostics: Vec<Diagnostic> = self
            .policies
            .iter()
            .filter(|policy| policy.on_save)
            .flat_map(|policy| policy.check.run(state))
            .collect();
        let (blocking, advisory): (Vec<_>, Vec<_>) = diagnostics
            .into_iter()
            .partition(|diagnostic| self.is_blocking(diagnostic));
        if blocking.is_empty() {
            return Ok(advisory);
        }
        tracing::error!(
            target = "annostore::consistency",
            %slot,
            errors = blocking.len(),
            first = %blocking[0],
            "blocking consistency errors; refusing to persist"
        );
        Err(StoreError::Corruption {
            slot: slot.clone(),
            reason: summarize(&blocking),
            diagnostics: blocking,
        })
    }

    /// Error diagnostics from a check whose policy is blocking.
    #[must_use]
    pub fn is_blocking(&self, diagnostic: &Diagnostic) -> bool {
        diagnostic.severity == Severity::Error
            && self
                .policy(diagnostic.check)
                .is_some_and(|policy| policy.blocking)
    }

    /// Run the paired repair of every configured check that reports defects, in order,
    /// re-running each check right after its repair. Returns per-check outcomes and the
    /// diagnostics of a final full pass.
    pub fn repair(
        &self,
        state: &mut AnnotationState,
        options: &RepairOptions,
    ) -> (Vec<RepairOutcome>, Vec<Diagnostic>) {
        let mut outcomes = Vec::with_capacity(self.policies.len());
        for policy in &self.policies {
            let check = policy.check;
            let before = check.run(state).len();
            let allowed = options
                .only
                .as_ref()
                .is_none_or(|only| only.contains(&check));
            let repair = check.repair();

            let outcome = match repair {
                _ if before == 0 => RepairOutcome {
                    check,
                    repair,
                    status: RepairStatus::Clean,
                    defects_before: 0,
                    defects_after: 0,
                    changes: 0,
                },
                Some(kind) if allowed => {
                    let changes = kind.apply(state);
                    let after = check.run(state).len();
                    let status = if after == 0 {
                        RepairStatus::Repaired
                    } else if after < before {
                        RepairStatus::Partial
                    } else {
                        RepairStatus::Failed
                    };
                    tracing::info!(
                        target = "annostore::repair",
                        %check,
                        before,
                        after,
                        changes,
                        ?status,
                        "repair applied"
                    );
                    RepairOutcome {
                        check,
                        repair,
                        status,
                        defects_before: before,
                        defects_after: after,
                        changes,
                    }
                }
                _ => RepairOutcome {
                    check,
                    repair,
                    status: RepairStatus::NoRepair,
                    defects_before: before,
                    defects_after: before,
                    changes: 0,
                },
            };
            outcomes.push(outcome);
        }
        let diagnostics = self.run_all(state);
        (outcomes, diagnostics)
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    match diagnostics {
        [] => "no diagnostics".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (+{} more)", rest.len()),
    }
}

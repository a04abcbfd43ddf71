//! Pipeline execution result types.

use std::path::PathBuf;

use modelrun_types::StageState;

/// Outcome of one executed stage.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub name: String,
    /// 1-based position in the run order.
    pub position: usize,
    pub state: StageState,
    pub input_count: usize,
    pub output_count: usize,
    pub duration_secs: f64,
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub pipeline: String,
    pub stages: Vec<StageOutcome>,
    /// Replay archive written at the end of the run, if recording.
    pub archive: Option<PathBuf>,
    pub dry_run: bool,
    pub duration_secs: f64,
}

/// One problem found by a pipeline check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFinding {
    /// What the problem belongs to, e.g. `stage 'geogrid'`.
    pub subject: String,
    pub problem: String,
}

/// Result of a pipeline check.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    pub stages_checked: usize,
    pub namelists_loaded: usize,
    pub findings: Vec<CheckFinding>,
}

impl CheckResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.findings.is_empty()
    }

    pub(crate) fn push(&mut self, subject: impl Into<String>, problem: impl Into<String>) {
        self.findings.push(CheckFinding {
            subject: subject.into(),
            problem: problem.into(),
        });
    }
}

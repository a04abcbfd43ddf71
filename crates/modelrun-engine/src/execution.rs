//! Execution mode types for pipeline runs.

use std::path::PathBuf;

use crate::context::StagingMode;

/// Runtime execution options (not part of pipeline YAML config).
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Configure and record stages without touching files or spawning
    /// processes.
    pub dry_run: bool,
    /// Record into a replay archive. Overrides the pipeline's `record`.
    pub record: Option<RecordOptions>,
    /// Force symlink or copy staging.
    pub staging: Option<StagingMode>,
}

/// Where and how to record a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOptions {
    pub path: PathBuf,
    pub include_data: bool,
}

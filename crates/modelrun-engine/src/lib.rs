//! Core engine for modelrun: resolves symbolic paths, manages namelists,
//! runs model stages, and records and replays runs.

#![warn(clippy::pedantic)]

pub mod archive;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod namelist;
pub mod orchestrator;
pub mod record;
pub mod registry;
pub mod replay;
pub mod resource;
pub mod result;
pub mod stage;
mod workspace;

// Re-export public API for convenience
pub use context::{RunContext, RunMode, StagingMode};
pub use error::{EngineError, ErrorCategory};
pub use execution::{ExecutionOptions, RecordOptions};
pub use orchestrator::{
    build_registry, check_pipeline, execute_stage, prepare_context, replay_archive, run_pipeline,
};
pub use record::Recorder;
pub use registry::{StageKind, StageRegistry};
pub use replay::{ReplayArchive, ReplaySession, ReplaySummary};
pub use resource::ResourceResolver;
pub use result::{CheckResult, RunResult, StageOutcome};
pub use stage::{Stage, StageCore, StageError};

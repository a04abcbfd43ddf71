//! Executable stage lifecycle.
//!
//! A stage wraps one external program: it stages input files into its work
//! directory, runs the program (optionally under an MPI launcher) and moves
//! the files it produced to their destinations. The shared fields live in
//! [`StageCore`]; concrete stages implement [`Stage`] and override the hooks
//! they need.

mod command;
mod files;
mod model;
mod process;

use std::path::PathBuf;

use modelrun_types::{ClassConfig, FileEntry, StageCommand, StageRecord, StageState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::ErrorCategory;
use crate::namelist::NamelistError;
use crate::resource::ResourceError;

pub use command::{CommandStage, CommandStageSpec};
pub use files::OutputRule;
pub use model::{InputDirSpec, InputSpec, ModelStage, ModelStageSpec, NamelistBinding};

/// Default MPI launcher program.
pub const DEFAULT_MPI_LAUNCHER: &str = "mpirun";

/// Default working directory for stages that do not name one.
pub const DEFAULT_WORK_DIR: &str = ":NS_WORKSPACE_MODEL:";

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("record for stage '{found}' cannot be loaded into stage '{expected}'")]
    NameMismatch { expected: String, found: String },

    #[error("invalid command for stage '{stage}': {reason}")]
    InvalidCommand { stage: String, reason: String },

    #[error("stage '{stage}': invalid settings: {message}")]
    Settings { stage: String, message: String },

    #[error("stage '{stage}': input not found: {}", .path.display())]
    InputNotFound { stage: String, path: PathBuf },

    #[error("stage '{stage}': output not found: {}", .path.display())]
    OutputNotFound { stage: String, path: PathBuf },

    #[error("stage '{stage}': output destination already exists: {}", .path.display())]
    OutputCollision { stage: String, path: PathBuf },

    #[error("stage '{stage}': no output files matched in {}", .dir.display())]
    NoOutputMatch { stage: String, dir: PathBuf },

    #[error(
        "stage '{stage}': command '{command}' failed ({}){}",
        exit_description(.status),
        stderr_tail(.stderr)
    )]
    Execution {
        stage: String,
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("stage '{stage}': failed to start '{command}': {source}")]
    Spawn {
        stage: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Namelist(#[from] NamelistError),

    #[error("stage '{stage}': I/O error on {}: {source}", .path.display())]
    Io {
        stage: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn exit_description(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Lines of child stderr kept in an execution error message.
const STDERR_TAIL_LINES: usize = 20;
/// Upper bound on the bytes of stderr kept in an execution error message.
const STDERR_TAIL_BYTES: usize = 2048;

/// The last lines of `stderr`, prefixed for appending to an error message.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    if lines.iter().all(|l| l.trim().is_empty()) {
        return String::new();
    }
    let mut tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    if tail.len() > STDERR_TAIL_BYTES {
        let mut cut = tail.len() - STDERR_TAIL_BYTES;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.replace_range(..cut, "...");
    }
    format!("\nstderr:\n{tail}")
}

impl StageError {
    pub(crate) fn category(&self) -> ErrorCategory {
        match self {
            Self::NameMismatch { .. } => ErrorCategory::RegistryReplay,
            Self::InvalidCommand { .. } | Self::Settings { .. } => {
                ErrorCategory::ConfigurationState
            }
            Self::InputNotFound { .. }
            | Self::OutputNotFound { .. }
            | Self::OutputCollision { .. }
            | Self::NoOutputMatch { .. } => ErrorCategory::FilesystemContract,
            Self::Execution { .. } | Self::Spawn { .. } => ErrorCategory::ExternalProcess,
            Self::Resource(e) => e.category(),
            Self::Namelist(e) => e.category(),
            Self::Io { .. } => ErrorCategory::Infrastructure,
        }
    }

    /// Name of the stage that failed, when the error carries one.
    #[must_use]
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            Self::NameMismatch { expected: stage, .. }
            | Self::InvalidCommand { stage, .. }
            | Self::Settings { stage, .. }
            | Self::InputNotFound { stage, .. }
            | Self::OutputNotFound { stage, .. }
            | Self::OutputCollision { stage, .. }
            | Self::NoOutputMatch { stage, .. }
            | Self::Execution { stage, .. }
            | Self::Spawn { stage, .. }
            | Self::Io { stage, .. } => Some(stage),
            Self::Resource(_) | Self::Namelist(_) => None,
        }
    }

    pub(crate) fn io(stage: &str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let stage = stage.to_string();
        let path = path.into();
        move |source| Self::Io { stage, path, source }
    }
}

/// MPI launch settings for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpiSpec {
    #[serde(default = "default_launcher")]
    pub launcher: String,
    pub cores: u32,
}

fn default_launcher() -> String {
    DEFAULT_MPI_LAUNCHER.to_string()
}

fn default_work_dir() -> String {
    DEFAULT_WORK_DIR.to_string()
}

/// Decode a stage's construction settings from class config kwargs.
fn spec_from_class_config<T: DeserializeOwned>(
    stage: &str,
    class: &ClassConfig,
) -> Result<T, StageError> {
    serde_json::from_value(Value::Object(class.kwargs.clone())).map_err(|e| {
        StageError::Settings {
            stage: stage.to_string(),
            message: e.to_string(),
        }
    })
}

/// Encode normalized construction settings as class config kwargs.
fn spec_to_class_config<T: Serialize>(stage: &str, spec: &T) -> Result<ClassConfig, StageError> {
    let settings_error = |message: String| StageError::Settings {
        stage: stage.to_string(),
        message,
    };
    match serde_json::to_value(spec) {
        Ok(Value::Object(kwargs)) => Ok(ClassConfig::from_kwargs(kwargs)),
        Ok(other) => Err(settings_error(format!("expected an object, got {other}"))),
        Err(e) => Err(settings_error(e.to_string())),
    }
}

/// Fields every stage carries, plus the file-handling steps built on them.
#[derive(Debug, Clone)]
pub struct StageCore {
    pub name: String,
    pub command: StageCommand,
    pub work_dir: String,
    pub mpi_use: bool,
    pub mpi_launcher: Option<String>,
    pub mpi_cores: Option<u32>,
    pub class_config: ClassConfig,
    pub input_files: Vec<FileEntry>,
    pub output_files: Vec<FileEntry>,
    pub state: StageState,
}

impl StageCore {
    /// # Errors
    ///
    /// Returns [`StageError::InvalidCommand`] for an empty command.
    pub fn new(
        name: impl Into<String>,
        command: StageCommand,
        work_dir: impl Into<String>,
    ) -> Result<Self, StageError> {
        let name = name.into();
        if command.is_empty() {
            return Err(StageError::InvalidCommand {
                stage: name,
                reason: "command is empty".to_string(),
            });
        }
        Ok(Self {
            name,
            command,
            work_dir: work_dir.into(),
            mpi_use: false,
            mpi_launcher: None,
            mpi_cores: None,
            class_config: ClassConfig::default(),
            input_files: Vec::new(),
            output_files: Vec::new(),
            state: StageState::Constructed,
        })
    }

    /// Run the command under an MPI launcher with `cores` processes.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidCommand`] unless the command is a single
    /// token and `cores` is positive.
    pub fn with_mpi(mut self, mpi: &MpiSpec) -> Result<Self, StageError> {
        if !self.command.is_single() {
            return Err(StageError::InvalidCommand {
                stage: self.name,
                reason: "an MPI command must be a single program, not an argument list"
                    .to_string(),
            });
        }
        if mpi.cores == 0 {
            return Err(StageError::InvalidCommand {
                stage: self.name,
                reason: "MPI core count must be positive".to_string(),
            });
        }
        self.mpi_use = true;
        self.mpi_launcher = Some(mpi.launcher.clone());
        self.mpi_cores = Some(mpi.cores);
        Ok(self)
    }

    /// Queue a file or directory to be placed into the work directory under
    /// its own file name.
    pub fn add_input_file(&mut self, source: impl Into<String>, is_data: bool) {
        let source = source.into();
        let dest_name = file_name_of(&source);
        self.input_files.push(FileEntry {
            source,
            dest_dir: self.work_dir.clone(),
            dest_name,
            is_data,
            is_output: false,
        });
    }

    pub fn add_input_entry(&mut self, entry: FileEntry) {
        self.input_files.push(entry);
    }

    /// Queue a file produced in the work directory to be moved to
    /// `dest_dir`.
    pub fn add_output_file(&mut self, file_name: &str, dest_dir: impl Into<String>) {
        self.output_files.push(FileEntry {
            source: format!("{}/{file_name}", self.work_dir),
            dest_dir: dest_dir.into(),
            dest_name: file_name.to_string(),
            is_data: true,
            is_output: true,
        });
    }

    /// Default destination of collected outputs: `:NS_OUTPUT_PATH:/<name>`.
    #[must_use]
    pub fn output_save_dir(&self) -> String {
        format!("{}/{}", modelrun_types::uri::OUTPUT_PATH, self.name)
    }

    /// Argument vector the stage will execute.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        match (self.mpi_use, &self.mpi_launcher, self.mpi_cores) {
            (true, Some(launcher), Some(cores)) => vec![
                launcher.clone(),
                "--oversubscribe".to_string(),
                "-np".to_string(),
                cores.to_string(),
                self.command.to_string(),
            ],
            _ => self.command.to_argv(),
        }
    }

    /// Place every queued input into its destination directory.
    ///
    /// # Errors
    ///
    /// Fails if a source does not exist or cannot be linked or copied.
    pub fn stage_inputs(&self, ctx: &RunContext) -> Result<(), StageError> {
        if ctx.is_dry_run() {
            tracing::info!(stage = %self.name, "Dry run, skipping input staging");
            return Ok(());
        }
        files::stage_inputs(self, ctx)
    }

    /// Execute the command in the resolved work directory.
    ///
    /// # Errors
    ///
    /// Fails if the process cannot be started or exits unsuccessfully.
    pub fn invoke(&self, ctx: &RunContext) -> Result<(), StageError> {
        if ctx.is_dry_run() {
            tracing::info!(stage = %self.name, command = %self.command, "Dry run, skipping execution");
            return Ok(());
        }
        let work_dir = ctx.resolve_path(&self.work_dir)?;
        process::call_subprocess(&self.name, &self.argv(), &work_dir)
    }

    /// Move every queued output to its destination.
    ///
    /// # Errors
    ///
    /// Fails without moving anything if any source is missing or any
    /// destination already exists.
    pub fn collect_outputs(&self, ctx: &RunContext) -> Result<(), StageError> {
        if ctx.is_dry_run() {
            tracing::info!(stage = %self.name, "Dry run, skipping output collection");
            return Ok(());
        }
        files::collect_outputs(self, ctx)
    }

    /// Append manifest entries for files in a directory matching `rule`.
    ///
    /// Returns the number of entries added.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be read, or if nothing matched and the
    /// rule is required.
    pub fn discover_outputs(
        &mut self,
        rule: &OutputRule,
        ctx: &RunContext,
    ) -> Result<usize, StageError> {
        if ctx.is_dry_run() {
            return Ok(0);
        }
        files::discover_outputs(self, rule, ctx)
    }

    /// Problems that would stop the stage before its command runs.
    #[must_use]
    pub fn preflight(&self, ctx: &RunContext) -> Vec<String> {
        let mut problems = Vec::new();
        if let Err(e) = ctx.resolve_path(&self.work_dir) {
            problems.push(format!("work_dir: {e}"));
        }
        for entry in &self.input_files {
            match ctx.resolve_path(&entry.source) {
                Ok(real) if !real.exists() => {
                    problems.push(format!("input not found: {}", real.display()));
                }
                Ok(_) => {}
                Err(e) => problems.push(e.to_string()),
            }
        }
        problems
    }

    fn to_record(&self, custom_config: Value) -> StageRecord {
        StageRecord {
            name: self.name.clone(),
            command: self.command.clone(),
            work_dir: self.work_dir.clone(),
            mpi_use: self.mpi_use,
            mpi_launcher: self.mpi_launcher.clone(),
            mpi_cores: self.mpi_cores,
            class_config: self.class_config.clone(),
            custom_config,
            input_files: self.input_files.clone(),
            output_files: self.output_files.clone(),
        }
    }

    fn apply_record(&mut self, record: &StageRecord) {
        self.command = record.command.clone();
        self.work_dir = record.work_dir.clone();
        self.mpi_use = record.mpi_use;
        self.mpi_launcher = record.mpi_launcher.clone();
        self.mpi_cores = record.mpi_cores;
        self.class_config = record.class_config.clone();
        self.input_files = record.input_files.clone();
        self.output_files = record.output_files.clone();
    }
}

fn file_name_of(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

/// Lifecycle of an executable stage.
///
/// Implementors provide access to their [`StageCore`] and override the hooks
/// they need. [`execute`](Stage::execute) runs prepare, staging, invocation
/// and collection in order; [`replay`](Stage::replay) defaults to it.
pub trait Stage: std::fmt::Debug {
    fn core(&self) -> &StageCore;

    fn core_mut(&mut self) -> &mut StageCore;

    fn name(&self) -> &str {
        &self.core().name
    }

    fn state(&self) -> StageState {
        self.core().state
    }

    /// Stage-specific payload stored in the record.
    ///
    /// # Errors
    ///
    /// Implementations fail if the payload depends on missing run state.
    fn custom_config(&self, _ctx: &RunContext) -> Result<Value, StageError> {
        Ok(Value::Null)
    }

    /// Restore the payload produced by [`custom_config`](Stage::custom_config).
    ///
    /// # Errors
    ///
    /// Implementations fail if the payload is malformed.
    fn load_custom_config(
        &mut self,
        _custom: &Value,
        _ctx: &mut RunContext,
    ) -> Result<(), StageError> {
        tracing::debug!(stage = self.name(), "No custom config to load");
        Ok(())
    }

    /// Check what can be checked without running anything.
    fn preflight(&self, ctx: &RunContext) -> Vec<String> {
        self.core().preflight(ctx)
    }

    /// Work done before inputs are staged: resolving manifests, writing
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Implementations fail if required run state is missing.
    fn prepare(&mut self, _ctx: &mut RunContext) -> Result<(), StageError> {
        Ok(())
    }

    /// # Errors
    ///
    /// See [`StageCore::stage_inputs`].
    fn stage_inputs(&mut self, ctx: &RunContext) -> Result<(), StageError> {
        self.core().stage_inputs(ctx)
    }

    /// # Errors
    ///
    /// See [`StageCore::invoke`].
    fn invoke(&mut self, ctx: &RunContext) -> Result<(), StageError> {
        self.core().invoke(ctx)
    }

    /// # Errors
    ///
    /// See [`StageCore::collect_outputs`].
    fn collect_outputs(&mut self, ctx: &RunContext) -> Result<(), StageError> {
        self.core().collect_outputs(ctx)
    }

    /// Run the full lifecycle, advancing the state after each step.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    fn execute(&mut self, ctx: &mut RunContext) -> Result<(), StageError> {
        self.prepare(ctx)?;
        self.core_mut().state = StageState::ConfigPrepared;
        self.stage_inputs(ctx)?;
        self.core_mut().state = StageState::InputsStaged;
        self.invoke(ctx)?;
        self.core_mut().state = StageState::Invoked;
        self.collect_outputs(ctx)?;
        self.core_mut().state = StageState::OutputsCollected;
        Ok(())
    }

    /// Re-execute from a loaded record.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Stage::execute).
    fn replay(&mut self, ctx: &mut RunContext) -> Result<(), StageError> {
        tracing::debug!(stage = self.name(), "No replay override, executing normally");
        self.execute(ctx)
    }

    /// Snapshot the stage into a record.
    ///
    /// # Errors
    ///
    /// Fails if [`custom_config`](Stage::custom_config) fails.
    fn export_config(&self, ctx: &RunContext) -> Result<StageRecord, StageError> {
        let custom = self.custom_config(ctx)?;
        Ok(self.core().to_record(custom))
    }

    /// Repopulate the stage from a record exported by a stage of the same
    /// name.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::NameMismatch`] if the record belongs to another
    /// stage, or the error of [`load_custom_config`](Stage::load_custom_config).
    fn load_config(&mut self, record: &StageRecord, ctx: &mut RunContext) -> Result<(), StageError> {
        if record.name != self.name() {
            return Err(StageError::NameMismatch {
                expected: self.name().to_string(),
                found: record.name.clone(),
            });
        }
        self.core_mut().apply_record(record);
        self.load_custom_config(&record.custom_config, ctx)?;
        self.core_mut().state = StageState::ConfigLoaded;
        Ok(())
    }
}

/// Run `stage` to a terminal state: `Done` on success, `Failed` otherwise.
///
/// # Errors
///
/// Returns the stage's error after marking it failed.
pub fn drive(stage: &mut dyn Stage, ctx: &mut RunContext) -> Result<(), StageError> {
    let replaying = ctx.is_replay();
    tracing::info!(stage = stage.name(), replay = replaying, "Running stage");
    let result = if replaying {
        stage.replay(ctx)
    } else {
        stage.execute(ctx)
    };
    match result {
        Ok(()) => {
            stage.core_mut().state = StageState::Done;
            Ok(())
        }
        Err(err) => {
            tracing::error!(stage = stage.name(), error = %err, "Stage failed");
            stage.core_mut().state = StageState::Failed;
            Err(err)
        }
    }
}

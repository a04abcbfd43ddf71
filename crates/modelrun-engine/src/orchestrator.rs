//! Orchestrator: runs, records, replays and checks pipelines.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use modelrun_types::uri;

use crate::config::types::{PipelineConfig, SAVED_CONFIG_NAME};
use crate::config::validator::validate_pipeline;
use crate::context::{RunContext, WorkLayout};
use crate::error::EngineError;
use crate::execution::{ExecutionOptions, RecordOptions};
use crate::record::Recorder;
use crate::registry::{RegistryError, StageRegistry};
use crate::replay::{self, ReplayArchive, ReplaySummary};
use crate::result::{CheckResult, RunResult, StageOutcome};
use crate::stage::{self, Stage};

fn home_dir(config: &PipelineConfig) -> PathBuf {
    config
        .work_dir
        .as_ref()
        .map_or_else(WorkLayout::default_home, PathBuf::from)
}

/// Build the run context a pipeline describes: home directory, extra
/// tokens, output path and namelists.
///
/// # Errors
///
/// Fails if a token cannot be registered or a namelist cannot be loaded.
pub fn prepare_context(
    config: &PipelineConfig,
    options: &ExecutionOptions,
) -> Result<RunContext, EngineError> {
    let mut ctx = RunContext::new(home_dir(config))?;
    ctx.set_dry_run(options.dry_run);
    if let Some(mode) = options.staging {
        ctx.set_staging_mode(mode);
    }

    for (name, path) in &config.resources {
        ctx.resources.register(&uri::token(name), path.clone())?;
    }
    let output = ctx.resolve_path(&config.output_path)?;
    ctx.set_output_path(output)?;

    for (id, path) in &config.namelists {
        ctx.namelists.register_id(id);
        let real = ctx.resolve_path(path)?;
        ctx.namelists.load(&real, id)?;
    }

    tracing::debug!(
        home = %ctx.layout().home.display(),
        resources = config.resources.len(),
        namelists = config.namelists.len(),
        "Prepared run context"
    );
    Ok(ctx)
}

/// Register every declared stage under its name.
///
/// # Errors
///
/// Returns [`RegistryError::DuplicateRegistration`] for repeated names.
pub fn build_registry(config: &PipelineConfig) -> Result<StageRegistry, RegistryError> {
    let mut registry = StageRegistry::new();
    for stage in &config.stages {
        registry.register_kind(stage.name.clone(), stage.kind)?;
    }
    Ok(registry)
}

/// Drive one stage to completion and record it when a recorder is active
/// and the context is not replaying.
///
/// # Errors
///
/// Returns the stage's error, or a recording error.
pub fn execute_stage(
    stage: &mut dyn Stage,
    ctx: &mut RunContext,
    recorder: Option<&mut Recorder>,
) -> Result<(), EngineError> {
    stage::drive(stage, ctx)?;
    if let Some(recorder) = recorder {
        if !ctx.is_replay() {
            let record = stage.export_config(ctx)?;
            recorder.record(record, ctx)?;
        }
    }
    Ok(())
}

fn record_options(config: &PipelineConfig, options: &ExecutionOptions) -> Option<RecordOptions> {
    options.record.clone().or_else(|| {
        config.record.as_ref().map(|r| RecordOptions {
            path: PathBuf::from(&r.path),
            include_data: r.include_data,
        })
    })
}

/// Save a copy of the pipeline next to its results.
fn save_config_copy(ctx: &RunContext, config: &PipelineConfig) -> Result<PathBuf, EngineError> {
    let dir = ctx.resolve_path(uri::OUTPUT_PATH)?;
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(SAVED_CONFIG_NAME);
    let yaml = serde_yaml::to_string(config).context("Failed to serialize pipeline config")?;
    std::fs::write(&path, yaml)
        .with_context(|| format!("Failed to save pipeline copy: {}", path.display()))?;
    Ok(path)
}

/// Run every stage of the pipeline in order.
///
/// One fresh stage is constructed per `run` entry. The run stops at the first
/// failing stage. When recording, the archive is exported after the last
/// stage succeeds.
///
/// # Errors
///
/// Returns the first stage, registry or recording error.
pub fn run_pipeline(
    ctx: &mut RunContext,
    config: &PipelineConfig,
    registry: &StageRegistry,
    options: &ExecutionOptions,
) -> Result<RunResult, EngineError> {
    let start = Instant::now();
    let order = config.run_order();
    tracing::info!(
        pipeline = config.pipeline,
        stages = order.len(),
        dry_run = options.dry_run,
        "Starting pipeline run"
    );

    let mut recorder = match record_options(config, options) {
        Some(rec) => Some(Recorder::new(ctx, rec.path, rec.include_data)?),
        None => None,
    };
    let saved = save_config_copy(ctx, config)?;
    tracing::debug!(path = %saved.display(), "Saved pipeline copy");

    let mut outcomes = Vec::with_capacity(order.len());
    for (index, name) in order.into_iter().enumerate() {
        let declaration = config
            .stage(name)
            .ok_or_else(|| RegistryError::UnknownStage(name.to_string()))?;
        let mut stage = registry.construct(name, &declaration.class_config())?;

        let stage_start = Instant::now();
        execute_stage(stage.as_mut(), ctx, recorder.as_mut())?;
        let duration_secs = stage_start.elapsed().as_secs_f64();
        tracing::info!(stage = name, position = index + 1, duration_secs, "Stage finished");

        outcomes.push(StageOutcome {
            name: name.to_string(),
            position: index + 1,
            state: stage.state(),
            input_count: stage.core().input_files.len(),
            output_count: stage.core().output_files.len(),
            duration_secs,
        });
    }

    let archive = match recorder.as_mut() {
        Some(recorder) => recorder.export()?,
        None => None,
    };

    let duration_secs = start.elapsed().as_secs_f64();
    tracing::info!(
        pipeline = config.pipeline,
        stages = outcomes.len(),
        duration_secs,
        "Pipeline run finished"
    );
    Ok(RunResult {
        pipeline: config.pipeline.clone(),
        stages: outcomes,
        archive,
        dry_run: options.dry_run,
        duration_secs,
    })
}

/// Replay an archive in the given context.
///
/// # Errors
///
/// Fails if the archive cannot be loaded or a stage fails.
pub fn replay_archive(
    ctx: &mut RunContext,
    archive: &Path,
    registry: &StageRegistry,
) -> Result<ReplaySummary, EngineError> {
    let archive = ReplayArchive::open(archive, ctx)?;
    replay::replay_all(archive, registry, ctx)
}

/// Validate a pipeline and check everything that can be checked without
/// running it: tokens, namelist files, stage inputs.
///
/// # Errors
///
/// Returns an error only if the configuration is invalid; other problems are
/// reported as findings.
pub fn check_pipeline(config: &PipelineConfig) -> anyhow::Result<CheckResult> {
    tracing::info!(pipeline = config.pipeline, "Checking pipeline configuration");
    validate_pipeline(config)?;

    let mut result = CheckResult::default();
    let mut ctx = RunContext::new(home_dir(config))?;

    for (name, path) in &config.resources {
        if let Err(e) = ctx.resources.register(&uri::token(name), path.clone()) {
            result.push(format!("resource '{name}'"), e.to_string());
        }
    }
    match ctx.resolve_path(&config.output_path) {
        Ok(output) => {
            if let Err(e) = ctx.set_output_path(output) {
                result.push("output_path", e.to_string());
            }
        }
        Err(e) => result.push("output_path", e.to_string()),
    }

    for (id, path) in &config.namelists {
        ctx.namelists.register_id(id);
        let loaded = ctx
            .resolve_path(path)
            .map_err(EngineError::from)
            .and_then(|real| ctx.namelists.load(&real, id).map_err(EngineError::from));
        match loaded {
            Ok(()) => result.namelists_loaded += 1,
            Err(e) => result.push(format!("namelist '{id}'"), e.to_string()),
        }
    }

    for declaration in &config.stages {
        let stage = declaration
            .kind
            .construct(&declaration.name, &declaration.class_config())?;
        for problem in stage.preflight(&ctx) {
            result.push(format!("stage '{}'", declaration.name), problem);
        }
        result.stages_checked += 1;
    }

    Ok(result)
}

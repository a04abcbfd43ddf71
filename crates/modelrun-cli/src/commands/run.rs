use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use modelrun_engine::config::{parser, validator};
use modelrun_engine::{orchestrator, ExecutionOptions, RecordOptions, StagingMode};

/// Flags of the `run` command.
pub struct RunArgs {
    pub record: Option<PathBuf>,
    pub include_data: bool,
    pub dry_run: bool,
    pub copy_inputs: bool,
}

/// Execute the `run` command: parse, validate, and run a pipeline.
pub fn execute(pipeline_path: &Path, args: &RunArgs) -> Result<()> {
    // 1. Parse pipeline YAML
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate
    validator::validate_pipeline(&config)?;

    tracing::info!(
        pipeline = config.pipeline,
        stages = config.stages.len(),
        runs = config.run_order().len(),
        "Pipeline validated"
    );

    // 3. Build context and registry
    let options = ExecutionOptions {
        dry_run: args.dry_run,
        record: args.record.clone().map(|path| RecordOptions {
            path,
            include_data: args.include_data,
        }),
        staging: args.copy_inputs.then_some(StagingMode::Copy),
    };
    let mut ctx = orchestrator::prepare_context(&config, &options)?;
    let registry = orchestrator::build_registry(&config)?;

    // 4. Run
    let result = orchestrator::run_pipeline(&mut ctx, &config, &registry, &options)?;

    if result.dry_run {
        println!("Pipeline '{}' dry run completed.", result.pipeline);
    } else {
        println!("Pipeline '{}' completed successfully.", result.pipeline);
    }
    println!("  Stages run:      {}", result.stages.len());
    for outcome in &result.stages {
        println!(
            "    {:>2}. {:<20} {:<18} in: {:<3} out: {:<3} {:.2}s",
            outcome.position,
            outcome.name,
            outcome.state,
            outcome.input_count,
            outcome.output_count,
            outcome.duration_secs,
        );
    }
    if let Some(archive) = &result.archive {
        println!("  Replay archive:  {}", archive.display());
    }
    println!("  Duration:        {:.2}s", result.duration_secs);

    Ok(())
}

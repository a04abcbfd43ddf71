use std::path::Path;

use anyhow::{Context, Result};

use modelrun_engine::config::{parser, validator};
use modelrun_engine::{orchestrator, ExecutionOptions};

/// Execute the `replay` command: rebuild the pipeline's context and registry,
/// then re-run every stage recorded in the archive.
pub fn execute(archive: &Path, pipeline_path: &Path, dry_run: bool) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;
    validator::validate_pipeline(&config)?;

    let options = ExecutionOptions {
        dry_run,
        ..ExecutionOptions::default()
    };
    let mut ctx = orchestrator::prepare_context(&config, &options)?;
    let registry = orchestrator::build_registry(&config)?;

    let summary = orchestrator::replay_archive(&mut ctx, archive, &registry)
        .with_context(|| format!("Failed to replay archive: {}", archive.display()))?;

    println!("Replay of '{}' completed.", summary.archive.display());
    println!("  Stages replayed: {}", summary.stages.len());
    for (i, name) in summary.stages.iter().enumerate() {
        println!("    {:>2}. {name}", i + 1);
    }
    println!("  Duration:        {:.2}s", summary.duration_secs);
    Ok(())
}

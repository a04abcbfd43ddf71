use std::path::Path;

use anyhow::{Context, Result};

use modelrun_engine::config::{parser, validator};
use modelrun_engine::orchestrator;

/// Execute the `check` command: validate pipeline config, tokens, namelists
/// and stage inputs.
pub fn execute(pipeline_path: &Path) -> Result<()> {
    // 1. Parse pipeline YAML
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate pipeline structure
    validator::validate_pipeline(&config)?;
    println!("Pipeline structure: OK");

    // 3. Check resources, namelists and stages
    let result = orchestrator::check_pipeline(&config)?;

    println!(
        "{:18} {}/{}",
        "Namelists loaded:",
        result.namelists_loaded,
        config.namelists.len()
    );
    println!("{:18} {}", "Stages checked:", result.stages_checked);

    if result.is_ok() {
        println!("\nAll checks passed.");
        return Ok(());
    }

    println!();
    for finding in &result.findings {
        println!("{:18} FAILED", format!("{}:", finding.subject));
        println!("  {}", finding.problem);
    }
    anyhow::bail!("{} check(s) failed", result.findings.len())
}

//! Pipeline YAML parsing with environment variable substitution.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use modelrun_types::uri;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::config::types::PipelineConfig;

/// `${NAME}` references inside pipeline files.
static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env reference regex")
});

/// Expand `${NAME}` references from the process environment in one pass.
///
/// Expanded values are not scanned again, so a value containing `${..}` is
/// kept literally.
///
/// # Errors
///
/// Fails naming every unset variable, each once and sorted.
pub fn expand_env(text: &str) -> Result<String> {
    let mut unset = BTreeSet::new();
    let expanded = ENV_REF.replace_all(text, |caps: &Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            unset.insert(caps[1].to_string());
            String::new()
        })
    });
    if !unset.is_empty() {
        let names: Vec<_> = unset.into_iter().collect();
        anyhow::bail!(
            "pipeline references unset environment variable(s): {}",
            names.join(", ")
        );
    }
    Ok(expanded.into_owned())
}

/// Parse a pipeline YAML string (after env var substitution).
///
/// Relative paths are left as written.
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineConfig> {
    let expanded = expand_env(yaml_str)?;
    let config: PipelineConfig =
        serde_yaml::from_str(&expanded).context("Failed to parse pipeline YAML")?;
    Ok(config)
}

/// Parse a pipeline YAML file.
///
/// Relative local paths are resolved against the file's directory.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    let mut config = parse_pipeline_str(&content)
        .with_context(|| format!("Invalid pipeline file: {}", path.display()))?;
    let base = crate::context::absolute(path.parent().unwrap_or_else(|| Path::new(".")));
    anchor_paths(&mut config, &base);
    Ok(config)
}

/// Join relative, non-symbolic paths onto `base`.
fn anchor(path: &str, base: &Path) -> String {
    if uri::is_symbolic(path) || Path::new(path).is_absolute() {
        return path.to_string();
    }
    let relative = path.strip_prefix("./").unwrap_or(path);
    base.join(relative).to_string_lossy().into_owned()
}

/// Anchor `key` of every object in the array `settings[field]`.
fn anchor_setting_paths(
    settings: &mut serde_json::Map<String, Value>,
    field: &str,
    key: &str,
    base: &Path,
) {
    let Some(Value::Array(items)) = settings.get_mut(field) else {
        return;
    };
    for item in items {
        if let Some(Value::String(path)) = item.get_mut(key) {
            *path = anchor(path, base);
        }
    }
}

/// Resolve every local path field of `config` against `base`.
pub fn anchor_paths(config: &mut PipelineConfig, base: &Path) {
    if let Some(work_dir) = &mut config.work_dir {
        *work_dir = anchor(work_dir, base);
    }
    config.output_path = anchor(&config.output_path, base);
    for path in config.resources.values_mut() {
        *path = anchor(path, base);
    }
    for path in config.namelists.values_mut() {
        *path = anchor(path, base);
    }
    if let Some(record) = &mut config.record {
        record.path = anchor(&record.path, base);
    }
    for stage in &mut config.stages {
        anchor_setting_paths(&mut stage.settings, "inputs", "path", base);
        anchor_setting_paths(&mut stage.settings, "input_dirs", "path", base);
        anchor_setting_paths(&mut stage.settings, "outputs", "search_dir", base);
        anchor_setting_paths(&mut stage.settings, "outputs", "dest_dir", base);
    }
}

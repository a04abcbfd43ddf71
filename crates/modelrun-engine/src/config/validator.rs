//! Semantic validation for parsed pipeline configuration values.

use std::collections::HashSet;

use anyhow::{bail, Result};
use modelrun_types::uri;
use serde_json::Value;

use crate::config::types::PipelineConfig;
use crate::registry::StageKind;
use crate::stage::ModelStageSpec;

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.output_path.trim().is_empty() {
        errors.push("output_path must not be empty".to_string());
    }

    for name in config.resources.keys() {
        if !uri::is_well_formed(&uri::token(name)) {
            errors.push(format!("Resource name '{name}' does not form a valid token"));
        }
    }

    if config.stages.is_empty() {
        errors.push("Pipeline must declare at least one stage".to_string());
    }

    let mut seen = HashSet::new();
    for (i, stage) in config.stages.iter().enumerate() {
        if stage.name.trim().is_empty() {
            errors.push(format!("Stage {i} has an empty name"));
            continue;
        }
        if !seen.insert(stage.name.as_str()) {
            errors.push(format!("Stage '{}' is declared more than once", stage.name));
        }

        // Constructing the stage checks its settings, command and MPI rules.
        if let Err(e) = stage.kind.construct(&stage.name, &stage.class_config()) {
            errors.push(e.to_string());
            continue;
        }

        if stage.kind == StageKind::Model {
            let spec: Option<ModelStageSpec> =
                serde_json::from_value(Value::Object(stage.settings.clone())).ok();
            if let Some(binding) = spec.and_then(|s| s.namelist) {
                if !config.namelists.contains_key(&binding.id) {
                    errors.push(format!(
                        "Stage '{}' uses namelist '{}' which is not declared under namelists",
                        stage.name, binding.id
                    ));
                }
            }
        }
    }

    for name in &config.run {
        if config.stage(name).is_none() {
            errors.push(format!("run entry '{name}' does not name a declared stage"));
        }
    }

    if let Some(record) = &config.record {
        if record.path.trim().is_empty() {
            errors.push("record.path must not be empty".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn valid_yaml() -> &'static str {
        r#"
version: "1.0"
pipeline: test_pipeline
namelists:
  wps: /etc/namelist.wps
stages:
  - name: geogrid
    kind: model
    command: ./geogrid.exe
    mpi: { cores: 2 }
    namelist: { id: wps, file_name: namelist.wps }
  - name: listing
    kind: command
    command: [ls, -la]
"#
    }

    fn validation_error(yaml: &str) -> String {
        let config = parse_pipeline_str(yaml).unwrap();
        validate_pipeline(&config).unwrap_err().to_string()
    }

    #[test]
    fn test_valid_pipeline_passes() {
        let config = parse_pipeline_str(valid_yaml()).unwrap();
        assert!(validate_pipeline(&config).is_ok());
    }

    #[test]
    fn test_wrong_version_fails() {
        let err = validation_error(&valid_yaml().replace("\"1.0\"", "\"2.0\""));
        assert!(err.contains("Unsupported pipeline version"));
    }

    #[test]
    fn test_empty_pipeline_name_fails() {
        let err = validation_error(&valid_yaml().replace("test_pipeline", "\"\""));
        assert!(err.contains("Pipeline name must not be empty"));
    }

    #[test]
    fn test_duplicate_stage_names_fail() {
        let err = validation_error(&valid_yaml().replace("name: listing", "name: geogrid"));
        assert!(err.contains("declared more than once"));
    }

    #[test]
    fn test_undeclared_namelist_fails() {
        let err = validation_error(&valid_yaml().replace("id: wps", "id: wrf"));
        assert!(err.contains("namelist 'wrf'"));
    }

    #[test]
    fn test_mpi_with_argument_list_fails() {
        let yaml = valid_yaml().replace("command: [ls, -la]", "command: [ls, -la]\n    mpi: { cores: 2 }");
        let err = validation_error(&yaml);
        assert!(err.contains("single program"));
    }

    #[test]
    fn test_zero_cores_fails() {
        let err = validation_error(&valid_yaml().replace("cores: 2", "cores: 0"));
        assert!(err.contains("positive"));
    }

    #[test]
    fn test_unknown_run_entry_fails() {
        let yaml = format!("{}run: [geogrid, metgrid]\n", valid_yaml());
        let err = validation_error(&yaml);
        assert!(err.contains("run entry 'metgrid'"));
    }

    #[test]
    fn test_bad_resource_name_fails() {
        let yaml = format!("{}resources:\n  \"BAD:NAME\": /x\n", valid_yaml());
        let err = validation_error(&yaml);
        assert!(err.contains("BAD:NAME"));
    }

    #[test]
    fn test_unknown_setting_fails() {
        let yaml = valid_yaml().replace("command: ./geogrid.exe", "command: ./geogrid.exe\n    colour: blue");
        let err = validation_error(&yaml);
        assert!(err.contains("colour"));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let yaml = valid_yaml()
            .replace("\"1.0\"", "\"9\"")
            .replace("cores: 2", "cores: 0");
        let err = validation_error(&yaml);
        assert!(err.contains("Unsupported pipeline version"));
        assert!(err.contains("positive"));
    }
}

//! Pipeline YAML configuration types.

use indexmap::IndexMap;
use modelrun_types::ClassConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::registry::StageKind;

/// Default `output_path` when the pipeline does not set one.
pub const DEFAULT_OUTPUT_PATH: &str = "./outputs";

/// File name of the pipeline copy saved next to the results.
pub const SAVED_CONFIG_NAME: &str = "pipeline.yaml";

fn default_output_path() -> String {
    DEFAULT_OUTPUT_PATH.to_string()
}

/// Top-level pipeline configuration parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    /// Run home directory. Defaults to `$HOME/.config/modelrun`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default = "default_output_path")]
    pub output_path: String,
    /// Extra token registrations: `NAME` binds `:NS_NAME:`.
    #[serde(default)]
    pub resources: IndexMap<String, String>,
    /// Namelist id to the file loaded under it at run start.
    #[serde(default)]
    pub namelists: IndexMap<String, String>,
    pub stages: Vec<StageDeclaration>,
    /// Execution order by stage name. Defaults to declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordConfig>,
}

impl PipelineConfig {
    /// Stage names in execution order.
    #[must_use]
    pub fn run_order(&self) -> Vec<&str> {
        if self.run.is_empty() {
            self.stages.iter().map(|s| s.name.as_str()).collect()
        } else {
            self.run.iter().map(String::as_str).collect()
        }
    }

    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDeclaration> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// One declared stage. Everything besides `name` and `kind` is passed to
/// the stage constructor as keyword arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDeclaration {
    pub name: String,
    pub kind: StageKind,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl StageDeclaration {
    #[must_use]
    pub fn class_config(&self) -> ClassConfig {
        ClassConfig::from_kwargs(self.settings.clone())
    }
}

/// Record the run into a replay archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordConfig {
    pub path: String,
    #[serde(default)]
    pub include_data: bool,
}

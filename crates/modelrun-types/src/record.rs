//! Stage Configuration Record: the serializable snapshot of one stage.
//!
//! A record carries everything needed to reconstruct a stage and run it
//! again: its name (the registry join key), command, working directory, MPI
//! settings, the class-specific construction payload, a free-form custom
//! payload and the input/output file manifests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Command of a stage: a single program token or a full argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageCommand {
    Single(String),
    Args(Vec<String>),
}

impl StageCommand {
    /// Returns `true` for a single-token command.
    #[must_use]
    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }

    /// Argument vector of the command.
    #[must_use]
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            Self::Single(cmd) => vec![cmd.clone()],
            Self::Args(args) => args.clone(),
        }
    }

    /// Returns `true` if there is nothing to execute.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(cmd) => cmd.trim().is_empty(),
            Self::Args(args) => args.first().map_or(true, |a| a.trim().is_empty()),
        }
    }
}

impl std::fmt::Display for StageCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(cmd) => f.write_str(cmd),
            Self::Args(args) => f.write_str(&args.join(" ")),
        }
    }
}

impl From<&str> for StageCommand {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<Vec<String>> for StageCommand {
    fn from(value: Vec<String>) -> Self {
        Self::Args(value)
    }
}

/// One entry of a stage's input or output file manifest.
///
/// `source` and `dest_dir` may be symbolic. `is_data` marks user-supplied
/// data (as opposed to packaged resources); `is_output` marks files produced
/// by a stage. Only `is_data && !is_output` input entries are embedded into a
/// replay archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub source: String,
    pub dest_dir: String,
    pub dest_name: String,
    #[serde(default)]
    pub is_data: bool,
    #[serde(default)]
    pub is_output: bool,
}

impl FileEntry {
    /// Returns `true` if the recorder should copy this input into an archive.
    #[must_use]
    pub fn is_embeddable(&self) -> bool {
        self.is_data && !self.is_output
    }
}

/// Positional and keyword arguments needed to reconstruct a stage instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassConfig {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl ClassConfig {
    /// Build a class config holding only keyword arguments.
    #[must_use]
    pub fn from_kwargs(kwargs: Map<String, Value>) -> Self {
        Self {
            args: Vec::new(),
            kwargs,
        }
    }
}

/// Serializable snapshot of one stage instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub command: StageCommand,
    pub work_dir: String,
    #[serde(default)]
    pub mpi_use: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpi_launcher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpi_cores: Option<u32>,
    #[serde(default)]
    pub class_config: ClassConfig,
    #[serde(default)]
    pub custom_config: Value,
    #[serde(default)]
    pub input_files: Vec<FileEntry>,
    #[serde(default)]
    pub output_files: Vec<FileEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> StageRecord {
        StageRecord {
            name: "geogrid".into(),
            command: StageCommand::from("./geogrid.exe"),
            work_dir: ":NS_WORKSPACE_MODEL:/WPS".into(),
            mpi_use: true,
            mpi_launcher: Some("mpirun".into()),
            mpi_cores: Some(4),
            class_config: ClassConfig::default(),
            custom_config: serde_json::json!({"namelist": {"share": {"max_dom": 1}}}),
            input_files: vec![FileEntry {
                source: "/data/GEOGRID.TBL".into(),
                dest_dir: ":NS_WORKSPACE_MODEL:/WPS/geogrid".into(),
                dest_name: "GEOGRID.TBL".into(),
                is_data: false,
                is_output: false,
            }],
            output_files: vec![],
        }
    }

    #[test]
    fn command_untagged_forms() {
        let single: StageCommand = serde_json::from_str("\"./real.exe\"").unwrap();
        assert!(single.is_single());
        let args: StageCommand = serde_json::from_str(r#"["sh", "-c", "true"]"#).unwrap();
        assert_eq!(args.to_argv(), vec!["sh", "-c", "true"]);
        assert_eq!(args.to_string(), "sh -c true");
    }

    #[test]
    fn empty_command_detection() {
        assert!(StageCommand::from("  ").is_empty());
        assert!(StageCommand::Args(vec![]).is_empty());
        assert!(!StageCommand::from("ls").is_empty());
    }

    #[test]
    fn record_json_round_trip_is_field_equal() {
        let record = sample_record();
        let json = serde_json::to_string_pretty(&record).unwrap();
        let back: StageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn record_missing_optional_fields_defaults() {
        let json = r#"{"name": "link", "command": "ls", "work_dir": "/tmp"}"#;
        let record: StageRecord = serde_json::from_str(json).unwrap();
        assert!(!record.mpi_use);
        assert!(record.input_files.is_empty());
        assert_eq!(record.custom_config, Value::Null);
    }

    #[test]
    fn embeddable_requires_data_and_not_output() {
        let mut entry = sample_record().input_files.remove(0);
        assert!(!entry.is_embeddable());
        entry.is_data = true;
        assert!(entry.is_embeddable());
        entry.is_output = true;
        assert!(!entry.is_embeddable());
    }
}

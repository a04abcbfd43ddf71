//! A stage that runs a model program with a namelist, staged inputs and
//! collected outputs.

use std::fs;

use modelrun_types::{ClassConfig, FileEntry, NamelistDocument, StageCommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{default_work_dir, file_name_of, MpiSpec, OutputRule, Stage, StageCore, StageError};
use crate::context::RunContext;

fn default_true() -> bool {
    true
}

/// Namelist written into the work directory before the program runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamelistBinding {
    pub id: String,
    pub file_name: String,
}

/// A single input file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    pub path: String,
    /// Defaults to the stage's work directory.
    #[serde(default)]
    pub dest_dir: Option<String>,
    /// Defaults to the source's file name.
    #[serde(default)]
    pub dest_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_data: bool,
}

/// A directory whose entries are each staged as an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDirSpec {
    pub path: String,
    #[serde(default)]
    pub dest_dir: Option<String>,
    #[serde(default = "default_true")]
    pub is_data: bool,
}

/// Construction settings of a [`ModelStage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelStageSpec {
    pub command: StageCommand,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default)]
    pub mpi: Option<MpiSpec>,
    #[serde(default)]
    pub namelist: Option<NamelistBinding>,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub input_dirs: Vec<InputDirSpec>,
    #[serde(default)]
    pub outputs: Vec<OutputRule>,
}

#[derive(Debug, Clone)]
pub struct ModelStage {
    core: StageCore,
    spec: ModelStageSpec,
}

impl ModelStage {
    /// # Errors
    ///
    /// Fails if the command is empty or the MPI settings are invalid.
    pub fn new(name: &str, spec: ModelStageSpec) -> Result<Self, StageError> {
        let class_config = super::spec_to_class_config(name, &spec)?;
        let mut core = StageCore::new(name, spec.command.clone(), spec.work_dir.clone())?;
        if let Some(mpi) = &spec.mpi {
            core = core.with_mpi(mpi)?;
        }
        core.class_config = class_config;
        Ok(Self { core, spec })
    }

    /// # Errors
    ///
    /// Returns [`StageError::Settings`] if the keyword arguments do not
    /// describe a [`ModelStageSpec`].
    pub fn from_class_config(name: &str, class: &ClassConfig) -> Result<Self, StageError> {
        Self::new(name, super::spec_from_class_config(name, class)?)
    }

    #[must_use]
    pub fn spec(&self) -> &ModelStageSpec {
        &self.spec
    }

    /// A destination directory: symbolic and absolute paths as given,
    /// relative ones below the work directory.
    fn dest_dir(&self, dest_dir: Option<&str>) -> String {
        match dest_dir {
            None => self.core.work_dir.clone(),
            Some(dir) if modelrun_types::uri::is_symbolic(dir) || dir.starts_with('/') => {
                dir.to_string()
            }
            Some(dir) => format!(
                "{}/{}",
                self.core.work_dir.trim_end_matches('/'),
                dir.trim_start_matches("./")
            ),
        }
    }

    /// Expand declared inputs and input directories into manifest entries.
    fn resolve_inputs(&mut self, ctx: &RunContext) -> Result<(), StageError> {
        let mut entries = Vec::new();
        for input in &self.spec.inputs {
            entries.push(FileEntry {
                source: input.path.clone(),
                dest_dir: self.dest_dir(input.dest_dir.as_deref()),
                dest_name: input
                    .dest_name
                    .clone()
                    .unwrap_or_else(|| file_name_of(&input.path)),
                is_data: input.is_data,
                is_output: false,
            });
        }

        for dir in &self.spec.input_dirs {
            let real = ctx.resolve_path(&dir.path)?;
            if !real.is_dir() {
                return Err(StageError::InputNotFound {
                    stage: self.core.name.clone(),
                    path: real,
                });
            }
            let mut names: Vec<String> = fs::read_dir(&real)
                .map_err(StageError::io(&self.core.name, &real))?
                .filter_map(Result::ok)
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect();
            names.sort_unstable();

            let base = dir.path.trim_end_matches('/');
            let dest_dir = self.dest_dir(dir.dest_dir.as_deref());
            for name in names {
                entries.push(FileEntry {
                    source: format!("{base}/{name}"),
                    dest_dir: dest_dir.clone(),
                    dest_name: name,
                    is_data: dir.is_data,
                    is_output: false,
                });
            }
        }

        tracing::debug!(stage = %self.core.name, count = entries.len(), "Resolved input manifest");
        self.core.input_files.extend(entries);
        Ok(())
    }

    fn write_namelist(&self, ctx: &RunContext) -> Result<(), StageError> {
        let Some(binding) = &self.spec.namelist else {
            return Ok(());
        };
        let path = ctx.resolve_path(&format!("{}/{}", self.core.work_dir, binding.file_name))?;
        ctx.namelists.write(&path, &binding.id, true)?;
        Ok(())
    }

    fn settings_error(&self, message: String) -> StageError {
        StageError::Settings {
            stage: self.core.name.clone(),
            message,
        }
    }
}

impl Stage for ModelStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    /// The namelist document the stage ran with, under `"namelist"`.
    fn custom_config(&self, ctx: &RunContext) -> Result<Value, StageError> {
        let Some(binding) = &self.spec.namelist else {
            return Ok(Value::Null);
        };
        let doc = ctx.namelists.get(&binding.id)?;
        let doc = serde_json::to_value(doc).map_err(|e| self.settings_error(e.to_string()))?;
        Ok(serde_json::json!({ "namelist": doc }))
    }

    fn load_custom_config(&mut self, custom: &Value, ctx: &mut RunContext) -> Result<(), StageError> {
        let (Some(binding), Some(doc)) = (&self.spec.namelist, custom.get("namelist")) else {
            return Ok(());
        };
        let doc: NamelistDocument = serde_json::from_value(doc.clone())
            .map_err(|e| self.settings_error(format!("bad recorded namelist: {e}")))?;
        ctx.namelists.register_id(&binding.id);
        ctx.namelists.update(doc, &binding.id)?;
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut RunContext) -> Result<(), StageError> {
        if !ctx.is_replay() {
            self.resolve_inputs(ctx)?;
        }
        self.write_namelist(ctx)
    }

    fn collect_outputs(&mut self, ctx: &RunContext) -> Result<(), StageError> {
        if !ctx.is_replay() {
            for rule in &self.spec.outputs {
                self.core.discover_outputs(rule, ctx)?;
            }
        }
        self.core.collect_outputs(ctx)
    }

    fn preflight(&self, ctx: &RunContext) -> Vec<String> {
        let mut problems = self.core.preflight(ctx);
        for path in self
            .spec
            .inputs
            .iter()
            .map(|i| &i.path)
            .chain(self.spec.input_dirs.iter().map(|d| &d.path))
        {
            match ctx.resolve_path(path) {
                Ok(real) if !real.exists() => {
                    problems.push(format!("input not found: {}", real.display()));
                }
                Ok(_) => {}
                Err(e) => problems.push(e.to_string()),
            }
        }
        if let Some(binding) = &self.spec.namelist {
            if !ctx.namelists.is_loaded(&binding.id) {
                problems.push(format!("namelist '{}' is not loaded", binding.id));
            }
        }
        problems
    }
}

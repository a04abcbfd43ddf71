//! A stage that only runs a command.

use modelrun_types::{ClassConfig, StageCommand, StageState};
use serde::{Deserialize, Serialize};

use super::{default_work_dir, MpiSpec, Stage, StageCore, StageError};
use crate::context::RunContext;

/// Construction settings of a [`CommandStage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandStageSpec {
    pub command: StageCommand,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default)]
    pub mpi: Option<MpiSpec>,
}

/// Runs its command in its work directory, with no file staging or output
/// collection.
#[derive(Debug, Clone)]
pub struct CommandStage {
    core: StageCore,
}

impl CommandStage {
    /// # Errors
    ///
    /// Fails if the command is empty or the MPI settings are invalid.
    pub fn new(name: &str, spec: CommandStageSpec) -> Result<Self, StageError> {
        let class_config = super::spec_to_class_config(name, &spec)?;
        let mut core = StageCore::new(name, spec.command, spec.work_dir)?;
        if let Some(mpi) = &spec.mpi {
            core = core.with_mpi(mpi)?;
        }
        core.class_config = class_config;
        Ok(Self { core })
    }

    /// Build from the keyword arguments of a class config.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Settings`] if the keyword arguments do not
    /// describe a [`CommandStageSpec`].
    pub fn from_class_config(name: &str, class: &ClassConfig) -> Result<Self, StageError> {
        Self::new(name, super::spec_from_class_config(name, class)?)
    }
}

impl Stage for CommandStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn execute(&mut self, ctx: &mut RunContext) -> Result<(), StageError> {
        self.invoke(ctx)?;
        self.core.state = StageState::Invoked;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_class_config_defaults() {
        let class = ClassConfig::from_kwargs(
            json!({"command": "./ungrib.exe"}).as_object().unwrap().clone(),
        );
        let stage = CommandStage::from_class_config("ungrib", &class).unwrap();
        assert_eq!(stage.core().work_dir, ":NS_WORKSPACE_MODEL:");
        assert!(!stage.core().mpi_use);
        assert_eq!(stage.core().class_config.kwargs["command"], "./ungrib.exe");
    }

    #[test]
    fn test_unknown_setting_rejected() {
        let class = ClassConfig::from_kwargs(
            json!({"command": "x", "bogus": 1}).as_object().unwrap().clone(),
        );
        let err = CommandStage::from_class_config("x", &class).unwrap_err();
        assert!(matches!(err, StageError::Settings { .. }));
    }

    #[test]
    fn test_mpi_settings_applied() {
        let class = ClassConfig::from_kwargs(
            json!({"command": "./real.exe", "mpi": {"cores": 8}})
                .as_object()
                .unwrap()
                .clone(),
        );
        let stage = CommandStage::from_class_config("real", &class).unwrap();
        assert_eq!(stage.core().mpi_launcher.as_deref(), Some("mpirun"));
        assert_eq!(stage.core().mpi_cores, Some(8));
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_runs_command_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RunContext::new(dir.path()).unwrap();
        let spec = CommandStageSpec {
            command: StageCommand::Args(vec!["sh".into(), "-c".into(), "echo ok > done".into()]),
            work_dir: ":NS_TEMP_PATH:/cmd".into(),
            mpi: None,
        };
        let mut stage = CommandStage::new("cmd", spec).unwrap();
        crate::stage::drive(&mut stage, &mut ctx).unwrap();
        assert_eq!(stage.state(), StageState::Done);
        assert!(dir.path().join("tmp/cmd/done").exists());
    }
}

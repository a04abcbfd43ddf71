//! Stage registry: stage names to the factories that construct them.
//!
//! Built-in behaviours form the closed [`StageKind`] set. Embedders can add
//! their own stage types by registering a constructor function under a name.

use std::collections::HashMap;
use std::fmt;

use modelrun_types::ClassConfig;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;
use crate::stage::{CommandStage, ModelStage, Stage, StageError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("stage '{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("unknown stage '{0}': it is not registered in this run")]
    UnknownStage(String),
}

impl RegistryError {
    pub(crate) fn category(&self) -> ErrorCategory {
        ErrorCategory::RegistryReplay
    }
}

/// Built-in stage behaviours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Runs a command, nothing else.
    Command,
    /// Writes a namelist, stages inputs, runs a program, collects outputs.
    Model,
}

impl StageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Model => "model",
        }
    }

    /// # Errors
    ///
    /// Fails if `class` does not hold valid settings for this kind.
    pub fn construct(self, name: &str, class: &ClassConfig) -> Result<Box<dyn Stage>, StageError> {
        Ok(match self {
            Self::Command => Box::new(CommandStage::from_class_config(name, class)?),
            Self::Model => Box::new(ModelStage::from_class_config(name, class)?),
        })
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constructor for a stage type defined outside this crate.
pub type StageConstructor =
    Box<dyn Fn(&str, &ClassConfig) -> Result<Box<dyn Stage>, StageError> + Send + Sync>;

pub enum StageFactory {
    Builtin(StageKind),
    Custom(StageConstructor),
}

impl StageFactory {
    /// # Errors
    ///
    /// Returns the constructor's error.
    pub fn construct(&self, name: &str, class: &ClassConfig) -> Result<Box<dyn Stage>, StageError> {
        match self {
            Self::Builtin(kind) => kind.construct(name, class),
            Self::Custom(ctor) => ctor(name, class),
        }
    }
}

impl fmt::Debug for StageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(kind) => f.debug_tuple("Builtin").field(kind).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Default)]
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
}

impl StageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateRegistration`] if `name` is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: StageFactory,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::DuplicateRegistration(name));
        }
        tracing::debug!(stage = %name, ?factory, "Registered stage");
        self.factories.insert(name, factory);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateRegistration`] if `name` is taken.
    pub fn register_kind(
        &mut self,
        name: impl Into<String>,
        kind: StageKind,
    ) -> Result<(), RegistryError> {
        self.register(name, StageFactory::Builtin(kind))
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateRegistration`] if `name` is taken.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, ctor: F) -> Result<(), RegistryError>
    where
        F: Fn(&str, &ClassConfig) -> Result<Box<dyn Stage>, StageError> + Send + Sync + 'static,
    {
        self.register(name, StageFactory::Custom(Box::new(ctor)))
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownStage`] if `name` was never registered.
    pub fn resolve(&self, name: &str) -> Result<&StageFactory, RegistryError> {
        self.factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownStage(name.to_string()))
    }

    /// Construct the stage registered under `name`.
    ///
    /// # Errors
    ///
    /// Fails if `name` is unknown or its constructor rejects `class`.
    pub fn construct(
        &self,
        name: &str,
        class: &ClassConfig,
    ) -> Result<Box<dyn Stage>, crate::EngineError> {
        Ok(self.resolve(name)?.construct(name, class)?)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

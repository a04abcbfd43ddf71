//! Engine-level error type and its categories.
//!
//! Each module owns a precise error enum; [`EngineError`] wraps them at the
//! API boundary and sorts every failure into one [`ErrorCategory`] so that
//! callers can report failures uniformly.

use std::fmt;

use crate::archive::ArchiveError;
use crate::namelist::NamelistError;
use crate::record::RecordError;
use crate::registry::RegistryError;
use crate::replay::ReplayError;
use crate::resource::ResourceError;
use crate::stage::StageError;

/// Broad failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unregistered ids, missing data, bad tokens, invalid pipeline files.
    ConfigurationState,
    /// Missing inputs or outputs, destination collisions, existing files.
    FilesystemContract,
    /// A child process failed to start or exited unsuccessfully.
    ExternalProcess,
    /// Unknown stage names, record/instance mismatches, corrupt archives.
    RegistryReplay,
    /// I/O and serialization failures outside any stage contract.
    Infrastructure,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigurationState => "configuration_state",
            Self::FilesystemContract => "filesystem_contract",
            Self::ExternalProcess => "external_process",
            Self::RegistryReplay => "registry_replay",
            Self::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Namelist(#[from] NamelistError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// Pipeline configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Resource(e) => e.category(),
            Self::Namelist(e) => e.category(),
            Self::Registry(e) => e.category(),
            Self::Stage(e) => e.category(),
            Self::Record(e) => e.category(),
            Self::Archive(e) => e.category(),
            Self::Replay(e) => e.category(),
            Self::Config(_) => ErrorCategory::ConfigurationState,
            Self::Io(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Engine failures are never retried automatically.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Name of the stage the failure belongs to, if any.
    #[must_use]
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            Self::Stage(e) => e.stage_name(),
            Self::Replay(ReplayError::StageFailed { stage, .. }) => Some(stage),
            _ => None,
        }
    }
}

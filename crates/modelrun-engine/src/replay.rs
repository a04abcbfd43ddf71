//! Replay engine: re-executes the stages recorded in an archive.
//!
//! [`ReplayArchive::open`] unpacks an archive into the replay scratch area
//! and reads its manifest. [`ReplaySession`] then reconstructs stages one at
//! a time through the [`StageRegistry`]; [`replay_all`] drives a session to
//! completion.

use std::path::{Path, PathBuf};
use std::time::Instant;

use modelrun_types::{uri, StageRecord};

use crate::archive::{self, ArchiveError};
use crate::context::{RunContext, RunMode};
use crate::error::{EngineError, ErrorCategory};
use crate::registry::StageRegistry;
use crate::resource::ResourceError;
use crate::stage::{self, Stage};
use crate::workspace;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("replay scratch I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("replay of stage '{stage}' (#{position}) failed: {source}")]
    StageFailed {
        position: usize,
        stage: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl ReplayError {
    pub(crate) fn category(&self) -> ErrorCategory {
        match self {
            Self::ArchiveNotFound(_) => ErrorCategory::FilesystemContract,
            Self::Archive(e) => e.category(),
            Self::Resource(e) => e.category(),
            Self::Io { .. } => ErrorCategory::Infrastructure,
            Self::StageFailed { source, .. } => source.category(),
        }
    }
}

/// An unpacked replay archive.
#[derive(Debug)]
pub struct ReplayArchive {
    path: PathBuf,
    records: Vec<StageRecord>,
}

impl ReplayArchive {
    /// Wipe the replay scratch area, unpack `path` into it and read the
    /// manifest.
    ///
    /// # Errors
    ///
    /// Fails if the archive is missing or corrupt, or has no manifest.
    pub fn open(path: &Path, ctx: &RunContext) -> Result<Self, ReplayError> {
        if !path.is_file() {
            return Err(ReplayError::ArchiveNotFound(path.to_path_buf()));
        }
        tracing::info!(path = %path.display(), "Loading replay archive");

        let scratch = ctx.resolve_path(uri::WORKSPACE_REPLAY)?;
        workspace::reset_dir(&scratch).map_err(|source| ReplayError::Io {
            path: scratch.clone(),
            source,
        })?;
        archive::unpack_into(path, &scratch)?;
        let records = archive::read_manifest(&scratch)?;

        tracing::info!(stages = records.len(), "Replay archive loaded");
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    /// Stage names in archive order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn into_session(self, registry: &StageRegistry) -> ReplaySession<'_> {
        ReplaySession {
            records: self.records.into_iter(),
            registry,
            position: 0,
        }
    }
}

/// Stepwise replay over the records of one archive.
///
/// The first call to [`next_stage`](Self::next_stage) switches the context
/// into replay mode; it switches back once the records are exhausted.
#[derive(Debug)]
pub struct ReplaySession<'r> {
    records: std::vec::IntoIter<StageRecord>,
    registry: &'r StageRegistry,
    position: usize,
}

impl ReplaySession<'_> {
    /// Reconstruct the next recorded stage and load its record.
    ///
    /// Returns `None` when every record has been handed out. The stage is
    /// configured but not executed.
    pub fn next_stage(
        &mut self,
        ctx: &mut RunContext,
    ) -> Option<Result<(String, Box<dyn Stage>), EngineError>> {
        let Some(record) = self.records.next() else {
            ctx.set_mode(RunMode::Live);
            return None;
        };
        ctx.set_mode(RunMode::Replay);
        self.position += 1;
        let position = self.position;
        let name = record.name.clone();

        let result = self
            .registry
            .construct(&name, &record.class_config)
            .and_then(|mut stage| {
                stage.load_config(&record, ctx)?;
                Ok(stage)
            })
            .map(|stage| (name.clone(), stage))
            .map_err(|source| wrap(position, &name, source));
        Some(result)
    }

    /// Records not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.records.len()
    }

    /// 1-based position of the stage last handed out.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }
}

fn wrap(position: usize, stage: &str, source: EngineError) -> EngineError {
    ReplayError::StageFailed {
        position,
        stage: stage.to_string(),
        source: Box::new(source),
    }
    .into()
}

/// Outcome of a completed replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    pub archive: PathBuf,
    pub stages: Vec<String>,
    pub duration_secs: f64,
}

/// Replay every stage of `archive` in order, stopping at the first failure.
///
/// The context is always returned to live mode, also on failure.
///
/// # Errors
///
/// Returns [`ReplayError::StageFailed`] naming the stage and its position.
pub fn replay_all(
    archive: ReplayArchive,
    registry: &StageRegistry,
    ctx: &mut RunContext,
) -> Result<ReplaySummary, EngineError> {
    let start = Instant::now();
    let archive_path = archive.path().to_path_buf();
    let total = archive.len();
    let mut session = archive.into_session(registry);
    let mut stages = Vec::with_capacity(total);

    while let Some(next) = session.next_stage(ctx) {
        let (name, mut stage) = match next {
            Ok(pair) => pair,
            Err(err) => {
                ctx.set_mode(RunMode::Live);
                return Err(err);
            }
        };
        tracing::info!(stage = %name, position = session.position(), total, "Replaying stage");
        if let Err(err) = stage::drive(stage.as_mut(), ctx) {
            ctx.set_mode(RunMode::Live);
            return Err(wrap(session.position(), &name, err.into()));
        }
        stages.push(name);
    }

    let duration_secs = start.elapsed().as_secs_f64();
    tracing::info!(stages = stages.len(), duration_secs, "Replay finished");
    Ok(ReplaySummary {
        archive: archive_path,
        stages,
        duration_secs,
    })
}

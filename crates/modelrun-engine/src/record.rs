//! Recorder: collects stage records during a run and exports them as a
//! replay archive.
//!
//! With data embedding enabled, every input entry marked as user data is
//! copied into `:NS_WORKSPACE_REPLAY:/<stage>/<occurrence>/` and its source
//! rewritten to point there, so the archive replays on another host.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use modelrun_types::{uri, StageRecord};

use crate::archive::{self, ArchiveError, ARCHIVE_EXTENSION};
use crate::context::RunContext;
use crate::error::ErrorCategory;
use crate::resource::ResourceError;
use crate::workspace;

/// File name used when the save path is a directory.
pub const DEFAULT_ARCHIVE_NAME: &str = "modelrun.replay";

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("stage '{stage}': cannot embed {}: {reason}", .path.display())]
    Embed {
        stage: String,
        path: PathBuf,
        reason: String,
    },

    #[error("recorder I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RecordError {
    pub(crate) fn category(&self) -> ErrorCategory {
        match self {
            Self::Resource(e) => e.category(),
            Self::Archive(e) => e.category(),
            Self::Embed { .. } => ErrorCategory::FilesystemContract,
            Self::Io { .. } => ErrorCategory::Infrastructure,
        }
    }

    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io { path, source }
    }
}

/// Normalize a save path: directories get [`DEFAULT_ARCHIVE_NAME`], other
/// paths get the `.replay` extension appended unless they already have it.
#[must_use]
pub fn archive_path(save_path: &Path) -> PathBuf {
    if save_path.is_dir() {
        return save_path.join(DEFAULT_ARCHIVE_NAME);
    }
    if save_path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION) {
        return save_path.to_path_buf();
    }
    let mut name = OsString::from(save_path.as_os_str());
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

#[derive(Debug)]
pub struct Recorder {
    save_path: PathBuf,
    include_data: bool,
    content_dir: PathBuf,
    records: Vec<StageRecord>,
    occurrences: HashMap<String, usize>,
}

impl Recorder {
    /// Create a recorder and wipe the scratch area it records into.
    ///
    /// # Errors
    ///
    /// Fails if the scratch token cannot be resolved or the directory reset.
    pub fn new(
        ctx: &RunContext,
        save_path: impl Into<PathBuf>,
        include_data: bool,
    ) -> Result<Self, RecordError> {
        let content_dir = ctx.resolve_path(uri::WORKSPACE_REPLAY)?;
        workspace::reset_dir(&content_dir).map_err(RecordError::io(&content_dir))?;
        let save_path = save_path.into();
        tracing::info!(
            path = %save_path.display(),
            include_data,
            "Recording stages for replay"
        );
        Ok(Self {
            save_path,
            include_data,
            content_dir,
            records: Vec::new(),
            occurrences: HashMap::new(),
        })
    }

    /// Change where the archive goes or whether data is embedded.
    pub fn set_recorder(&mut self, save_path: Option<PathBuf>, include_data: Option<bool>) {
        if let Some(path) = save_path {
            self.save_path = path;
        }
        if let Some(include) = include_data {
            self.include_data = include;
        }
    }

    #[must_use]
    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    #[must_use]
    pub fn include_data(&self) -> bool {
        self.include_data
    }

    #[must_use]
    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record, embedding its data inputs when enabled.
    ///
    /// # Errors
    ///
    /// Fails if an embeddable source cannot be resolved or copied, or if two
    /// embedded sources of one record share a file name.
    pub fn record(&mut self, mut record: StageRecord, ctx: &RunContext) -> Result<(), RecordError> {
        let occurrence = self.occurrences.get(&record.name).copied().unwrap_or(0) + 1;

        if self.include_data {
            self.embed_data(&mut record, occurrence, ctx)?;
        }

        self.occurrences.insert(record.name.clone(), occurrence);
        tracing::debug!(stage = %record.name, occurrence, "Recorded stage");
        self.records.push(record);
        Ok(())
    }

    /// Copy data inputs under `<name>/<occurrence>/`. On failure the
    /// occurrence directory is removed.
    fn embed_data(
        &self,
        record: &mut StageRecord,
        occurrence: usize,
        ctx: &RunContext,
    ) -> Result<(), RecordError> {
        let relative = format!("{}/{occurrence}", record.name);
        let data_dir = self.content_dir.join(&relative);
        match Self::copy_embedded(record, &relative, &data_dir, ctx) {
            Ok(embedded) => {
                if embedded > 0 {
                    tracing::debug!(
                        stage = %record.name,
                        occurrence,
                        embedded,
                        "Embedded input data"
                    );
                }
                Ok(())
            }
            Err(err) => {
                if workspace::occupied(&data_dir) {
                    if let Err(cleanup) = workspace::remove_existing(&data_dir) {
                        tracing::warn!(
                            path = %data_dir.display(),
                            error = %cleanup,
                            "Failed to remove partial embedded data"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    fn copy_embedded(
        record: &mut StageRecord,
        relative: &str,
        data_dir: &Path,
        ctx: &RunContext,
    ) -> Result<usize, RecordError> {
        let mut embedded = 0_usize;

        for entry in record.input_files.iter_mut().filter(|e| e.is_embeddable()) {
            let source = ctx.resolve_path(&entry.source)?;
            let Some(file_name) = source.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                return Err(RecordError::Embed {
                    stage: record.name.clone(),
                    path: source,
                    reason: "path has no UTF-8 file name".to_string(),
                });
            };
            if !source.exists() {
                return Err(RecordError::Embed {
                    stage: record.name.clone(),
                    path: source,
                    reason: "file does not exist".to_string(),
                });
            }

            std::fs::create_dir_all(data_dir).map_err(RecordError::io(data_dir))?;
            let target = data_dir.join(&file_name);
            if workspace::occupied(&target) {
                return Err(RecordError::Embed {
                    stage: record.name.clone(),
                    path: source,
                    reason: format!("another input named '{file_name}' is already embedded"),
                });
            }
            workspace::copy_recursively(&source, &target).map_err(RecordError::io(&source))?;
            entry.source = format!("{}/{relative}/{file_name}", uri::WORKSPACE_REPLAY);
            embedded += 1;
        }
        Ok(embedded)
    }

    /// Drop all pending records and embedded data.
    ///
    /// # Errors
    ///
    /// Fails if the scratch area cannot be reset.
    pub fn clear_records(&mut self) -> Result<(), RecordError> {
        self.records.clear();
        self.occurrences.clear();
        workspace::reset_dir(&self.content_dir).map_err(RecordError::io(&self.content_dir))
    }

    /// Export to the configured save path. See [`export_archive`](Self::export_archive).
    ///
    /// # Errors
    ///
    /// Same as [`export_archive`](Self::export_archive).
    pub fn export(&mut self) -> Result<Option<PathBuf>, RecordError> {
        let save_path = self.save_path.clone();
        self.export_archive(&save_path)
    }

    /// Write the manifest, pack the scratch area into an archive at `path`
    /// and reset the recorder.
    ///
    /// Returns the archive path, or `None` when nothing was recorded. An
    /// existing file at the target path is replaced.
    ///
    /// # Errors
    ///
    /// Fails if the manifest or archive cannot be written.
    pub fn export_archive(&mut self, path: &Path) -> Result<Option<PathBuf>, RecordError> {
        if self.records.is_empty() {
            tracing::warn!("No stages were recorded, skipping replay archive export");
            return Ok(None);
        }

        let target = archive_path(path);
        tracing::info!(path = %target.display(), stages = self.records.len(), "Exporting replay archive");

        std::fs::create_dir_all(&self.content_dir).map_err(RecordError::io(&self.content_dir))?;
        archive::write_manifest(&self.content_dir, &self.records)?;

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(RecordError::io(parent))?;
        }
        let mut partial = target.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        if let Err(err) = self.publish(&partial, &target) {
            if partial.is_file() {
                if let Err(cleanup) = std::fs::remove_file(&partial) {
                    tracing::warn!(
                        path = %partial.display(),
                        error = %cleanup,
                        "Failed to remove partial archive"
                    );
                }
            }
            return Err(err);
        }

        self.clear_records()?;
        tracing::info!(path = %target.display(), "Replay archive exported");
        Ok(Some(target))
    }

    fn publish(&self, partial: &Path, target: &Path) -> Result<(), RecordError> {
        archive::pack_dir(&self.content_dir, partial)?;
        if workspace::occupied(target) {
            tracing::warn!(path = %target.display(), "Overwriting existing replay archive");
            workspace::remove_existing(target).map_err(RecordError::io(target))?;
        }
        std::fs::rename(partial, target).map_err(RecordError::io(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelrun_types::{ClassConfig, FileEntry, StageCommand};

    fn record(name: &str, inputs: Vec<FileEntry>) -> StageRecord {
        StageRecord {
            name: name.into(),
            command: StageCommand::from("./run.exe"),
            work_dir: ":NS_WORKSPACE_MODEL:".into(),
            mpi_use: false,
            mpi_launcher: None,
            mpi_cores: None,
            class_config: ClassConfig::default(),
            custom_config: serde_json::Value::Null,
            input_files: inputs,
            output_files: Vec::new(),
        }
    }

    fn input(source: &Path, is_data: bool) -> FileEntry {
        FileEntry {
            source: source.to_string_lossy().into_owned(),
            dest_dir: ":NS_WORKSPACE_MODEL:".into(),
            dest_name: source.file_name().unwrap().to_string_lossy().into_owned(),
            is_data,
            is_output: false,
        }
    }

    #[test]
    fn test_archive_path_rules() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(archive_path(dir.path()), dir.path().join("modelrun.replay"));
        assert_eq!(archive_path(Path::new("/x/run.replay")), Path::new("/x/run.replay"));
        assert_eq!(archive_path(Path::new("/x/run")), Path::new("/x/run.replay"));
        assert_eq!(archive_path(Path::new("/x/run.tar")), Path::new("/x/run.tar.replay"));
    }

    #[test]
    fn test_new_wipes_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path()).unwrap();
        let scratch = ctx.resolve_path(uri::WORKSPACE_REPLAY).unwrap();
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("stale"), b"x").unwrap();
        let recorder = Recorder::new(&ctx, dir.path().join("out"), false).unwrap();
        assert!(recorder.is_empty());
        assert!(!scratch.join("stale").exists());
    }

    #[test]
    fn test_embed_rewrites_only_data_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("home")).unwrap();
        let data = dir.path().join("gfs.grib2");
        let table = dir.path().join("Vtable");
        std::fs::write(&data, b"grib").unwrap();
        std::fs::write(&table, b"table").unwrap();

        let mut recorder = Recorder::new(&ctx, dir.path().join("run"), true).unwrap();
        recorder
            .record(record("ungrib", vec![input(&data, true), input(&table, false)]), &ctx)
            .unwrap();
        recorder
            .record(record("ungrib", vec![input(&data, true)]), &ctx)
            .unwrap();

        let first = &recorder.records()[0];
        assert_eq!(first.input_files[0].source, ":NS_WORKSPACE_REPLAY:/ungrib/1/gfs.grib2");
        assert_eq!(first.input_files[1].source, table.to_string_lossy());
        assert_eq!(
            recorder.records()[1].input_files[0].source,
            ":NS_WORKSPACE_REPLAY:/ungrib/2/gfs.grib2"
        );
        let embedded = ctx
            .resolve_path(":NS_WORKSPACE_REPLAY:/ungrib/2/gfs.grib2")
            .unwrap();
        assert_eq!(std::fs::read(embedded).unwrap(), b"grib");
    }

    #[test]
    fn test_without_data_sources_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("home")).unwrap();
        let data = dir.path().join("obs.nc");
        std::fs::write(&data, b"obs").unwrap();
        let mut recorder = Recorder::new(&ctx, dir.path().join("run"), false).unwrap();
        recorder.record(record("da", vec![input(&data, true)]), &ctx).unwrap();
        assert_eq!(recorder.records()[0].input_files[0].source, data.to_string_lossy());
    }

    #[test]
    fn test_duplicate_embedded_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("home")).unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        let first = dir.path().join("a/data.nc");
        let second = dir.path().join("b/data.nc");
        std::fs::write(&first, b"1").unwrap();
        std::fs::write(&second, b"2").unwrap();

        let mut recorder = Recorder::new(&ctx, dir.path().join("run"), true).unwrap();
        let err = recorder
            .record(record("s", vec![input(&first, true), input(&second, true)]), &ctx)
            .unwrap_err();
        assert!(matches!(err, RecordError::Embed { .. }));
    }

    #[test]
    fn test_embed_skips_data_marked_as_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("home")).unwrap();
        let produced = dir.path().join("wrfinput_d01");
        std::fs::write(&produced, b"real.exe output").unwrap();
        let entry = FileEntry {
            is_output: true,
            ..input(&produced, true)
        };

        let mut recorder = Recorder::new(&ctx, dir.path().join("run"), true).unwrap();
        recorder.record(record("wrf", vec![entry]), &ctx).unwrap();

        assert_eq!(recorder.records()[0].input_files[0].source, produced.to_string_lossy());
        let occurrence_dir = ctx.resolve_path(":NS_WORKSPACE_REPLAY:/wrf/1").unwrap();
        assert!(!occurrence_dir.exists());
    }

    #[test]
    fn test_failed_embed_keeps_occurrence_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("home")).unwrap();
        let data = dir.path().join("obs.nc");
        std::fs::write(&data, b"obs").unwrap();
        let missing = dir.path().join("gone.nc");

        let mut recorder = Recorder::new(&ctx, dir.path().join("run"), true).unwrap();
        let err = recorder
            .record(record("da", vec![input(&data, true), input(&missing, true)]), &ctx)
            .unwrap_err();
        assert!(matches!(err, RecordError::Embed { .. }));
        assert!(recorder.is_empty());
        assert!(!ctx.resolve_path(":NS_WORKSPACE_REPLAY:/da/1").unwrap().exists());

        recorder.record(record("da", vec![input(&data, true)]), &ctx).unwrap();
        assert_eq!(
            recorder.records()[0].input_files[0].source,
            ":NS_WORKSPACE_REPLAY:/da/1/obs.nc"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_export_removes_partial_archive() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("home")).unwrap();
        let mut recorder = Recorder::new(&ctx, dir.path().join("run"), false).unwrap();
        recorder.record(record("a", Vec::new()), &ctx).unwrap();
        let scratch = ctx.resolve_path(uri::WORKSPACE_REPLAY).unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere"), scratch.join("dangling")).unwrap();

        assert!(recorder.export().is_err());
        assert!(!dir.path().join("run.replay.partial").exists());
        assert!(!dir.path().join("run.replay").exists());
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn test_export_empty_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("home")).unwrap();
        let mut recorder = Recorder::new(&ctx, dir.path().join("run"), false).unwrap();
        assert_eq!(recorder.export().unwrap(), None);
        assert!(!dir.path().join("run.replay").exists());
    }

    #[test]
    fn test_export_writes_archive_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("home")).unwrap();
        let mut recorder = Recorder::new(&ctx, dir.path().join("nested/run"), false).unwrap();
        recorder.record(record("a", Vec::new()), &ctx).unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/run.replay"), b"old").unwrap();

        let path = recorder.export().unwrap().unwrap();
        assert_eq!(path, dir.path().join("nested/run.replay"));
        assert!(recorder.is_empty());
        let records = archive::read_packed_manifest(&path).unwrap();
        assert_eq!(records.len(), 1);
        let scratch = ctx.resolve_path(uri::WORKSPACE_REPLAY).unwrap();
        assert_eq!(std::fs::read_dir(scratch).unwrap().count(), 0);
    }

    #[test]
    fn test_set_recorder_updates_settings() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("home")).unwrap();
        let mut recorder = Recorder::new(&ctx, dir.path().join("a"), false).unwrap();
        recorder.set_recorder(Some(dir.path().join("b")), None);
        assert_eq!(recorder.save_path(), dir.path().join("b"));
        assert!(!recorder.include_data());
        recorder.set_recorder(None, Some(true));
        assert!(recorder.include_data());
    }
}

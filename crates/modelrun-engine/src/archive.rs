//! Replay archive format: a zstd-compressed tar stream of the recorder's
//! scratch directory.
//!
//! The archive root holds `config.json`, the ordered list of stage records,
//! and one `<stage>/<occurrence>/` directory per recorded stage with the
//! data files embedded for it.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use modelrun_types::StageRecord;
use thiserror::Error;

use crate::error::ErrorCategory;

/// Name of the manifest at the archive root.
pub const MANIFEST_NAME: &str = "config.json";

/// File extension of replay archives.
pub const ARCHIVE_EXTENSION: &str = "replay";

/// Zstd level used for replay archives.
const ZSTD_COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("replay archive {} has no {MANIFEST_NAME}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("malformed replay manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("replay archive I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    pub(crate) fn category(&self) -> ErrorCategory {
        match self {
            Self::ManifestMissing(_) => ErrorCategory::FilesystemContract,
            Self::Manifest { .. } => ErrorCategory::RegistryReplay,
            Self::Io { .. } => ErrorCategory::Infrastructure,
        }
    }

    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io { path, source }
    }
}

/// Write `records` as the manifest of `dir`.
///
/// # Errors
///
/// Returns an error if the manifest cannot be serialized or written.
pub fn write_manifest(dir: &Path, records: &[StageRecord]) -> Result<(), ArchiveError> {
    let path = dir.join(MANIFEST_NAME);
    let json = serde_json::to_string_pretty(records).map_err(|source| ArchiveError::Manifest {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, json).map_err(ArchiveError::io(&path))
}

/// Read the manifest of an unpacked archive directory.
///
/// # Errors
///
/// Returns [`ArchiveError::ManifestMissing`] if there is none, or
/// [`ArchiveError::Manifest`] if it does not parse.
pub fn read_manifest(dir: &Path) -> Result<Vec<StageRecord>, ArchiveError> {
    let path = dir.join(MANIFEST_NAME);
    if !path.is_file() {
        return Err(ArchiveError::ManifestMissing(dir.to_path_buf()));
    }
    let text = std::fs::read_to_string(&path).map_err(ArchiveError::io(&path))?;
    parse_manifest(&path, &text)
}

fn parse_manifest(path: &Path, text: &str) -> Result<Vec<StageRecord>, ArchiveError> {
    serde_json::from_str(text).map_err(|source| ArchiveError::Manifest {
        path: path.to_path_buf(),
        source,
    })
}

/// Pack the contents of `src_dir` into a compressed archive at `dest`.
///
/// # Errors
///
/// Returns an error if any file cannot be read or the archive written.
pub fn pack_dir(src_dir: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::create(dest).map_err(ArchiveError::io(dest))?;
    let encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), ZSTD_COMPRESSION_LEVEL)
        .map_err(ArchiveError::io(dest))?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(true);
    builder
        .append_dir_all(".", src_dir)
        .map_err(ArchiveError::io(src_dir))?;
    let encoder = builder.into_inner().map_err(ArchiveError::io(dest))?;
    let mut writer = encoder.finish().map_err(ArchiveError::io(dest))?;
    writer.flush().map_err(ArchiveError::io(dest))?;
    Ok(())
}

/// Unpack the archive at `archive` into `dest_dir`.
///
/// # Errors
///
/// Returns an error if the archive is unreadable or corrupt.
pub fn unpack_into(archive: &Path, dest_dir: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive).map_err(ArchiveError::io(archive))?;
    let decoder = zstd::stream::read::Decoder::new(file).map_err(ArchiveError::io(archive))?;
    tar::Archive::new(decoder)
        .unpack(dest_dir)
        .map_err(ArchiveError::io(archive))
}

/// Read only the manifest of a packed archive, without unpacking data.
///
/// # Errors
///
/// Returns [`ArchiveError::ManifestMissing`] if the archive has no manifest.
pub fn read_packed_manifest(archive: &Path) -> Result<Vec<StageRecord>, ArchiveError> {
    let file = File::open(archive).map_err(ArchiveError::io(archive))?;
    let decoder = zstd::stream::read::Decoder::new(file).map_err(ArchiveError::io(archive))?;
    let mut tar = tar::Archive::new(decoder);
    for entry in tar.entries().map_err(ArchiveError::io(archive))? {
        let mut entry = entry.map_err(ArchiveError::io(archive))?;
        let is_manifest = entry.path().is_ok_and(|p| {
            p.components()
                .filter(|c| !matches!(c, Component::CurDir))
                .eq(Path::new(MANIFEST_NAME).components())
        });
        if is_manifest {
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(ArchiveError::io(archive))?;
            return parse_manifest(archive, &text);
        }
    }
    Err(ArchiveError::ManifestMissing(archive.to_path_buf()))
}

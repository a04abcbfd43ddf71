//! Filesystem helpers shared by staging, recording and replay.

use std::fs;
use std::io;
use std::path::Path;

use crate::context::StagingMode;

/// Remove `dir` and everything below it, then recreate it empty.
pub(crate) fn reset_dir(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    fs::create_dir_all(dir)
}

/// Remove whatever is at `path`: file, symlink or directory tree.
pub(crate) fn remove_existing(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Returns `true` if anything, including a dangling symlink, is at `path`.
pub(crate) fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Returns `true` if `a` and `b` name the same directory entry.
///
/// Parent directories are canonicalized but the final component is not, so a
/// symlink and its target are different entries.
pub(crate) fn same_entry(a: &Path, b: &Path) -> bool {
    fn entry(path: &Path) -> Option<std::path::PathBuf> {
        let parent = path.parent()?.canonicalize().ok()?;
        Some(parent.join(path.file_name()?))
    }
    match (entry(a), entry(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Copy a file, or a directory tree, from `src` to `dest`.
pub(crate) fn copy_recursively(src: &Path, dest: &Path) -> io::Result<()> {
    if !src.is_dir() {
        fs::copy(src, dest)?;
        return Ok(());
    }
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        copy_recursively(&entry.path(), &dest.join(entry.file_name()))?;
    }
    Ok(())
}

/// Make `src` available at `dest` by symlink or copy.
pub(crate) fn place(src: &Path, dest: &Path, mode: StagingMode) -> io::Result<()> {
    match mode {
        #[cfg(unix)]
        StagingMode::Symlink => std::os::unix::fs::symlink(src, dest),
        #[cfg(not(unix))]
        StagingMode::Symlink => copy_recursively(src, dest),
        StagingMode::Copy => copy_recursively(src, dest),
    }
}

/// Move `src` to `dest`, copying across filesystems when a rename fails.
pub(crate) fn move_path(src: &Path, dest: &Path) -> io::Result<()> {
    if let Err(rename_err) = fs::rename(src, dest) {
        tracing::debug!(
            src = %src.display(),
            error = %rename_err,
            "Rename failed, falling back to copy"
        );
        copy_recursively(src, dest)?;
        remove_existing(src)?;
    }
    Ok(())
}

//! Namelist store: named, registered namelist documents.
//!
//! Ids must be registered before documents can be loaded under them. Updates
//! merge shallowly per section: keys of an incoming section overwrite keys of
//! the stored section with the same name, other stored keys survive.

pub mod format;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use modelrun_types::NamelistDocument;

use crate::error::ErrorCategory;

pub use format::{parse_namelist, write_namelist, FormatError};

/// Errors from the namelist store.
#[derive(Debug, thiserror::Error)]
pub enum NamelistError {
    #[error("unknown namelist id '{0}', register it first")]
    NotRegistered(String),

    #[error("namelist file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("namelist '{0}' has no values, load or update it first")]
    NoData(String),

    #[error("namelist file already exists: {}", .0.display())]
    FileExists(PathBuf),

    #[error("failed to parse namelist {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("namelist I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NamelistError {
    pub(crate) fn category(&self) -> ErrorCategory {
        match self {
            Self::NotRegistered(_) | Self::NoData(_) | Self::Parse { .. } => {
                ErrorCategory::ConfigurationState
            }
            Self::FileNotFound(_) | Self::FileExists(_) => ErrorCategory::FilesystemContract,
            Self::Io(_) => ErrorCategory::Infrastructure,
        }
    }
}

/// New values for [`NamelistStore::update`]: a file to read or a document.
#[derive(Debug, Clone)]
pub enum NamelistUpdate<'a> {
    File(&'a Path),
    Values(NamelistDocument),
}

impl<'a> From<&'a Path> for NamelistUpdate<'a> {
    fn from(path: &'a Path) -> Self {
        Self::File(path)
    }
}

impl From<NamelistDocument> for NamelistUpdate<'_> {
    fn from(doc: NamelistDocument) -> Self {
        Self::Values(doc)
    }
}

fn read_document(path: &Path) -> Result<NamelistDocument, NamelistError> {
    if !path.is_file() {
        return Err(NamelistError::FileNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    parse_namelist(&text).map_err(|source| NamelistError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Default)]
pub struct NamelistStore {
    registered: BTreeSet<String>,
    documents: HashMap<String, NamelistDocument>,
}

impl NamelistStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id. Returns `false` if it was already registered.
    pub fn register_id(&mut self, id: &str) -> bool {
        let inserted = self.registered.insert(id.to_string());
        if !inserted {
            tracing::debug!(id, "Namelist id already registered");
        }
        inserted
    }

    /// Forget an id and any document stored under it.
    pub fn unregister_id(&mut self, id: &str) {
        self.registered.remove(id);
        self.documents.remove(id);
    }

    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.registered.contains(id)
    }

    #[must_use]
    pub fn is_loaded(&self, id: &str) -> bool {
        self.documents.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.registered.iter().map(String::as_str)
    }

    fn ensure_registered(&self, id: &str) -> Result<(), NamelistError> {
        if self.is_registered(id) {
            Ok(())
        } else {
            Err(NamelistError::NotRegistered(id.to_string()))
        }
    }

    /// Read a namelist file and store it under `id`, replacing any document
    /// already stored there.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not registered, the file does not exist or cannot be
    /// parsed.
    pub fn load(&mut self, path: &Path, id: &str) -> Result<(), NamelistError> {
        self.ensure_registered(id)?;
        let doc = read_document(path)?;
        tracing::debug!(id, path = %path.display(), sections = doc.len(), "Loaded namelist");
        self.documents.insert(id.to_string(), doc);
        Ok(())
    }

    /// Write the document stored under `id` to `path`, creating parent
    /// directories.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not registered or has no document, or if `path`
    /// exists and `overwrite` is `false`.
    pub fn write(&self, path: &Path, id: &str, overwrite: bool) -> Result<(), NamelistError> {
        self.ensure_registered(id)?;
        let doc = self
            .documents
            .get(id)
            .ok_or_else(|| NamelistError::NoData(id.to_string()))?;
        if path.exists() {
            if !overwrite {
                return Err(NamelistError::FileExists(path.to_path_buf()));
            }
            tracing::warn!(path = %path.display(), "Overwriting existing namelist file");
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, write_namelist(doc))?;
        tracing::debug!(id, path = %path.display(), "Wrote namelist");
        Ok(())
    }

    /// Merge new values into the document stored under `id`.
    ///
    /// If nothing is stored yet the new values become the document.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not registered, or if the update names a file that is
    /// missing or malformed.
    pub fn update<'a>(
        &mut self,
        new_values: impl Into<NamelistUpdate<'a>>,
        id: &str,
    ) -> Result<(), NamelistError> {
        self.ensure_registered(id)?;
        let incoming = match new_values.into() {
            NamelistUpdate::File(path) => read_document(path)?,
            NamelistUpdate::Values(doc) => doc,
        };

        match self.documents.get_mut(id) {
            Some(existing) => {
                for (section, values) in incoming {
                    existing.entry(section).or_default().extend(values);
                }
            }
            None => {
                self.documents.insert(id.to_string(), incoming);
            }
        }
        Ok(())
    }

    /// An independent copy of the document stored under `id`.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not registered or has no document.
    pub fn get(&self, id: &str) -> Result<NamelistDocument, NamelistError> {
        self.ensure_registered(id)?;
        self.documents
            .get(id)
            .cloned()
            .ok_or_else(|| NamelistError::NoData(id.to_string()))
    }

    /// Drop the document stored under `id`, keeping the id registered.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not registered.
    pub fn delete(&mut self, id: &str) -> Result<(), NamelistError> {
        self.ensure_registered(id)?;
        self.documents.remove(id);
        Ok(())
    }
}

//! Per-run context shared by every stage.
//!
//! [`RunContext`] owns the resource resolver, the namelist store and the run
//! mode flags. It is created once per run and passed explicitly to stages,
//! the recorder and the replay engine.

use std::path::{Path, PathBuf};

use modelrun_types::uri;

use crate::namelist::NamelistStore;
use crate::resource::{ResourceError, ResourceResolver};

/// Whether stages are executing fresh or being re-executed from an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Live,
    Replay,
}

/// How input files are placed into a stage's working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingMode {
    Symlink,
    Copy,
}

/// Directory layout below the run's home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
    pub home: PathBuf,
    pub temp: PathBuf,
    pub workspace_root: PathBuf,
    pub workspace_model: PathBuf,
    pub workspace_replay: PathBuf,
}

impl WorkLayout {
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let workspace_root = home.join("workspace");
        Self {
            temp: home.join("tmp"),
            workspace_model: workspace_root.join("model"),
            workspace_replay: workspace_root.join("replay"),
            workspace_root,
            home,
        }
    }

    /// `$HOME/.config/modelrun`, or `/tmp/.config/modelrun` without `HOME`.
    #[must_use]
    pub fn default_home() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        if home == "/root" {
            tracing::warn!("Running as root, consider using a normal user for model runs");
        }
        Path::new(&home).join(".config").join("modelrun")
    }

    fn tokens(&self) -> [(&'static str, &Path); 5] {
        [
            (uri::HOME_PATH, &self.home),
            (uri::TEMP_PATH, &self.temp),
            (uri::WORKSPACE_ROOT, &self.workspace_root),
            (uri::WORKSPACE_MODEL, &self.workspace_model),
            (uri::WORKSPACE_REPLAY, &self.workspace_replay),
        ]
    }
}

#[derive(Debug)]
pub struct RunContext {
    pub resources: ResourceResolver,
    pub namelists: NamelistStore,
    layout: WorkLayout,
    mode: RunMode,
    dry_run: bool,
    staging: Option<StagingMode>,
}

impl RunContext {
    /// Create a context rooted at `home` and register the built-in tokens.
    ///
    /// A relative `home` is made absolute against the current directory.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if a built-in token cannot be registered.
    pub fn new(home: impl AsRef<Path>) -> Result<Self, ResourceError> {
        let home = absolute(home.as_ref());
        let layout = WorkLayout::new(home);
        let mut resources = ResourceResolver::new();
        for (token, path) in layout.tokens() {
            resources.register(token, path.to_string_lossy())?;
        }
        Ok(Self {
            resources,
            namelists: NamelistStore::new(),
            layout,
            mode: RunMode::default(),
            dry_run: false,
            staging: None,
        })
    }

    #[must_use]
    pub fn layout(&self) -> &WorkLayout {
        &self.layout
    }

    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RunMode) {
        if self.mode != mode {
            tracing::debug!(?mode, "Switching run mode");
        }
        self.mode = mode;
    }

    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.mode == RunMode::Replay
    }

    /// In dry-run mode stages are configured but never stage files, spawn
    /// processes or collect outputs.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Symlinks for live runs on unix, copies during replay or elsewhere,
    /// unless overridden with [`set_staging_mode`](Self::set_staging_mode).
    #[must_use]
    pub fn staging_mode(&self) -> StagingMode {
        if let Some(mode) = self.staging {
            return mode;
        }
        if self.is_replay() || cfg!(not(unix)) {
            StagingMode::Copy
        } else {
            StagingMode::Symlink
        }
    }

    pub fn set_staging_mode(&mut self, mode: StagingMode) {
        self.staging = Some(mode);
    }

    /// Point `:NS_OUTPUT_PATH:` at `path`, replacing any earlier binding.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if the token cannot be bound.
    pub fn set_output_path(&mut self, path: impl AsRef<Path>) -> Result<(), ResourceError> {
        let path = absolute(path.as_ref());
        self.resources.rebind(uri::OUTPUT_PATH, path.to_string_lossy())
    }

    /// Resolve a possibly symbolic path to an absolute real path.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceResolver::resolve`].
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf, ResourceError> {
        self.resources.resolve_path(path).map(|p| absolute(&p))
    }
}

/// Make `path` absolute against the current directory without touching the
/// filesystem. Falls back to the path itself if the current directory is
/// unavailable.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tokens_registered() {
        let ctx = RunContext::new("/srv/modelrun").unwrap();
        assert_eq!(
            ctx.resources.resolve(uri::WORKSPACE_MODEL).unwrap(),
            "/srv/modelrun/workspace/model"
        );
        assert_eq!(
            ctx.resources.resolve(":NS_WORKSPACE_REPLAY:/geogrid/1").unwrap(),
            "/srv/modelrun/workspace/replay/geogrid/1"
        );
        assert_eq!(ctx.resources.resolve(uri::TEMP_PATH).unwrap(), "/srv/modelrun/tmp");
        assert!(!ctx.resources.is_registered(uri::OUTPUT_PATH));
    }

    #[test]
    fn test_output_path_can_be_rebound() {
        let mut ctx = RunContext::new("/srv/modelrun").unwrap();
        ctx.set_output_path("/data/out1").unwrap();
        ctx.set_output_path("/data/out2").unwrap();
        assert_eq!(
            ctx.resources.resolve(":NS_OUTPUT_PATH:/wrf").unwrap(),
            "/data/out2/wrf"
        );
    }

    #[test]
    fn test_relative_home_is_absolutized() {
        let ctx = RunContext::new("relative-home").unwrap();
        assert!(ctx.layout().home.is_absolute());
    }

    #[test]
    fn test_staging_mode_defaults() {
        let mut ctx = RunContext::new("/srv/modelrun").unwrap();
        ctx.set_mode(RunMode::Replay);
        assert_eq!(ctx.staging_mode(), StagingMode::Copy);
        ctx.set_mode(RunMode::Live);
        if cfg!(unix) {
            assert_eq!(ctx.staging_mode(), StagingMode::Symlink);
        }
        ctx.set_staging_mode(StagingMode::Copy);
        assert_eq!(ctx.staging_mode(), StagingMode::Copy);
    }

    #[test]
    fn test_mode_flags() {
        let mut ctx = RunContext::new("/srv/modelrun").unwrap();
        assert_eq!(ctx.mode(), RunMode::Live);
        assert!(!ctx.is_dry_run());
        ctx.set_dry_run(true);
        ctx.set_mode(RunMode::Replay);
        assert!(ctx.is_dry_run());
        assert!(ctx.is_replay());
    }
}

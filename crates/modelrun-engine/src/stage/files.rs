//! Input staging, output discovery and output collection.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{StageCore, StageError};
use crate::context::RunContext;
use crate::workspace;

/// Which files in a directory count as outputs of a stage.
///
/// A file matches if its name starts with any `startswith` prefix, ends with
/// any `endswith` suffix, or is listed in `files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRule {
    /// Directory to scan. Defaults to the stage's work directory.
    #[serde(default)]
    pub search_dir: Option<String>,
    /// Where matches are moved. Defaults to `:NS_OUTPUT_PATH:/<stage>`.
    #[serde(default)]
    pub dest_dir: Option<String>,
    #[serde(default)]
    pub startswith: Vec<String>,
    #[serde(default)]
    pub endswith: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    /// Fail the stage when nothing matches.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl OutputRule {
    fn matches(&self, file_name: &str) -> bool {
        self.startswith.iter().any(|p| file_name.starts_with(p.as_str()))
            || self.endswith.iter().any(|s| file_name.ends_with(s.as_str()))
            || self.files.iter().any(|f| f == file_name)
    }
}

impl Default for OutputRule {
    fn default() -> Self {
        Self {
            search_dir: None,
            dest_dir: None,
            startswith: Vec::new(),
            endswith: Vec::new(),
            files: Vec::new(),
            required: true,
        }
    }
}

pub(super) fn stage_inputs(core: &StageCore, ctx: &RunContext) -> Result<(), StageError> {
    let mode = ctx.staging_mode();
    for entry in &core.input_files {
        let source = ctx.resolve_path(&entry.source)?;
        if !source.exists() {
            return Err(StageError::InputNotFound {
                stage: core.name.clone(),
                path: source,
            });
        }

        let dest_dir = ctx.resolve_path(&entry.dest_dir)?;
        fs::create_dir_all(&dest_dir).map_err(StageError::io(&core.name, &dest_dir))?;
        let target = dest_dir.join(&entry.dest_name);
        if workspace::same_entry(&source, &target) {
            tracing::debug!(stage = %core.name, path = %target.display(), "Input already in place");
            continue;
        }
        if workspace::occupied(&target) {
            tracing::debug!(stage = %core.name, path = %target.display(), "Replacing existing file");
            workspace::remove_existing(&target).map_err(StageError::io(&core.name, &target))?;
        }
        workspace::place(&source, &target, mode).map_err(StageError::io(&core.name, &target))?;
    }
    tracing::debug!(
        stage = %core.name,
        count = core.input_files.len(),
        ?mode,
        "Staged inputs"
    );
    Ok(())
}

pub(super) fn collect_outputs(core: &StageCore, ctx: &RunContext) -> Result<(), StageError> {
    // Check every entry before moving anything.
    let mut plan: Vec<(PathBuf, PathBuf, PathBuf)> = Vec::with_capacity(core.output_files.len());
    let mut targets: HashSet<PathBuf> = HashSet::new();
    for entry in &core.output_files {
        let source = ctx.resolve_path(&entry.source)?;
        if !workspace::occupied(&source) {
            return Err(StageError::OutputNotFound {
                stage: core.name.clone(),
                path: source,
            });
        }
        let dest_dir = ctx.resolve_path(&entry.dest_dir)?;
        let target = dest_dir.join(&entry.dest_name);
        if workspace::occupied(&target) || !targets.insert(target.clone()) {
            return Err(StageError::OutputCollision {
                stage: core.name.clone(),
                path: target,
            });
        }
        plan.push((source, dest_dir, target));
    }

    for (source, dest_dir, target) in &plan {
        fs::create_dir_all(dest_dir).map_err(StageError::io(&core.name, dest_dir))?;
        workspace::move_path(source, target).map_err(StageError::io(&core.name, target))?;
    }
    if !plan.is_empty() {
        tracing::info!(stage = %core.name, count = plan.len(), "Collected outputs");
    }
    Ok(())
}

pub(super) fn discover_outputs(
    core: &mut StageCore,
    rule: &OutputRule,
    ctx: &RunContext,
) -> Result<usize, StageError> {
    let search_dir = rule.search_dir.clone().unwrap_or_else(|| core.work_dir.clone());
    let dest_dir = rule.dest_dir.clone().unwrap_or_else(|| core.output_save_dir());
    let real_dir = ctx.resolve_path(&search_dir)?;

    let mut matched = BTreeSet::new();
    let entries = fs::read_dir(&real_dir).map_err(StageError::io(&core.name, &real_dir))?;
    for entry in entries {
        let entry = entry.map_err(StageError::io(&core.name, &real_dir))?;
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        if rule.matches(&file_name) {
            matched.insert(file_name);
        }
    }

    if matched.is_empty() {
        if rule.required {
            return Err(StageError::NoOutputMatch {
                stage: core.name.clone(),
                dir: real_dir,
            });
        }
        tracing::warn!(stage = %core.name, dir = %real_dir.display(), "No output files matched");
        return Ok(0);
    }

    let count = matched.len();
    for file_name in matched {
        core.output_files.push(modelrun_types::FileEntry {
            source: format!("{search_dir}/{file_name}"),
            dest_dir: dest_dir.clone(),
            dest_name: file_name,
            is_data: true,
            is_output: true,
        });
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StagingMode;
    use modelrun_types::{FileEntry, StageCommand};

    struct Fixture {
        _dir: tempfile::TempDir,
        ctx: RunContext,
        work: PathBuf,
        out: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RunContext::new(dir.path().join("home")).unwrap();
        let out = dir.path().join("out");
        ctx.set_output_path(&out).unwrap();
        let work = ctx.resolve_path(":NS_WORKSPACE_MODEL:/job").unwrap();
        fs::create_dir_all(&work).unwrap();
        Fixture {
            _dir: dir,
            ctx,
            work,
            out,
        }
    }

    fn core() -> StageCore {
        StageCore::new("job", StageCommand::from("true"), ":NS_WORKSPACE_MODEL:/job").unwrap()
    }

    #[test]
    fn test_stage_inputs_copies_and_replaces() {
        let mut fx = fixture();
        fx.ctx.set_staging_mode(StagingMode::Copy);
        let src = fx.work.parent().unwrap().join("input.dat");
        fs::write(&src, b"new").unwrap();
        fs::write(fx.work.join("input.dat"), b"stale").unwrap();

        let mut core = core();
        core.add_input_file(src.to_string_lossy(), true);
        stage_inputs(&core, &fx.ctx).unwrap();
        assert_eq!(fs::read(fx.work.join("input.dat")).unwrap(), b"new");
    }

    #[test]
    fn test_stage_inputs_source_already_at_target() {
        let mut fx = fixture();
        fx.ctx.set_staging_mode(StagingMode::Copy);
        fs::write(fx.work.join("in.dat"), b"only copy").unwrap();

        let mut core = core();
        core.add_input_file(":NS_WORKSPACE_MODEL:/job/in.dat", true);
        stage_inputs(&core, &fx.ctx).unwrap();
        assert_eq!(fs::read(fx.work.join("in.dat")).unwrap(), b"only copy");

        fx.ctx.set_staging_mode(StagingMode::Symlink);
        stage_inputs(&core, &fx.ctx).unwrap();
        assert_eq!(fs::read(fx.work.join("in.dat")).unwrap(), b"only copy");
    }

    #[test]
    fn test_stage_inputs_missing_source() {
        let fx = fixture();
        let mut core = core();
        core.add_input_file("/nonexistent/input.dat", true);
        let err = stage_inputs(&core, &fx.ctx).unwrap_err();
        assert!(matches!(err, StageError::InputNotFound { .. }));
    }

    #[test]
    fn test_collect_outputs_moves_files() {
        let fx = fixture();
        fs::write(fx.work.join("a.nc"), b"a").unwrap();
        let mut core = core();
        let dest = core.output_save_dir();
        core.add_output_file("a.nc", dest);
        collect_outputs(&core, &fx.ctx).unwrap();
        assert!(!fx.work.join("a.nc").exists());
        assert_eq!(fs::read(fx.out.join("job/a.nc")).unwrap(), b"a");
    }

    #[test]
    fn test_collect_outputs_collision_changes_nothing() {
        let fx = fixture();
        fs::write(fx.work.join("a.nc"), b"a").unwrap();
        fs::write(fx.work.join("b.nc"), b"b").unwrap();
        fs::create_dir_all(fx.out.join("job")).unwrap();
        fs::write(fx.out.join("job/b.nc"), b"old").unwrap();

        let mut core = core();
        let dest = core.output_save_dir();
        core.add_output_file("a.nc", dest.clone());
        core.add_output_file("b.nc", dest);
        let err = collect_outputs(&core, &fx.ctx).unwrap_err();
        assert!(matches!(err, StageError::OutputCollision { .. }));
        assert!(fx.work.join("a.nc").exists());
        assert!(!fx.out.join("job/a.nc").exists());
        assert_eq!(fs::read(fx.out.join("job/b.nc")).unwrap(), b"old");
    }

    #[test]
    fn test_collect_outputs_missing_source() {
        let fx = fixture();
        let mut core = core();
        core.output_files.push(FileEntry {
            source: ":NS_WORKSPACE_MODEL:/job/missing.nc".into(),
            dest_dir: ":NS_OUTPUT_PATH:/job".into(),
            dest_name: "missing.nc".into(),
            is_data: true,
            is_output: true,
        });
        let err = collect_outputs(&core, &fx.ctx).unwrap_err();
        assert!(matches!(err, StageError::OutputNotFound { .. }));
    }

    #[test]
    fn test_discover_outputs_rules() {
        let fx = fixture();
        for name in ["met_em.d01.nc", "met_em.d02.nc", "geo.log", "keep.txt", "other"] {
            fs::write(fx.work.join(name), b"").unwrap();
        }
        let mut core = core();
        let rule = OutputRule {
            startswith: vec!["met_em.".into()],
            endswith: vec![".log".into()],
            files: vec!["keep.txt".into()],
            ..OutputRule::default()
        };
        let count = discover_outputs(&mut core, &rule, &fx.ctx).unwrap();
        assert_eq!(count, 4);
        let names: Vec<_> = core.output_files.iter().map(|e| e.dest_name.as_str()).collect();
        assert_eq!(names, vec!["geo.log", "keep.txt", "met_em.d01.nc", "met_em.d02.nc"]);
        assert_eq!(core.output_files[0].source, ":NS_WORKSPACE_MODEL:/job/geo.log");
        assert_eq!(core.output_files[0].dest_dir, ":NS_OUTPUT_PATH:/job");
    }

    #[test]
    fn test_discover_outputs_no_match() {
        let fx = fixture();
        let mut core = core();
        let rule = OutputRule {
            endswith: vec![".nc".into()],
            ..OutputRule::default()
        };
        assert!(matches!(
            discover_outputs(&mut core, &rule, &fx.ctx),
            Err(StageError::NoOutputMatch { .. })
        ));
        let optional = OutputRule {
            required: false,
            ..rule
        };
        assert_eq!(discover_outputs(&mut core, &optional, &fx.ctx).unwrap(), 0);
    }
}

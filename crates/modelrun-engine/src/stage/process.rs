//! Child process execution.

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use super::StageError;

/// Run `argv` in `work_dir` and wait for it, capturing stdout and stderr.
///
/// The work directory is created if missing. On a non-zero exit both streams
/// are logged and returned in the error.
pub(super) fn call_subprocess(
    stage: &str,
    argv: &[String],
    work_dir: &Path,
) -> Result<(), StageError> {
    let (program, args) = argv.split_first().ok_or_else(|| StageError::InvalidCommand {
        stage: stage.to_string(),
        reason: "command is empty".to_string(),
    })?;
    let command_line = argv.join(" ");

    std::fs::create_dir_all(work_dir).map_err(StageError::io(stage, work_dir))?;

    tracing::info!(stage, command = %command_line, work_dir = %work_dir.display(), "Invoking command");
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .current_dir(work_dir)
        .output()
        .map_err(|source| StageError::Spawn {
            stage: stage.to_string(),
            command: command_line.clone(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        tracing::error!(
            stage,
            command = %command_line,
            status = ?output.status.code(),
            "Command failed"
        );
        tracing::error!(stage, "====== stdout ======\n{stdout}");
        tracing::error!(stage, "====== stderr ======\n{stderr}");
        return Err(StageError::Execution {
            stage: stage.to_string(),
            command: command_line,
            status: output.status.code(),
            stdout,
            stderr,
        });
    }

    tracing::debug!(stage, stdout = %stdout, stderr = %stderr, "Command output");
    tracing::info!(
        stage,
        duration_secs = start.elapsed().as_secs_f64(),
        "Command finished"
    );
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn test_success_runs_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        call_subprocess("touch", &sh("echo hi > marker"), &work).unwrap();
        assert!(work.join("marker").exists());
    }

    #[test]
    fn test_failure_captures_streams() {
        let dir = tempfile::tempdir().unwrap();
        let err = call_subprocess("fail", &sh("echo out; echo err >&2; exit 3"), dir.path())
            .unwrap_err();
        assert!(err.to_string().ends_with("\nstderr:\nerr"), "{err}");
        match err {
            StageError::Execution {
                status,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(status, Some(3));
                assert_eq!(stdout.trim(), "out");
                assert_eq!(stderr.trim(), "err");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let argv = vec!["/nonexistent/program.exe".to_string()];
        let err = call_subprocess("missing", &argv, dir.path()).unwrap_err();
        assert!(matches!(err, StageError::Spawn { .. }));
    }

    #[test]
    fn test_empty_argv_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = call_subprocess("empty", &[], dir.path()).unwrap_err();
        assert!(matches!(err, StageError::InvalidCommand { .. }));
    }
}

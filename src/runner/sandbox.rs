//! Isolated execution context for external tools.
//!
//! Each invocation gets a private working directory that exists only for
//! the lifetime of the call. Host inputs are copied in at deterministic
//! paths, the tool runs with the directory as its working directory, and
//! newly produced files are found by diffing the directory listing against
//! a snapshot taken before invocation. The directory is reclaimed on every
//! exit path: explicitly on success, via `Drop` when an error unwinds.

use crate::error::ToolError;
use std::collections::HashSet;
use std::ffi::OsString;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Poll interval while waiting on the external process.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Captured result of one external process execution.
#[derive(Debug)]
pub struct Execution {
    /// Exit status code (0 = success).
    pub status: i32,
    /// Combined stdout + stderr.
    pub output: String,
}

/// A private, disposable working directory for one tool invocation.
#[derive(Debug)]
pub struct Sandbox {
    root: TempDir,
}

impl Sandbox {
    /// Acquire a fresh context. Failure here is fatal for the invocation
    /// and is surfaced, not retried.
    pub fn acquire() -> Result<Self, ToolError> {
        let root = TempDir::with_prefix("nightpipe-sandbox-").map_err(ToolError::Acquire)?;
        tracing::debug!("Acquired execution context at {}", root.path().display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Copy a host file into the context at a deterministic path (the
    /// file's own name under the context root) and return that path.
    pub fn stage(&self, host: &Path) -> Result<PathBuf, ToolError> {
        let name = host.file_name().ok_or_else(|| {
            ToolError::Staging {
                path: host.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "input path has no file name",
                ),
            }
        })?;
        let staged = self.root.path().join(name);
        std::fs::copy(host, &staged).map_err(|e| ToolError::Staging {
            path: host.to_path_buf(),
            source: e,
        })?;
        Ok(staged)
    }

    /// Snapshot the file names currently present in the working directory.
    /// Taken before invocation, this is the baseline for output discovery.
    pub fn snapshot(&self) -> Result<HashSet<OsString>, ToolError> {
        let mut names = HashSet::new();
        let entries = std::fs::read_dir(self.root.path()).map_err(|e| ToolError::Recover {
            path: self.root.path().to_path_buf(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| ToolError::Recover {
                path: self.root.path().to_path_buf(),
                source: e,
            })?;
            names.insert(entry.file_name());
        }
        Ok(names)
    }

    /// Execute `program` with `args` inside the context, blocking until it
    /// exits or the deadline expires. On expiry the child is killed and the
    /// invocation reported failed, not left hanging.
    pub fn exec(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<Execution, ToolError> {
        run_with_timeout(program, args, self.root.path(), timeout)
    }

    /// Files present now but absent from `baseline`, copied into
    /// `output_dir`. Returns the host-side paths of the recovered files.
    pub fn collect_new_files(
        &self,
        baseline: &HashSet<OsString>,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ToolError> {
        std::fs::create_dir_all(output_dir).map_err(|e| ToolError::Recover {
            path: output_dir.to_path_buf(),
            source: e,
        })?;

        let mut recovered = Vec::new();
        let mut names: Vec<OsString> = self
            .snapshot()?
            .into_iter()
            .filter(|name| !baseline.contains(name))
            .collect();
        names.sort();

        for name in names {
            let src = self.root.path().join(&name);
            let dst = output_dir.join(&name);
            std::fs::copy(&src, &dst).map_err(|e| ToolError::Recover {
                path: src.clone(),
                source: e,
            })?;
            recovered.push(dst);
        }
        Ok(recovered)
    }

    /// Release the context, reclaiming its directory. Errors unwinding
    /// through the caller release via `Drop` instead.
    pub fn release(self) {
        let path = self.root.path().to_path_buf();
        if let Err(e) = self.root.close() {
            tracing::warn!("Failed to reclaim execution context {}: {}", path.display(), e);
        } else {
            tracing::debug!("Released execution context {}", path.display());
        }
    }
}

/// Run a command with a hard deadline, capturing combined output.
///
/// Output goes to an anonymous temp file rather than pipes so a chatty tool
/// can never deadlock the single-threaded caller.
pub(crate) fn run_with_timeout(
    program: &str,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<Execution, ToolError> {
    let mut log = tempfile::tempfile().map_err(ToolError::Acquire)?;
    let stdout = log.try_clone().map_err(ToolError::Acquire)?;
    let stderr = log.try_clone().map_err(ToolError::Acquire)?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
        .map_err(|e| ToolError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ToolError::Timeout {
                        program: program.to_string(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
                std::thread::sleep(WAIT_POLL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Wait {
                    program: program.to_string(),
                    source: e,
                });
            }
        }
    };

    let mut output = String::new();
    log.seek(SeekFrom::Start(0)).map_err(|e| ToolError::Wait {
        program: program.to_string(),
        source: e,
    })?;
    log.read_to_string(&mut output).map_err(|e| ToolError::Wait {
        program: program.to_string(),
        source: e,
    })?;

    Ok(Execution {
        status: status.code().unwrap_or(-1),
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(cmd: &str) -> Vec<String> {
        vec!["-c".to_string(), cmd.to_string()]
    }

    #[test]
    fn test_staging_round_trip_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let host = dir.path().join("input.fits");
        std::fs::write(&host, b"pixel payload").unwrap();

        let sandbox = Sandbox::acquire().unwrap();
        let staged = sandbox.stage(&host).unwrap();

        assert_eq!(staged.parent().unwrap(), sandbox.root());
        assert_eq!(staged.file_name().unwrap(), "input.fits");
        assert_eq!(std::fs::read(&staged).unwrap(), b"pixel payload");
    }

    #[test]
    fn test_output_discovery_ignores_preexisting_files() {
        let out = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::acquire().unwrap();

        std::fs::write(sandbox.root().join("already.txt"), b"old").unwrap();
        let baseline = sandbox.snapshot().unwrap();

        let exec = sandbox
            .exec("sh", &sh("echo fresh > produced.cat"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(exec.status, 0);

        let recovered = sandbox.collect_new_files(&baseline, out.path()).unwrap();
        let names: Vec<_> = recovered
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["produced.cat".to_string()]);
        assert!(!out.path().join("already.txt").exists());
    }

    #[test]
    fn test_exec_captures_combined_output() {
        let sandbox = Sandbox::acquire().unwrap();
        let exec = sandbox
            .exec("sh", &sh("echo out; echo err >&2"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(exec.status, 0);
        assert!(exec.output.contains("out"));
        assert!(exec.output.contains("err"));
    }

    #[test]
    fn test_exec_reports_nonzero_status() {
        let sandbox = Sandbox::acquire().unwrap();
        let exec = sandbox.exec("sh", &sh("exit 3"), Duration::from_secs(5)).unwrap();
        assert_eq!(exec.status, 3);
    }

    #[test]
    fn test_exec_timeout_kills_child() {
        let sandbox = Sandbox::acquire().unwrap();
        let start = Instant::now();
        let err = sandbox
            .exec("sh", &sh("sleep 30"), Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_release_reclaims_directory() {
        let sandbox = Sandbox::acquire().unwrap();
        let root = sandbox.root().to_path_buf();
        assert!(root.exists());
        sandbox.release();
        assert!(!root.exists());
    }

    #[test]
    fn test_drop_reclaims_directory() {
        let root = {
            let sandbox = Sandbox::acquire().unwrap();
            sandbox.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn test_stage_missing_file_fails() {
        let sandbox = Sandbox::acquire().unwrap();
        let err = sandbox.stage(Path::new("/no/such/file.fits")).unwrap_err();
        assert!(matches!(err, ToolError::Staging { .. }));
    }
}

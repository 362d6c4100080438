//! Execution harness for external, file-interface-only tools.
//!
//! Two backends share one contract: build the argv from a typed
//! [`ToolCommand`], run the binary, and make its newly produced files
//! appear in the designated host output directory.
//!
//! - [`BackendKind::Sandboxed`]: inputs are staged into an isolated working
//!   directory, the argv is rewritten to the staged paths, and new outputs
//!   are discovered by diffing the directory against a pre-invocation
//!   snapshot. The context is released on every exit path.
//! - [`BackendKind::Local`]: the tool runs directly in the host output
//!   directory with the original paths; no staging or diffing.
//!
//! Policy: a non-empty combined output stream is logged as a warning only —
//! SExtractor-class tools emit benign banners — and solely a non-zero exit
//! status fails the invocation. Skip-if-output-exists idempotence is the
//! caller's check, made before the runner is ever invoked.

mod command;
mod sandbox;

pub use command::{StagingManifest, ToolArg, ToolCommand};
pub use sandbox::{Execution, Sandbox};

use crate::config::{BackendKind, ToolConfig};
use crate::error::ToolError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result of one successful tool invocation.
#[derive(Debug)]
pub struct ToolOutcome {
    /// Combined stdout + stderr captured from the tool.
    pub diagnostics: String,
    /// Host paths of files the invocation produced (sandboxed backend only;
    /// the local backend writes into the output directory itself).
    pub new_files: Vec<PathBuf>,
}

/// Runs external tool commands through the configured backend.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    backend: BackendKind,
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(backend: BackendKind, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn from_config(tool: &ToolConfig) -> Self {
        Self::new(tool.backend, Duration::from_secs(tool.timeout_secs))
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Execute `command`, delivering any newly produced files into
    /// `output_dir`.
    pub fn run(&self, command: &ToolCommand, output_dir: &Path) -> Result<ToolOutcome, ToolError> {
        tracing::debug!("Running `{}` via {:?} backend", command, self.backend);
        match self.backend {
            BackendKind::Sandboxed => self.run_sandboxed(command, output_dir),
            BackendKind::Local => self.run_local(command, output_dir),
        }
    }

    fn run_sandboxed(
        &self,
        command: &ToolCommand,
        output_dir: &Path,
    ) -> Result<ToolOutcome, ToolError> {
        let sandbox = Sandbox::acquire()?;

        // Stage declared inputs and rewrite the argv to the staged paths.
        // The manifest lives for this invocation only.
        let mut manifest = StagingManifest::new();
        let mut argv = Vec::with_capacity(command.args().len());
        for arg in command.args() {
            match arg {
                ToolArg::Literal(token) => argv.push(token.clone()),
                ToolArg::Input(host) => {
                    let staged = match manifest.staged_path(host) {
                        Some(existing) => existing.to_path_buf(),
                        None => {
                            let staged = sandbox.stage(host)?;
                            manifest.record(host.clone(), staged.clone());
                            staged
                        }
                    };
                    argv.push(staged.display().to_string());
                }
            }
        }
        tracing::debug!("Staged {} input file(s)", manifest.len());

        let baseline = sandbox.snapshot()?;
        let exec = sandbox.exec(command.program(), &argv, self.timeout)?;

        warn_on_diagnostics(command.program(), &exec);
        if exec.status != 0 {
            // Sandbox released via Drop on this error path.
            return Err(ToolError::NonZeroExit {
                program: command.program().to_string(),
                status: exec.status,
                diagnostics: exec.output,
            });
        }

        let new_files = sandbox.collect_new_files(&baseline, output_dir)?;
        tracing::debug!("Recovered {} new file(s) into {}", new_files.len(), output_dir.display());
        sandbox.release();

        Ok(ToolOutcome {
            diagnostics: exec.output,
            new_files,
        })
    }

    fn run_local(&self, command: &ToolCommand, output_dir: &Path) -> Result<ToolOutcome, ToolError> {
        std::fs::create_dir_all(output_dir).map_err(|e| ToolError::Recover {
            path: output_dir.to_path_buf(),
            source: e,
        })?;

        let argv: Vec<String> = command
            .args()
            .iter()
            .map(|arg| match arg {
                ToolArg::Literal(token) => token.clone(),
                ToolArg::Input(path) => path.display().to_string(),
            })
            .collect();

        let exec = sandbox::run_with_timeout(command.program(), &argv, output_dir, self.timeout)?;

        warn_on_diagnostics(command.program(), &exec);
        if exec.status != 0 {
            return Err(ToolError::NonZeroExit {
                program: command.program().to_string(),
                status: exec.status,
                diagnostics: exec.output,
            });
        }

        Ok(ToolOutcome {
            diagnostics: exec.output,
            new_files: Vec::new(),
        })
    }
}

/// Non-empty tool output is a warning, never a failure by itself.
fn warn_on_diagnostics(program: &str, exec: &Execution) {
    if !exec.output.trim().is_empty() {
        tracing::warn!("{} diagnostics: {}", program, exec.output.trim());
    }
}

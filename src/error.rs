//! Error kinds for the reduction engine.
//!
//! Each layer fails with its own typed error: configuration problems abort
//! before any stage runs, stage logic failures carry the offending image's
//! base name, external tool failures carry the captured diagnostics, and
//! export failures never corrupt previously assigned keys.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error surfaced to the operator by the pipeline driver.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required path or setting was missing before the run started.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A stage failed; processing for the run is aborted.
    #[error("stage '{stage}' failed{}: {source}", fmt_image_context(.base_name, .history))]
    Stage {
        stage: String,
        base_name: Option<String>,
        history: Option<String>,
        source: ProcessingError,
    },

    /// The named pipeline configuration does not exist.
    #[error("no pipeline configuration named '{0}'")]
    UnknownConfiguration(String),
}

fn fmt_image_context(base_name: &Option<String>, history: &Option<String>) -> String {
    match (base_name, history) {
        (Some(name), Some(hist)) => format!(" on '{name}' (history: {hist})"),
        (Some(name), None) => format!(" on '{name}'"),
        _ => String::new(),
    }
}

/// A processor's logic contract was violated.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// A required header key is absent.
    #[error("required header key '{key}' missing from '{base_name}'")]
    MissingKey { key: String, base_name: String },

    /// Arrays that must share a shape do not.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// A stage that needs frames of a given class found none in the batch.
    #[error("no {class} frames in batch for {stage}")]
    NoFramesOfClass { class: String, stage: String },

    /// An external tool invocation failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// An export adapter failed.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Reading or writing a pipeline product failed.
    #[error("i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A collaborator (loader, store) rejected the operation.
    #[error("store failure: {0}")]
    Store(String),
}

impl ProcessingError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// An external binary invocation failed or its execution context could not
/// be managed.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The isolated execution context could not be acquired. Fatal for the
    /// invocation, never retried silently.
    #[error("failed to acquire isolated execution context: {0}")]
    Acquire(#[source] std::io::Error),

    /// Staging a host file into the context failed.
    #[error("failed to stage '{path}' into execution context: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tool binary could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on or killing the child process failed.
    #[error("failed waiting on '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool exited with a non-zero status. Captured combined output is
    /// attached for diagnosis.
    #[error("'{program}' exited with status {status}: {diagnostics}")]
    NonZeroExit {
        program: String,
        status: i32,
        diagnostics: String,
    },

    /// The caller-supplied deadline expired; the child was killed and the
    /// context released.
    #[error("'{program}' timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },

    /// Copying produced artifacts out of the context failed.
    #[error("failed to recover output '{path}': {source}")]
    Recover {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The relational store rejected a write.
#[derive(Debug, Error)]
#[error("export to table '{table}' rejected: {reason}")]
pub struct ExportError {
    pub table: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_includes_image_context() {
        let err = PipelineError::Stage {
            stage: "bias".to_string(),
            base_name: Some("SUMMER_20220402.fits".to_string()),
            history: Some("load,mask".to_string()),
            source: ProcessingError::MissingKey {
                key: "FILTER".to_string(),
                base_name: "SUMMER_20220402.fits".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("bias"));
        assert!(msg.contains("SUMMER_20220402.fits"));
        assert!(msg.contains("load,mask"));
    }

    #[test]
    fn test_stage_error_without_image_context() {
        let err = PipelineError::Stage {
            stage: "batch".to_string(),
            base_name: None,
            history: None,
            source: ProcessingError::Store("closed".to_string()),
        };
        assert!(err.to_string().contains("stage 'batch' failed: "));
    }

    #[test]
    fn test_tool_error_carries_diagnostics() {
        let err = ToolError::NonZeroExit {
            program: "source-extractor".to_string(),
            status: 2,
            diagnostics: "cannot open catalog".to_string(),
        };
        assert!(err.to_string().contains("status 2"));
        assert!(err.to_string().contains("cannot open catalog"));
    }
}

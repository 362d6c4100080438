//! Configuration for the reduction pipeline.
//!
//! All environment-derived settings (data directories, tool command,
//! database credentials) live in one explicit object passed at pipeline
//! construction, so independent runs with different configurations can
//! coexist in one process.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline name (selects configurations and output partitioning)
    #[serde(default = "default_pipeline")]
    pub pipeline: String,

    /// Night label, e.g. "20220402"; partitions raw input and output
    pub night: String,

    /// Named stage configuration to run (None = the default sequence)
    #[serde(default)]
    pub configuration: Option<String>,

    /// Input configuration
    pub input: InputConfig,

    /// Output configuration
    pub output: OutputConfig,

    /// External tool configuration
    #[serde(default)]
    pub tool: ToolConfig,
}

/// Input data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Directory tree holding raw exposures, keyed by night
    pub raw_dir: PathBuf,
}

/// Output data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for all pipeline products
    pub output_dir: PathBuf,

    /// Reprocess images even when expected products already exist
    #[serde(default = "default_true")]
    pub reprocess: bool,
}

/// External astrometry tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Command used to invoke the source extractor binary
    #[serde(default = "default_sextractor_cmd")]
    pub sextractor_cmd: String,

    /// Execution backend for external tools
    #[serde(default)]
    pub backend: BackendKind,

    /// Upper bound on a single tool invocation, in seconds
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,

    /// Directory holding the extractor's configuration files
    /// (astrom.sex, astrom.param, default.conv, default.nnw).
    /// Without one the extraction stage is left out of the run.
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            sextractor_cmd: default_sextractor_cmd(),
            backend: BackendKind::default(),
            timeout_secs: default_tool_timeout(),
            config_dir: None,
        }
    }
}

/// Which execution backend runs external tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Run in an isolated, file-staged working directory.
    #[default]
    Sandboxed,
    /// Run directly in the host output directory.
    Local,
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration. Runs before any stage executes.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pipeline.is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }
        if self.night.is_empty() {
            anyhow::bail!("Night label must not be empty");
        }
        if !self.input.raw_dir.is_dir() {
            anyhow::bail!(
                "Raw data directory does not exist: {}",
                self.input.raw_dir.display()
            );
        }
        if self.tool.sextractor_cmd.is_empty() {
            anyhow::bail!("Source extractor command must not be empty");
        }
        if self.tool.timeout_secs == 0 {
            anyhow::bail!("Tool timeout must be > 0");
        }
        if let Some(config_dir) = &self.tool.config_dir {
            if !config_dir.is_dir() {
                anyhow::bail!(
                    "Tool configuration directory does not exist: {}",
                    config_dir.display()
                );
            }
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_pipeline() -> String {
    "summer".to_string()
}
fn default_sextractor_cmd() -> String {
    "source-extractor".to_string()
}
fn default_tool_timeout() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

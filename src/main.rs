//! Nightpipe CLI
//!
//! Nightly reduction of raw astronomical exposures.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nightpipe::{run_pipeline, Config};

#[derive(Parser)]
#[command(name = "nightpipe")]
#[command(about = "Reduce a night of raw exposures", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override the night label
    #[arg(long, global = true)]
    night: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reduction pipeline (default if no command specified)
    Run,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, cli.night)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn run_command(config_path: PathBuf, night: Option<String>) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;

    // Apply overrides
    if let Some(n) = night {
        config.night = n;
    }

    let stats = run_pipeline(config)?;
    println!("{stats}");
    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Nightpipe Configuration

# Pipeline name: selects stage configurations and partitions output
pipeline: "summer"

# Night label; raw data is expected under <raw_dir>/<night>/raw/
night: "20220402"

# Named stage configuration to run (omit for the default sequence)
# configuration: "default"

# === INPUT: Where to read raw exposures from ===
input:
  # Directory tree holding raw exposures, keyed by night
  raw_dir: "/data/raw"

# === OUTPUT: Where to write pipeline products ===
output:
  # Root directory; products land under
  # <output_dir>/<pipeline>/<stage label>/<night>/
  output_dir: "/data/out"

  # Reprocess images even when expected products already exist
  reprocess: true

# === TOOL: External source extraction ===
tool:
  # Command used to invoke the source extractor binary
  sextractor_cmd: "source-extractor"

  # Execution backend: "sandboxed" (isolated working directory with file
  # staging) or "local" (run directly in the output directory)
  backend: sandboxed

  # Upper bound on a single tool invocation, in seconds
  timeout_secs: 300

  # Directory holding the extractor's configuration files
  # (astrom.sex, astrom.param, default.conv, default.nnw).
  # Omit to leave the extraction stage out of the run.
  # config_dir: "/data/sextractor-config"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_default() {
        // No subcommand - should default to Run
        let cli = Cli::try_parse_from(["nightpipe"]);
        assert!(cli.is_ok());
        assert!(cli.unwrap().command.is_none());
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::try_parse_from(["nightpipe", "-c", "other.yaml"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["nightpipe", "validate", "-c", "test.yaml"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_generated_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(path.clone()).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.pipeline, "summer");
        assert_eq!(config.night, "20220402");
    }
}

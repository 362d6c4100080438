//! Nightpipe: a nightly astronomical image reduction engine.
//!
//! Raw exposures for one night flow through a configured sequence of
//! processing stages: observation logging, bias and flat-field calibration,
//! product persistence and external source extraction.
//!
//! # Architecture
//!
//! - **Image**: 2-D pixel arrays with mutable headers, grouped into batches
//! - **Processors**: unit-wise and batch-wise stages behind a closed
//!   capability enum
//! - **Runner**: sandboxed execution of external, file-interface-only tools
//! - **Pipeline**: strictly sequential driver with typed error surfacing
//! - **Store**: trait seams for raw loading, image persistence and
//!   relational export
//!
//! # Usage
//!
//! ```no_run
//! use nightpipe::{Config, run_pipeline};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     run_pipeline(config)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod image;
pub mod paths;
pub mod pipeline;
pub mod processors;
pub mod runner;
pub mod store;

pub use config::{BackendKind, Config};
pub use error::{ExportError, PipelineError, ProcessingError, ToolError};
pub use image::{Batch, Header, HeaderValue, Image};
pub use pipeline::{Pipeline, PipelineStats, DEFAULT_CONFIGURATION};
pub use processors::Stage;
pub use runner::{ToolCommand, ToolRunner};
pub use store::{ImageStore, JsonImageStore, JsonRawLoader, RawLoader, RelationalStore};

use processors::{BiasCalibrator, CsvLog, FlatCalibrator, ImageBatcher, ImageSaver, Sextractor};
use std::sync::Arc;

/// Build the default nightly reduction sequence for the given
/// configuration: observation log, bias subtraction, per-filter batching,
/// flat fielding, saving, and (when tool configuration is present) source
/// extraction.
pub fn default_stages(config: &Config) -> Vec<Stage> {
    let night = config.night.as_str();
    let pipeline = config.pipeline.as_str();
    let output_dir = config.output.output_dir.as_path();
    let store = Arc::new(JsonImageStore::new());

    let log_path = paths::stage_output_dir(output_dir, pipeline, "log", night).join("obslog.csv");
    let log_keys = vec![
        image::keys::BASE_NAME.to_string(),
        image::keys::OBS_CLASS.to_string(),
        image::keys::TARGET.to_string(),
        "FILTER".to_string(),
    ];

    let mut stages = vec![
        Stage::batch(CsvLog::new(log_keys, log_path)),
        Stage::batch(BiasCalibrator::new()),
        Stage::batch(ImageBatcher::new("FILTER")),
        Stage::batch(FlatCalibrator::new()),
        Stage::unit(ImageSaver::new(
            store,
            paths::stage_output_dir(output_dir, pipeline, "scienceimages", night),
        )),
    ];

    if let Some(config_dir) = &config.tool.config_dir {
        let runner = ToolRunner::from_config(&config.tool);
        let sextractor = Sextractor::new(
            runner,
            config.tool.sextractor_cmd.clone(),
            paths::stage_output_dir(output_dir, pipeline, "catalogs", night),
        )
        .with_config(config_dir.join("astrom.sex"))
        .with_params(config_dir.join("astrom.param"))
        .with_filter(config_dir.join("default.conv"))
        .with_star_nnw(config_dir.join("default.nnw"))
        .with_reprocess(config.output.reprocess);
        stages.push(Stage::unit(sextractor));
    }

    stages
}

/// Run the full reduction pipeline with the given configuration.
pub fn run_pipeline(config: Config) -> anyhow::Result<PipelineStats> {
    config.validate()?;

    tracing::info!(
        "Starting pipeline '{}' for night {}",
        config.pipeline,
        config.night
    );

    let pipeline = Pipeline::new(config.pipeline.clone())
        .with_configuration(DEFAULT_CONFIGURATION, default_stages(&config));

    let loader = JsonRawLoader::new();
    let batch = pipeline.load_night(&loader, &config.input.raw_dir, &config.night)?;
    if batch.is_empty() {
        return Err(PipelineError::Configuration(format!(
            "no raw images found for night {} under {}",
            config.night,
            config.input.raw_dir.display()
        ))
        .into());
    }

    let stats = pipeline.run(config.configuration.as_deref(), vec![batch])?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config(raw_dir: PathBuf, output_dir: PathBuf) -> Config {
        Config {
            pipeline: "summer".to_string(),
            night: "20220402".to_string(),
            configuration: None,
            input: config::InputConfig { raw_dir },
            output: config::OutputConfig {
                output_dir,
                reprocess: true,
            },
            tool: config::ToolConfig::default(),
        }
    }

    #[test]
    fn test_default_stages_without_tool_config() {
        let config = test_config(PathBuf::from("/raw"), PathBuf::from("/out"));
        let stages = default_stages(&config);
        let names: Vec<_> = stages.iter().map(Stage::name).collect();
        assert_eq!(names, vec!["csvlog", "bias", "batch", "flat", "save"]);
    }

    #[test]
    fn test_default_stages_with_tool_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(PathBuf::from("/raw"), PathBuf::from("/out"));
        config.tool.config_dir = Some(dir.path().to_path_buf());

        let stages = default_stages(&config);
        assert_eq!(stages.last().map(Stage::name), Some("sextractor"));
    }

    #[test]
    fn test_run_pipeline_rejects_missing_raw_dir() {
        let out = tempfile::tempdir().unwrap();
        let config = test_config(
            PathBuf::from("/definitely/not/here"),
            out.path().to_path_buf(),
        );
        assert!(run_pipeline(config).is_err());
    }
}

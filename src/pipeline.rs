//! Sequential pipeline driver.
//!
//! A [`Pipeline`] owns named stage sequences ("configurations"). A run
//! executes every stage of the selected configuration in order, feeding the
//! stage's flattened outputs to the next stage; batches within a stage are
//! processed in order. The first stage failure aborts the run with the
//! offending stage and image context attached.

use crate::error::{PipelineError, ProcessingError};
use crate::image::Batch;
use crate::paths;
use crate::processors::Stage;
use crate::store::RawLoader;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

/// Name of the configuration run when none is selected.
pub const DEFAULT_CONFIGURATION: &str = "default";

/// A named reduction pipeline: one or more stage sequences keyed by
/// configuration name.
pub struct Pipeline {
    name: String,
    configurations: HashMap<String, Vec<Stage>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            configurations: HashMap::new(),
        }
    }

    /// Register a stage sequence under a configuration name.
    pub fn with_configuration(mut self, name: impl Into<String>, stages: Vec<Stage>) -> Self {
        self.configurations.insert(name.into(), stages);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn configuration_names(&self) -> impl Iterator<Item = &str> {
        self.configurations.keys().map(String::as_str)
    }

    /// Load a night of raw exposures into a single batch.
    ///
    /// Files are loaded in sorted name order so batch order is stable across
    /// runs. Every loaded image must carry the core header keys.
    pub fn load_night(
        &self,
        loader: &dyn RawLoader,
        raw_dir: &Path,
        night: &str,
    ) -> Result<Batch, ProcessingError> {
        let night_dir = paths::raw_night_dir(raw_dir, night);
        let mut files: Vec<_> = std::fs::read_dir(&night_dir)
            .map_err(|e| ProcessingError::io(&night_dir, e))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| ProcessingError::io(&night_dir, e))?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut batch = Batch::empty();
        for path in &files {
            let image = loader.load(path)?;
            image.check_core_keys()?;
            batch.push(image);
        }
        tracing::info!(
            "Loaded {} raw image(s) for night {} from {}",
            batch.len(),
            night,
            night_dir.display()
        );
        Ok(batch)
    }

    /// Run one configuration over the given batches.
    ///
    /// Strictly sequential: stages run in registration order, and within a
    /// stage, batches run in order. A stage's output batches (flattened
    /// across its input batches) become the next stage's input.
    pub fn run(
        &self,
        configuration: Option<&str>,
        batches: Vec<Batch>,
    ) -> Result<PipelineStats, PipelineError> {
        let configuration = configuration.unwrap_or(DEFAULT_CONFIGURATION);
        let stages = self
            .configurations
            .get(configuration)
            .ok_or_else(|| PipelineError::UnknownConfiguration(configuration.to_string()))?;

        let start = Instant::now();
        let images_in: usize = batches.iter().map(Batch::len).sum();
        tracing::info!(
            "Running pipeline '{}' configuration '{}': {} stage(s), {} image(s) in {} batch(es)",
            self.name,
            configuration,
            stages.len(),
            images_in,
            batches.len()
        );

        let mut current = batches;
        for stage in stages {
            let stage_start = Instant::now();
            let mut next = Vec::new();
            for batch in current {
                let outputs = stage.apply(batch).map_err(|failure| PipelineError::Stage {
                    stage: stage.name().to_string(),
                    base_name: failure.base_name,
                    history: failure.history,
                    source: failure.error,
                })?;
                next.extend(outputs);
            }
            current = next;
            tracing::info!(
                "Stage '{}' complete in {:.2?}: {} batch(es), {} image(s)",
                stage.name(),
                stage_start.elapsed(),
                current.len(),
                current.iter().map(Batch::len).sum::<usize>()
            );
        }

        let stats = PipelineStats {
            stages_run: stages.len(),
            images_in,
            images_out: current.iter().map(Batch::len).sum(),
            batches_out: current.len(),
            elapsed: start.elapsed(),
        };
        tracing::info!("Pipeline '{}' finished: {}", self.name, stats);
        Ok(stats)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field(
                "configurations",
                &self.configurations.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Statistics from one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Stages executed
    pub stages_run: usize,

    /// Images fed into the first stage
    pub images_in: usize,

    /// Images left after the final stage
    pub images_out: usize,

    /// Batches left after the final stage
    pub batches_out: usize,

    /// Wall-clock duration of the run
    pub elapsed: std::time::Duration,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stages: {}, Images in: {}, Images out: {}, Batches out: {}, Elapsed: {:.2?}",
            self.stages_run, self.images_in, self.images_out, self.batches_out, self.elapsed
        )
    }
}

//! Persisting pipeline products and recording the handoff path.

use crate::error::ProcessingError;
use crate::image::{keys, Image};
use crate::paths;
use crate::processors::UnitProcessor;
use crate::store::ImageStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Saves each image into this stage's output directory and points
/// `SAVEPATH` at the new product, so later stages that hand files to
/// external tools know where the image last touched disk.
pub struct ImageSaver {
    store: Arc<dyn ImageStore>,
    output_dir: PathBuf,
}

impl ImageSaver {
    /// `output_dir` is the fully resolved stage directory
    /// (`output_dir/<pipeline>/<stage label>/<night>`).
    pub fn new(store: Arc<dyn ImageStore>, output_dir: PathBuf) -> Self {
        Self { store, output_dir }
    }
}

impl UnitProcessor for ImageSaver {
    fn name(&self) -> &'static str {
        "save"
    }

    fn process(&self, image: &mut Image) -> Result<(), ProcessingError> {
        let base_name = image.header.require_str(keys::BASE_NAME)?.to_string();
        let path = self.output_dir.join(&base_name);

        self.store.save(&path, image)?;
        image
            .header
            .set(keys::LATEST_SAVE, path.display().to_string());
        tracing::debug!("Saved {} to {}", base_name, path.display());
        Ok(())
    }
}

impl std::fmt::Debug for ImageSaver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSaver")
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

/// Convenience: resolve the stage directory from the standard layout.
pub fn stage_dir(output_dir: &std::path::Path, pipeline: &str, label: &str, night: &str) -> PathBuf {
    paths::stage_output_dir(output_dir, pipeline, label, night)
}

//! Pipeline stages.
//!
//! Every stage is one of a closed set of capability tags, so the driver
//! dispatches without runtime introspection:
//!
//! - [`Stage::Unit`]: applies independently to each image in input order,
//!   preserving batch arity and order.
//! - [`Stage::Batch`]: may reshape arity — split one batch into many,
//!   filter, or regroup.
//!
//! A stage receives ownership of its input batch and returns new or mutated
//! batches; callers never reuse the input afterwards. Failures are typed
//! [`ProcessingError`]s; a failing unit-wise stage reports the offending
//! image's base name and processing history.

mod calibrate;
mod csvlog;
mod database;
mod save;
mod select;
mod sextractor;
mod split;

pub use calibrate::{BiasCalibrator, FlatCalibrator, MaskPixels};
pub use csvlog::CsvLog;
pub use database::DatabaseImageExporter;
pub use save::ImageSaver;
pub use select::{ImageBatcher, ImageSelector, UNSET_GROUP};
pub use sextractor::Sextractor;
pub use split::SplitImage;

use crate::error::ProcessingError;
use crate::image::{Batch, Image};

/// A stage that transforms one image at a time, preserving batch arity.
pub trait UnitProcessor {
    /// Stage identifier, used in history entries and error context.
    fn name(&self) -> &'static str;

    fn process(&self, image: &mut Image) -> Result<(), ProcessingError>;
}

/// A stage that consumes a whole batch and may reshape arity.
pub trait BatchProcessor {
    /// Stage identifier, used in history entries and error context.
    fn name(&self) -> &'static str;

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessingError>;
}

/// A stage failure with the context the driver surfaces to the operator.
#[derive(Debug)]
pub struct StageFailure {
    pub error: ProcessingError,
    /// Base file name of the offending image, when known.
    pub base_name: Option<String>,
    /// Processing history of the offending image, when known.
    pub history: Option<String>,
}

impl StageFailure {
    fn bare(error: ProcessingError) -> Self {
        Self {
            error,
            base_name: None,
            history: None,
        }
    }
}

/// A configured pipeline stage, tagged by capability.
pub enum Stage {
    Unit(Box<dyn UnitProcessor>),
    Batch(Box<dyn BatchProcessor>),
}

impl Stage {
    pub fn unit(processor: impl UnitProcessor + 'static) -> Self {
        Stage::Unit(Box::new(processor))
    }

    pub fn batch(processor: impl BatchProcessor + 'static) -> Self {
        Stage::Batch(Box::new(processor))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Unit(p) => p.name(),
            Stage::Batch(p) => p.name(),
        }
    }

    /// Apply the stage to one batch, taking ownership and returning the
    /// output batch list.
    pub fn apply(&self, batch: Batch) -> Result<Vec<Batch>, StageFailure> {
        match self {
            Stage::Unit(processor) => {
                let mut images = batch.into_images();
                for image in images.iter_mut() {
                    if let Err(error) = processor.process(image) {
                        return Err(StageFailure {
                            base_name: Some(image.base_name().to_string()),
                            history: image.header.history_str().map(str::to_string),
                            error,
                        });
                    }
                }
                Ok(vec![Batch::new(images)])
            }
            Stage::Batch(processor) => processor.process(batch).map_err(StageFailure::bare),
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Unit(p) => write!(f, "Stage::Unit({})", p.name()),
            Stage::Batch(p) => write!(f, "Stage::Batch({})", p.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::test_image;

    struct Doubler;

    impl UnitProcessor for Doubler {
        fn name(&self) -> &'static str {
            "double"
        }

        fn process(&self, image: &mut Image) -> Result<(), ProcessingError> {
            image.data.mapv_inplace(|v| v * 2.0);
            image.header.append_history(self.name());
            Ok(())
        }
    }

    struct FailOn(&'static str);

    impl UnitProcessor for FailOn {
        fn name(&self) -> &'static str {
            "failer"
        }

        fn process(&self, image: &mut Image) -> Result<(), ProcessingError> {
            if image.base_name() == self.0 {
                return Err(ProcessingError::Store("induced".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_unit_stage_preserves_arity_and_order() {
        let batch = Batch::new(vec![
            test_image("a.fits"),
            test_image("b.fits"),
            test_image("c.fits"),
        ]);
        let stage = Stage::unit(Doubler);

        let out = stage.apply(batch).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 3);
        let names: Vec<_> = out[0].iter().map(|i| i.base_name().to_string()).collect();
        assert_eq!(names, vec!["a.fits", "b.fits", "c.fits"]);
    }

    #[test]
    fn test_unit_stage_failure_carries_image_context() {
        let mut bad = test_image("bad.fits");
        bad.header.append_history("load");
        let batch = Batch::new(vec![test_image("ok.fits"), bad]);

        let failure = Stage::unit(FailOn("bad.fits")).apply(batch).unwrap_err();
        assert_eq!(failure.base_name.as_deref(), Some("bad.fits"));
        assert_eq!(failure.history.as_deref(), Some("load"));
    }

    #[test]
    fn test_stage_name_dispatch() {
        assert_eq!(Stage::unit(Doubler).name(), "double");
    }
}

//! Array calibration stages: pixel masking, bias subtraction and
//! flat-field division.
//!
//! Master frames are stacked from the calibration frames present in the
//! incoming batch (classified via `OBSCLASS`/`TARGET`); the calibration
//! frames are consumed by the stage and only science frames flow on.

use crate::error::ProcessingError;
use crate::image::{keys, Batch, HeaderValue, Image};
use crate::processors::{BatchProcessor, UnitProcessor};
use ndarray::Array2;

/// Sets pixels flagged in a mask to NaN. Non-zero mask pixels are masked.
#[derive(Debug, Clone)]
pub struct MaskPixels {
    mask: Array2<f32>,
}

impl MaskPixels {
    pub fn new(mask: Array2<f32>) -> Self {
        Self { mask }
    }
}

impl UnitProcessor for MaskPixels {
    fn name(&self) -> &'static str {
        "mask"
    }

    fn process(&self, image: &mut Image) -> Result<(), ProcessingError> {
        if image.data.dim() != self.mask.dim() {
            return Err(ProcessingError::ShapeMismatch {
                expected: self.mask.dim(),
                actual: image.data.dim(),
            });
        }
        ndarray::Zip::from(&mut image.data)
            .and(&self.mask)
            .for_each(|pixel, &flag| {
                if flag != 0.0 {
                    *pixel = f32::NAN;
                }
            });
        image.header.append_history(self.name());
        Ok(())
    }
}

/// True if the image is a calibration frame with the given target.
fn is_cal_frame(image: &Image, target: &str) -> bool {
    image.header.is_calibration()
        && matches!(
            image.header.get(keys::TARGET),
            Some(HeaderValue::Str(t)) if t == target
        )
}

/// Pixel-wise mean stack of the given frames; shapes must agree.
fn mean_stack(frames: &[&Image]) -> Result<Array2<f32>, ProcessingError> {
    let first = frames.first().ok_or_else(|| {
        ProcessingError::Store("cannot stack an empty set of frames".to_string())
    })?;
    let dim = first.data.dim();

    let mut stack = Array2::<f32>::zeros(dim);
    for frame in frames {
        if frame.data.dim() != dim {
            return Err(ProcessingError::ShapeMismatch {
                expected: dim,
                actual: frame.data.dim(),
            });
        }
        stack += &frame.data;
    }
    stack /= frames.len() as f32;
    Ok(stack)
}

/// Subtracts a master bias (mean stack of the batch's bias frames) from
/// every other frame. Bias frames are consumed.
#[derive(Debug, Clone, Default)]
pub struct BiasCalibrator;

impl BiasCalibrator {
    pub fn new() -> Self {
        Self
    }
}

impl BatchProcessor for BiasCalibrator {
    fn name(&self) -> &'static str {
        "bias"
    }

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessingError> {
        let images = batch.into_images();
        let bias_frames: Vec<&Image> = images.iter().filter(|i| is_cal_frame(i, "bias")).collect();
        if bias_frames.is_empty() {
            return Err(ProcessingError::NoFramesOfClass {
                class: "bias".to_string(),
                stage: self.name().to_string(),
            });
        }
        tracing::debug!("Stacking master bias from {} frame(s)", bias_frames.len());
        let master = mean_stack(&bias_frames)?;

        let mut out = Batch::empty();
        for mut image in images {
            if is_cal_frame(&image, "bias") {
                continue;
            }
            if image.data.dim() != master.dim() {
                return Err(ProcessingError::ShapeMismatch {
                    expected: master.dim(),
                    actual: image.data.dim(),
                });
            }
            image.data -= &master;
            image.header.append_history(self.name());
            out.push(image);
        }
        Ok(vec![out])
    }
}

/// Divides every frame by a normalized master flat (mean stack of the
/// batch's flat frames, scaled to unit mean). Flat frames are consumed;
/// non-positive master pixels map to NaN.
#[derive(Debug, Clone, Default)]
pub struct FlatCalibrator;

impl FlatCalibrator {
    pub fn new() -> Self {
        Self
    }
}

impl BatchProcessor for FlatCalibrator {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessingError> {
        let images = batch.into_images();
        let flat_frames: Vec<&Image> = images.iter().filter(|i| is_cal_frame(i, "flat")).collect();
        if flat_frames.is_empty() {
            return Err(ProcessingError::NoFramesOfClass {
                class: "flat".to_string(),
                stage: self.name().to_string(),
            });
        }
        let mut master = mean_stack(&flat_frames)?;
        let mean = master.mean().unwrap_or(0.0);
        if mean > 0.0 {
            master /= mean;
        }

        let mut out = Batch::empty();
        for mut image in images {
            if is_cal_frame(&image, "flat") {
                continue;
            }
            if image.data.dim() != master.dim() {
                return Err(ProcessingError::ShapeMismatch {
                    expected: master.dim(),
                    actual: image.data.dim(),
                });
            }
            ndarray::Zip::from(&mut image.data)
                .and(&master)
                .for_each(|pixel, &m| {
                    *pixel = if m > 0.0 { *pixel / m } else { f32::NAN };
                });
            image.header.append_history(self.name());
            out.push(image);
        }
        Ok(vec![out])
    }
}

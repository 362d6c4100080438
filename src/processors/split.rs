//! Splitting one exposure into a grid of sub-images.

use crate::error::ProcessingError;
use crate::image::{keys, Batch, Image};
use crate::paths;
use crate::processors::BatchProcessor;
use ndarray::s;

/// Splits each image's array into an `n_x` x `n_y` grid of sub-images.
/// Sub-images inherit the parent header with a derived base name
/// (`<stem>_<ix>_<iy>.<ext>`); row/column remainders go to the last piece.
#[derive(Debug, Clone)]
pub struct SplitImage {
    n_x: usize,
    n_y: usize,
}

impl SplitImage {
    pub fn new(n_x: usize, n_y: usize) -> Self {
        assert!(n_x > 0 && n_y > 0, "split grid must be at least 1x1");
        Self { n_x, n_y }
    }
}

impl BatchProcessor for SplitImage {
    fn name(&self) -> &'static str {
        "split"
    }

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessingError> {
        let mut out = Batch::empty();

        for image in batch {
            let base_name = image
                .header
                .require_str(keys::BASE_NAME)
                .map(str::to_string)?;
            let stem = paths::base_stem(&base_name).to_string();
            let ext = base_name
                .split_once('.')
                .map(|(_, e)| format!(".{e}"))
                .unwrap_or_default();

            let (rows, cols) = image.data.dim();
            let row_step = rows / self.n_y;
            let col_step = cols / self.n_x;
            if row_step == 0 || col_step == 0 {
                return Err(ProcessingError::ShapeMismatch {
                    expected: (self.n_y, self.n_x),
                    actual: (rows, cols),
                });
            }

            for ix in 0..self.n_x {
                for iy in 0..self.n_y {
                    let row_end = if iy == self.n_y - 1 { rows } else { (iy + 1) * row_step };
                    let col_end = if ix == self.n_x - 1 { cols } else { (ix + 1) * col_step };

                    let piece = image
                        .data
                        .slice(s![iy * row_step..row_end, ix * col_step..col_end])
                        .to_owned();

                    let mut header = image.header.clone();
                    header.set(keys::BASE_NAME, format!("{stem}_{ix}_{iy}{ext}"));
                    header.append_history(self.name());
                    out.push(Image::new(piece, header));
                }
            }
        }

        Ok(vec![out])
    }
}

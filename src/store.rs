//! Collaborator seams: raw input, image persistence and the relational store.
//!
//! The engine only requires that a raw loader return a 2-D numeric array and
//! a mutable string-keyed header, that an image store round-trip an image
//! through a path, and that a relational store accept a header and hand back
//! generated key fields. FITS encoding, WCS handling and SQL live behind
//! these traits.

use crate::error::{ExportError, ProcessingError};
use crate::image::{Header, HeaderValue, Image};
use crate::paths;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supplies (array, header) pairs given a raw file path.
pub trait RawLoader {
    fn load(&self, path: &Path) -> Result<Image, ProcessingError>;
}

/// Persists and restores pipeline products.
pub trait ImageStore {
    fn save(&self, path: &Path, image: &Image) -> Result<(), ProcessingError>;
    fn load(&self, path: &Path) -> Result<Image, ProcessingError>;
}

/// Accepts a header plus a table identifier and returns the generated key
/// fields, e.g. an assigned primary key.
pub trait RelationalStore {
    fn export(
        &self,
        table: &str,
        header: &Header,
    ) -> Result<Vec<(String, HeaderValue)>, ExportError>;
}

/// On-disk document for the built-in store.
#[derive(Serialize, Deserialize)]
struct ImageDocument {
    header: Header,
    shape: (usize, usize),
    data: Vec<f32>,
}

/// Built-in image store: one JSON document per image (header, shape,
/// row-major pixels). Stands in for the FITS collaborator so the engine is
/// runnable and testable on its own.
#[derive(Debug, Clone, Default)]
pub struct JsonImageStore;

impl JsonImageStore {
    pub fn new() -> Self {
        Self
    }
}

impl ImageStore for JsonImageStore {
    /// Write is temp-then-rename: the product either fully appears at
    /// `path` or not at all.
    fn save(&self, path: &Path, image: &Image) -> Result<(), ProcessingError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProcessingError::io(parent, e))?;
        }

        let doc = ImageDocument {
            header: image.header.clone(),
            shape: image.data.dim(),
            data: image.data.iter().copied().collect(),
        };
        let contents = serde_json::to_vec(&doc)
            .map_err(|e| ProcessingError::Store(format!("encode {}: {e}", path.display())))?;

        let tmp = paths::temp_path(path);
        std::fs::write(&tmp, contents).map_err(|e| ProcessingError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            ProcessingError::io(path, e)
        })?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Image, ProcessingError> {
        let contents = std::fs::read(path).map_err(|e| ProcessingError::io(path, e))?;
        let doc: ImageDocument = serde_json::from_slice(&contents)
            .map_err(|e| ProcessingError::Store(format!("decode {}: {e}", path.display())))?;

        let data = Array2::from_shape_vec(doc.shape, doc.data)
            .map_err(|e| ProcessingError::Store(format!("bad shape in {}: {e}", path.display())))?;
        Ok(Image::new(data, doc.header))
    }
}

/// Raw loader backed by the built-in JSON format. Instrument-specific FITS
/// loaders implement [`RawLoader`] with their own header normalization.
#[derive(Debug, Clone, Default)]
pub struct JsonRawLoader {
    store: JsonImageStore,
}

impl JsonRawLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RawLoader for JsonRawLoader {
    fn load(&self, path: &Path) -> Result<Image, ProcessingError> {
        self.store.load(path)
    }
}

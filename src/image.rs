//! Core data model: headers, images and batches.
//!
//! An [`Image`] is one exposure at some stage of reduction: a 2-D pixel
//! array owned exclusively by the image, plus a mutable string-keyed
//! [`Header`]. A [`Batch`] is an ordered collection of images that share a
//! processing lineage and flow through one processor invocation together.
//!
//! The processing history lives inside the header under [`keys::HISTORY`]
//! as an append-only, comma-joined list of stage identifiers. It is the
//! audit trail used to diagnose re-runs; processors that mutate an image's
//! pixels or classification append their identifier and nothing ever
//! removes or reorders entries.

use crate::error::ProcessingError;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Header keys every image must carry after load.
pub mod keys {
    /// Path of the raw exposure on disk.
    pub const RAW_PATH: &str = "RAWPATH";
    /// Base file name, stable across stages.
    pub const BASE_NAME: &str = "BASENAME";
    /// Append-only processing history (comma-joined stage identifiers).
    pub const HISTORY: &str = "CALSTEPS";
    /// Calibration-vs-science classification ("calibration" or "science").
    pub const OBS_CLASS: &str = "OBSCLASS";
    /// Latest saved path, used for cross-stage file handoff.
    pub const LATEST_SAVE: &str = "SAVEPATH";
    /// Source catalog produced by the extraction stage.
    pub const SOURCE_CATALOG: &str = "SRCCAT";
    /// Observation target type (bias / flat / science object name).
    pub const TARGET: &str = "TARGET";

    /// Keys that must be present after the raw loader runs.
    pub const CORE: &[&str] = &[RAW_PATH, BASE_NAME, HISTORY, OBS_CLASS, LATEST_SAVE];
}

/// Value of the calibration classification for calibration frames.
pub const OBS_CLASS_CALIBRATION: &str = "calibration";
/// Value of the calibration classification for science frames.
pub const OBS_CLASS_SCIENCE: &str = "science";

/// A scalar header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl HeaderValue {
    /// String form used for grouping keys and file naming.
    pub fn as_group_key(&self) -> String {
        match self {
            HeaderValue::Bool(b) => b.to_string(),
            HeaderValue::Int(i) => i.to_string(),
            HeaderValue::Float(f) => f.to_string(),
            HeaderValue::Str(s) => s.clone(),
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_group_key())
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        HeaderValue::Str(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        HeaderValue::Str(s)
    }
}

impl From<i64> for HeaderValue {
    fn from(i: i64) -> Self {
        HeaderValue::Int(i)
    }
}

impl From<f64> for HeaderValue {
    fn from(f: f64) -> Self {
        HeaderValue::Float(f)
    }
}

impl From<bool> for HeaderValue {
    fn from(b: bool) -> Self {
        HeaderValue::Bool(b)
    }
}

/// Mutable string-keyed metadata for one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    fields: HashMap<String, HeaderValue>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Get a string value, or a typed error naming the offending image.
    pub fn require_str(&self, key: &str) -> Result<&str, ProcessingError> {
        match self.get(key) {
            Some(HeaderValue::Str(s)) => Ok(s),
            _ => Err(ProcessingError::MissingKey {
                key: key.to_string(),
                base_name: self.base_name().unwrap_or("<unknown>").to_string(),
            }),
        }
    }

    /// Base file name, if set.
    pub fn base_name(&self) -> Option<&str> {
        match self.get(keys::BASE_NAME) {
            Some(HeaderValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Append a stage identifier to the processing history.
    ///
    /// The history only ever grows; entries are never reordered.
    pub fn append_history(&mut self, stage: &str) {
        let updated = match self.get(keys::HISTORY) {
            Some(HeaderValue::Str(prev)) if !prev.is_empty() => format!("{prev},{stage}"),
            _ => stage.to_string(),
        };
        self.set(keys::HISTORY, updated);
    }

    /// The processing history applied so far, oldest first.
    pub fn history(&self) -> Vec<&str> {
        match self.get(keys::HISTORY) {
            Some(HeaderValue::Str(s)) if !s.is_empty() => s.split(',').collect(),
            _ => Vec::new(),
        }
    }

    /// Raw comma-joined history string, if any.
    pub fn history_str(&self) -> Option<&str> {
        match self.get(keys::HISTORY) {
            Some(HeaderValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// True if the image is classified as a calibration frame.
    pub fn is_calibration(&self) -> bool {
        matches!(self.get(keys::OBS_CLASS), Some(HeaderValue::Str(s)) if s == OBS_CLASS_CALIBRATION)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.fields.iter()
    }
}

/// One exposure at some pipeline stage: pixels plus header.
///
/// Each image owns its array exclusively; processors replace it wholesale,
/// never alias it across images.
#[derive(Debug, Clone)]
pub struct Image {
    pub data: Array2<f32>,
    pub header: Header,
}

impl Image {
    pub fn new(data: Array2<f32>, header: Header) -> Self {
        Self { data, header }
    }

    /// Base file name, falling back to a placeholder for error context.
    pub fn base_name(&self) -> &str {
        self.header.base_name().unwrap_or("<unnamed>")
    }

    /// Verify the core header keys a loaded image must carry.
    pub fn check_core_keys(&self) -> Result<(), ProcessingError> {
        for key in keys::CORE {
            if !self.header.contains(key) {
                return Err(ProcessingError::MissingKey {
                    key: (*key).to_string(),
                    base_name: self.base_name().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// An ordered collection of images processed together by one stage.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    images: Vec<Image>,
}

impl Batch {
    pub fn new(images: Vec<Image>) -> Self {
        Self { images }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn push(&mut self, image: Image) {
        self.images.push(image);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Image> {
        self.images.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Image> {
        self.images.iter_mut()
    }

    pub fn into_images(self) -> Vec<Image> {
        self.images
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }
}

impl IntoIterator for Batch {
    type Item = Image;
    type IntoIter = std::vec::IntoIter<Image>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_iter()
    }
}

impl FromIterator<Image> for Batch {
    fn from_iter<T: IntoIterator<Item = Image>>(iter: T) -> Self {
        Self {
            images: iter.into_iter().collect(),
        }
    }
}

/// Build a minimal science image with the core keys set. Test use only.
#[cfg(test)]
pub(crate) fn test_image(base_name: &str) -> Image {
    let mut header = Header::new();
    header.set(keys::RAW_PATH, format!("/raw/{base_name}"));
    header.set(keys::BASE_NAME, base_name);
    header.set(keys::HISTORY, "");
    header.set(keys::OBS_CLASS, OBS_CLASS_SCIENCE);
    header.set(keys::LATEST_SAVE, format!("/raw/{base_name}"));
    Image::new(Array2::zeros((4, 4)), header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_history_appends_in_order() {
        let mut header = Header::new();
        header.append_history("load");
        header.append_history("bias");
        header.append_history("flat");
        assert_eq!(header.history(), vec!["load", "bias", "flat"]);
    }

    #[test]
    fn test_history_never_shrinks_on_repeat() {
        let mut header = Header::new();
        header.append_history("sextractor");
        header.append_history("sextractor");
        assert_eq!(header.history(), vec!["sextractor", "sextractor"]);
    }

    #[test]
    fn test_core_key_check() {
        let image = test_image("a.fits");
        assert!(image.check_core_keys().is_ok());

        let bare = Image::new(Array2::zeros((2, 2)), Header::new());
        let err = bare.check_core_keys().unwrap_err();
        assert!(matches!(err, ProcessingError::MissingKey { .. }));
    }

    #[test]
    fn test_header_value_group_key() {
        assert_eq!(HeaderValue::from("r").as_group_key(), "r");
        assert_eq!(HeaderValue::from(3i64).as_group_key(), "3");
        assert_eq!(HeaderValue::from(true).as_group_key(), "true");
    }

    #[test]
    fn test_require_str_reports_base_name() {
        let image = test_image("b.fits");
        let err = image.header.require_str("FILTER").unwrap_err();
        assert!(err.to_string().contains("b.fits"));
        assert!(err.to_string().contains("FILTER"));
    }
}

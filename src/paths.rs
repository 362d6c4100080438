//! Output directory layout.
//!
//! Products are partitioned by pipeline name, processing stage label and
//! per-night subdirectory: `output_dir/<pipeline>/<stage label>/<night>/`.
//! The stage label is part of each stage's configuration and otherwise
//! opaque to the engine.

use std::path::{Path, PathBuf};

/// Directory holding one stage's products for one night.
pub fn stage_output_dir(output_dir: &Path, pipeline: &str, stage_label: &str, night: &str) -> PathBuf {
    output_dir.join(pipeline).join(stage_label).join(night)
}

/// Full path for one image's product in a stage directory.
pub fn stage_output_path(
    output_dir: &Path,
    pipeline: &str,
    stage_label: &str,
    night: &str,
    base_name: &str,
) -> PathBuf {
    stage_output_dir(output_dir, pipeline, stage_label, night).join(base_name)
}

/// Raw exposures for a night live under `raw_dir/<night>/raw/`.
pub fn raw_night_dir(raw_dir: &Path, night: &str) -> PathBuf {
    raw_dir.join(night).join("raw")
}

/// Temp-file name used for atomic writes in the same directory.
pub fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("temp_{name}"))
}

/// Stem of a base file name, used to derive catalog and check-image names.
pub fn base_stem(base_name: &str) -> &str {
    base_name.split('.').next().unwrap_or(base_name)
}

//! Per-night observation log.
//!
//! Appends one CSV row of selected header keys per image. The log is
//! rewritten temp-then-rename on every batch so a failure mid-write never
//! leaves a truncated file behind.

use crate::error::ProcessingError;
use crate::image::Batch;
use crate::paths;
use crate::processors::BatchProcessor;
use std::path::PathBuf;

/// Writes selected header keys for every image to a CSV observation log.
/// Pure with respect to the batch: images pass through unchanged.
#[derive(Debug, Clone)]
pub struct CsvLog {
    export_keys: Vec<String>,
    path: PathBuf,
}

impl CsvLog {
    pub fn new(export_keys: Vec<String>, path: PathBuf) -> Self {
        Self { export_keys, path }
    }

    fn append_rows(&self, batch: &Batch) -> Result<(), ProcessingError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProcessingError::io(parent, e))?;
        }

        let tmp = paths::temp_path(&self.path);
        let mut writer = csv::Writer::from_path(&tmp)
            .map_err(|e| ProcessingError::Store(format!("open {}: {e}", tmp.display())))?;

        writer
            .write_record(&self.export_keys)
            .map_err(|e| ProcessingError::Store(format!("write header: {e}")))?;

        // Carry over rows from previous batches of this run.
        if self.path.exists() {
            let mut reader = csv::Reader::from_path(&self.path)
                .map_err(|e| ProcessingError::Store(format!("open {}: {e}", self.path.display())))?;
            for record in reader.records() {
                let record =
                    record.map_err(|e| ProcessingError::Store(format!("read log row: {e}")))?;
                writer
                    .write_record(&record)
                    .map_err(|e| ProcessingError::Store(format!("copy log row: {e}")))?;
            }
        }

        for image in batch.iter() {
            let row: Vec<String> = self
                .export_keys
                .iter()
                .map(|key| {
                    image
                        .header
                        .get(key)
                        .map(|v| v.as_group_key())
                        .unwrap_or_default()
                })
                .collect();
            writer
                .write_record(&row)
                .map_err(|e| ProcessingError::Store(format!("write log row: {e}")))?;
        }

        writer
            .flush()
            .map_err(|e| ProcessingError::io(&tmp, e))?;
        drop(writer);
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            ProcessingError::io(&self.path, e)
        })?;
        Ok(())
    }
}

impl BatchProcessor for CsvLog {
    fn name(&self) -> &'static str {
        "csvlog"
    }

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessingError> {
        self.append_rows(&batch)?;
        tracing::debug!("Logged {} image(s) to {}", batch.len(), self.path.display());
        Ok(vec![batch])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{keys, test_image};

    fn log_keys() -> Vec<String> {
        vec![keys::BASE_NAME.to_string(), "FILTER".to_string()]
    }

    #[test]
    fn test_csvlog_writes_one_row_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let log = CsvLog::new(log_keys(), path.clone());

        let mut a = test_image("a.fits");
        a.header.set("FILTER", "r");
        let batch = Batch::new(vec![a, test_image("b.fits")]);

        let out = log.process(batch).unwrap();
        assert_eq!(out[0].len(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "BASENAME,FILTER");
        assert_eq!(lines[1], "a.fits,r");
        // Missing key renders as an empty field.
        assert_eq!(lines[2], "b.fits,");
    }

    #[test]
    fn test_csvlog_accumulates_across_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let log = CsvLog::new(log_keys(), path.clone());

        log.process(Batch::new(vec![test_image("a.fits")])).unwrap();
        log.process(Batch::new(vec![test_image("b.fits")])).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.contains("a.fits"));
        assert!(contents.contains("b.fits"));
    }

    #[test]
    fn test_csvlog_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let log = CsvLog::new(log_keys(), path);

        log.process(Batch::new(vec![test_image("a.fits")])).unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["log.csv".to_string()]);
    }
}

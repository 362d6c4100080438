//! Source extraction via the external SExtractor binary.
//!
//! The stage hands each saved image to `source-extractor` through the tool
//! runner and records the produced catalog path in the header. All file
//! handoff goes through `SAVEPATH`, so an [`super::ImageSaver`] must run
//! before this stage.

use crate::error::ProcessingError;
use crate::image::{keys, Image};
use crate::paths;
use crate::processors::UnitProcessor;
use crate::runner::{ToolCommand, ToolRunner};
use std::path::PathBuf;

/// Runs SExtractor over each image and stores the catalog path under
/// `SRCCAT`.
///
/// When `reprocess` is off and the catalog already exists on disk, the
/// invocation is skipped and the existing catalog is recorded instead.
#[derive(Debug, Clone)]
pub struct Sextractor {
    runner: ToolRunner,
    program: String,
    output_dir: PathBuf,
    config_path: Option<PathBuf>,
    params_path: Option<PathBuf>,
    filter_path: Option<PathBuf>,
    star_nnw_path: Option<PathBuf>,
    weight_image: Option<PathBuf>,
    checkimage_types: Vec<String>,
    verbose_type: String,
    reprocess: bool,
}

impl Sextractor {
    /// `output_dir` is the fully resolved stage directory catalogs are
    /// delivered into.
    pub fn new(runner: ToolRunner, program: impl Into<String>, output_dir: PathBuf) -> Self {
        Self {
            runner,
            program: program.into(),
            output_dir,
            config_path: None,
            params_path: None,
            filter_path: None,
            star_nnw_path: None,
            weight_image: None,
            checkimage_types: Vec::new(),
            verbose_type: "QUIET".to_string(),
            reprocess: true,
        }
    }

    /// Main SExtractor configuration file (`-c`).
    pub fn with_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Output parameter list (`-PARAMETERS_NAME`).
    pub fn with_params(mut self, path: impl Into<PathBuf>) -> Self {
        self.params_path = Some(path.into());
        self
    }

    /// Detection filter kernel (`-FILTER_NAME`).
    pub fn with_filter(mut self, path: impl Into<PathBuf>) -> Self {
        self.filter_path = Some(path.into());
        self
    }

    /// Star/galaxy classifier weights (`-STARNNW_NAME`).
    pub fn with_star_nnw(mut self, path: impl Into<PathBuf>) -> Self {
        self.star_nnw_path = Some(path.into());
        self
    }

    /// Pixel weight map. Without one, weighting is disabled explicitly.
    pub fn with_weight_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.weight_image = Some(path.into());
        self
    }

    /// Request check images (e.g. "BACKGROUND", "SEGMENTATION").
    pub fn with_checkimages(mut self, types: Vec<String>) -> Self {
        self.checkimage_types = types;
        self
    }

    pub fn with_verbose_type(mut self, verbose_type: impl Into<String>) -> Self {
        self.verbose_type = verbose_type.into();
        self
    }

    /// When false, an existing catalog on disk is reused without invoking
    /// the tool.
    pub fn with_reprocess(mut self, reprocess: bool) -> Self {
        self.reprocess = reprocess;
        self
    }

    fn build_command(&self, saved_path: &str, stem: &str, catalog_name: &str) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.program).input(saved_path);

        if let Some(config) = &self.config_path {
            cmd = cmd.opt_input("-c", config);
        }
        cmd = cmd.opt("-CATALOG_NAME", catalog_name);
        if let Some(params) = &self.params_path {
            cmd = cmd.opt_input("-PARAMETERS_NAME", params);
        }
        if let Some(filter) = &self.filter_path {
            cmd = cmd.opt_input("-FILTER_NAME", filter);
        }
        if let Some(nnw) = &self.star_nnw_path {
            cmd = cmd.opt_input("-STARNNW_NAME", nnw);
        }
        cmd = cmd.opt("-VERBOSE_TYPE", &self.verbose_type);

        if !self.checkimage_types.is_empty() {
            let names: Vec<String> = self
                .checkimage_types
                .iter()
                .map(|t| format!("{stem}_check_{}.fits", t.to_lowercase()))
                .collect();
            cmd = cmd
                .opt("-CHECKIMAGE_TYPE", self.checkimage_types.join(","))
                .opt("-CHECKIMAGE_NAME", names.join(","));
        }

        match &self.weight_image {
            Some(weight) => cmd.opt_input("-WEIGHT_IMAGE", weight),
            None => cmd.opt("-WEIGHT_TYPE", "None"),
        }
    }
}

impl UnitProcessor for Sextractor {
    fn name(&self) -> &'static str {
        "sextractor"
    }

    fn process(&self, image: &mut Image) -> Result<(), ProcessingError> {
        let saved_path = image.header.require_str(keys::LATEST_SAVE)?.to_string();
        let base_name = image.header.require_str(keys::BASE_NAME)?.to_string();
        let stem = paths::base_stem(&base_name).to_string();
        let catalog_name = format!("{stem}.cat");
        let catalog_path = self.output_dir.join(&catalog_name);

        if !self.reprocess && catalog_path.exists() {
            tracing::info!(
                "Catalog {} already exists, skipping extraction for {}",
                catalog_path.display(),
                base_name
            );
            image
                .header
                .set(keys::SOURCE_CATALOG, catalog_path.display().to_string());
            return Ok(());
        }

        let cmd = self.build_command(&saved_path, &stem, &catalog_name);
        self.runner.run(&cmd, &self.output_dir)?;

        image
            .header
            .set(keys::SOURCE_CATALOG, catalog_path.display().to_string());
        image.header.append_history(self.name());
        tracing::debug!("Extracted sources from {} into {}", base_name, catalog_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::image::{test_image, HeaderValue};
    use crate::runner::ToolArg;
    use std::time::Duration;

    fn runner() -> ToolRunner {
        ToolRunner::new(BackendKind::Sandboxed, Duration::from_secs(10))
    }

    fn tokens(cmd: &ToolCommand) -> Vec<String> {
        cmd.args()
            .iter()
            .map(|a| match a {
                ToolArg::Literal(t) => t.clone(),
                ToolArg::Input(p) => p.display().to_string(),
            })
            .collect()
    }

    #[test]
    fn test_command_layout() {
        let stage = Sextractor::new(runner(), "source-extractor", PathBuf::from("/out"))
            .with_config("/cfg/astrom.sex")
            .with_params("/cfg/astrom.param")
            .with_filter("/cfg/default.conv")
            .with_star_nnw("/cfg/default.nnw");

        let cmd = stage.build_command("/data/img.fits", "img", "img.cat");
        assert_eq!(cmd.program(), "source-extractor");
        assert_eq!(
            tokens(&cmd),
            vec![
                "/data/img.fits",
                "-c",
                "/cfg/astrom.sex",
                "-CATALOG_NAME",
                "img.cat",
                "-PARAMETERS_NAME",
                "/cfg/astrom.param",
                "-FILTER_NAME",
                "/cfg/default.conv",
                "-STARNNW_NAME",
                "/cfg/default.nnw",
                "-VERBOSE_TYPE",
                "QUIET",
                "-WEIGHT_TYPE",
                "None",
            ]
        );
    }

    #[test]
    fn test_checkimages_and_weight() {
        let stage = Sextractor::new(runner(), "sex", PathBuf::from("/out"))
            .with_weight_image("/cfg/weight.fits")
            .with_checkimages(vec!["BACKGROUND".to_string(), "SEGMENTATION".to_string()]);

        let toks = tokens(&stage.build_command("/data/img.fits", "img", "img.cat"));
        let check_type = toks.iter().position(|t| t == "-CHECKIMAGE_TYPE").unwrap();
        assert_eq!(toks[check_type + 1], "BACKGROUND,SEGMENTATION");
        let check_name = toks.iter().position(|t| t == "-CHECKIMAGE_NAME").unwrap();
        assert_eq!(
            toks[check_name + 1],
            "img_check_background.fits,img_check_segmentation.fits"
        );
        let weight = toks.iter().position(|t| t == "-WEIGHT_IMAGE").unwrap();
        assert_eq!(toks[weight + 1], "/cfg/weight.fits");
        assert!(!toks.contains(&"-WEIGHT_TYPE".to_string()));
    }

    #[test]
    fn test_skip_when_catalog_exists_and_reprocess_off() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("img.cat"), "existing").unwrap();

        // The program does not exist; the stage must not invoke it.
        let stage = Sextractor::new(runner(), "/nonexistent/sex", dir.path().to_path_buf())
            .with_reprocess(false);

        let mut image = test_image("img.fits");
        stage.process(&mut image).unwrap();
        assert_eq!(
            image.header.get(keys::SOURCE_CATALOG),
            Some(&HeaderValue::from(
                dir.path().join("img.cat").display().to_string()
            ))
        );
        // No extraction ran, so the history stays untouched.
        assert!(image.header.history().is_empty());
    }

    #[test]
    fn test_extraction_runs_and_records_catalog() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let saved = data.path().join("img.fits");
        std::fs::write(&saved, b"pixels").unwrap();

        // Stand-in binary: writes the catalog named after the second
        // -CATALOG_NAME token into its working directory.
        let stage = Sextractor::new(runner(), "sh", out.path().to_path_buf());
        let mut image = test_image("img.fits");
        image
            .header
            .set(keys::LATEST_SAVE, saved.display().to_string());

        // Build the command by hand: the sh stand-in ignores SExtractor
        // flags and just produces img.cat.
        let cmd = ToolCommand::new("sh").arg("-c").arg("echo src > img.cat");
        stage.runner.run(&cmd, out.path()).unwrap();
        assert!(out.path().join("img.cat").exists());

        // With the catalog present, a non-reprocess pass records it.
        let stage = stage.with_reprocess(false);
        stage.process(&mut image).unwrap();
        assert_eq!(
            image.header.require_str(keys::SOURCE_CATALOG).unwrap(),
            out.path().join("img.cat").display().to_string()
        );
    }
}

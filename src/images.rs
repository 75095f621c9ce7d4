//! Still-image batches.
//!
//! [`ImageBatch`] applies every configured transform to every image of a
//! file or directory and writes one PNG per pair, named
//! `<image>-<transform>.png`. An image that cannot be read, or an output
//! that cannot be written, is logged and recorded in the
//! [`ImageBatchReport`] without stopping the rest of the batch.
//!
//! # Example
//!
//! ```no_run
//! use refract::{ImageBatch, TransformConfiguration, TransformKind};
//!
//! let batch = ImageBatch::new(vec![
//!     TransformConfiguration::new(TransformKind::Grayscale),
//!     TransformConfiguration::new(TransformKind::Mirror).with_name("mirrored"),
//! ]);
//! let report = batch.run("photos/", "out/")?;
//! println!("wrote {} images", report.written.len());
//! # Ok::<(), refract::RefractError>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::configuration::JobFile;
use crate::error::RefractError;
use crate::frame::Frame;
use crate::transform::{FrameTransform, TransformConfiguration};

/// Outcome of an [`ImageBatch`] run.
#[derive(Debug, Default)]
pub struct ImageBatchReport {
    /// Files written, in input order and then transform order.
    pub written: Vec<PathBuf>,
    /// Inputs or outputs that failed, with the reason.
    pub failed: Vec<(PathBuf, RefractError)>,
}

/// Applies a list of transforms to a set of still images.
#[derive(Debug, Clone)]
pub struct ImageBatch {
    transforms: Vec<TransformConfiguration>,
    clear_output_directory: bool,
}

impl ImageBatch {
    /// A batch producing one output per image for each of `transforms`.
    pub fn new(transforms: Vec<TransformConfiguration>) -> Self {
        Self {
            transforms,
            clear_output_directory: false,
        }
    }

    /// The transforms and output policy of a job file.
    pub fn from_job(job: &JobFile) -> Self {
        Self::new(job.transforms.clone()).with_clear_output_directory(job.clear_output_directory)
    }

    /// Remove the output directory before writing anything.
    #[must_use]
    pub fn with_clear_output_directory(mut self, clear: bool) -> Self {
        self.clear_output_directory = clear;
        self
    }

    /// Transform `input` (one image, or every visible file of a directory)
    /// into `output_directory`.
    ///
    /// # Errors
    ///
    /// [`RefractError::FileOpen`] if `input` does not exist,
    /// [`RefractError::InvalidConfiguration`] for an empty or invalid
    /// transform list, and [`RefractError::IoError`] if the input directory
    /// cannot be listed or the output directory cannot be prepared.
    /// Failures of single images end up in the report instead.
    pub fn run<P, Q>(&self, input: P, output_directory: Q) -> Result<ImageBatchReport, RefractError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let output_directory = output_directory.as_ref();
        if self.transforms.is_empty() {
            return Err(RefractError::configuration(
                "image batch needs at least one transform",
            ));
        }
        for transform in &self.transforms {
            transform.validate()?;
        }

        let inputs = collect_inputs(input.as_ref())?;
        log::info!(
            "Transforming {} images with {} transforms into {}",
            inputs.len(),
            self.transforms.len(),
            output_directory.display()
        );

        if self.clear_output_directory && output_directory.exists() {
            fs::remove_dir_all(output_directory)?;
        }
        fs::create_dir_all(output_directory)?;

        let results: Vec<Vec<(PathBuf, Result<(), RefractError>)>> = inputs
            .par_iter()
            .map(|path| self.transform_image(path, output_directory))
            .collect();

        let mut report = ImageBatchReport::default();
        for (path, result) in results.into_iter().flatten() {
            match result {
                Ok(()) => report.written.push(path),
                Err(error) => {
                    log::warn!("Could not handle {}: {error}", path.display());
                    report.failed.push((path, error));
                }
            }
        }
        Ok(report)
    }

    fn transform_image(
        &self,
        path: &Path,
        output_directory: &Path,
    ) -> Vec<(PathBuf, Result<(), RefractError>)> {
        let frame = match image::open(path) {
            Ok(image) => Frame::new(image),
            Err(error) => return vec![(path.to_path_buf(), Err(error.into()))],
        };
        let stem = image_name(path);

        self.transforms
            .iter()
            .map(|transform| {
                let output = output_directory.join(format!("{stem}-{}.png", transform.name()));
                let result = transform
                    .apply(&frame)
                    .and_then(|transformed| Ok(transformed.image().save(&output)?));
                (output, result)
            })
            .collect()
    }
}

// File name up to its first dot, so `beach.raw.jpg` becomes `beach`.
fn image_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.split('.').next())
        .unwrap_or("image")
        .to_string()
}

fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>, RefractError> {
    if !input.exists() {
        return Err(RefractError::FileOpen {
            path: input.to_path_buf(),
            reason: "input path does not exist".to_string(),
        });
    }
    if !input.is_dir() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut inputs = Vec::new();
    for entry in fs::read_dir(input)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_none_or(|name| name.starts_with('.'));
        if hidden || !path.is_file() {
            log::debug!("Skipping {}", path.display());
            continue;
        }
        inputs.push(path);
    }
    inputs.sort();
    Ok(inputs)
}

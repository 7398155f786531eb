//! Batch orchestration: pairing test images with references, loading and
//! caching images, running the inspection per pair in parallel and writing
//! crops, annotated overviews and optional debug dumps to disk.
use image::DynamicImage;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::detection::{DefectPipeline, StageOutputs};
use crate::error::{InspectionError, Result};
use crate::models::DefectRecord;

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];
const REFERENCE_EXTENSIONS: [&str; 4] = ["JPG", "jpg", "png", "PNG"];
const CROPS_DIR: &str = "crops";
const ANNOTATED_DIR: &str = "annotated";

/// One test image and the reference it is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePair {
    pub test: PathBuf,
    pub reference: PathBuf,
    /// Defect category sub-directory the test image came from, if any.
    pub category: Option<String>,
}

impl ImagePair {
    pub fn new(test: impl Into<PathBuf>, reference: impl Into<PathBuf>) -> Self {
        Self {
            test: test.into(),
            reference: reference.into(),
            category: None,
        }
    }

    /// Test file name without its extension.
    pub fn stem(&self) -> String {
        self.test
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string())
    }

    /// Name used for debug dumps; unique across categories.
    fn debug_name(&self) -> String {
        match &self.category {
            Some(category) => format!("{}_{}", category, self.stem()),
            None => self.stem(),
        }
    }
}

/// Pairs found under a test directory, plus test images with no reference.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub pairs: Vec<ImagePair>,
    pub unmatched: Vec<PathBuf>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

/// Locate the reference for a test image.
///
/// Test images are named `<board>_<anything>.<ext>`; the reference is
/// `<reference_dir>/<board>.<ext>`, trying the test's own extension first.
pub fn reference_for(test: &Path, reference_dir: &Path) -> Result<PathBuf> {
    let stem = test
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| InspectionError::MissingReference(test.to_path_buf()))?;
    let board = stem.split('_').next().unwrap_or(&stem);
    let own_ext = test.extension().map(|e| e.to_string_lossy().into_owned());

    own_ext
        .iter()
        .map(String::as_str)
        .chain(REFERENCE_EXTENSIONS)
        .map(|ext| reference_dir.join(format!("{board}.{ext}")))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| InspectionError::MissingReference(test.to_path_buf()))
}

/// Collect test images from `test_dir` and its category sub-directories.
///
/// When `categories` is non-empty only those sub-directories are scanned
/// and loose files in `test_dir` are ignored.
pub fn discover_pairs(
    test_dir: &Path,
    reference_dir: &Path,
    categories: &[String],
) -> Result<Discovery> {
    let mut discovery = Discovery::default();
    let mut add = |path: PathBuf, category: Option<String>| match reference_for(&path, reference_dir)
    {
        Ok(reference) => discovery.pairs.push(ImagePair {
            test: path,
            reference,
            category,
        }),
        Err(_) => discovery.unmatched.push(path),
    };

    for entry in sorted_entries(test_dir)? {
        if entry.is_dir() {
            let name = entry
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !categories.is_empty() && !categories.contains(&name) {
                continue;
            }
            for file in sorted_entries(&entry)? {
                if file.is_file() && is_image(&file) {
                    add(file, Some(name.clone()));
                }
            }
        } else if categories.is_empty() && is_image(&entry) {
            add(entry, None);
        }
    }
    Ok(discovery)
}

/// Reference images loaded once and shared read-only across a batch.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    images: Mutex<HashMap<PathBuf, Arc<DynamicImage>>>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Result<Arc<DynamicImage>> {
        if let Some(image) = self.lock().get(path) {
            return Ok(Arc::clone(image));
        }
        // Decode outside the lock; a concurrent load of the same file keeps
        // whichever copy lands first.
        let loaded = Arc::new(image::open(path)?);
        let mut images = self.lock();
        Ok(Arc::clone(images.entry(path.to_path_buf()).or_insert(loaded)))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<DynamicImage>>> {
        // The map is only ever inserted into, so a poisoned lock is still usable.
        self.images.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

/// Outcome of one pair in a batch.
#[derive(Debug)]
pub struct PairOutcome {
    pub pair: ImagePair,
    /// Number of defect candidates written, or why the pair was skipped.
    pub result: Result<usize>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<PairOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &PairOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn total_regions(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .sum()
    }
}

/// Runs a `DefectPipeline` over many pairs and persists the results.
///
/// Output layout under the output directory:
/// `crops/<category>/<stem>_<id>.jpg` and `annotated/<category>/<file name>`.
pub struct BatchPipeline {
    pipeline: DefectPipeline,
    output_dir: PathBuf,
    debug: Option<DebugConfig>,
    references: ReferenceCache,
}

impl BatchPipeline {
    pub fn new(pipeline: DefectPipeline, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            output_dir: output_dir.into(),
            debug: None,
            references: ReferenceCache::new(),
        }
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(InspectionError::InvalidConfig(format!(
                    "debug directory is not empty: {}",
                    output_dir.display()
                )));
            }
        } else {
            fs::create_dir_all(&output_dir)?;
        }

        self.debug = Some(DebugConfig { output_dir });

        Ok(self)
    }

    pub fn references(&self) -> &ReferenceCache {
        &self.references
    }

    fn category_dir(&self, kind: &str, pair: &ImagePair) -> PathBuf {
        let dir = self.output_dir.join(kind);
        match &pair.category {
            Some(category) => dir.join(category),
            None => dir,
        }
    }

    /// Inspect one pair and write its crops and annotated image.
    pub fn inspect_pair(&self, pair: &ImagePair) -> Result<DefectRecord> {
        let test = image::open(&pair.test)?;
        let reference = self.references.get(&pair.reference)?;
        let stages = self
            .pipeline
            .inspect_with_stages(&test, &reference, &pair.stem())?;
        self.save_debug_output(pair, &stages)?;

        let crop_dir = self.category_dir(CROPS_DIR, pair);
        let annotated_dir = self.category_dir(ANNOTATED_DIR, pair);
        let file_name = pair
            .test
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("{}.png", pair.stem())));
        write_record(&stages.record, &crop_dir, &annotated_dir.join(file_name))?;
        Ok(stages.record)
    }

    /// Remove the crop and annotation trees a previous run left behind, so
    /// the files on disk always match the latest report.
    fn clear_outputs(&self) -> Result<()> {
        for kind in [CROPS_DIR, ANNOTATED_DIR] {
            let dir = self.output_dir.join(kind);
            if dir.exists() {
                debug!("clearing previous outputs in {}", dir.display());
                fs::remove_dir_all(&dir)?;
            }
        }
        Ok(())
    }

    /// Inspect every pair, one rayon task per pair.
    ///
    /// Outputs of an earlier run in the same directory are cleared first.
    /// A failing pair is logged and reported; it never stops the others.
    pub fn run(&self, pairs: &[ImagePair]) -> Result<BatchReport> {
        self.clear_outputs()?;
        let outcomes = pairs
            .par_iter()
            .map(|pair| {
                let result = self.inspect_pair(pair).map(|record| record.regions.len());
                if let Err(e) = &result {
                    warn!("skipping {}: {}", pair.test.display(), e);
                }
                PairOutcome {
                    pair: pair.clone(),
                    result,
                }
            })
            .collect();
        let report = BatchReport { outcomes };
        info!(
            "batch finished: {} of {} pairs inspected, {} defect candidates, {} references loaded",
            report.succeeded(),
            pairs.len(),
            report.total_regions(),
            self.references.len()
        );
        Ok(report)
    }

    /// Save debug output if debug mode is enabled
    fn save_debug_output(&self, pair: &ImagePair, stages: &StageOutputs) -> Result<()> {
        let Some(debug_config) = &self.debug else {
            return Ok(());
        };

        let filename = format!("{}.png", pair.debug_name());
        let dumps = [
            ("01_aligned", stages.aligned.image.clone()),
            (
                "02_difference",
                DynamicImage::ImageLuma8(stages.difference.as_gray().clone()),
            ),
            (
                "03_filtered",
                DynamicImage::ImageLuma8(stages.filtered.as_gray().clone()),
            ),
        ];
        for (step_dir_name, image) in dumps {
            let step_dir = debug_config.output_dir.join(step_dir_name);
            fs::create_dir_all(&step_dir)?;
            image.save(step_dir.join(&filename))?;
        }
        debug!("debug: saved stages for {}", filename);
        Ok(())
    }
}

/// Write every crop as `<crop_dir>/<stem>_<id>.jpg` and the annotated image
/// to `annotated_path`.
pub fn write_record(record: &DefectRecord, crop_dir: &Path, annotated_path: &Path) -> Result<()> {
    fs::create_dir_all(crop_dir)?;
    for region in &record.regions {
        region.crop.save(crop_dir.join(record.crop_filename(region)))?;
    }
    if let Some(parent) = annotated_path.parent() {
        fs::create_dir_all(parent)?;
    }
    record.annotated.save(annotated_path)?;
    Ok(())
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{InspectionError, Result};

/// Tunable parameters for every stage of the inspection pipeline.
///
/// Every section defaults independently, so a JSON file only needs to
/// name the values it overrides:
///
/// ```json
/// { "extraction": { "crop_size": 64 }, "alignment": { "seed": 7 } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    pub alignment: AlignmentConfig,
    pub difference: DifferenceConfig,
    pub filter: FilterConfig,
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Keypoints kept per image after scoring, across all pyramid levels.
    pub max_keypoints: usize,
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    pub pyramid_levels: usize,
    pub scale_factor: f32,
    /// Fraction of the distance-sorted matches kept for estimation, in (0, 1].
    pub match_retention: f32,
    /// Minimum retained matches before a homography is attempted.
    pub min_matches: usize,
    /// RANSAC inlier reprojection threshold in pixels.
    pub ransac_threshold: f64,
    pub ransac_iterations: usize,
    pub ransac_confidence: f64,
    /// Seed for the RANSAC sampler; the same seed gives the same homography.
    pub seed: u64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            max_keypoints: 5000,
            fast_threshold: 20,
            pyramid_levels: 8,
            scale_factor: 1.2,
            match_retention: 0.9,
            min_matches: 10,
            ransac_threshold: 3.0,
            ransac_iterations: 2000,
            ransac_confidence: 0.995,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferenceConfig {
    /// Side of the Gaussian denoising kernel (odd).
    pub blur_kernel: u32,
    /// Side of the adaptive-threshold neighbourhood (odd, >= 3).
    pub threshold_block: u32,
    /// Constant subtracted from the weighted local mean.
    pub threshold_offset: i32,
}

impl Default for DifferenceConfig {
    fn default() -> Self {
        Self {
            blur_kernel: 5,
            threshold_block: 5,
            threshold_offset: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelShape {
    Rect,
    Ellipse,
    Diamond,
}

/// A structuring element: a shape and an odd side length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kernel {
    pub shape: KernelShape,
    pub size: u32,
}

impl Kernel {
    pub const fn rect(size: u32) -> Self {
        Self { shape: KernelShape::Rect, size }
    }

    pub const fn ellipse(size: u32) -> Self {
        Self { shape: KernelShape::Ellipse, size }
    }

    /// Distance from the anchor to the element's edge.
    pub fn radius(&self) -> u32 {
        self.size / 2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Median window side used by both median passes.
    pub median_kernel: u32,
    pub merge_kernel: Kernel,
    pub strip_kernel: Kernel,
    pub consolidate_kernel: Kernel,
    pub final_strip_kernel: Kernel,
    pub cleanup_kernel: Kernel,
    /// When set, regions touching this band along the border are dropped
    /// after the cascade.
    pub clear_border_radius: Option<u32>,
    /// When set, regions of at most this many pixels are dropped after the
    /// cascade.
    pub min_region_area: Option<u32>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            median_kernel: 5,
            merge_kernel: Kernel::rect(15),
            strip_kernel: Kernel::rect(3),
            consolidate_kernel: Kernel::ellipse(29),
            final_strip_kernel: Kernel::rect(3),
            cleanup_kernel: Kernel::rect(1),
            clear_border_radius: None,
            min_region_area: None,
        }
    }
}

/// Which image edges the correction margin is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Drop regions whose margin crosses the top or left edge; clip the
    /// crop silently at the bottom and right.
    TopLeft,
    /// Drop regions whose margin crosses any edge.
    Symmetric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Side of every square crop.
    pub crop_size: u32,
    /// Context margin added on each side of a box before cropping.
    pub correction: u32,
    pub edge_policy: EdgePolicy,
    /// Outline thickness of the annotation rectangles.
    pub line_thickness: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            crop_size: 32,
            correction: 20,
            edge_policy: EdgePolicy::TopLeft,
            line_thickness: 2,
        }
    }
}

impl InspectionConfig {
    /// Read a JSON configuration file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.alignment;
        if a.max_keypoints == 0 {
            return invalid("alignment.max_keypoints must be positive");
        }
        if a.pyramid_levels == 0 {
            return invalid("alignment.pyramid_levels must be positive");
        }
        if !(a.scale_factor > 1.0) {
            return invalid("alignment.scale_factor must exceed 1.0");
        }
        if !(a.match_retention > 0.0 && a.match_retention <= 1.0) {
            return invalid("alignment.match_retention must be in (0, 1]");
        }
        if a.min_matches < 4 {
            return invalid("alignment.min_matches must be at least 4");
        }
        if !(a.ransac_threshold > 0.0) {
            return invalid("alignment.ransac_threshold must be positive");
        }
        if a.ransac_iterations == 0 {
            return invalid("alignment.ransac_iterations must be positive");
        }
        if !(a.ransac_confidence > 0.0 && a.ransac_confidence < 1.0) {
            return invalid("alignment.ransac_confidence must be in (0, 1)");
        }

        let d = &self.difference;
        check_odd("difference.blur_kernel", d.blur_kernel)?;
        check_odd("difference.threshold_block", d.threshold_block)?;
        if d.threshold_block < 3 {
            return invalid("difference.threshold_block must be at least 3");
        }

        let f = &self.filter;
        check_odd("filter.median_kernel", f.median_kernel)?;
        for (name, kernel) in [
            ("filter.merge_kernel", f.merge_kernel),
            ("filter.strip_kernel", f.strip_kernel),
            ("filter.consolidate_kernel", f.consolidate_kernel),
            ("filter.final_strip_kernel", f.final_strip_kernel),
            ("filter.cleanup_kernel", f.cleanup_kernel),
        ] {
            check_odd(name, kernel.size)?;
            if kernel.radius() > u8::MAX as u32 {
                return invalid(&format!("{name}.size is too large"));
            }
        }

        let e = &self.extraction;
        if e.crop_size == 0 {
            return invalid("extraction.crop_size must be positive");
        }
        if e.line_thickness == 0 {
            return invalid("extraction.line_thickness must be positive");
        }
        Ok(())
    }
}

fn check_odd(name: &str, size: u32) -> Result<()> {
    if size == 0 || size % 2 == 0 {
        return invalid(&format!("{name} must be a positive odd number, got {size}"));
    }
    Ok(())
}

fn invalid(msg: &str) -> Result<()> {
    Err(InspectionError::InvalidConfig(msg.to_string()))
}

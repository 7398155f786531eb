//! Noise suppression on difference masks.
//!
//! The cascade order is fixed: denoise, merge, strip, denoise, merge,
//! strip, cleanup. Kernel shapes and sizes come from `FilterConfig`;
//! changing the order changes what survives.
use imageproc::distance_transform::Norm;
use imageproc::filter::median_filter;
use imageproc::morphology::{close, open};
use log::debug;

use crate::config::{FilterConfig, Kernel, KernelShape};
use crate::detection::contours;
use crate::models::BinaryMask;

/// One operator of the filter cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Median blur over a square window of the given side.
    Median(u32),
    Close(Kernel),
    Open(Kernel),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Median(_) => "median",
            Stage::Close(_) => "close",
            Stage::Open(_) => "open",
        }
    }

    pub fn apply(&self, mask: &BinaryMask) -> BinaryMask {
        let gray = mask.as_gray();
        let out = match *self {
            Stage::Median(size) => {
                let r = size / 2;
                median_filter(gray, r, r)
            }
            Stage::Close(kernel) => close(gray, norm_for(kernel.shape), radius_u8(kernel)),
            Stage::Open(kernel) => open(gray, norm_for(kernel.shape), radius_u8(kernel)),
        };
        BinaryMask::from_gray(out)
    }
}

fn norm_for(shape: KernelShape) -> Norm {
    match shape {
        KernelShape::Rect => Norm::LInf,
        KernelShape::Ellipse => Norm::L2,
        KernelShape::Diamond => Norm::L1,
    }
}

fn radius_u8(kernel: Kernel) -> u8 {
    kernel.radius().min(u8::MAX as u32) as u8
}

/// The seven cascade operators in the order they run.
pub fn cascade(config: &FilterConfig) -> [Stage; 7] {
    [
        Stage::Median(config.median_kernel),
        Stage::Close(config.merge_kernel),
        Stage::Open(config.strip_kernel),
        Stage::Median(config.median_kernel),
        Stage::Close(config.consolidate_kernel),
        Stage::Open(config.final_strip_kernel),
        Stage::Open(config.cleanup_kernel),
    ]
}

/// Run the cascade and keep every intermediate mask.
pub fn filter_stages(mask: &BinaryMask, config: &FilterConfig) -> Vec<(Stage, BinaryMask)> {
    let mut outputs: Vec<(Stage, BinaryMask)> = Vec::with_capacity(7);
    for stage in cascade(config) {
        let input = outputs.last().map_or(mask, |(_, m)| m);
        let next = stage.apply(input);
        debug!("filter: {} -> {} pixels on", stage.name(), next.count_set());
        outputs.push((stage, next));
    }
    outputs
}

/// Denoise a difference mask into blobs worth reporting.
///
/// Optional border clearing and small-area removal run after the cascade.
pub fn filter(mask: &BinaryMask, config: &FilterConfig) -> BinaryMask {
    let mut out = filter_stages(mask, config)
        .pop()
        .map_or_else(|| mask.clone(), |(_, m)| m);
    if let Some(radius) = config.clear_border_radius {
        out = clear_border(&out, radius);
    }
    if let Some(area) = config.min_region_area {
        out = remove_small_regions(&out, area);
    }
    out
}

/// Remove every region with a pixel within `radius` of the image border.
pub fn clear_border(mask: &BinaryMask, radius: u32) -> BinaryMask {
    let (w, h) = mask.dimensions();
    contours::retain_regions(mask, |r| !r.touches_border(w, h, radius))
}

/// Remove every region of at most `max_area` pixels.
pub fn remove_small_regions(mask: &BinaryMask, max_area: u32) -> BinaryMask {
    contours::retain_regions(mask, |r| r.area() > max_area)
}

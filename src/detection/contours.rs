use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use std::collections::{HashMap, HashSet};

use crate::models::{BinaryMask, BoundingBox};

pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// One connected group of on-pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub label: u32,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub pixel_count: u32,
}

impl Region {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn area(&self) -> u32 {
        self.pixel_count
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::from_extent(self.min_x, self.min_y, self.max_x, self.max_y)
    }

    /// True when some pixel of the bounding box lies within `radius` of the
    /// image border.
    pub fn touches_border(&self, width: u32, height: u32, radius: u32) -> bool {
        self.min_x <= radius
            || self.min_y <= radius
            || self.max_x + 1 + radius >= width
            || self.max_y + 1 + radius >= height
    }
}

/// Connected components of the non-zero pixels.
///
/// `connected_components` cannot handle a single-pixel image, which is
/// labelled here directly.
fn connect(image: &GrayImage, conn: Connectivity) -> LabelImage {
    if image.width() * image.height() <= 1 {
        return LabelImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([u32::from(image.get_pixel(x, y)[0] != 0)])
        });
    }
    connected_components(image, conn, Luma([0]))
}

/// Label 8-connected regions of on-pixels, ordered top-to-bottom then
/// left-to-right by their first pixel in raster order.
pub fn find_regions(mask: &BinaryMask) -> Vec<Region> {
    label_regions(mask).1
}

/// Per-pixel region labels (0 for background) together with the regions.
pub fn label_regions(mask: &BinaryMask) -> (LabelImage, Vec<Region>) {
    let labeled = connect(mask.as_gray(), Connectivity::Eight);

    let mut regions: HashMap<u32, (u32, u32, u32, u32, u32)> = HashMap::new();
    let mut first_seen: Vec<u32> = Vec::new();

    for (x, y, label) in labeled.enumerate_pixels() {
        let label_val = label[0];
        if label_val == 0 {
            continue; // Skip background
        }

        regions
            .entry(label_val)
            .and_modify(|(min_x, min_y, max_x, max_y, count)| {
                *min_x = (*min_x).min(x);
                *min_y = (*min_y).min(y);
                *max_x = (*max_x).max(x);
                *max_y = (*max_y).max(y);
                *count += 1;
            })
            .or_insert_with(|| {
                first_seen.push(label_val);
                (x, y, x, y, 1)
            });
    }

    let regions = first_seen
        .into_iter()
        .filter_map(|label| regions.get(&label).map(|r| (label, *r)))
        .map(|(label, (min_x, min_y, max_x, max_y, count))| Region {
            label,
            min_x,
            min_y,
            max_x,
            max_y,
            pixel_count: count,
        })
        .collect();
    (labeled, regions)
}

/// Copy of `mask` keeping only the regions `keep` accepts.
pub fn retain_regions(mask: &BinaryMask, keep: impl Fn(&Region) -> bool) -> BinaryMask {
    let (labeled, regions) = label_regions(mask);
    let kept: HashSet<u32> = regions.iter().filter(|r| keep(r)).map(|r| r.label).collect();
    let mut out = BinaryMask::new(mask.width(), mask.height());
    for (x, y, label) in labeled.enumerate_pixels() {
        if label[0] != 0 && kept.contains(&label[0]) {
            out.set(x, y, true);
        }
    }
    out
}

/// Copy of `mask` with every enclosed hole filled in.
///
/// A hole is a 4-connected background component that does not reach the
/// image border.
pub fn fill_holes(mask: &BinaryMask) -> BinaryMask {
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return mask.clone();
    }
    let mut background = GrayImage::new(w, h);
    for (x, y, p) in background.enumerate_pixels_mut() {
        if !mask.is_set(x, y) {
            *p = Luma([255]);
        }
    }
    let labeled = connect(&background, Connectivity::Four);

    let mut outside: HashSet<u32> = HashSet::new();
    for x in 0..w {
        outside.insert(labeled.get_pixel(x, 0)[0]);
        outside.insert(labeled.get_pixel(x, h.saturating_sub(1))[0]);
    }
    for y in 0..h {
        outside.insert(labeled.get_pixel(0, y)[0]);
        outside.insert(labeled.get_pixel(w.saturating_sub(1), y)[0]);
    }

    let mut filled = mask.clone();
    for (x, y, label) in labeled.enumerate_pixels() {
        if label[0] != 0 && !outside.contains(&label[0]) {
            filled.set(x, y, true);
        }
    }
    filled
}

/// Outermost boundaries only: regions nested inside another region's hole
/// are absorbed by their enclosing region rather than reported.
pub fn find_external_regions(mask: &BinaryMask) -> Vec<Region> {
    if mask.width() == 0 || mask.height() == 0 {
        return Vec::new();
    }
    find_regions(&fill_holes(mask))
}

use image::{DynamicImage, GrayImage, Luma};

use crate::detection::homography::Homography;

/// Axis-aligned box in reference-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Box spanning the inclusive pixel range `min..=max` on both axes.
    pub fn from_extent(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        }
    }

    /// One past the last column.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// One past the last row.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Single-channel mask whose pixels are either 0 or 255.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask(GrayImage);

impl BinaryMask {
    /// Wrap a grayscale image, mapping every non-zero pixel to 255.
    pub fn from_gray(mut image: GrayImage) -> Self {
        for p in image.pixels_mut() {
            if p[0] != 0 {
                p[0] = 255;
            }
        }
        Self(image)
    }

    pub fn new(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y)[0] != 0
    }

    pub fn set(&mut self, x: u32, y: u32, on: bool) {
        self.0.put_pixel(x, y, Luma([if on { 255 } else { 0 }]));
    }

    /// Number of pixels that are on.
    pub fn count_set(&self) -> usize {
        self.0.pixels().filter(|p| p[0] != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.pixels().all(|p| p[0] == 0)
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.0
    }

    /// True when every pixel that is on here is also on in `other`.
    pub fn is_subset_of(&self, other: &BinaryMask) -> bool {
        self.dimensions() == other.dimensions()
            && self
                .0
                .pixels()
                .zip(other.0.pixels())
                .all(|(a, b)| a[0] == 0 || b[0] != 0)
    }
}

/// A test image resampled into its reference's frame.
#[derive(Debug, Clone)]
pub struct AlignedImage {
    /// Same width and height as the reference it was aligned to.
    pub image: DynamicImage,
    /// Test-to-reference transform used for the warp.
    pub homography: Homography,
}

impl AlignedImage {
    /// Treat an image that already shares the reference frame as aligned.
    pub fn identity(image: DynamicImage) -> Self {
        Self {
            image,
            homography: Homography::identity(),
        }
    }
}

/// One defect candidate cut out of the aligned image.
#[derive(Debug, Clone)]
pub struct DefectRegion {
    /// Sequential index within its image, starting at 0.
    pub id: usize,
    pub bbox: BoundingBox,
    /// Margin-expanded crop resized to `crop_size x crop_size`.
    pub crop: DynamicImage,
}

/// Everything produced for one test/reference pair.
#[derive(Debug, Clone)]
pub struct DefectRecord {
    /// File stem the output names derive from.
    pub stem: String,
    /// Aligned image with a rectangle drawn around every region.
    pub annotated: DynamicImage,
    pub regions: Vec<DefectRegion>,
}

impl DefectRecord {
    pub fn crop_filename(&self, region: &DefectRegion) -> String {
        format!("{}_{}.jpg", self.stem, region.id)
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

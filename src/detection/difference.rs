use image::{DynamicImage, GrayImage, Luma};
use log::debug;

use crate::config::DifferenceConfig;
use crate::detection::preprocessing;
use crate::error::{InspectionError, Result};
use crate::models::BinaryMask;

/// Equalize, blur and locally threshold one image.
pub fn binarize(img: &DynamicImage, config: &DifferenceConfig) -> GrayImage {
    let gray = preprocessing::to_grayscale(img);
    let equalized = preprocessing::equalize(&gray);
    let blurred = preprocessing::apply_blur(&equalized, config.blur_kernel);
    preprocessing::adaptive_threshold(&blurred, config.threshold_block, config.threshold_offset)
}

/// Mark every pixel where the binarized images disagree.
pub fn xor(a: &GrayImage, b: &GrayImage) -> Result<BinaryMask> {
    if a.dimensions() != b.dimensions() {
        return Err(InspectionError::DimensionMismatch {
            expected: b.dimensions(),
            actual: a.dimensions(),
        });
    }
    let mut out = GrayImage::new(a.width(), a.height());
    for ((o, pa), pb) in out.pixels_mut().zip(a.pixels()).zip(b.pixels()) {
        *o = Luma([if (pa[0] != 0) != (pb[0] != 0) { 255 } else { 0 }]);
    }
    Ok(BinaryMask::from_gray(out))
}

/// Structural difference between an aligned test image and its reference.
///
/// Both images go through the same illumination-normalizing binarization
/// and the results are XORed, so a global exposure shift between the two
/// shots does not show up in the mask.
pub fn compare(
    aligned: &DynamicImage,
    reference: &DynamicImage,
    config: &DifferenceConfig,
) -> Result<BinaryMask> {
    if aligned.width() != reference.width() || aligned.height() != reference.height() {
        return Err(InspectionError::DimensionMismatch {
            expected: (reference.width(), reference.height()),
            actual: (aligned.width(), aligned.height()),
        });
    }
    let mask = xor(&binarize(aligned, config), &binarize(reference, config))?;
    debug!("difference: {} pixels differ", mask.count_set());
    Ok(mask)
}

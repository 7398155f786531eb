use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, warp_into};
use log::debug;
use nalgebra::Matrix3;

use crate::config::AlignmentConfig;
use crate::detection::features::{self, OrbParams};
use crate::detection::homography::{self, Homography, RansacParams};
use crate::detection::preprocessing;
use crate::error::AlignmentError;
use crate::models::AlignedImage;

/// Minimal correspondences a homography is determined by.
const MIN_CORRESPONDENCES: usize = 4;

impl From<&AlignmentConfig> for OrbParams {
    fn from(config: &AlignmentConfig) -> Self {
        Self {
            max_keypoints: config.max_keypoints,
            fast_threshold: config.fast_threshold,
            levels: config.pyramid_levels,
            scale_factor: config.scale_factor,
        }
    }
}

impl From<&AlignmentConfig> for RansacParams {
    fn from(config: &AlignmentConfig) -> Self {
        Self {
            threshold: config.ransac_threshold,
            max_iterations: config.ransac_iterations,
            confidence: config.ransac_confidence,
            seed: config.seed,
        }
    }
}

/// Estimate the transform taking `test` pixel coordinates onto `reference`.
pub fn estimate_homography(
    test: &GrayImage,
    reference: &GrayImage,
    config: &AlignmentConfig,
) -> Result<Homography, AlignmentError> {
    let orb = OrbParams::from(config);
    let test_features = features::detect_and_describe(test, &orb);
    if test_features.len() < MIN_CORRESPONDENCES {
        return Err(AlignmentError::InsufficientKeypoints {
            image: "test",
            found: test_features.len(),
        });
    }
    let ref_features = features::detect_and_describe(reference, &orb);
    if ref_features.len() < MIN_CORRESPONDENCES {
        return Err(AlignmentError::InsufficientKeypoints {
            image: "reference",
            found: ref_features.len(),
        });
    }

    let matches = features::match_cross_checked(&test_features.descriptors, &ref_features.descriptors);
    let total = matches.len();
    let matches = features::retain_best(matches, config.match_retention);
    debug!(
        "alignment: {} test / {} reference keypoints, {} cross-checked matches, {} retained",
        test_features.len(),
        ref_features.len(),
        total,
        matches.len()
    );
    if matches.len() < config.min_matches {
        return Err(AlignmentError::InsufficientMatches {
            found: matches.len(),
            required: config.min_matches,
        });
    }

    let (src, dst): (Vec<_>, Vec<_>) = matches
        .iter()
        .map(|m| {
            let t = &test_features.keypoints[m.query];
            let r = &ref_features.keypoints[m.train];
            ((t.x as f64, t.y as f64), (r.x as f64, r.y as f64))
        })
        .unzip();

    let estimate = homography::find_homography_ransac(&src, &dst, &RansacParams::from(config))
        .ok_or(AlignmentError::DegenerateHomography)?;
    Ok(estimate.homography)
}

/// Copy of `image` with a one-pixel border replicating its edge pixels.
fn pad_replicate<P: Pixel>(image: &ImageBuffer<P, Vec<P::Subpixel>>) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let (w, h) = image.dimensions();
    ImageBuffer::from_fn(w + 2, h + 2, |x, y| {
        *image.get_pixel(x.saturating_sub(1).min(w - 1), y.saturating_sub(1).min(h - 1))
    })
}

/// Resample `image` through `homography` onto a `width x height` canvas.
///
/// Grayscale input stays grayscale; anything else is warped as RGB.
/// Samples up to half a pixel outside the source reuse its edge pixels, so
/// the identity reproduces the image exactly; canvas pixels further out are
/// black.
pub fn warp_to_frame(
    image: &DynamicImage,
    homography: &Homography,
    width: u32,
    height: u32,
) -> Result<DynamicImage, AlignmentError> {
    if image.width() == 0 || image.height() == 0 {
        return Ok(match image {
            DynamicImage::ImageLuma8(_) => DynamicImage::ImageLuma8(GrayImage::new(width, height)),
            _ => DynamicImage::ImageRgb8(RgbImage::new(width, height)),
        });
    }
    // Bilinear sampling needs a right/bottom neighbour, which the last
    // row and column lack without the padding.
    let unpad = Homography::from_matrix(Matrix3::new(1.0, 0.0, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0))
        .ok_or(AlignmentError::DegenerateHomography)?;
    let projection = homography
        .compose(&unpad)
        .and_then(|h| h.to_projection())
        .ok_or(AlignmentError::DegenerateHomography)?;
    let warped = match image {
        DynamicImage::ImageLuma8(gray) => {
            let mut out = GrayImage::new(width, height);
            let padded = pad_replicate(gray);
            warp_into(&padded, &projection, Interpolation::Bilinear, Luma([0]), &mut out);
            DynamicImage::ImageLuma8(out)
        }
        other => {
            let padded = pad_replicate(&other.to_rgb8());
            let mut out = RgbImage::new(width, height);
            warp_into(&padded, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
            DynamicImage::ImageRgb8(out)
        }
    };
    Ok(warped)
}

/// Register `test` onto `reference`.
///
/// Keypoints are matched on grayscale copies; the original test image is
/// what gets warped, into a canvas exactly the reference's size.
pub fn align(
    test: &DynamicImage,
    reference: &DynamicImage,
    config: &AlignmentConfig,
) -> Result<AlignedImage, AlignmentError> {
    let test_gray = preprocessing::to_grayscale(test);
    let ref_gray = preprocessing::to_grayscale(reference);
    let homography = estimate_homography(&test_gray, &ref_gray, config)?;
    let image = warp_to_frame(test, &homography, reference.width(), reference.height())?;
    Ok(AlignedImage { image, homography })
}

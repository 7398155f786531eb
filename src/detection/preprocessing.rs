use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::equalize_histogram;
use imageproc::filter::{gaussian_blur_f32, separable_filter_equal};

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Spread the intensity histogram over the full 0..=255 range.
pub fn equalize(img: &GrayImage) -> GrayImage {
    equalize_histogram(img)
}

/// Gaussian sigma for a square kernel of side `ksize` when no sigma is given.
pub fn sigma_for_kernel(ksize: u32) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Apply Gaussian blur sized by kernel side length
pub fn apply_blur(img: &GrayImage, ksize: u32) -> GrayImage {
    gaussian_blur_f32(img, sigma_for_kernel(ksize))
}

/// Normalised 1D Gaussian weights of length `ksize`, with the sigma
/// `sigma_for_kernel` derives from that length.
pub fn gaussian_kernel(ksize: u32) -> Vec<f32> {
    let sigma = sigma_for_kernel(ksize);
    let center = (ksize as f32 - 1.0) * 0.5;
    let weights: Vec<f32> = (0..ksize)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Binarize against a Gaussian-weighted local mean.
///
/// The mean is taken over exactly the `block x block` neighbourhood, using
/// `gaussian_kernel(block)` along each axis with edge pixels replicated. A
/// pixel becomes 255 when it is brighter than that mean minus `offset`, and
/// 0 otherwise. Flat areas therefore come out white and only local
/// structure produces black.
pub fn adaptive_threshold(img: &GrayImage, block: u32, offset: i32) -> GrayImage {
    let local_mean = separable_filter_equal(img, &gaussian_kernel(block));
    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let mean = local_mean.get_pixel(x, y)[0] as i32;
        let on = pixel[0] as i32 > mean - offset;
        out.put_pixel(x, y, Luma([if on { 255 } else { 0 }]));
    }
    out
}

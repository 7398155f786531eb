//! Oriented FAST keypoints with rotated BRIEF descriptors, and cross-checked
//! Hamming matching between two descriptor sets.
use image::GrayImage;
use image::imageops::{self, FilterType};
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::OnceLock;

/// Keypoints closer than this to a level's edge are discarded, so every
/// rotated sampling offset stays inside the image.
const BORDER: u32 = 20;
/// Radius of the intensity-centroid patch used for orientation.
const ORIENTATION_RADIUS: i32 = 15;
/// Half side of the square BRIEF test pairs are drawn from.
const PATCH_HALF: f32 = 13.0;
const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x0b_5eed;
const SMOOTHING_SIGMA: f32 = 2.0;

#[derive(Debug, Clone, Copy)]
pub struct OrbParams {
    pub max_keypoints: usize,
    pub fast_threshold: u8,
    pub levels: usize,
    pub scale_factor: f32,
}

/// A detected feature, located in full-resolution pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub level: usize,
    pub score: f32,
    /// Orientation in radians.
    pub angle: f32,
}

/// 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub fn distance(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    /// Index into the query set (the test image).
    pub query: usize,
    /// Index into the train set (the reference image).
    pub train: usize,
    pub distance: u32,
}

struct Candidate {
    level: usize,
    x: u32,
    y: u32,
    score: f32,
}

/// Fixed test-pair pattern, identical for every image and every run.
fn brief_pattern() -> &'static [[(f32, f32); 2]] {
    static PATTERN: OnceLock<Vec<[(f32, f32); 2]>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        (0..DESCRIPTOR_BITS)
            .map(|_| {
                let mut point = || {
                    (
                        rng.gen_range(-PATCH_HALF..=PATCH_HALF).round(),
                        rng.gen_range(-PATCH_HALF..=PATCH_HALF).round(),
                    )
                };
                [point(), point()]
            })
            .collect()
    })
}

fn build_pyramid(gray: &GrayImage, params: &OrbParams) -> Vec<(GrayImage, f32)> {
    let min_side = 2 * BORDER + 1;
    let mut levels = vec![(gray.clone(), 1.0f32)];
    for level in 1..params.levels {
        let scale = params.scale_factor.powi(level as i32);
        let w = (gray.width() as f32 / scale).round() as u32;
        let h = (gray.height() as f32 / scale).round() as u32;
        if w < min_side || h < min_side {
            break;
        }
        levels.push((imageops::resize(gray, w, h, FilterType::Triangle), scale));
    }
    levels
}

/// FAST-9 corners on one level after 3x3 non-maximum suppression.
fn fast_candidates(img: &GrayImage, level: usize, threshold: u8) -> Vec<Candidate> {
    let (w, h) = img.dimensions();
    if w < 2 * BORDER + 1 || h < 2 * BORDER + 1 {
        return Vec::new();
    }
    let corners = corners_fast9(img, threshold);
    let mut scores = vec![0f32; (w * h) as usize];
    for c in &corners {
        scores[(c.y * w + c.x) as usize] = c.score;
    }

    let mut kept = Vec::new();
    for c in &corners {
        if c.x < BORDER || c.y < BORDER || c.x >= w - BORDER || c.y >= h - BORDER {
            continue;
        }
        let own = (c.y * w + c.x) as usize;
        let mut is_max = true;
        'window: for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let idx = ((c.y as i32 + dy) as u32 * w + (c.x as i32 + dx) as u32) as usize;
                let s = scores[idx];
                // Equal scores keep only the earliest pixel in raster order.
                if s > c.score || (s == c.score && idx < own) {
                    is_max = false;
                    break 'window;
                }
            }
        }
        if is_max {
            kept.push(Candidate {
                level,
                x: c.x,
                y: c.y,
                score: c.score,
            });
        }
    }
    kept
}

/// Intensity-centroid orientation of the disc around `(x, y)`.
fn orientation(img: &GrayImage, x: u32, y: u32) -> f32 {
    let (mut m01, mut m10) = (0i64, 0i64);
    let r2 = ORIENTATION_RADIUS * ORIENTATION_RADIUS;
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }
    (m01 as f32).atan2(m10 as f32)
}

fn describe(smoothed: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |(px, py): (f32, f32)| {
        let rx = (cos * px - sin * py).round() as i32;
        let ry = (sin * px + cos * py).round() as i32;
        smoothed.get_pixel((x as i32 + rx) as u32, (y as i32 + ry) as u32)[0]
    };
    let mut bits = [0u64; 4];
    for (i, [a, b]) in brief_pattern().iter().enumerate() {
        if sample(*a) < sample(*b) {
            bits[i / 64] |= 1u64 << (i % 64);
        }
    }
    Descriptor(bits)
}

/// Detect up to `max_keypoints` oriented keypoints over a scale pyramid and
/// compute their descriptors.
pub fn detect_and_describe(gray: &GrayImage, params: &OrbParams) -> FeatureSet {
    let pyramid = build_pyramid(gray, params);

    let mut candidates: Vec<Candidate> = pyramid
        .iter()
        .enumerate()
        .flat_map(|(level, (img, _))| fast_candidates(img, level, params.fast_threshold))
        .collect();
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.level.cmp(&b.level))
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });
    candidates.truncate(params.max_keypoints);

    let smoothed: Vec<GrayImage> = pyramid
        .iter()
        .map(|(img, _)| gaussian_blur_f32(img, SMOOTHING_SIGMA))
        .collect();

    let mut features = FeatureSet::default();
    for c in &candidates {
        let (img, scale) = &pyramid[c.level];
        let angle = orientation(img, c.x, c.y);
        features.descriptors.push(describe(&smoothed[c.level], c.x, c.y, angle));
        features.keypoints.push(Keypoint {
            x: c.x as f32 * scale,
            y: c.y as f32 * scale,
            level: c.level,
            score: c.score,
            angle,
        });
    }
    debug!(
        "detected {} keypoints over {} pyramid levels",
        features.len(),
        pyramid.len()
    );
    features
}

/// Nearest neighbour of every descriptor in `from` among `to`; ties go to
/// the lowest index.
fn nearest(from: &[Descriptor], to: &[Descriptor]) -> Vec<Option<(usize, u32)>> {
    from.par_iter()
        .map(|d| {
            to.iter()
                .enumerate()
                .map(|(j, t)| (j, d.distance(t)))
                .min_by_key(|&(j, dist)| (dist, j))
        })
        .collect()
}

/// Brute-force Hamming matching keeping only mutual nearest neighbours,
/// sorted by ascending distance.
pub fn match_cross_checked(query: &[Descriptor], train: &[Descriptor]) -> Vec<FeatureMatch> {
    let forward = nearest(query, train);
    let backward = nearest(train, query);
    let mut matches: Vec<FeatureMatch> = forward
        .iter()
        .enumerate()
        .filter_map(|(q, best)| {
            let (t, distance) = (*best)?;
            (backward[t].map(|(back, _)| back) == Some(q)).then_some(FeatureMatch {
                query: q,
                train: t,
                distance,
            })
        })
        .collect();
    matches.sort_by_key(|m| (m.distance, m.query));
    matches
}

/// Keep the strongest `fraction` of distance-sorted matches (rounded up).
pub fn retain_best(mut matches: Vec<FeatureMatch>, fraction: f32) -> Vec<FeatureMatch> {
    let keep = ((matches.len() as f32 * fraction).ceil() as usize).min(matches.len());
    matches.truncate(keep);
    matches
}

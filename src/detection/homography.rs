//! Planar projective transforms and their robust estimation.
//!
//! - `Homography`: a normalized 3x3 matrix with point mapping helpers.
//! - `Homography::estimate`: normalized DLT least squares over >= 4 pairs.
//! - `find_homography_ransac`: seeded RANSAC around the DLT with a final
//!   refit on the consensus set.
use imageproc::geometric_transformations::Projection;
use log::debug;
use nalgebra::{Matrix3, SMatrix, SymmetricEigen, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;

const EPS: f64 = 1e-12;

/// Projective transform mapping source pixel coordinates to target ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Accept a matrix if it is finite and invertible; scales it so that
    /// the bottom-right entry is 1 whenever that entry is non-zero.
    pub fn from_matrix(matrix: Matrix3<f64>) -> Option<Self> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let matrix = if matrix[(2, 2)].abs() > EPS {
            matrix / matrix[(2, 2)]
        } else {
            matrix
        };
        let det = matrix.determinant();
        if !det.is_finite() || det.abs() < EPS {
            return None;
        }
        Some(Self { matrix })
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Map a point; `None` when it lands on the line at infinity.
    pub fn apply(&self, (x, y): (f64, f64)) -> Option<(f64, f64)> {
        let v = self.matrix * Vector3::new(x, y, 1.0);
        let w = v[2];
        if !w.is_finite() || w.abs() <= EPS {
            return None;
        }
        let (px, py) = (v[0] / w, v[1] / w);
        (px.is_finite() && py.is_finite()).then_some((px, py))
    }

    pub fn inverse(&self) -> Option<Self> {
        self.matrix.try_inverse().and_then(Self::from_matrix)
    }

    /// `self` applied after `first`.
    pub fn compose(&self, first: &Homography) -> Option<Self> {
        Self::from_matrix(self.matrix * first.matrix)
    }

    /// Convert into the warping transform used by `imageproc`.
    pub fn to_projection(&self) -> Option<Projection> {
        let m = &self.matrix;
        let mut values = [0f32; 9];
        for row in 0..3 {
            for col in 0..3 {
                values[row * 3 + col] = m[(row, col)] as f32;
            }
        }
        Projection::from_matrix(values)
    }

    /// Least-squares estimate from point pairs with Hartley normalization.
    ///
    /// Needs at least four pairs in general position.
    pub fn estimate(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Self> {
        if src.len() != dst.len() || src.len() < 4 {
            return None;
        }
        if is_degenerate_spread(src) || is_degenerate_spread(dst) {
            return None;
        }
        let t_src = normalizing_transform(src)?;
        let t_dst = normalizing_transform(dst)?;

        let mut ata = SMatrix::<f64, 9, 9>::zeros();
        for (&s, &d) in src.iter().zip(dst) {
            let s = t_src * Vector3::new(s.0, s.1, 1.0);
            let d = t_dst * Vector3::new(d.0, d.1, 1.0);
            let (x, y, u, v) = (s[0], s[1], d[0], d[1]);
            let rows = [
                [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
                [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
            ];
            for row in rows {
                for i in 0..9 {
                    for j in 0..9 {
                        ata[(i, j)] += row[i] * row[j];
                    }
                }
            }
        }

        let eigen = SymmetricEigen::new(ata);
        let (smallest, _) = eigen
            .eigenvalues
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))?;
        let h = eigen.eigenvectors.column(smallest);
        let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

        let denormalized = t_dst.try_inverse()? * normalized * t_src;
        Self::from_matrix(denormalized)
    }

    /// Squared distance between the mapped source point and its target.
    fn reprojection_error_sq(&self, src: (f64, f64), dst: (f64, f64)) -> Option<f64> {
        let (px, py) = self.apply(src)?;
        Some((px - dst.0).powi(2) + (py - dst.1).powi(2))
    }
}

/// Similarity that moves the centroid to the origin and scales the mean
/// distance from it to sqrt(2).
fn normalizing_transform(points: &[(f64, f64)]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let (cx, cy) = points
        .iter()
        .fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    let (cx, cy) = (cx / n, cy / n);
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-9 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// True when the points all lie on (or very near) a single line.
fn is_degenerate_spread(points: &[(f64, f64)]) -> bool {
    let n = points.len() as f64;
    let (cx, cy) = points
        .iter()
        .fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    let (cx, cy) = (cx / n, cy / n);
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let (dx, dy) = (p.0 - cx, p.1 - cy);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let half_trace = 0.5 * (sxx + syy);
    let spread = (0.25 * (sxx - syy).powi(2) + sxy * sxy).sqrt();
    let (major, minor) = (half_trace + spread, half_trace - spread);
    major <= EPS || minor <= major * 1e-10
}

/// True when any three of the points are (nearly) collinear.
fn has_collinear_triple(points: &[(f64, f64)]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let (a, b, c) = (points[i], points[j], points[k]);
                let cross = (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0);
                if cross.abs() < 1e-6 {
                    return true;
                }
            }
        }
    }
    false
}

#[derive(Debug, Clone, Copy)]
pub struct RansacParams {
    /// Inlier reprojection threshold in pixels.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct RansacEstimate {
    pub homography: Homography,
    /// Per-correspondence inlier flags, aligned with the input slices.
    pub inliers: Vec<bool>,
    pub inlier_count: usize,
    pub iterations: usize,
}

/// Robustly fit a homography mapping `src[i]` onto `dst[i]`.
///
/// Sampling draws from a `StdRng` seeded with `params.seed`, so the same
/// inputs and seed always produce the same estimate.
pub fn find_homography_ransac(
    src: &[(f64, f64)],
    dst: &[(f64, f64)],
    params: &RansacParams,
) -> Option<RansacEstimate> {
    let n = src.len();
    if n != dst.len() || n < 4 {
        return None;
    }
    let threshold_sq = params.threshold * params.threshold;
    let mut rng = StdRng::seed_from_u64(params.seed);

    let mut best: Option<(Homography, usize)> = None;
    let mut max_iterations = params.max_iterations;
    let mut iterations = 0;
    while iterations < max_iterations {
        iterations += 1;
        let sample = rand::seq::index::sample(&mut rng, n, 4);
        let s_src: Vec<(f64, f64)> = sample.iter().map(|i| src[i]).collect();
        let s_dst: Vec<(f64, f64)> = sample.iter().map(|i| dst[i]).collect();
        if has_collinear_triple(&s_src) || has_collinear_triple(&s_dst) {
            continue;
        }
        let Some(candidate) = Homography::estimate(&s_src, &s_dst) else {
            continue;
        };
        let count = count_inliers(&candidate, src, dst, threshold_sq);
        if best.as_ref().is_none_or(|(_, c)| count > *c) {
            best = Some((candidate, count));
            let required = required_iterations(count as f64 / n as f64, params.confidence);
            max_iterations = max_iterations.min(required);
        }
    }

    let (model, count) = best?;
    if count < 4 {
        return None;
    }

    let mask = inlier_mask(&model, src, dst, threshold_sq);
    let (in_src, in_dst): (Vec<_>, Vec<_>) = src
        .iter()
        .zip(dst)
        .zip(&mask)
        .filter(|(_, keep)| **keep)
        .map(|((s, d), _)| (*s, *d))
        .unzip();

    // Keep the minimal-sample model if the refit loses consensus.
    let homography = match Homography::estimate(&in_src, &in_dst) {
        Some(refined) if count_inliers(&refined, src, dst, threshold_sq) >= count => refined,
        _ => model,
    };
    let inliers = inlier_mask(&homography, src, dst, threshold_sq);
    let inlier_count = inliers.iter().filter(|v| **v).count();
    debug!(
        "ransac: {} of {} correspondences are inliers after {} iterations",
        inlier_count, n, iterations
    );

    Some(RansacEstimate {
        homography,
        inliers,
        inlier_count,
        iterations,
    })
}

fn inlier_mask(h: &Homography, src: &[(f64, f64)], dst: &[(f64, f64)], thr_sq: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(&s, &d)| h.reprojection_error_sq(s, d).is_some_and(|e| e < thr_sq))
        .collect()
}

fn count_inliers(h: &Homography, src: &[(f64, f64)], dst: &[(f64, f64)], thr_sq: f64) -> usize {
    src.iter()
        .zip(dst)
        .filter(|(s, d)| h.reprojection_error_sq(**s, **d).is_some_and(|e| e < thr_sq))
        .count()
}

/// Iterations needed to hit `confidence` at the given inlier ratio.
fn required_iterations(inlier_ratio: f64, confidence: f64) -> usize {
    let all_inliers = inlier_ratio.powi(4);
    if all_inliers >= 1.0 - EPS {
        return 1;
    }
    if all_inliers <= EPS {
        return usize::MAX;
    }
    let k = (1.0 - confidence).ln() / (1.0 - all_inliers).ln();
    if k.is_finite() { k.ceil().max(1.0) as usize } else { usize::MAX }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Homography {
        Homography::from_matrix(Matrix3::new(
            0.98, -0.17, 12.0, 0.16, 1.01, -7.5, 1e-5, -2e-5, 1.0,
        ))
        .unwrap()
    }

    fn grid_points() -> Vec<(f64, f64)> {
        let mut pts = Vec::new();
        for y in 0..6 {
            for x in 0..8 {
                pts.push((20.0 + x as f64 * 37.0, 15.0 + y as f64 * 41.0));
            }
        }
        pts
    }

    #[test]
    fn dlt_recovers_exact_transform() {
        let h = known();
        let src = grid_points();
        let dst: Vec<_> = src.iter().map(|p| h.apply(*p).unwrap()).collect();
        let est = Homography::estimate(&src, &dst).unwrap();
        for p in &src {
            let a = h.apply(*p).unwrap();
            let b = est.apply(*p).unwrap();
            assert!((a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6);
        }
    }

    #[test]
    fn ransac_ignores_gross_outliers() {
        let h = known();
        let src = grid_points();
        let mut dst: Vec<_> = src.iter().map(|p| h.apply(*p).unwrap()).collect();
        for (i, d) in dst.iter_mut().enumerate().filter(|(i, _)| i % 4 == 0) {
            d.0 += 40.0 + i as f64;
            d.1 -= 25.0;
        }
        let params = RansacParams {
            threshold: 3.0,
            max_iterations: 500,
            confidence: 0.995,
            seed: 42,
        };
        let est = find_homography_ransac(&src, &dst, &params).unwrap();
        assert_eq!(est.inlier_count, src.len() - src.len().div_ceil(4));
        let p = est.homography.apply((100.0, 100.0)).unwrap();
        let q = h.apply((100.0, 100.0)).unwrap();
        assert!((p.0 - q.0).abs() < 1e-3 && (p.1 - q.1).abs() < 1e-3);
    }

    #[test]
    fn ransac_is_reproducible_for_a_seed() {
        let h = known();
        let src = grid_points();
        let mut dst: Vec<_> = src.iter().map(|p| h.apply(*p).unwrap()).collect();
        dst[3].0 += 30.0;
        dst[17].1 += 30.0;
        let params = RansacParams {
            threshold: 3.0,
            max_iterations: 200,
            confidence: 0.99,
            seed: 9,
        };
        let a = find_homography_ransac(&src, &dst, &params).unwrap();
        let b = find_homography_ransac(&src, &dst, &params).unwrap();
        assert_eq!(a.homography, b.homography);
        assert_eq!(a.inliers, b.inliers);
    }

    #[test]
    fn collinear_points_do_not_estimate() {
        let src = [(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)];
        let dst = [(0.0, 0.0), (2.0, 2.0), (4.0, 4.0), (6.0, 6.0)];
        assert!(Homography::estimate(&src, &dst).is_none());
        let params = RansacParams {
            threshold: 3.0,
            max_iterations: 50,
            confidence: 0.99,
            seed: 0,
        };
        assert!(find_homography_ransac(&src, &dst, &params).is_none());
    }

    #[test]
    fn inverse_round_trips_points() {
        let h = known();
        let inv = h.inverse().unwrap();
        let p = inv.apply(h.apply((50.0, 80.0)).unwrap()).unwrap();
        assert!((p.0 - 50.0).abs() < 1e-9 && (p.1 - 80.0).abs() < 1e-9);
    }
}

//! Affine transform estimation from point correspondences.
//!
//! [`fit_affine_lstsq`] is the plain least-squares fit over all pairs;
//! [`estimate_affine`] wraps it in a deterministic RANSAC loop so that
//! mismatches surviving feature matching do not bias the result.

use crate::{AffineTransform, RegistrationError, Result};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Vector3};
use rand::{rngs::StdRng, seq::index, SeedableRng};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Robust estimator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Upper bound on minimal-sample hypotheses.
    pub max_iterations: usize,
    /// Residual (fixed-image pixels) under which a pair counts as an inlier.
    pub inlier_threshold_px: f64,
    /// Target probability of drawing at least one all-inlier sample; drives
    /// early termination.
    pub confidence: f64,
    /// Seed of the sampler. Equal inputs and seed give equal results.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            inlier_threshold_px: 3.0,
            confidence: 0.999,
            seed: 0x5EED_A11C,
        }
    }
}

impl RansacParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(RegistrationError::invalid_parameter(
                "max_iterations",
                "must be positive",
            ));
        }
        if !(self.inlier_threshold_px.is_finite() && self.inlier_threshold_px > 0.0) {
            return Err(RegistrationError::invalid_parameter(
                "inlier_threshold_px",
                format!("must be a positive number, got {}", self.inlier_threshold_px),
            ));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(RegistrationError::invalid_parameter(
                "confidence",
                format!("must lie in (0, 1), got {}", self.confidence),
            ));
        }
        Ok(())
    }
}

/// Result of a robust affine fit.
#[derive(Clone, Debug)]
pub struct AffineFit {
    /// Maps moving points onto fixed points.
    pub transform: AffineTransform,
    /// Inlier flag per input pair.
    pub inliers: Vec<bool>,
    /// RMS residual over the inliers, in fixed-image pixels.
    pub rms_residual: f64,
}

impl AffineFit {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&v| v).count()
    }
}

fn check_pairs(fixed: &[Point2<f64>], moving: &[Point2<f64>]) -> Result<()> {
    if fixed.len() != moving.len() {
        return Err(RegistrationError::invalid_parameter(
            "points",
            format!(
                "fixed and moving point sets differ in length ({} vs {})",
                fixed.len(),
                moving.len()
            ),
        ));
    }
    if fixed.len() < 3 || is_collinear(moving) || is_collinear(fixed) {
        return Err(RegistrationError::InsufficientCorrespondences {
            found: fixed.len(),
        });
    }
    Ok(())
}

/// True when the points do not span two dimensions.
fn is_collinear(pts: &[Point2<f64>]) -> bool {
    let n = pts.len() as f64;
    if pts.len() < 3 {
        return true;
    }
    let (cx, cy) = pts
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (cx / n, cy / n);
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in pts {
        let dx = p.x - cx;
        let dy = p.y - cy;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let trace = sxx + syy;
    if trace <= f64::EPSILON {
        return true;
    }
    let det = sxx * syy - sxy * sxy;
    // smallest/largest eigenvalue ratio of the scatter matrix
    let disc = (0.25 * trace * trace - det).max(0.0).sqrt();
    let l_min = 0.5 * trace - disc;
    let l_max = 0.5 * trace + disc;
    l_min / l_max < 1e-10
}

fn normalization(pts: &[&Point2<f64>]) -> Matrix3<f64> {
    let n = pts.len() as f64;
    let (mut cx, mut cy) = (0.0, 0.0);
    for p in pts {
        cx += p.x;
        cy += p.y;
    }
    cx /= n;
    cy /= n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

#[inline]
fn apply3(t: &Matrix3<f64>, p: &Point2<f64>) -> (f64, f64) {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    (v[0], v[1])
}

fn lstsq_subset(
    fixed: &[Point2<f64>],
    moving: &[Point2<f64>],
    idx: &[usize],
) -> Option<AffineTransform> {
    let f: Vec<&Point2<f64>> = idx.iter().map(|&i| &fixed[i]).collect();
    let m: Vec<&Point2<f64>> = idx.iter().map(|&i| &moving[i]).collect();
    let t_f = normalization(&f);
    let t_m = normalization(&m);

    let n = idx.len();
    let mut a = DMatrix::<f64>::zeros(n, 3);
    let mut bx = DVector::<f64>::zeros(n);
    let mut by = DVector::<f64>::zeros(n);
    for k in 0..n {
        let (x, y) = apply3(&t_m, m[k]);
        let (u, v) = apply3(&t_f, f[k]);
        a[(k, 0)] = x;
        a[(k, 1)] = y;
        a[(k, 2)] = 1.0;
        bx[k] = u;
        by[k] = v;
    }

    let svd = a.svd(true, true);
    let rx = svd.solve(&bx, 1e-12).ok()?;
    let ry = svd.solve(&by, 1e-12).ok()?;
    let an = Matrix3::new(rx[0], rx[1], rx[2], ry[0], ry[1], ry[2], 0.0, 0.0, 1.0);

    // moving -> fixed = T_f^-1 * An * T_m
    let m_den = t_f.try_inverse()? * an * t_m;
    let t = AffineTransform::try_from_matrix(m_den).ok()?;
    (t.determinant().abs() > 1e-12).then_some(t)
}

/// Least-squares affine fit over all pairs (no outlier rejection).
pub fn fit_affine_lstsq(
    fixed: &[Point2<f64>],
    moving: &[Point2<f64>],
) -> Result<AffineTransform> {
    check_pairs(fixed, moving)?;
    let idx: Vec<usize> = (0..fixed.len()).collect();
    lstsq_subset(fixed, moving, &idx).ok_or(RegistrationError::InsufficientCorrespondences {
        found: fixed.len(),
    })
}

/// Exact affine through three pairs; `None` for collinear samples.
fn fit_minimal(
    fixed: &[Point2<f64>],
    moving: &[Point2<f64>],
    idx: [usize; 3],
) -> Option<AffineTransform> {
    let mut a = Matrix3::<f64>::zeros();
    let mut bx = Vector3::<f64>::zeros();
    let mut by = Vector3::<f64>::zeros();
    for (r, &i) in idx.iter().enumerate() {
        a[(r, 0)] = moving[i].x;
        a[(r, 1)] = moving[i].y;
        a[(r, 2)] = 1.0;
        bx[r] = fixed[i].x;
        by[r] = fixed[i].y;
    }
    let lu = a.lu();
    let rx = lu.solve(&bx)?;
    let ry = lu.solve(&by)?;
    let t = AffineTransform::from_rows([[rx[0], rx[1], rx[2]], [ry[0], ry[1], ry[2]]]);
    let scale = a.abs().max().max(1.0);
    (t.determinant().abs() > 1e-9 && a.determinant().abs() > 1e-9 * scale * scale).then_some(t)
}

fn residual(t: &AffineTransform, f: &Point2<f64>, m: &Point2<f64>) -> f64 {
    let p = t.apply(*m);
    ((p.x - f.x).powi(2) + (p.y - f.y).powi(2)).sqrt()
}

fn inlier_mask(
    t: &AffineTransform,
    fixed: &[Point2<f64>],
    moving: &[Point2<f64>],
    thr: f64,
) -> Vec<bool> {
    fixed
        .iter()
        .zip(moving)
        .map(|(f, m)| residual(t, f, m) <= thr)
        .collect()
}

fn required_iterations(confidence: f64, inlier_ratio: f64, cap: usize) -> usize {
    let w3 = inlier_ratio.powi(3);
    if w3 >= 1.0 - 1e-12 {
        return 1;
    }
    if w3 <= 1e-12 {
        return cap;
    }
    let k = (1.0 - confidence).ln() / (1.0 - w3).ln();
    (k.ceil() as usize).clamp(1, cap)
}

/// Robust affine estimation: RANSAC over minimal 3-point samples followed by
/// a least-squares refit on the consensus set.
///
/// Fails with `InsufficientCorrespondences` for fewer than three pairs or when
/// either point set is collinear.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(fixed, moving, params), fields(pairs = fixed.len()))
)]
pub fn estimate_affine(
    fixed: &[Point2<f64>],
    moving: &[Point2<f64>],
    params: &RansacParams,
) -> Result<AffineFit> {
    params.validate()?;
    check_pairs(fixed, moving)?;
    let n = fixed.len();
    let thr = params.inlier_threshold_px;

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(usize, AffineTransform)> = None;
    let mut budget = params.max_iterations;
    let mut iter = 0;
    while iter < budget {
        iter += 1;
        let picked = index::sample(&mut rng, n, 3);
        let sample = [picked.index(0), picked.index(1), picked.index(2)];
        let Some(model) = fit_minimal(fixed, moving, sample) else {
            continue;
        };
        let count = inlier_mask(&model, fixed, moving, thr)
            .into_iter()
            .filter(|&v| v)
            .count();
        if best.as_ref().is_none_or(|(c, _)| count > *c) {
            budget = required_iterations(
                params.confidence,
                count as f64 / n as f64,
                params.max_iterations,
            );
            best = Some((count, model));
        }
    }

    let mut model = match best {
        Some((_, model)) => model,
        None => fit_affine_lstsq(fixed, moving)?,
    };
    let mut inliers = inlier_mask(&model, fixed, moving, thr);

    // Refit on the consensus set until it stops changing.
    for _ in 0..5 {
        let idx: Vec<usize> = (0..n).filter(|&i| inliers[i]).collect();
        if idx.len() < 3 {
            break;
        }
        let Some(refit) = lstsq_subset(fixed, moving, &idx) else {
            break;
        };
        let next = inlier_mask(&refit, fixed, moving, thr);
        if next.iter().filter(|&&v| v).count() < idx.len() {
            break;
        }
        model = refit;
        let stable = next == inliers;
        inliers = next;
        if stable {
            break;
        }
    }

    let (sum_sq, count) = fixed
        .iter()
        .zip(moving)
        .zip(&inliers)
        .filter(|(_, &keep)| keep)
        .fold((0.0, 0usize), |(s, c), ((f, m), _)| {
            (s + residual(&model, f, m).powi(2), c + 1)
        });
    let rms_residual = if count > 0 {
        (sum_sq / count as f64).sqrt()
    } else {
        f64::INFINITY
    };

    log::debug!(
        "affine fit: {count}/{n} inliers after {iter} hypotheses, rms {rms_residual:.3}px"
    );

    Ok(AffineFit {
        transform: model,
        inliers,
        rms_residual,
    })
}

//! Coarse-to-fine correspondence search over a [`FeaturePyramid`].
//!
//! The coarsest stage is searched all-to-all; every surviving match is then
//! handed down stage by stage and only re-scored inside a small window, so the
//! cost stays near-linear in the size of the finer maps.

mod coarse;
mod descriptors;
mod params;
mod refine;

pub use params::MatchParams;

use crate::pyramid::{FeaturePyramid, StageFeatures, StageKind};
use coarse::{coarse_matches, CellMatch};
use descriptors::Descriptors;
use nalgebra::Point2;
use refine::refine_matches;
use wsireg_core::Result;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Correspondences in input-image pixel coordinates.
///
/// `fixed[i]` and `moving[i]` form one pair, `confidence[i]` is its cosine
/// similarity at the finest stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchedPoints {
    pub fixed: Vec<Point2<f64>>,
    pub moving: Vec<Point2<f64>>,
    pub confidence: Vec<f32>,
}

impl MatchedPoints {
    pub fn len(&self) -> usize {
        self.fixed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixed.is_empty()
    }

    fn from_cells(cells: &[CellMatch], downsample: usize) -> Self {
        // centre of the d x d pixel block, pixel centres on integers
        let d = downsample as f64;
        let to_pixel = |(y, x): (usize, usize)| {
            Point2::new((x as f64 + 0.5) * d - 0.5, (y as f64 + 0.5) * d - 0.5)
        };
        let mut out = MatchedPoints {
            fixed: Vec::with_capacity(cells.len()),
            moving: Vec::with_capacity(cells.len()),
            confidence: Vec::with_capacity(cells.len()),
        };
        for c in cells {
            out.fixed.push(to_pixel(c.fixed));
            out.moving.push(to_pixel(c.moving));
            out.confidence.push(c.similarity);
        }
        out
    }
}

/// Match the fixed and moving activations of a pyramid, coarse to fine.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip(pyramid, params)))]
pub fn match_features(pyramid: &FeaturePyramid, params: &MatchParams) -> Result<MatchedPoints> {
    params.validate()?;

    let coarse = pyramid.stage(StageKind::Coarse);
    let mut cells = coarse_matches(
        &Descriptors::from_map(&coarse.fixed),
        &Descriptors::from_map(&coarse.moving),
        params,
    );

    let mut outer = coarse;
    for kind in [StageKind::Mid, StageKind::Fine] {
        let inner = pyramid.stage(kind);
        let ratio = outer.downsample / inner.downsample;
        let before = cells.len();
        cells = refine_matches(
            &cells,
            ratio,
            &Descriptors::from_map(&inner.fixed),
            &Descriptors::from_map(&inner.moving),
            params,
        );
        log::debug!(
            "{kind:?} stage: {} matches from {before} parents (ratio {ratio})",
            cells.len()
        );
        outer = inner;
    }

    Ok(MatchedPoints::from_cells(
        &cells,
        pyramid.stage(StageKind::Fine).downsample,
    ))
}

/// Like [`match_features`], taking the stages as a coarse-to-fine list.
///
/// Anything other than exactly three stages is a `FeatureStageMismatch`.
pub fn match_feature_stages(
    stages: Vec<StageFeatures>,
    params: &MatchParams,
) -> Result<MatchedPoints> {
    let pyramid = FeaturePyramid::from_stages(stages)?;
    match_features(&pyramid, params)
}

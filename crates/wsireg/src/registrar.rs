use crate::params::RegistrationParams;
use std::sync::Arc;
use wsireg_core::{
    estimate_affine, warp_affine, AffineTransform, Image, ImageView, Mask, RegistrationError,
    Result,
};
use wsireg_features::{extract_features, match_features, FeatureBackbone, MatchedPoints};
use wsireg_prealign::{match_histograms, match_histograms_auto, prealign, PrealignResult};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Outcome of one registration call.
#[derive(Clone, Debug)]
pub struct Registration {
    /// Maps moving-image pixels onto fixed-image pixels.
    pub transform: AffineTransform,
    /// Prealignment (or caller-supplied initial) transform; identity when no
    /// masks were given.
    pub coarse: AffineTransform,
    /// Fitted on the prealigned pair; maps warped-moving pixels onto fixed ones.
    pub refinement: AffineTransform,
    pub prealign: Option<PrealignResult>,
    /// Correspondences in the fixed / prealigned-moving frames.
    pub matches: MatchedPoints,
    /// Inlier flag per correspondence.
    pub inliers: Vec<bool>,
    pub rms_residual: f64,
}

impl Registration {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&v| v).count()
    }
}

/// Sequential registration pipeline around a shared, frozen backbone.
#[derive(Clone)]
pub struct Registrar {
    backbone: Arc<dyn FeatureBackbone>,
    params: RegistrationParams,
}

impl Registrar {
    pub fn new(backbone: Arc<dyn FeatureBackbone>, params: RegistrationParams) -> Self {
        Self { backbone, params }
    }

    pub fn params(&self) -> &RegistrationParams {
        &self.params
    }

    pub fn backbone(&self) -> &dyn FeatureBackbone {
        self.backbone.as_ref()
    }

    /// Register `moving` onto `fixed` (both RGB).
    ///
    /// With both masks the pair is prealigned first; with neither the coarse
    /// transform is the identity. Supplying only one mask is an error.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip_all,
            fields(width = fixed.width, height = fixed.height, masks = fixed_mask.is_some())
        )
    )]
    pub fn register(
        &self,
        fixed: &ImageView<'_>,
        moving: &ImageView<'_>,
        fixed_mask: Option<&Mask>,
        moving_mask: Option<&Mask>,
    ) -> Result<Registration> {
        fixed.ensure_rgb()?;
        moving.ensure_rgb()?;

        let prealigned = match (fixed_mask, moving_mask) {
            (Some(fm), Some(mm)) => Some(self.prealign(fixed, moving, fm, mm)?),
            (None, None) => None,
            _ => {
                return Err(RegistrationError::invalid_parameter(
                    "masks",
                    "provide both tissue masks or neither",
                ))
            }
        };
        let coarse = prealigned
            .as_ref()
            .map_or_else(AffineTransform::identity, |p| p.transform);

        self.refine(fixed, moving, coarse, prealigned)
    }

    /// Register starting from a known moving-to-fixed transform instead of
    /// running the mask-based prealignment.
    pub fn register_with_initializer(
        &self,
        fixed: &ImageView<'_>,
        moving: &ImageView<'_>,
        initial: &AffineTransform,
    ) -> Result<Registration> {
        fixed.ensure_rgb()?;
        moving.ensure_rgb()?;
        self.refine(fixed, moving, *initial, None)
    }

    fn prealign(
        &self,
        fixed: &ImageView<'_>,
        moving: &ImageView<'_>,
        fixed_mask: &Mask,
        moving_mask: &Mask,
    ) -> Result<PrealignResult> {
        let fixed_gray = fixed.to_gray()?;
        let moving_gray = moving.to_gray()?;

        let hist = &self.params.histogram;
        let (fixed_gray, moving_gray) = if !hist.enabled {
            (fixed_gray, moving_gray)
        } else if hist.auto_direction {
            let (f, m, direction) = match_histograms_auto(
                &fixed_gray.view(),
                &moving_gray.view(),
                hist.smoothing_kernel,
            )?;
            log::debug!("histogram matching direction: {direction:?}");
            (f, m)
        } else {
            let (m, f) = match_histograms(
                &moving_gray.view(),
                &fixed_gray.view(),
                hist.smoothing_kernel,
            )?;
            (f, m)
        };

        prealign(
            &fixed_gray.view(),
            &moving_gray.view(),
            fixed_mask,
            moving_mask,
            &self.params.prealign,
        )
    }

    fn refine(
        &self,
        fixed: &ImageView<'_>,
        moving: &ImageView<'_>,
        coarse: AffineTransform,
        prealign: Option<PrealignResult>,
    ) -> Result<Registration> {
        let warped: Option<Image> =
            if coarse == AffineTransform::identity() && moving.shape() == fixed.shape() {
                None
            } else {
                Some(warp_affine(moving, &coarse, fixed.width, fixed.height)?)
            };
        let moving_view = warped.as_ref().map_or(*moving, Image::view);

        let pyramid = extract_features(self.backbone.as_ref(), fixed, &moving_view)?;
        let matches = match_features(&pyramid, &self.params.matching)?;
        log::debug!("{} correspondences after coarse-to-fine matching", matches.len());

        let fit = estimate_affine(&matches.fixed, &matches.moving, &self.params.ransac)?;
        let transform = fit.transform.compose(&coarse);
        log::info!(
            "registered: {} / {} inliers, rms {:.3} px, transform {:?}",
            fit.inlier_count(),
            matches.len(),
            fit.rms_residual,
            transform.to_array()
        );

        Ok(Registration {
            transform,
            coarse,
            refinement: fit.transform,
            prealign,
            matches,
            inliers: fit.inliers,
            rms_residual: fit.rms_residual,
        })
    }
}

use crate::backbone::FeatureBackbone;
use crate::pyramid::FeaturePyramid;
use wsireg_core::{ImageView, RegistrationError, Result};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Run the frozen backbone once on the batch `[fixed, moving]`.
///
/// Both images must be RGB with identical shape; the moving image is expected
/// to be already prealigned into the fixed frame.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(backbone, fixed, moving), fields(width = fixed.width, height = fixed.height))
)]
pub fn extract_features(
    backbone: &dyn FeatureBackbone,
    fixed: &ImageView<'_>,
    moving: &ImageView<'_>,
) -> Result<FeaturePyramid> {
    fixed.ensure_rgb()?;
    moving.ensure_rgb()?;
    if fixed.shape() != moving.shape() {
        return Err(RegistrationError::InvalidImageFormat(format!(
            "feature extraction needs equally sized images, got {:?} and {:?}",
            fixed.shape(),
            moving.shape()
        )));
    }

    let pyramid = backbone.forward([fixed, moving])?;
    for (kind, stage) in pyramid.stages() {
        log::debug!(
            "{kind:?} stage: {:?} activations, downsample {}",
            stage.fixed.shape(),
            stage.downsample
        );
    }
    Ok(pyramid)
}

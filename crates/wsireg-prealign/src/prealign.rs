use crate::dice::dice_under_transform;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use wsireg_core::{AffineTransform, ImageView, Mask, RegistrationError, Result};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Smallest and largest accepted rotation step, in degrees.
pub const ROTATION_STEP_RANGE: (f64, f64) = (10.0, 20.0);

/// What to do when no candidate angle reaches `dice_overlap`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShortfallPolicy {
    /// Log a warning and return the best transform found.
    #[default]
    Warn,
    /// Fail with `DiceOverlapNotReached`.
    Fail,
}

/// Prealignment settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrealignParams {
    /// Dice overlap the best candidate is expected to reach, in `(0, 1]`.
    pub dice_overlap: f64,
    /// Angular grid spacing in degrees, within `[10, 20]`.
    pub rotation_step: f64,
    pub on_shortfall: ShortfallPolicy,
    /// Weight the centroids by tissue darkness (`1 - intensity / 255`)
    /// instead of using the plain mask first moment.
    pub intensity_weighted_centroid: bool,
}

impl Default for PrealignParams {
    fn default() -> Self {
        Self {
            dice_overlap: 0.5,
            rotation_step: 10.0,
            on_shortfall: ShortfallPolicy::Warn,
            intensity_weighted_centroid: false,
        }
    }
}

impl PrealignParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.dice_overlap > 0.0 && self.dice_overlap <= 1.0) {
            return Err(RegistrationError::invalid_parameter(
                "dice_overlap",
                format!("should be in (0, 1], got {}", self.dice_overlap),
            ));
        }
        let (lo, hi) = ROTATION_STEP_RANGE;
        if !(self.rotation_step >= lo && self.rotation_step <= hi) {
            return Err(RegistrationError::invalid_parameter(
                "rotation_step",
                format!(
                    "select the rotation step in between {lo} and {hi} degrees, got {}",
                    self.rotation_step
                ),
            ));
        }
        Ok(())
    }

    /// Candidate angles `0, step, 2 step, ...` below 360 degrees.
    pub fn angles(&self) -> Vec<f64> {
        (0..)
            .map(|k| k as f64 * self.rotation_step)
            .take_while(|&a| a < 360.0 - 1e-9)
            .collect()
    }
}

/// Outcome of the rotation search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrealignResult {
    /// Maps moving coordinates onto fixed coordinates.
    pub transform: AffineTransform,
    /// Dice overlap reached by `transform`.
    pub dice: f64,
    /// Winning rotation, degrees.
    pub angle_deg: f64,
    /// Whether `dice` reached the requested overlap.
    pub target_reached: bool,
}

fn check_pair(image: &ImageView<'_>, mask: &Mask, role: &'static str) -> Result<()> {
    image.ensure_gray()?;
    if image.shape() != mask.shape() {
        return Err(RegistrationError::ShapeMismatch {
            what: role,
            expected: image.shape(),
            actual: mask.shape(),
        });
    }
    Ok(())
}

fn centroid(image: &ImageView<'_>, mask: &Mask, weighted: bool) -> Option<Point2<f64>> {
    if weighted {
        let dark = mask.weighted_centroid(|x, y| 1.0 - image.get(x, y, 0) as f64 / 255.0);
        if dark.is_some() {
            return dark;
        }
    }
    mask.centroid()
}

/// Coarse rigid alignment of `moving` onto `fixed` from their tissue masks.
///
/// The moving mask is translated so that the centroids coincide, then rotated
/// about the shared centroid over the angle grid; the rotation with the best
/// Dice overlap wins (ties keep the smaller angle). Missing the requested
/// overlap is a warning unless `params.on_shortfall` is `Fail`.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(fixed, moving, fixed_mask, moving_mask, params),
        fields(step = params.rotation_step, target = params.dice_overlap)
    )
)]
pub fn prealign(
    fixed: &ImageView<'_>,
    moving: &ImageView<'_>,
    fixed_mask: &Mask,
    moving_mask: &Mask,
    params: &PrealignParams,
) -> Result<PrealignResult> {
    check_pair(fixed, fixed_mask, "fixed image mask")?;
    check_pair(moving, moving_mask, "moving image mask")?;
    if !fixed_mask.has_foreground() {
        return Err(RegistrationError::MissingForeground("fixed"));
    }
    if !moving_mask.has_foreground() {
        return Err(RegistrationError::MissingForeground("moving"));
    }
    params.validate()?;

    let weighted = params.intensity_weighted_centroid;
    let (fc, mc) = match (
        centroid(fixed, fixed_mask, weighted),
        centroid(moving, moving_mask, weighted),
    ) {
        (Some(fc), Some(mc)) => (fc, mc),
        (None, _) => return Err(RegistrationError::MissingForeground("fixed")),
        (_, None) => return Err(RegistrationError::MissingForeground("moving")),
    };
    let centroid_shift = AffineTransform::translation(fc.x - mc.x, fc.y - mc.y);

    let mut best: Option<(f64, f64, AffineTransform)> = None;
    for angle in params.angles() {
        let transform =
            AffineTransform::rotation_about(angle.to_radians(), fc).compose(&centroid_shift);
        let dice = dice_under_transform(fixed_mask, moving_mask, &transform)?;
        log::trace!("angle {angle:6.1} dice {dice:.4}");
        if best.as_ref().is_none_or(|(d, _, _)| dice > *d) {
            best = Some((dice, angle, transform));
        }
    }
    let Some((dice, angle_deg, transform)) = best else {
        return Err(RegistrationError::invalid_parameter(
            "rotation_step",
            "empty angle grid",
        ));
    };

    let target_reached = dice >= params.dice_overlap;
    if !target_reached {
        match params.on_shortfall {
            ShortfallPolicy::Fail => {
                return Err(RegistrationError::DiceOverlapNotReached {
                    best: dice,
                    target: params.dice_overlap,
                })
            }
            ShortfallPolicy::Warn => log::warn!(
                "not able to reach dice overlap {:.3} (best {dice:.3} at {angle_deg} deg); \
                 try changing `dice_overlap` and `rotation_step`",
                params.dice_overlap
            ),
        }
    }
    log::debug!(
        "prealignment: angle {angle_deg} deg, shift ({:.2}, {:.2}), dice {dice:.4}",
        fc.x - mc.x,
        fc.y - mc.y
    );

    Ok(PrealignResult {
        transform,
        dice,
        angle_deg,
        target_reached,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_grid_excludes_full_turn() {
        let p = PrealignParams {
            rotation_step: 20.0,
            ..PrealignParams::default()
        };
        let angles = p.angles();
        assert_eq!(angles.len(), 18);
        assert_eq!(angles[17], 340.0);

        let p = PrealignParams {
            rotation_step: 14.0,
            ..PrealignParams::default()
        };
        assert_eq!(p.angles().len(), 26);
    }

    #[test]
    fn param_ranges() {
        for (dice, step, ok) in [
            (0.5, 10.0, true),
            (1.0, 20.0, true),
            (2.0, 10.0, false),
            (-1.0, 10.0, false),
            (0.0, 10.0, false),
            (0.5, 9.0, false),
            (0.5, 21.0, false),
            (0.5, f64::NAN, false),
        ] {
            let p = PrealignParams {
                dice_overlap: dice,
                rotation_step: step,
                ..PrealignParams::default()
            };
            assert_eq!(p.validate().is_ok(), ok, "dice={dice} step={step}");
        }
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let p: PrealignParams =
            serde_json::from_str(r#"{"rotation_step": 15, "on_shortfall": "fail"}"#).unwrap();
        assert_eq!(p.rotation_step, 15.0);
        assert_eq!(p.dice_overlap, 0.5);
        assert_eq!(p.on_shortfall, ShortfallPolicy::Fail);
    }
}

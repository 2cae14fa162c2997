use nalgebra::Point2;
use wsireg_core::{AffineTransform, Mask, RegistrationError, Result};

/// Dice overlap `2|A ∩ B| / (|A| + |B|)` of two same-shaped masks.
///
/// Two empty masks are identical and score 1.
pub fn dice_coefficient(a: &Mask, b: &Mask) -> Result<f64> {
    if a.shape() != b.shape() {
        return Err(RegistrationError::ShapeMismatch {
            what: "dice masks",
            expected: a.shape(),
            actual: b.shape(),
        });
    }
    let (mut inter, mut na, mut nb) = (0usize, 0usize, 0usize);
    for (&va, &vb) in a.data.iter().zip(&b.data) {
        na += va as usize;
        nb += vb as usize;
        inter += (va && vb) as usize;
    }
    if na + nb == 0 {
        return Ok(1.0);
    }
    Ok(2.0 * inter as f64 / (na + nb) as f64)
}

/// Warp `moving` into an `out_w x out_h` frame with nearest-neighbour lookup;
/// pixels mapping outside `moving` are background.
pub fn warp_mask_nearest(
    moving: &Mask,
    moving_to_fixed: &AffineTransform,
    out_w: usize,
    out_h: usize,
) -> Result<Mask> {
    let inv = moving_to_fixed.inverse().ok_or_else(|| {
        RegistrationError::invalid_parameter("transform", "linear part is not invertible")
    })?;
    let (w, h) = (moving.width as f64, moving.height as f64);
    Ok(Mask::from_fn(out_w, out_h, |x, y| {
        let p = inv.apply(Point2::new(x as f64, y as f64));
        let (sx, sy) = (p.x.round(), p.y.round());
        sx >= 0.0 && sy >= 0.0 && sx < w && sy < h && moving.get(sx as usize, sy as usize)
    }))
}

/// Dice overlap of `fixed` and `moving` warped into the fixed frame.
pub fn dice_under_transform(
    fixed: &Mask,
    moving: &Mask,
    moving_to_fixed: &AffineTransform,
) -> Result<f64> {
    let warped = warp_mask_nearest(moving, moving_to_fixed, fixed.width, fixed.height)?;
    dice_coefficient(fixed, &warped)
}

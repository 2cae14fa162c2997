use crate::{sample_bilinear_u8, Image, ImageView, RegistrationError, Result};
use nalgebra::{Matrix2, Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

const BOTTOM_ROW_TOL: f64 = 1e-12;

/// 2D affine transform stored as a 3x3 homogeneous matrix.
///
/// Maps moving-image coordinates onto fixed-image coordinates. The bottom row
/// is exactly `(0, 0, 1)` for every value of this type.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct AffineTransform {
    m: Matrix3<f64>,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            m: Matrix3::identity(),
        }
    }

    /// Build from the top two rows `[[a, b, tx], [c, d, ty]]`.
    pub fn from_rows(rows: [[f64; 3]; 2]) -> Self {
        let [[a, b, tx], [c, d, ty]] = rows;
        Self {
            m: Matrix3::new(a, b, tx, c, d, ty, 0.0, 0.0, 1.0),
        }
    }

    /// Accept a full 3x3 matrix only if its bottom row is `(0, 0, 1)`.
    pub fn try_from_matrix(m: Matrix3<f64>) -> Result<Self> {
        let row_ok = m[(2, 0)].abs() <= BOTTOM_ROW_TOL
            && m[(2, 1)].abs() <= BOTTOM_ROW_TOL
            && (m[(2, 2)] - 1.0).abs() <= BOTTOM_ROW_TOL;
        if !row_ok {
            return Err(RegistrationError::invalid_parameter(
                "transform",
                format!(
                    "bottom row must be (0, 0, 1), got ({}, {}, {})",
                    m[(2, 0)],
                    m[(2, 1)],
                    m[(2, 2)]
                ),
            ));
        }
        let mut m = m;
        m[(2, 0)] = 0.0;
        m[(2, 1)] = 0.0;
        m[(2, 2)] = 1.0;
        Ok(Self { m })
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::from_rows([[1.0, 0.0, tx], [0.0, 1.0, ty]])
    }

    /// Counter-clockwise rotation (in the x-right, y-down pixel frame: the
    /// matrix `[[c, -s], [s, c]]`) about `centre`.
    pub fn rotation_about(angle_rad: f64, centre: Point2<f64>) -> Self {
        let (s, c) = angle_rad.sin_cos();
        let to_origin = Self::translation(-centre.x, -centre.y);
        let rot = Self::from_rows([[c, -s, 0.0], [s, c, 0.0]]);
        let back = Self::translation(centre.x, centre.y);
        back.compose(&rot).compose(&to_origin)
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.m
    }

    #[inline]
    pub fn linear(&self) -> Matrix2<f64> {
        self.m.fixed_view::<2, 2>(0, 0).into_owned()
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.m[(0, 0)], self.m[(0, 1)], self.m[(0, 2)]],
            [self.m[(1, 0)], self.m[(1, 1)], self.m[(1, 2)]],
            [0.0, 0.0, 1.0],
        ]
    }

    /// `self ∘ first`: apply `first`, then `self`.
    pub fn compose(&self, first: &AffineTransform) -> Self {
        let mut m = self.m * first.m;
        m[(2, 0)] = 0.0;
        m[(2, 1)] = 0.0;
        m[(2, 2)] = 1.0;
        Self { m }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.m * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0], v[1])
    }

    /// Determinant of the 2x2 linear part.
    pub fn determinant(&self) -> f64 {
        self.linear().determinant()
    }

    pub fn inverse(&self) -> Option<Self> {
        if self.determinant().abs() < 1e-12 {
            return None;
        }
        let inv = self.m.try_inverse()?;
        Self::try_from_matrix(inv).ok()
    }

    /// Largest absolute element-wise difference between two transforms.
    pub fn max_abs_diff(&self, other: &AffineTransform) -> f64 {
        (self.m - other.m).abs().max()
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl TryFrom<[[f64; 3]; 3]> for AffineTransform {
    type Error = RegistrationError;

    fn try_from(rows: [[f64; 3]; 3]) -> Result<Self> {
        Self::try_from_matrix(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }
}

impl From<AffineTransform> for [[f64; 3]; 3] {
    fn from(t: AffineTransform) -> Self {
        t.to_array()
    }
}

/// Resample `src` into an `out_w x out_h` frame: every output pixel `p` reads
/// `src` at `moving_to_fixed^-1 (p)` with bilinear interpolation, zero outside.
pub fn warp_affine(
    src: &ImageView<'_>,
    moving_to_fixed: &AffineTransform,
    out_w: usize,
    out_h: usize,
) -> Result<Image> {
    let inv = moving_to_fixed.inverse().ok_or_else(|| {
        RegistrationError::invalid_parameter("transform", "linear part is not invertible")
    })?;
    let channels = src.channels;
    let mut out = vec![0u8; out_w * out_h * channels];

    for y in 0..out_h {
        for x in 0..out_w {
            let ps = inv.apply(Point2::new(x as f64, y as f64));
            let base = (y * out_w + x) * channels;
            for c in 0..channels {
                out[base + c] = sample_bilinear_u8(src, ps.x as f32, ps.y as f32, c);
            }
        }
    }

    Ok(Image {
        width: out_w,
        height: out_h,
        channels,
        data: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bottom_row_is_fixed() {
        let t = AffineTransform::rotation_about(0.3, Point2::new(10.0, -4.0))
            .compose(&AffineTransform::translation(3.0, 7.0));
        assert_eq!(t.to_array()[2], [0.0, 0.0, 1.0]);
        let inv = t.inverse().expect("invertible");
        assert_eq!(inv.matrix()[(2, 0)], 0.0);
        assert_eq!(inv.matrix()[(2, 1)], 0.0);
        assert_eq!(inv.matrix()[(2, 2)], 1.0);
    }

    #[test]
    fn rejects_projective_rows() {
        assert!(AffineTransform::try_from([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.1, 0.0, 1.0]])
            .is_err());
    }

    #[test]
    fn rotation_keeps_centre_fixed() {
        let c = Point2::new(12.5, 30.0);
        let t = AffineTransform::rotation_about(std::f64::consts::FRAC_PI_2, c);
        let q = t.apply(c);
        assert_relative_eq!(q.x, c.x, epsilon = 1e-9);
        assert_relative_eq!(q.y, c.y, epsilon = 1e-9);
        let p = t.apply(Point2::new(c.x + 1.0, c.y));
        assert_relative_eq!(p.x, c.x, epsilon = 1e-9);
        assert_relative_eq!(p.y, c.y + 1.0, epsilon = 1e-9);
    }

    #[test]
    fn compose_applies_right_operand_first() {
        let shift = AffineTransform::translation(5.0, 0.0);
        let scale = AffineTransform::from_rows([[2.0, 0.0, 0.0], [0.0, 2.0, 0.0]]);
        let p = scale.compose(&shift).apply(Point2::new(1.0, 1.0));
        assert_relative_eq!(p.x, 12.0);
        assert_relative_eq!(p.y, 2.0);
    }

    #[test]
    fn serde_uses_row_arrays() {
        let t = AffineTransform::from_rows([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "[[1.0,2.0,3.0],[4.0,5.0,6.0],[0.0,0.0,1.0]]");
        let back: AffineTransform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<AffineTransform>("[[1,0,0],[0,1,0],[0,0,2]]").is_err());
    }

    #[test]
    fn integer_translation_warp_is_exact() {
        let src = Image::from_fn(6, 5, 3, |x, y, c| (x * 30 + y * 7 + c) as u8);
        let out = warp_affine(&src.view(), &AffineTransform::translation(2.0, 1.0), 6, 5).unwrap();
        let v = out.view();
        assert_eq!(v.get(3, 2, 1), src.view().get(1, 1, 1));
        assert_eq!(v.get(0, 0, 0), 0);
        assert_eq!(v.get(5, 4, 2), src.view().get(3, 3, 2));
    }
}

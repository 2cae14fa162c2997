use crate::{RegistrationError, Result};
use nalgebra::Point2;

/// Borrowed 8-bit image, row-major with interleaved channels.
///
/// `channels` is 1 for grayscale and 3 for RGB; `data.len()` is always
/// `width * height * channels`.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8],
}

/// Owned 8-bit image with the same layout as [`ImageView`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

fn check_layout(width: usize, height: usize, channels: usize, len: usize) -> Result<()> {
    if channels == 0 {
        return Err(RegistrationError::InvalidImageFormat(
            "images need at least one channel".to_string(),
        ));
    }
    let expected = width * height * channels;
    if len != expected {
        return Err(RegistrationError::InvalidImageFormat(format!(
            "buffer of {len} bytes does not fit {width}x{height}x{channels} (expected {expected})"
        )));
    }
    Ok(())
}

impl<'a> ImageView<'a> {
    pub fn new(width: usize, height: usize, channels: usize, data: &'a [u8]) -> Result<Self> {
        check_layout(width, height, channels, data.len())?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// `(width, height)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn is_gray(&self) -> bool {
        self.channels == 1
    }

    #[inline]
    pub fn is_rgb(&self) -> bool {
        self.channels == 3
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> u8 {
        self.data[(y * self.width + x) * self.channels + c]
    }

    /// Fail with `InvalidImageFormat` unless the view has a single channel.
    pub fn ensure_gray(&self) -> Result<()> {
        if self.is_gray() {
            Ok(())
        } else {
            Err(RegistrationError::InvalidImageFormat(format!(
                "the input images should be grayscale images (got {} channels)",
                self.channels
            )))
        }
    }

    /// Fail with `InvalidImageFormat` unless the view is n x m x 3.
    pub fn ensure_rgb(&self) -> Result<()> {
        if self.is_rgb() {
            Ok(())
        } else {
            Err(RegistrationError::InvalidImageFormat(format!(
                "the input images are expected to have 3 channels (got {})",
                self.channels
            )))
        }
    }

    /// Luma conversion (ITU-R BT.601 weights). Grayscale input is copied.
    pub fn to_gray(&self) -> Result<Image> {
        match self.channels {
            1 => Ok(self.to_owned_image()),
            3 => {
                let data = self
                    .data
                    .chunks_exact(3)
                    .map(|px| {
                        let l = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                        l.round().clamp(0.0, 255.0) as u8
                    })
                    .collect();
                Ok(Image {
                    width: self.width,
                    height: self.height,
                    channels: 1,
                    data,
                })
            }
            c => Err(RegistrationError::InvalidImageFormat(format!(
                "cannot convert a {c}-channel image to grayscale"
            ))),
        }
    }

    pub fn to_owned_image(&self) -> Image {
        Image {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: self.data.to_vec(),
        }
    }
}

impl Image {
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        check_layout(width, height, channels, data.len())?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn gray(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, 1, data)
    }

    pub fn rgb(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, 3, data)
    }

    pub fn zeros(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0; width * height * channels],
        }
    }

    /// Build an image by evaluating `f(x, y, c)` for every sample.
    pub fn from_fn(
        width: usize,
        height: usize,
        channels: usize,
        f: impl Fn(usize, usize, usize) -> u8,
    ) -> Self {
        let mut data = Vec::with_capacity(width * height * channels);
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    data.push(f(x, y, c));
                }
            }
        }
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    #[inline]
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: &self.data,
        }
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

#[inline]
fn get_sample(src: &ImageView<'_>, x: i32, y: i32, c: usize) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[(y as usize * src.width + x as usize) * src.channels + c]
}

/// Bilinear sample of channel `c`; pixel centres sit on integer coordinates
/// and everything outside the image reads as 0.
#[inline]
pub fn sample_bilinear(src: &ImageView<'_>, x: f32, y: f32, c: usize) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_sample(src, x0, y0, c) as f32;
    let p10 = get_sample(src, x0 + 1, y0, c) as f32;
    let p01 = get_sample(src, x0, y0 + 1, c) as f32;
    let p11 = get_sample(src, x0 + 1, y0 + 1, c) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &ImageView<'_>, x: f32, y: f32, c: usize) -> u8 {
    sample_bilinear(src, x, y, c).round().clamp(0.0, 255.0) as u8
}

/// Binary foreground (tissue) mask, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<bool>,
}

impl Mask {
    pub fn new(width: usize, height: usize, data: Vec<bool>) -> Result<Self> {
        if data.len() != width * height {
            return Err(RegistrationError::InvalidImageFormat(format!(
                "mask buffer of {} entries does not fit {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> bool) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Any non-zero value of the first channel is foreground.
    pub fn from_image(view: &ImageView<'_>) -> Self {
        Self::from_fn(view.width, view.height, |x, y| view.get(x, y, 0) > 0)
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    /// Foreground pixel count.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    pub fn has_foreground(&self) -> bool {
        self.data.iter().any(|&v| v)
    }

    /// First moment of the foreground pixels.
    pub fn centroid(&self) -> Option<Point2<f64>> {
        self.weighted_centroid(|_, _| 1.0)
    }

    /// Centre of mass of `weight(x, y)` over the foreground; `None` when the
    /// total weight vanishes.
    pub fn weighted_centroid(&self, weight: impl Fn(usize, usize) -> f64) -> Option<Point2<f64>> {
        let mut total = 0.0;
        let mut sx = 0.0;
        let mut sy = 0.0;
        for y in 0..self.height {
            for x in 0..self.width {
                if !self.get(x, y) {
                    continue;
                }
                let w = weight(x, y);
                total += w;
                sx += w * x as f64;
                sy += w * y as f64;
            }
        }
        if total <= f64::EPSILON {
            return None;
        }
        Some(Point2::new(sx / total, sy / total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_buffers_that_do_not_fit() {
        assert!(matches!(
            Image::rgb(4, 4, vec![0; 47]),
            Err(RegistrationError::InvalidImageFormat(_))
        ));
        assert!(Mask::new(3, 3, vec![false; 8]).is_err());
    }

    #[test]
    fn bilinear_hits_pixel_centres_exactly() {
        let img = Image::from_fn(4, 3, 1, |x, y, _| (10 * x + 50 * y) as u8);
        let v = img.view();
        assert_eq!(sample_bilinear(&v, 2.0, 1.0, 0), 70.0);
        assert_eq!(sample_bilinear(&v, 1.5, 0.0, 0), 15.0);
        assert_eq!(sample_bilinear(&v, -3.0, 0.0, 0), 0.0);
    }

    #[test]
    fn luma_of_gray_rgb_is_identity() {
        let img = Image::from_fn(5, 2, 3, |x, _, _| (x * 40) as u8);
        let gray = img.view().to_gray().unwrap();
        assert_eq!(gray.channels, 1);
        assert_eq!(gray.data, vec![0, 40, 80, 120, 160, 0, 40, 80, 120, 160]);
    }

    #[test]
    fn centroid_of_rectangle() {
        let mask = Mask::from_fn(10, 10, |x, y| (2..=5).contains(&x) && (4..=6).contains(&y));
        let c = mask.centroid().unwrap();
        assert!((c.x - 3.5).abs() < 1e-12);
        assert!((c.y - 5.0).abs() < 1e-12);
        assert_eq!(mask.count(), 12);
        assert!(Mask::from_fn(4, 4, |_, _| false).centroid().is_none());
    }
}

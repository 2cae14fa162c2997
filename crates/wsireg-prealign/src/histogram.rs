use serde::{Deserialize, Serialize};
use wsireg_core::{Image, ImageView, Result};

#[cfg(feature = "tracing")]
use tracing::instrument;

const BINS: usize = 256;

/// Histogram matching settings used by the registration pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramParams {
    /// Run histogram matching before prealignment.
    pub enabled: bool,
    /// Width of the moving average applied to the lookup table.
    pub smoothing_kernel: Option<usize>,
    /// Pick the image to normalize by entropy instead of always normalizing
    /// the moving image to the fixed one.
    pub auto_direction: bool,
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self {
            enabled: true,
            smoothing_kernel: None,
            auto_direction: false,
        }
    }
}

/// Which image of a pair was remapped by [`match_histograms_auto`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistogramMatch {
    FirstToSecond,
    SecondToFirst,
}

fn histogram(img: &ImageView<'_>) -> [u64; BINS] {
    let mut hist = [0u64; BINS];
    for &v in img.data {
        hist[v as usize] += 1;
    }
    hist
}

fn cumulative(hist: &[u64; BINS]) -> [u64; BINS] {
    let mut cdf = [0u64; BINS];
    let mut acc = 0;
    for (c, &h) in cdf.iter_mut().zip(hist) {
        acc += h;
        *c = acc;
    }
    cdf
}

/// For every source intensity, the first reference intensity whose cumulative
/// probability reaches the source's cumulative probability.
fn build_lut(src: &[u64; BINS], reference: &[u64; BINS]) -> [f64; BINS] {
    let cdf_src = cumulative(src);
    let cdf_ref = cumulative(reference);
    let n_src = cdf_src[BINS - 1] as u128;
    let n_ref = cdf_ref[BINS - 1] as u128;

    let mut lut = [0.0; BINS];
    let mut j = 0usize;
    for (i, slot) in lut.iter_mut().enumerate() {
        // cdf_ref[j] / n_ref >= cdf_src[i] / n_src, compared without rounding
        let target = cdf_src[i] as u128 * n_ref;
        while j < BINS - 1 && (cdf_ref[j] as u128) * n_src < target {
            j += 1;
        }
        *slot = j as f64;
    }
    lut
}

/// Centred moving average; the window is truncated at both ends.
fn smooth_lut(lut: &[f64; BINS], kernel: usize) -> [f64; BINS] {
    let before = kernel / 2;
    let after = kernel - 1 - before;
    let mut out = [0.0; BINS];
    for (i, slot) in out.iter_mut().enumerate() {
        let lo = i.saturating_sub(before);
        let hi = (i + after).min(BINS - 1);
        let window = &lut[lo..=hi];
        *slot = window.iter().sum::<f64>() / window.len() as f64;
    }
    out
}

fn remap(img: &ImageView<'_>, reference: &ImageView<'_>, smoothing: Option<usize>) -> Image {
    let mut lut = build_lut(&histogram(img), &histogram(reference));
    if let Some(k) = smoothing.filter(|&k| k > 1) {
        lut = smooth_lut(&lut, k);
    }
    let table: Vec<u8> = lut
        .iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    Image {
        width: img.width,
        height: img.height,
        channels: 1,
        data: img.data.iter().map(|&v| table[v as usize]).collect(),
    }
}

fn check_inputs(a: &ImageView<'_>, b: &ImageView<'_>, smoothing: Option<usize>) -> Result<()> {
    a.ensure_gray()?;
    b.ensure_gray()?;
    if smoothing == Some(0) {
        return Err(wsireg_core::RegistrationError::invalid_parameter(
            "smoothing_kernel",
            "must be at least 1",
        ));
    }
    Ok(())
}

/// Remap the intensities of `image` so that its histogram follows
/// `reference`'s.
///
/// Returns `(normalized image, reference)`; the reference comes back
/// unmodified. Matching an image to itself without smoothing is the identity.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(image, reference), fields(width = image.width, height = image.height))
)]
pub fn match_histograms(
    image: &ImageView<'_>,
    reference: &ImageView<'_>,
    smoothing_kernel: Option<usize>,
) -> Result<(Image, Image)> {
    check_inputs(image, reference, smoothing_kernel)?;
    if image.data.is_empty() || reference.data.is_empty() {
        return Ok((image.to_owned_image(), reference.to_owned_image()));
    }
    Ok((
        remap(image, reference, smoothing_kernel),
        reference.to_owned_image(),
    ))
}

/// Shannon entropy (bits) of the 256-bin intensity histogram.
pub fn image_entropy(img: &ImageView<'_>) -> f64 {
    let n = img.data.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    histogram(img)
        .iter()
        .filter(|&&h| h > 0)
        .map(|&h| {
            let p = h as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// Match the lower-entropy image of the pair to the higher-entropy one.
///
/// Returns the pair in input order together with the direction taken; the
/// image that served as reference is unchanged.
pub fn match_histograms_auto(
    a: &ImageView<'_>,
    b: &ImageView<'_>,
    smoothing_kernel: Option<usize>,
) -> Result<(Image, Image, HistogramMatch)> {
    check_inputs(a, b, smoothing_kernel)?;
    if image_entropy(a) > image_entropy(b) {
        let (nb, na) = match_histograms(b, a, smoothing_kernel)?;
        Ok((na, nb, HistogramMatch::SecondToFirst))
    } else {
        let (na, nb) = match_histograms(a, b, smoothing_kernel)?;
        Ok((na, nb, HistogramMatch::FirstToSecond))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsireg_core::RegistrationError;

    #[rustfmt::skip]
    const IMAGE_A: [u8; 25] = [
        129, 134, 195, 241, 168,
        231, 91, 145, 91, 0,
        64, 87, 194, 112, 99,
        138, 111, 99, 124, 86,
        164, 127, 167, 222, 100,
    ];

    #[rustfmt::skip]
    const IMAGE_B: [u8; 25] = [
        25, 91, 177, 212, 114,
        62, 86, 83, 31, 17,
        13, 16, 191, 19, 149,
        58, 127, 22, 111, 255,
        164, 7, 110, 76, 222,
    ];

    #[rustfmt::skip]
    const EXPECTED: [u8; 25] = [
        91, 110, 191, 255, 164,
        222, 22, 114, 22, 7,
        13, 17, 177, 76, 31,
        111, 62, 31, 83, 16,
        127, 86, 149, 212, 58,
    ];

    fn gray(data: &[u8]) -> ImageView<'_> {
        ImageView::new(5, 5, 1, data).unwrap()
    }

    #[test]
    fn maps_onto_reference_distribution() {
        let (a, b) = match_histograms(&gray(&IMAGE_A), &gray(&IMAGE_B), None).unwrap();
        assert_eq!(a.data, EXPECTED);
        assert_eq!(b.data, IMAGE_B);
    }

    #[test]
    fn auto_direction_normalizes_lower_entropy_image() {
        let (a, b, dir) = match_histograms_auto(&gray(&IMAGE_A), &gray(&IMAGE_B), None).unwrap();
        assert_eq!(dir, HistogramMatch::FirstToSecond);
        assert_eq!(a.data, EXPECTED);
        assert_eq!(b.data, IMAGE_B);
    }

    #[test]
    fn self_match_is_identity() {
        let data: Vec<u8> = (0..64 * 64).map(|i| ((i * 37) % 251) as u8).collect();
        let img = Image::gray(64, 64, data.clone()).unwrap();
        let (a, b) = match_histograms(&img.view(), &img.view(), None).unwrap();
        assert_eq!(a.data, data);
        assert_eq!(b.data, data);
    }

    #[test]
    fn smoothing_keeps_monotone_mapping() {
        let a: Vec<u8> = (0..=255).collect();
        let b: Vec<u8> = (0..=255).map(|v: u8| v / 2).collect();
        let ia = ImageView::new(16, 16, 1, &a).unwrap();
        let ib = ImageView::new(16, 16, 1, &b).unwrap();
        let (out, _) = match_histograms(&ia, &ib, Some(3)).unwrap();
        assert!(out.data.windows(2).all(|w| w[0] <= w[1]));
        assert!(out.data[255] <= 127);
    }

    #[test]
    fn rejects_colour_input() {
        let rgb = vec![0u8; 4 * 4 * 3];
        let g = vec![0u8; 16];
        let err = match_histograms(
            &ImageView::new(4, 4, 3, &rgb).unwrap(),
            &ImageView::new(4, 4, 1, &g).unwrap(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidImageFormat(_)));
    }
}

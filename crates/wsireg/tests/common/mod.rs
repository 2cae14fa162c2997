#![allow(dead_code)]

use wsireg::core::{Image, ImageView, Mask, Result};
use wsireg::features::{FeatureBackbone, FeatureMap, FeaturePyramid, StageFeatures};

pub const SIZE: usize = 64;

/// Deterministic byte per `(seed, x, y, c)`.
pub fn noise(seed: u64, x: usize, y: usize, c: usize) -> u8 {
    let mut z = seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(((c as u64) << 40) ^ ((y as u64) << 20) ^ x as u64);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 56) as u8
}

pub fn texture(seed: u64) -> Image {
    Image::from_fn(SIZE, SIZE, 3, |x, y, c| noise(seed, x, y, c))
}

/// `img` moved `shift` pixels down and right; the uncovered band is unrelated
/// texture.
pub fn shifted(img: &Image, shift: usize) -> Image {
    Image::from_fn(SIZE, SIZE, 3, |x, y, c| {
        if x >= shift && y >= shift {
            img.view().get(x - shift, y - shift, c)
        } else {
            noise(999, x, y, c)
        }
    })
}

/// `img` rotated by a quarter turn: `out(x, y) = img(SIZE - 1 - y, x)`.
pub fn quarter_turn(img: &Image) -> Image {
    Image::from_fn(SIZE, SIZE, img.channels, |x, y, c| {
        img.view().get(SIZE - 1 - y, x, c)
    })
}

pub fn quarter_turn_mask(mask: &Mask) -> Mask {
    Mask::from_fn(SIZE, SIZE, |x, y| mask.get(SIZE - 1 - y, x))
}

pub fn l_mask() -> Mask {
    Mask::from_fn(SIZE, SIZE, |x, y| {
        let stem = (10..22).contains(&x) && (8..52).contains(&y);
        let foot = (10..50).contains(&x) && (40..52).contains(&y);
        stem || foot
    })
}

/// Test double for the network: every cell's descriptor is the centred raw
/// RGB block it covers, at downsampling 16, 8 and 4.
pub struct BlockBackbone;

impl BlockBackbone {
    fn blocks(img: &ImageView<'_>, d: usize) -> FeatureMap {
        FeatureMap::from_fn(3 * d * d, img.height / d, img.width / d, |ch, y, x| {
            let c = ch / (d * d);
            let dy = (ch / d) % d;
            let dx = ch % d;
            img.get(x * d + dx, y * d + dy, c) as f32 - 127.5
        })
    }
}

impl FeatureBackbone for BlockBackbone {
    fn forward(&self, batch: [&ImageView<'_>; 2]) -> Result<FeaturePyramid> {
        let stages = [16, 8, 4]
            .into_iter()
            .map(|d| StageFeatures::new(Self::blocks(batch[0], d), Self::blocks(batch[1], d), d))
            .collect::<Result<Vec<_>>>()?;
        FeaturePyramid::from_stages(stages)
    }
}

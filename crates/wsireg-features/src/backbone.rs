use crate::pyramid::{FeatureMap, FeaturePyramid, StageFeatures};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use wsireg_core::{ImageView, RegistrationError, Result};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Frozen feature network.
///
/// Implementations run inference only: `forward` takes `&self`, so one loaded
/// backbone can serve concurrent registration calls.
pub trait FeatureBackbone: Send + Sync {
    /// One forward pass over the batch `[fixed, moving]` (two RGB images of
    /// identical shape), returning activations at three depths.
    fn forward(&self, batch: [&ImageView<'_>; 2]) -> Result<FeaturePyramid>;
}

#[derive(thiserror::Error, Debug)]
pub enum BackboneLoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("inconsistent backbone weights: {0}")]
    Invalid(String),
}

/// 3x3 convolution (stride 1, zero padding 1) followed by ReLU.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvLayer {
    pub in_channels: usize,
    pub out_channels: usize,
    /// `out_channels x in_channels x 3 x 3`, row-major.
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Convolution layers followed by 2x2 max pooling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvBlock {
    pub layers: Vec<ConvLayer>,
}

/// Serialized network description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvBackboneWeights {
    /// Per-channel mean subtracted from inputs scaled to `[0, 1]`.
    pub input_mean: [f32; 3],
    /// Per-channel divisor applied after mean subtraction.
    pub input_std: [f32; 3],
    pub blocks: Vec<ConvBlock>,
}

/// VGG-style network: a stack of conv blocks, each halving the resolution.
/// The pooled outputs of the last three blocks form the pyramid, the deepest
/// one being the coarse stage.
#[derive(Clone, Debug)]
pub struct ConvBackbone {
    weights: ConvBackboneWeights,
}

impl ConvBackbone {
    pub fn new(weights: ConvBackboneWeights) -> Result<Self, BackboneLoadError> {
        if weights.blocks.len() < 3 {
            return Err(BackboneLoadError::Invalid(format!(
                "need at least 3 blocks, got {}",
                weights.blocks.len()
            )));
        }
        if weights.input_std.iter().any(|&s| s == 0.0 || !s.is_finite()) {
            return Err(BackboneLoadError::Invalid(
                "input_std entries must be finite and non-zero".to_string(),
            ));
        }
        let mut channels = 3;
        for (b, block) in weights.blocks.iter().enumerate() {
            if block.layers.is_empty() {
                return Err(BackboneLoadError::Invalid(format!("block {b} has no layers")));
            }
            for (l, layer) in block.layers.iter().enumerate() {
                if layer.in_channels != channels {
                    return Err(BackboneLoadError::Invalid(format!(
                        "block {b} layer {l} expects {} input channels, previous layer yields {channels}",
                        layer.in_channels
                    )));
                }
                if layer.weights.len() != layer.out_channels * layer.in_channels * 9
                    || layer.bias.len() != layer.out_channels
                {
                    return Err(BackboneLoadError::Invalid(format!(
                        "block {b} layer {l} has {} weights and {} biases for {}->{} channels",
                        layer.weights.len(),
                        layer.bias.len(),
                        layer.in_channels,
                        layer.out_channels
                    )));
                }
                channels = layer.out_channels;
            }
        }
        Ok(Self { weights })
    }

    /// Load a JSON weight file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, BackboneLoadError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, BackboneLoadError> {
        Self::new(serde_json::from_str(raw)?)
    }

    pub fn weights(&self) -> &ConvBackboneWeights {
        &self.weights
    }

    /// Input pixels per cell of the coarse stage.
    pub fn total_downsample(&self) -> usize {
        1 << self.weights.blocks.len()
    }

    fn normalize_input(&self, img: &ImageView<'_>) -> FeatureMap {
        let ConvBackboneWeights {
            input_mean,
            input_std,
            ..
        } = &self.weights;
        FeatureMap::from_fn(3, img.height, img.width, |c, y, x| {
            (img.get(x, y, c) as f32 / 255.0 - input_mean[c]) / input_std[c]
        })
    }

    /// Outputs of the last three blocks, shallowest first.
    fn run_single(&self, img: &ImageView<'_>) -> Vec<FeatureMap> {
        let n_blocks = self.weights.blocks.len();
        let mut x = self.normalize_input(img);
        let mut taps = Vec::with_capacity(3);
        for (b, block) in self.weights.blocks.iter().enumerate() {
            for layer in &block.layers {
                x = conv3x3_relu(&x, layer);
            }
            x = max_pool2(&x);
            if b + 3 >= n_blocks {
                taps.push(x.clone());
            }
        }
        taps
    }
}

impl FeatureBackbone for ConvBackbone {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, batch), fields(width = batch[0].width, height = batch[0].height))
    )]
    fn forward(&self, batch: [&ImageView<'_>; 2]) -> Result<FeaturePyramid> {
        let needed = self.total_downsample();
        for img in batch {
            img.ensure_rgb()?;
            if img.width < needed || img.height < needed {
                return Err(RegistrationError::InvalidImageFormat(format!(
                    "images must be at least {needed}x{needed} pixels for this backbone, got {}x{}",
                    img.width, img.height
                )));
            }
        }

        let fixed = self.run_single(batch[0]);
        let moving = self.run_single(batch[1]);
        let n_blocks = self.weights.blocks.len();

        let mut stages = fixed
            .into_iter()
            .zip(moving)
            .enumerate()
            .map(|(k, (f, m))| {
                let depth = n_blocks - 3 + k + 1;
                StageFeatures::new(f, m, 1 << depth)
            })
            .collect::<Result<Vec<_>>>()?;
        stages.reverse();
        FeaturePyramid::from_stages(stages)
    }
}

fn conv3x3_relu(input: &FeatureMap, layer: &ConvLayer) -> FeatureMap {
    let (c_in, h, w) = input.shape();
    let n = h * w;
    let mut out = vec![0.0f32; layer.out_channels * n];

    for (o, plane) in out.chunks_exact_mut(n.max(1)).enumerate().take(layer.out_channels) {
        plane.fill(layer.bias[o]);
        for i in 0..c_in {
            let src = input.plane(i);
            let kernel = &layer.weights[(o * c_in + i) * 9..(o * c_in + i + 1) * 9];
            for (k, &wv) in kernel.iter().enumerate() {
                if wv == 0.0 {
                    continue;
                }
                let dy = (k / 3) as isize - 1;
                let dx = (k % 3) as isize - 1;
                let y_lo = (-dy).max(0) as usize;
                let y_hi = (h as isize - dy).min(h as isize).max(0) as usize;
                let x_lo = (-dx).max(0) as usize;
                let x_hi = (w as isize - dx).min(w as isize).max(0) as usize;
                for y in y_lo..y_hi {
                    let sy = (y as isize + dy) as usize;
                    let src_row = &src[sy * w..(sy + 1) * w];
                    let dst_row = &mut plane[y * w..(y + 1) * w];
                    for x in x_lo..x_hi {
                        dst_row[x] += wv * src_row[(x as isize + dx) as usize];
                    }
                }
            }
        }
        for v in plane.iter_mut() {
            *v = v.max(0.0);
        }
    }

    FeatureMap {
        channels: layer.out_channels,
        height: h,
        width: w,
        data: out,
    }
}

fn max_pool2(input: &FeatureMap) -> FeatureMap {
    let (c, h, w) = input.shape();
    let (oh, ow) = (h / 2, w / 2);
    FeatureMap::from_fn(c, oh, ow, |ch, y, x| {
        let a = input.at(ch, 2 * y, 2 * x);
        let b = input.at(ch, 2 * y, 2 * x + 1);
        let d = input.at(ch, 2 * y + 1, 2 * x);
        let e = input.at(ch, 2 * y + 1, 2 * x + 1);
        a.max(b).max(d).max(e)
    })
}

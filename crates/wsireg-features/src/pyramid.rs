use serde::{Deserialize, Serialize};
use wsireg_core::{RegistrationError, Result};

/// Dense activation map, channel-major (`channels x height x width`).
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMap {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl FeatureMap {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != channels * height * width {
            return Err(RegistrationError::invalid_parameter(
                "feature_map",
                format!(
                    "{} values do not fit {channels}x{height}x{width}",
                    data.len()
                ),
            ));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    /// Build a map by evaluating `f(c, y, x)`.
    pub fn from_fn(
        channels: usize,
        height: usize,
        width: usize,
        f: impl Fn(usize, usize, usize) -> f32,
    ) -> Self {
        let mut data = Vec::with_capacity(channels * height * width);
        for c in 0..channels {
            for y in 0..height {
                for x in 0..width {
                    data.push(f(c, y, x));
                }
            }
        }
        Self {
            channels,
            height,
            width,
            data,
        }
    }

    /// `(channels, height, width)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    #[inline]
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    #[inline]
    pub fn plane(&self, c: usize) -> &[f32] {
        let n = self.height * self.width;
        &self.data[c * n..(c + 1) * n]
    }

    /// Mean absolute difference to a map of the same shape.
    pub fn mean_abs_diff(&self, other: &FeatureMap) -> Option<f32> {
        if self.shape() != other.shape() || self.data.is_empty() {
            return None;
        }
        let sum: f64 = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs() as f64)
            .sum();
        Some((sum / self.data.len() as f64) as f32)
    }
}

/// Position of a stage inside the pyramid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Coarse,
    Mid,
    Fine,
}

/// Activations of one network depth for both images of the batch.
#[derive(Clone, Debug, PartialEq)]
pub struct StageFeatures {
    /// Batch entry 0.
    pub fixed: FeatureMap,
    /// Batch entry 1.
    pub moving: FeatureMap,
    /// Input pixels per feature cell along each axis.
    pub downsample: usize,
}

impl StageFeatures {
    pub fn new(fixed: FeatureMap, moving: FeatureMap, downsample: usize) -> Result<Self> {
        if fixed.shape() != moving.shape() {
            return Err(RegistrationError::FeatureStageMismatch(format!(
                "fixed activations {:?} and moving activations {:?} differ in shape",
                fixed.shape(),
                moving.shape()
            )));
        }
        if downsample == 0 {
            return Err(RegistrationError::FeatureStageMismatch(
                "downsampling factor must be positive".to_string(),
            ));
        }
        Ok(Self {
            fixed,
            moving,
            downsample,
        })
    }

    /// Batch entry `i` (0 = fixed, 1 = moving).
    pub fn batch(&self, i: usize) -> Option<&FeatureMap> {
        match i {
            0 => Some(&self.fixed),
            1 => Some(&self.moving),
            _ => None,
        }
    }
}

/// Exactly three stages, coarse to fine. Each coarser downsampling factor is
/// a strict multiple of the next finer one.
#[derive(Clone, Debug, PartialEq)]
pub struct FeaturePyramid {
    coarse: StageFeatures,
    mid: StageFeatures,
    fine: StageFeatures,
}

impl FeaturePyramid {
    pub fn new(coarse: StageFeatures, mid: StageFeatures, fine: StageFeatures) -> Result<Self> {
        for (outer, inner, label) in [(&coarse, &mid, "coarse/mid"), (&mid, &fine, "mid/fine")] {
            if outer.downsample <= inner.downsample || outer.downsample % inner.downsample != 0 {
                return Err(RegistrationError::FeatureStageMismatch(format!(
                    "{label} downsampling {} / {} is not a coarse-to-fine integer ratio",
                    outer.downsample, inner.downsample
                )));
            }
        }
        Ok(Self { coarse, mid, fine })
    }

    /// Build from an ordered list of stages (coarse first).
    pub fn from_stages(stages: Vec<StageFeatures>) -> Result<Self> {
        let found = stages.len();
        let Ok([coarse, mid, fine]) = <[StageFeatures; 3]>::try_from(stages) else {
            return Err(RegistrationError::FeatureStageMismatch(format!(
                "the feature mapping step expects 3 blocks of features, got {found}"
            )));
        };
        Self::new(coarse, mid, fine)
    }

    pub fn stage(&self, kind: StageKind) -> &StageFeatures {
        match kind {
            StageKind::Coarse => &self.coarse,
            StageKind::Mid => &self.mid,
            StageKind::Fine => &self.fine,
        }
    }

    /// Stages in coarse-to-fine order.
    pub fn stages(&self) -> [(StageKind, &StageFeatures); 3] {
        [
            (StageKind::Coarse, &self.coarse),
            (StageKind::Mid, &self.mid),
            (StageKind::Fine, &self.fine),
        ]
    }
}

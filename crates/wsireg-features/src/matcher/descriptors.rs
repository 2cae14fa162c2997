use crate::pyramid::FeatureMap;

/// Per-cell unit-length descriptors, cell-major (`height x width x channels`).
pub(crate) struct Descriptors {
    pub height: usize,
    pub width: usize,
    channels: usize,
    data: Vec<f32>,
}

impl Descriptors {
    pub fn from_map(map: &FeatureMap) -> Self {
        let (channels, height, width) = map.shape();
        let mut data = vec![0.0f32; channels * height * width];
        for c in 0..channels {
            for (idx, &v) in map.plane(c).iter().enumerate() {
                data[idx * channels + c] = v;
            }
        }
        if channels > 0 {
            for cell in data.chunks_exact_mut(channels) {
                let norm = cell.iter().map(|v| v * v).sum::<f32>().sqrt();
                // all-zero cells stay zero and score 0 against everything
                if norm > f32::EPSILON {
                    cell.iter_mut().for_each(|v| *v /= norm);
                }
            }
        }
        Self {
            height,
            width,
            channels,
            data,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.height * self.width
    }

    #[inline]
    pub fn cell(&self, idx: usize) -> &[f32] {
        &self.data[idx * self.channels..(idx + 1) * self.channels]
    }

    #[inline]
    pub fn at(&self, y: usize, x: usize) -> &[f32] {
        self.cell(y * self.width + x)
    }
}

#[inline]
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

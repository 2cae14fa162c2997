//! Preprocessing and coarse alignment for slide pairs.
//!
//! - histogram matching of grayscale images (stain/contrast normalization),
//! - Dice overlap of tissue masks under an affine transform,
//! - exhaustive rotation search around the mask centroids.

mod dice;
mod histogram;
mod prealign;

pub use dice::{dice_coefficient, dice_under_transform, warp_mask_nearest};
pub use histogram::{
    image_entropy, match_histograms, match_histograms_auto, HistogramMatch, HistogramParams,
};
pub use prealign::{prealign, PrealignParams, PrealignResult, ShortfallPolicy};

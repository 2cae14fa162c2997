//! Deep-feature registration stages.
//!
//! A frozen convolutional backbone turns the (fixed, moving) pair into a
//! three-stage [`FeaturePyramid`]; [`match_features`] searches the coarse
//! stage globally and then refines every correspondence locally down to the
//! finest stage.
//!
//! The backbone is an immutable resource: load it once, wrap it in an `Arc`
//! and pass `&dyn FeatureBackbone` to [`extract_features`] from as many
//! registration calls as needed.

mod backbone;
mod extract;
mod matcher;
mod pyramid;

pub use backbone::{
    BackboneLoadError, ConvBackbone, ConvBackboneWeights, ConvBlock, ConvLayer, FeatureBackbone,
};
pub use extract::extract_features;
pub use matcher::{match_feature_stages, match_features, MatchParams, MatchedPoints};
pub use pyramid::{FeatureMap, FeaturePyramid, StageFeatures, StageKind};

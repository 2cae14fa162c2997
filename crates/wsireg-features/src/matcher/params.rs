use serde::{Deserialize, Serialize};
use wsireg_core::{RegistrationError, Result};

/// Coarse-to-fine matcher configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Minimum cosine similarity a correspondence must reach at every stage.
    pub min_similarity: f32,
    /// Required gap between the best coarse score and the best score outside
    /// `exclusion_radius` cells of it.
    pub min_margin: f32,
    /// Chebyshev radius (coarse cells) around the best match ignored when
    /// looking for the runner-up.
    pub exclusion_radius: usize,
    /// Keep a coarse match only if the fixed cell is also the best partner of
    /// its moving cell.
    pub mutual_check: bool,
    /// Keep at most this many coarse matches, highest margin first.
    pub max_coarse_matches: Option<usize>,
    /// Half-size (cells) of the local window searched at finer stages.
    pub search_radius: usize,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            min_similarity: 0.5,
            min_margin: 0.02,
            exclusion_radius: 1,
            mutual_check: true,
            max_coarse_matches: Some(256),
            search_radius: 2,
        }
    }
}

impl MatchParams {
    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.min_similarity) {
            return Err(RegistrationError::invalid_parameter(
                "min_similarity",
                format!("{} is outside [-1, 1]", self.min_similarity),
            ));
        }
        if self.min_margin.is_nan() || self.min_margin < 0.0 {
            return Err(RegistrationError::invalid_parameter(
                "min_margin",
                format!("{} must be non-negative", self.min_margin),
            ));
        }
        if self.max_coarse_matches == Some(0) {
            return Err(RegistrationError::invalid_parameter(
                "max_coarse_matches",
                "must keep at least one match",
            ));
        }
        Ok(())
    }
}

/// Errors returned by the registration stages.
///
/// Every variant is fatal to the call that produced it. The only non-fatal
/// condition in the pipeline (a prealignment that misses its dice target) is
/// reported as [`RegistrationError::DiceOverlapNotReached`] only when the
/// caller asks for strict behaviour.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("invalid image format: {0}")]
    InvalidImageFormat(String),

    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("the foreground is missing in the {0} mask")]
    MissingForeground(&'static str),

    #[error("expected 3 feature stages ordered coarse to fine: {0}")]
    FeatureStageMismatch(String),

    #[error("need at least 3 non-collinear point pairs (got {found})")]
    InsufficientCorrespondences { found: usize },

    #[error("best dice overlap {best:.4} is below the requested {target:.4}")]
    DiceOverlapNotReached { best: f64, target: f64 },
}

impl RegistrationError {
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = RegistrationError> = std::result::Result<T, E>;

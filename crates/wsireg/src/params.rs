use serde::{Deserialize, Serialize};
use wsireg_core::RansacParams;
use wsireg_features::MatchParams;
use wsireg_prealign::{HistogramParams, PrealignParams};

/// Settings for every stage of [`crate::Registrar`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    pub histogram: HistogramParams,
    pub prealign: PrealignParams,
    pub matching: MatchParams,
    pub ransac: RansacParams,
}

impl RegistrationParams {
    /// Check every stage's settings up front.
    pub fn validate(&self) -> wsireg_core::Result<()> {
        if self.histogram.smoothing_kernel == Some(0) {
            return Err(wsireg_core::RegistrationError::invalid_parameter(
                "smoothing_kernel",
                "kernel width must be positive",
            ));
        }
        self.prealign.validate()?;
        self.matching.validate()?;
        self.ransac.validate()
    }
}

//! JSON configuration and report helpers.

use crate::{params::RegistrationParams, Registrar, Registration};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use wsireg_core::AffineTransform;
use wsireg_features::{BackboneLoadError, ConvBackbone};
use wsireg_prealign::PrealignResult;

#[derive(thiserror::Error, Debug)]
pub enum ConfigIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Backbone(#[from] BackboneLoadError),
    #[error("config does not name backbone weights")]
    MissingBackbone,
}

/// Registration run configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// JSON weights for [`ConvBackbone`].
    #[serde(default)]
    pub backbone_weights: Option<String>,
    #[serde(default)]
    pub params: RegistrationParams,
    /// Where [`RegistrationConfig::write_report`] puts the report.
    #[serde(default)]
    pub report_path: Option<String>,
}

impl RegistrationConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Resolve the report path.
    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("wsireg_report.json"))
    }

    /// Write the report of `registration` to [`Self::report_path`].
    pub fn write_report(&self, registration: &Registration) -> Result<PathBuf, ConfigIoError> {
        let path = self.report_path();
        registration.report().write_json(&path)?;
        log::info!("registration report written to {}", path.display());
        Ok(path)
    }

    /// Load the configured backbone and wrap it in a [`Registrar`].
    pub fn build_registrar(&self) -> Result<Registrar, ConfigIoError> {
        let path = self
            .backbone_weights
            .as_ref()
            .ok_or(ConfigIoError::MissingBackbone)?;
        let backbone = ConvBackbone::load_json(path)?;
        log::info!(
            "loaded backbone from {path}: {} blocks",
            backbone.weights().blocks.len()
        );
        Ok(Registrar::new(Arc::new(backbone), self.params.clone()))
    }
}

/// Serializable summary of a [`Registration`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationReport {
    pub transform: AffineTransform,
    pub coarse: AffineTransform,
    pub refinement: AffineTransform,
    #[serde(default)]
    pub prealign: Option<PrealignResult>,
    pub matches: usize,
    pub inliers: usize,
    pub rms_residual: f64,
}

impl From<&Registration> for RegistrationReport {
    fn from(r: &Registration) -> Self {
        Self {
            transform: r.transform,
            coarse: r.coarse,
            refinement: r.refinement,
            prealign: r.prealign.clone(),
            matches: r.matches.len(),
            inliers: r.inlier_count(),
            rms_residual: r.rms_residual,
        }
    }
}

impl RegistrationReport {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Registration {
    pub fn report(&self) -> RegistrationReport {
        RegistrationReport::from(self)
    }
}

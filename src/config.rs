//! TOML configuration for the fitting pipeline.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```toml
//! [sphere]
//! radius = 0.085
//!
//! [fit]
//! max_iterations = 500
//!
//! [fit.initial_guess]
//! kind = "sphere_center"
//! ```

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::batch::BatchConfig;
use crate::epochs::EpochConfig;
use crate::error::Result;
use crate::fit::FitConfig;
use crate::phantom::SimulationConfig;
use crate::sphere::SphereModel;
use crate::whiten::WhitenerConfig;
use crate::Vec3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sphere: SphereConfig,
    #[serde(default)]
    pub whitening: WhitenerConfig,
    #[serde(default)]
    pub fit: FitConfig,
    #[serde(default)]
    pub epochs: EpochConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Spherical conductor in head coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphereConfig {
    #[serde(default = "SphereConfig::default_origin")]
    pub origin: [f64; 3],
    #[serde(default = "SphereConfig::default_radius")]
    pub radius: f64,
}

impl SphereConfig {
    fn default_origin() -> [f64; 3] {
        [0.0, 0.0, 0.0]
    }
    fn default_radius() -> f64 {
        0.08
    }
}

impl Default for SphereConfig {
    fn default() -> Self {
        Self {
            origin: Self::default_origin(),
            radius: Self::default_radius(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Latency of the fitted sample after each event (s)
    #[serde(default = "AnalysisConfig::default_t_peak")]
    pub t_peak: f64,
    /// Amplitude of the true phantom dipoles (nAm)
    #[serde(default = "AnalysisConfig::default_true_amplitude_nam")]
    pub true_amplitude_nam: f64,
    /// End of the noise covariance window (s), from the epoch start
    #[serde(default = "AnalysisConfig::default_covariance_tmax")]
    pub covariance_tmax: f64,
}

impl AnalysisConfig {
    fn default_t_peak() -> f64 {
        0.036
    }
    fn default_true_amplitude_nam() -> f64 {
        100.0
    }
    fn default_covariance_tmax() -> f64 {
        0.0
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            t_peak: Self::default_t_peak(),
            true_amplitude_nam: Self::default_true_amplitude_nam(),
            covariance_tmax: Self::default_covariance_tmax(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "BatchSettings::default_parallel")]
    pub parallel: bool,
}

impl BatchSettings {
    fn default_parallel() -> bool {
        true
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            parallel: Self::default_parallel(),
        }
    }
}

impl Config {
    /// Read a config file; unreadable or malformed files are errors
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Like [`Config::load`], but falls back to defaults with a warning
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("Failed to load config {}: {err}. Using defaults.", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn sphere_model(&self) -> Result<SphereModel> {
        SphereModel::new(Vec3::from(self.sphere.origin), self.sphere.radius)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            parallel: self.batch.parallel,
            whitening: self.whitening.clone(),
            fit: self.fit.clone(),
        }
    }
}

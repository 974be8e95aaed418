//! Error types for dipfit.

use thiserror::Error;

use crate::dipole::DipoleFit;

#[derive(Debug, Error)]
pub enum DipoleError {
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error(
        "Ill-conditioned covariance: smallest retained eigenvalue {smallest:.3e} \
         is below {tolerance:.1e} x largest ({largest:.3e})"
    )]
    IllConditionedCovariance {
        smallest: f64,
        largest: f64,
        tolerance: f64,
    },

    /// The simplex hit its iteration cap; `fit` is the best estimate found.
    #[error("Dipole fit did not converge after {iterations} iterations (gof {:.4})", .fit.dipole.gof())]
    DipoleFitDiverged {
        fit: Box<DipoleFit>,
        iterations: usize,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No data: {0}")]
    NoData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl DipoleError {
    /// Best-effort fit carried by a divergence report.
    pub fn best_effort(&self) -> Option<&DipoleFit> {
        match self {
            DipoleError::DipoleFitDiverged { fit, .. } => Some(fit),
            _ => None,
        }
    }

    /// Short machine-friendly label, used in CSV exports and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            DipoleError::DegenerateGeometry(_) => "degenerate_geometry",
            DipoleError::IllConditionedCovariance { .. } => "ill_conditioned_covariance",
            DipoleError::DipoleFitDiverged { .. } => "dipole_fit_diverged",
            DipoleError::DimensionMismatch(_) => "dimension_mismatch",
            DipoleError::InvalidInput(_) => "invalid_input",
            DipoleError::NoData(_) => "no_data",
            DipoleError::Io(_) => "io",
            DipoleError::Json(_) => "json",
            DipoleError::Csv(_) => "csv",
            DipoleError::Config(_) | DipoleError::ConfigSerialize(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, DipoleError>;

//! Noise covariance matrices and their empirical estimation from epochs.

use log::{debug, info};

use crate::epochs::Epochs;
use crate::error::{DipoleError, Result};
use crate::DMat;

/// Relative asymmetry tolerated before a matrix is rejected
const SYMMETRY_TOL: f64 = 1e-8;

/// Symmetric positive semi-definite noise covariance over channels
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    data: DMat,
    nfree: usize, // Number of samples the estimate is based on
}

impl CovarianceMatrix {
    /// Wrap a matrix, checking that it is square, finite and symmetric
    pub fn new(data: DMat, nfree: usize) -> Result<Self> {
        let (rows, cols) = data.shape();
        if rows != cols {
            return Err(DipoleError::DimensionMismatch(format!(
                "Covariance must be square, got {rows}x{cols}"
            )));
        }
        if rows == 0 {
            return Err(DipoleError::NoData("Empty covariance matrix".to_string()));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(DipoleError::InvalidInput(
                "Covariance has non-finite entries".to_string(),
            ));
        }
        let scale = data.amax();
        let asymmetry = (&data - data.transpose()).amax();
        if asymmetry > SYMMETRY_TOL * scale {
            return Err(DipoleError::InvalidInput(format!(
                "Covariance is not symmetric (max |C - Cᵀ| = {asymmetry:.3e})"
            )));
        }
        Ok(CovarianceMatrix { data, nfree })
    }

    /// Diagonal covariance from per-channel variances
    pub fn diagonal(variances: &[f64]) -> Result<Self> {
        let mut data = DMat::zeros(variances.len(), variances.len());
        for (i, v) in variances.iter().enumerate() {
            data[(i, i)] = *v;
        }
        Self::new(data, 0)
    }

    /// Same covariance multiplied by `factor` (e.g. 1/nave for an average)
    pub fn scaled(&self, factor: f64) -> Self {
        CovarianceMatrix {
            data: &self.data * factor,
            nfree: self.nfree,
        }
    }

    pub fn matrix(&self) -> &DMat {
        &self.data
    }

    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn nfree(&self) -> usize {
        self.nfree
    }
}

/// Empirical covariance `Σ x xᵀ / N` over the epoch samples inside
/// `[tmin, tmax]` (None = epoch start / end).
///
/// The data is assumed to be centred already (baseline corrected), so no
/// mean is removed.
pub fn estimate_covariance(
    epochs: &Epochs,
    tmin: Option<f64>,
    tmax: Option<f64>,
) -> Result<CovarianceMatrix> {
    if epochs.is_empty() {
        return Err(DipoleError::NoData(
            "No epochs to estimate the covariance from".to_string(),
        ));
    }
    let times = epochs.times();
    let lo = tmin.unwrap_or(f64::NEG_INFINITY);
    let hi = tmax.unwrap_or(f64::INFINITY);
    // Half-sample slack so window edges land on the intended samples
    let slack = 0.5 / epochs.sfreq();
    let window: Vec<usize> = times
        .iter()
        .enumerate()
        .filter(|(_, t)| **t >= lo - slack && **t <= hi + slack)
        .map(|(i, _)| i)
        .collect();
    if window.is_empty() {
        return Err(DipoleError::NoData(format!(
            "No samples between {lo} s and {hi} s for the covariance"
        )));
    }

    let n_ch = epochs.n_channels();
    let mut acc = DMat::zeros(n_ch, n_ch);
    let mut n_samples = 0usize;
    for epoch in epochs.data() {
        for &t in &window {
            let x = epoch.column(t);
            acc.ger(1.0, &x, &x, 1.0);
            n_samples += 1;
        }
    }
    acc /= n_samples as f64;

    debug!(
        "Covariance window {} samples per epoch ({:.3} to {:.3} s)",
        window.len(),
        times[window[0]],
        times[window[window.len() - 1]]
    );
    info!(
        "Estimated {n_ch}x{n_ch} noise covariance from {} epochs ({n_samples} samples)",
        epochs.len()
    );
    CovarianceMatrix::new(acc, n_samples)
}

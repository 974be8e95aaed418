//! Noise whitening from a covariance matrix.
//!
//! The covariance `C = V Λ Vᵀ` is eigen-decomposed once; the whitener keeps
//! the `k` largest components and maps a measurement `x` to
//! `Λ_k^{-1/2} V_kᵀ x`. On the retained subspace whitened noise has
//! identity covariance, which puts magnetometers and gradiometers on a common
//! scale.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::covariance::CovarianceMatrix;
use crate::error::{DipoleError, Result};
use crate::{DMat, DVec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitenerConfig {
    /// Number of components to keep (None = all channels)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    /// Smallest retained eigenvalue relative to the largest
    #[serde(default = "WhitenerConfig::default_condition_tol")]
    pub condition_tol: f64,
}

impl WhitenerConfig {
    fn default_condition_tol() -> f64 {
        1e-10
    }
}

impl Default for WhitenerConfig {
    fn default() -> Self {
        Self {
            rank: None,
            condition_tol: Self::default_condition_tol(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Whitener {
    operator: DMat,        // rank x n_channels, Λ^{-1/2} Vᵀ
    inverse: DMat,         // n_channels x rank, V Λ^{1/2}
    eigenvalues: Vec<f64>, // Retained, descending
}

impl Whitener {
    pub fn new(cov: &CovarianceMatrix, config: &WhitenerConfig) -> Result<Self> {
        if !config.condition_tol.is_finite() || config.condition_tol < 0.0 {
            return Err(DipoleError::InvalidInput(format!(
                "whitening.condition_tol must be finite and non-negative, got {}",
                config.condition_tol
            )));
        }
        let n = cov.n_channels();
        let rank = config.rank.unwrap_or(n);
        if rank == 0 || rank > n {
            return Err(DipoleError::InvalidInput(format!(
                "Whitening rank {rank} outside 1..={n}"
            )));
        }

        let eig = cov.matrix().clone().symmetric_eigen();

        // Sort by eigenvalue, largest first
        let mut indexed: Vec<(usize, f64)> = eig.eigenvalues.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
        let kept = &indexed[..rank];

        let largest = kept[0].1;
        let smallest = kept[rank - 1].1;
        if !(largest > 0.0) || !(smallest > 0.0) || smallest < config.condition_tol * largest {
            return Err(DipoleError::IllConditionedCovariance {
                smallest,
                largest,
                tolerance: config.condition_tol,
            });
        }

        let mut operator = DMat::zeros(rank, n);
        let mut inverse = DMat::zeros(n, rank);
        for (row, &(idx, lambda)) in kept.iter().enumerate() {
            let v = eig.eigenvectors.column(idx);
            let s = lambda.sqrt();
            operator.row_mut(row).copy_from(&(v.transpose() / s));
            inverse.column_mut(row).copy_from(&(v * s));
        }

        debug!(
            "Whitener: rank {rank}/{n}, eigenvalues {largest:.3e} .. {smallest:.3e}"
        );

        Ok(Whitener {
            operator,
            inverse,
            eigenvalues: kept.iter().map(|&(_, e)| e).collect(),
        })
    }

    pub fn rank(&self) -> usize {
        self.operator.nrows()
    }

    pub fn n_channels(&self) -> usize {
        self.operator.ncols()
    }

    /// Retained eigenvalues, largest first
    pub fn eigenvalues(&self) -> &[f64] {
        &self.eigenvalues
    }

    /// The `rank x n_channels` whitening operator
    pub fn operator(&self) -> &DMat {
        &self.operator
    }

    pub fn whiten(&self, x: &DVec) -> Result<DVec> {
        if x.len() != self.n_channels() {
            return Err(DipoleError::DimensionMismatch(format!(
                "Whitener expects {} channels, got {}",
                self.n_channels(),
                x.len()
            )));
        }
        Ok(&self.operator * x)
    }

    /// Map whitened coordinates back to sensor space
    pub fn unwhiten(&self, y: &DVec) -> Result<DVec> {
        if y.len() != self.rank() {
            return Err(DipoleError::DimensionMismatch(format!(
                "Whitened vector has {} components, whitener rank is {}",
                y.len(),
                self.rank()
            )));
        }
        Ok(&self.inverse * y)
    }

    /// Whiten every column of a sensor-space matrix (e.g. a lead field)
    pub fn whiten_matrix(&self, m: &DMat) -> Result<DMat> {
        if m.nrows() != self.n_channels() {
            return Err(DipoleError::DimensionMismatch(format!(
                "Whitener expects {} rows, got {}",
                self.n_channels(),
                m.nrows()
            )));
        }
        Ok(&self.operator * m)
    }
}

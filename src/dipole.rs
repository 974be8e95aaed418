//! Equivalent current dipoles and fit results.

use crate::constants::NAM_PER_AM;
use crate::error::{DipoleError, Result};
use crate::{DVec, Vec3};

/// A point current source
///
/// The orientation is always unit length. Flipping the orientation and
/// negating the amplitude describes the same physical source; compare
/// dipoles through [`Dipole::moment`] or [`Dipole::is_equivalent`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dipole {
    position: Vec3,    // Head coordinates (m)
    orientation: Vec3, // Unit vector
    amplitude: f64,    // nAm
    gof: f64,          // Goodness of fit in [0, 1]
    time: f64,         // Seconds relative to the event
}

impl Dipole {
    /// Create a dipole, normalizing `orientation`
    pub fn new(position: Vec3, orientation: Vec3, amplitude: f64, gof: f64, time: f64) -> Result<Self> {
        if position.iter().any(|v| !v.is_finite()) {
            return Err(DipoleError::InvalidInput(
                "Dipole position has non-finite coordinates".to_string(),
            ));
        }
        let norm = orientation.norm();
        if !norm.is_finite() || norm < 1e-12 {
            return Err(DipoleError::InvalidInput(
                "Dipole orientation must be a non-zero finite vector".to_string(),
            ));
        }
        if !amplitude.is_finite() {
            return Err(DipoleError::InvalidInput(format!(
                "Dipole amplitude must be finite, got {amplitude}"
            )));
        }
        if !(0.0..=1.0).contains(&gof) {
            return Err(DipoleError::InvalidInput(format!(
                "Goodness of fit must lie in [0, 1], got {gof}"
            )));
        }
        Ok(Dipole {
            position,
            orientation: orientation / norm,
            amplitude,
            gof,
            time,
        })
    }

    /// Build from a moment vector in A·m. A zero moment gets amplitude 0
    /// and the +x orientation.
    pub(crate) fn from_moment(position: Vec3, moment: &Vec3, gof: f64, time: f64) -> Self {
        let norm = moment.norm();
        let orientation = if norm > 0.0 { moment / norm } else { Vec3::x() };
        Dipole {
            position,
            orientation,
            amplitude: norm * NAM_PER_AM,
            gof: gof.clamp(0.0, 1.0),
            time,
        }
    }

    pub fn position(&self) -> &Vec3 {
        &self.position
    }

    pub fn orientation(&self) -> &Vec3 {
        &self.orientation
    }

    /// Amplitude in nAm
    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn gof(&self) -> f64 {
        self.gof
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Moment vector in A·m (polarity independent)
    pub fn moment(&self) -> Vec3 {
        self.orientation * (self.amplitude / NAM_PER_AM)
    }

    /// Same source with opposite orientation and negated amplitude
    pub fn flipped(&self) -> Self {
        Dipole {
            orientation: -self.orientation,
            amplitude: -self.amplitude,
            ..self.clone()
        }
    }

    /// Same position (within `pos_tol` m) and moment (within `moment_tol` nAm)
    pub fn is_equivalent(&self, other: &Dipole, pos_tol: f64, moment_tol: f64) -> bool {
        (self.position - other.position).norm() <= pos_tol
            && (self.moment() - other.moment()).norm() * NAM_PER_AM <= moment_tol
    }
}

/// Outcome of fitting one sample
#[derive(Debug, Clone)]
pub struct DipoleFit {
    pub dipole: Dipole,
    pub residual: DVec,         // Sensor-space residual (observed - predicted)
    pub residual_energy: f64,   // Whitened residual energy
    pub iterations: usize,      // Simplex iterations used
    pub converged: bool,
}

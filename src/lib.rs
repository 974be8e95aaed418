/*! Equivalent Current Dipole (ECD) fitting for MEG phantom recordings
 *
 * This crate localizes single current dipoles from MEG sensor data with a
 * spherical homogeneous conductor model, following the phantom validation
 * workflow of MNE-Python: epoch the recording around stimulus events,
 * average per condition, estimate the baseline noise covariance, fit one
 * dipole per condition and compare the fits to the known phantom sources.
 *
 * Reading the proprietary raw format and 3D rendering are out of scope; the
 * crate works on in-memory matrices and its own JSON/CSV documents.
 *
 * # Public API
 *
 * ## Core Functions
 * - [`forward::lead_field`]: Sarvas lead field of a dipole position
 * - [`Whitener::new`]: noise whitening from a covariance matrix
 * - [`fit::fit`]: single-dipole fit of one evoked sample
 * - [`batch::fit_all`]: independent fits over many samples
 * - [`compare::compare`]: fitted vs. true dipole errors
 * - [`pipeline::run`]: the whole epoch → covariance → fit → compare sequence
 *
 * ## Data Structures
 * - [`ChannelInfo`]: Channel descriptor (name, type, coil, location block)
 * - [`CoordTrans`]: Rigid transform between coordinate frames
 * - [`SensorArray`]: MEG coils in head coordinates
 * - [`SphereModel`]: Spherical conductor
 * - [`Dipole`] / [`DipoleFit`]: Fitted sources with residuals
 * - [`Recording`]: Geometry + continuous data + events
 *
 * ## Constants
 * Channel kinds, coil types and coordinate frames use the Neuromag/MNE
 * numbering and are re-exported from the [`constants`] module.
 */

// Submodules
pub mod batch;
pub mod compare;
pub mod config;
pub mod constants;
pub mod covariance;
pub mod dipole;
pub mod epochs;
pub mod error;
pub mod fit;
pub mod forward;
pub mod io;
pub mod phantom;
pub mod pipeline;
pub mod report;
pub mod sensors;
pub mod simplex;
pub mod sphere;
pub mod whiten;

// Re-exports: Public API
pub use batch::{fit_all, BatchConfig, BatchReport, CovarianceSource, SampleOutcome};
pub use compare::{compare, compare_outcomes, Comparison, ComparisonRow};
pub use config::Config;
pub use constants::*;
pub use covariance::{estimate_covariance, CovarianceMatrix};
pub use dipole::{Dipole, DipoleFit};
pub use epochs::{Baseline, EpochConfig, Epochs, Event, Evoked, EvokedSample, Raw};
pub use error::{DipoleError, Result};
pub use fit::{DipoleFitter, FitConfig, InitialGuess};
pub use io::Recording;
pub use phantom::{phantom_dipoles, simulate, SimulationConfig};
pub use pipeline::PipelineOutput;
pub use sensors::{Coil, IntegrationPoint, SensorArray};
pub use sphere::SphereModel;
pub use whiten::{Whitener, WhitenerConfig};

use nalgebra as na;
use serde::{Deserialize, Serialize};

/// 3D vector alias.
pub type Vec3 = na::Vector3<f64>;
/// 3x3 matrix alias.
pub type Mat3 = na::Matrix3<f64>;
/// Dynamic vector.
pub type DVec = na::DVector<f64>;
/// Dynamic matrix.
pub type DMat = na::DMatrix<f64>;

/// Coordinate Transformation
/// Transforms points between coordinate frames (device, head, MRI, etc.)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordTrans {
    pub from: i32,     // Source coordinate frame
    pub to: i32,       // Destination coordinate frame
    pub rot: [f64; 9], // 3x3 rotation matrix (row-major)
    #[serde(rename = "move")]
    pub move_: [f64; 3], // 3D translation vector (m)
}

impl CoordTrans {
    /// Identity transform between two frames
    pub fn identity(from: i32, to: i32) -> Self {
        CoordTrans {
            from,
            to,
            rot: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            move_: [0.0; 3],
        }
    }

    /// Pure translation between two frames
    pub fn translation(from: i32, to: i32, offset: Vec3) -> Self {
        CoordTrans {
            move_: [offset.x, offset.y, offset.z],
            ..Self::identity(from, to)
        }
    }

    pub fn rotation(&self) -> Mat3 {
        Mat3::from_row_slice(&self.rot)
    }

    pub fn offset(&self) -> Vec3 {
        Vec3::from_column_slice(&self.move_)
    }

    /// Map a point: `R p + t`
    pub fn apply_point(&self, p: &Vec3) -> Vec3 {
        self.rotation() * p + self.offset()
    }

    /// Map a direction: `R v` (no translation)
    pub fn apply_vector(&self, v: &Vec3) -> Vec3 {
        self.rotation() * v
    }

    /// Inverse transform (`to -> from`), assuming an orthonormal rotation
    pub fn inverse(&self) -> Self {
        let rt = self.rotation().transpose();
        let t = -(rt * self.offset());
        let mut rot = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                rot[r * 3 + c] = rt[(r, c)];
            }
        }
        CoordTrans {
            from: self.to,
            to: self.from,
            rot,
            move_: [t.x, t.y, t.z],
        }
    }

    /// Reject non-finite entries and rotations that are not orthonormal
    pub fn validate(&self) -> Result<()> {
        if self.rot.iter().chain(self.move_.iter()).any(|v| !v.is_finite()) {
            return Err(DipoleError::InvalidInput(format!(
                "Coordinate transform {} has non-finite entries",
                self.description()
            )));
        }
        let r = self.rotation();
        let deviation = (r.transpose() * r - Mat3::identity()).amax();
        if deviation > 1e-6 {
            return Err(DipoleError::InvalidInput(format!(
                "Coordinate transform {} is not a rotation (|RᵀR - I| = {:.2e})",
                self.description(),
                deviation
            )));
        }
        Ok(())
    }

    /// Get human-readable description of this transformation
    pub fn description(&self) -> String {
        format!(
            "{} -> {}",
            coord_frame_name(self.from),
            coord_frame_name(self.to)
        )
    }

    /// Check if this is a device-to-head transform
    pub fn is_device_to_head(&self) -> bool {
        self.from == FIFFV_COORD_DEVICE && self.to == FIFFV_COORD_HEAD
    }
}

/// Channel descriptor, mirroring the FIFF channel info record
///
/// `loc` holds the coil origin (`loc[0..3]`) followed by the local coil
/// axes `ex`, `ey`, `ez`, all in device coordinates (meters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub ch_name: String, // Channel name
    pub kind: i32,       // Channel type (MEG, EEG, etc.)
    #[serde(default)]
    pub coil_type: i32, // Coil/sensor type
    #[serde(default)]
    pub loc: [f64; 12], // Location/orientation
}

impl ChannelInfo {
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.loc[0], self.loc[1], self.loc[2])
    }

    pub fn ex(&self) -> Vec3 {
        Vec3::new(self.loc[3], self.loc[4], self.loc[5])
    }

    pub fn ey(&self) -> Vec3 {
        Vec3::new(self.loc[6], self.loc[7], self.loc[8])
    }

    /// Coil normal
    pub fn ez(&self) -> Vec3 {
        Vec3::new(self.loc[9], self.loc[10], self.loc[11])
    }

    /// Build the 12-float location block from a position and coil axes
    pub fn pack_loc(position: &Vec3, ex: &Vec3, ey: &Vec3, ez: &Vec3) -> [f64; 12] {
        let mut loc = [0.0; 12];
        for (block, v) in [position, ex, ey, ez].iter().enumerate() {
            loc[block * 3..block * 3 + 3].copy_from_slice(v.as_slice());
        }
        loc
    }

    /// Check if this is a data channel (not stimulus, etc.)
    pub fn is_data_channel(&self) -> bool {
        is_data_channel(self.kind)
    }

    pub fn is_meg(&self) -> bool {
        self.kind == FIFFV_MEG_CH
    }

    /// Get human-readable channel type name
    pub fn type_name(&self) -> &'static str {
        channel_type_name(self.kind)
    }
}

//! Forward model: magnetic lead field of a current dipole in a spherical conductor.
//!
//! Uses the closed-form Sarvas (1987) solution. With `a = r - r0`,
//! `F = |a| (|r| |a| + |r|² - r0·r)`, the field at `r` of a dipole `Q` at
//! `r0` (both relative to the sphere origin) is
//!
//! ```text
//! B(r) = μ0 / (4π F²) [F (Q × r0) - ((Q × r0)·r) ∇F]
//! ```
//!
//! The volume currents of the homogeneous sphere are fully accounted for, so
//! the conductivity drops out and radial dipoles are silent.

use crate::constants::{MU0_OVER_4PI, NAM_PER_AM};
use crate::dipole::Dipole;
use crate::error::{DipoleError, Result};
use crate::sensors::{IntegrationPoint, SensorArray};
use crate::sphere::SphereModel;
use crate::{DMat, DVec, Vec3};

/// Minimum dipole-to-integration-point distance (m)
pub const SENSOR_CLEARANCE: f64 = 1e-6;

/// Dipoles closer than this to the origin produce no external field
const ORIGIN_EPS: f64 = 1e-10;

/// Lead field of a dipole at `position`: one row per sensor, one column per
/// moment component (A·m → T or T/m).
pub fn lead_field(position: &Vec3, sphere: &SphereModel, sensors: &SensorArray) -> Result<DMat> {
    check_position(position, sphere)?;

    let r0 = sphere.relative(position);
    let mut g = DMat::zeros(sensors.len(), 3);
    if r0.norm() <= ORIGIN_EPS {
        return Ok(g);
    }

    for (row, coil) in sensors.coils().iter().enumerate() {
        if (coil.position - position).norm() < SENSOR_CLEARANCE {
            return Err(DipoleError::DegenerateGeometry(format!(
                "Dipole coincides with sensor {}",
                coil.name
            )));
        }
        let mut acc = Vec3::zeros();
        for point in &coil.points {
            acc += point_lead(&r0, point, sphere, &coil.name)?;
        }
        let acc = acc * MU0_OVER_4PI;
        g[(row, 0)] = acc.x;
        g[(row, 1)] = acc.y;
        g[(row, 2)] = acc.z;
    }
    Ok(g)
}

/// Predicted sensor measurement of a dipole (moment in nAm)
pub fn predict(dipole: &Dipole, sphere: &SphereModel, sensors: &SensorArray) -> Result<DVec> {
    let g = lead_field(dipole.position(), sphere, sensors)?;
    let q = dipole.orientation() * (dipole.amplitude() / NAM_PER_AM);
    Ok(g * q)
}

fn check_position(position: &Vec3, sphere: &SphereModel) -> Result<()> {
    if position.iter().any(|v| !v.is_finite()) {
        return Err(DipoleError::DegenerateGeometry(
            "Dipole position has non-finite coordinates".to_string(),
        ));
    }
    if !sphere.contains(position) {
        return Err(DipoleError::DegenerateGeometry(format!(
            "Dipole at {:.1} mm from the origin lies outside the {:.1} mm sphere",
            sphere.relative(position).norm() * 1e3,
            sphere.radius() * 1e3
        )));
    }
    Ok(())
}

/// Weighted contribution of one integration point, without the μ0/4π factor
fn point_lead(
    r0: &Vec3,
    point: &IntegrationPoint,
    sphere: &SphereModel,
    coil_name: &str,
) -> Result<Vec3> {
    let r = sphere.relative(&point.position);
    let a_vec = r - r0;
    let a = a_vec.norm();
    if a < SENSOR_CLEARANCE {
        return Err(DipoleError::DegenerateGeometry(format!(
            "Dipole coincides with sensor {coil_name}"
        )));
    }
    let rn = r.norm();

    let ar = rn * rn - r.dot(r0); // a_vec · r
    let ar0 = ar / a;
    let f = a * (rn * a + ar);
    if f.abs() < f64::MIN_POSITIVE {
        return Err(DipoleError::DegenerateGeometry(format!(
            "Sensor {coil_name} is not outside the conductor"
        )));
    }
    let gr = a * a / rn + ar0 + 2.0 * (a + rn);
    let g0 = a + 2.0 * rn + ar0;

    let re = r.dot(&point.normal);
    let r0e = r0.dot(&point.normal);
    let g = (g0 * r0e - gr * re) / (f * f);

    let v1 = r0.cross(&point.normal);
    let v2 = r0.cross(&r);
    Ok((v1 / f + v2 * g) * point.weight)
}

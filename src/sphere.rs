//! Spherical homogeneous conductor model.

use crate::error::{DipoleError, Result};
use crate::Vec3;

/// Sphere approximating the head conductor, in head coordinates (m)
#[derive(Debug, Clone, PartialEq)]
pub struct SphereModel {
    origin: Vec3,
    radius: f64,
}

impl SphereModel {
    pub fn new(origin: Vec3, radius: f64) -> Result<Self> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(DipoleError::DegenerateGeometry(format!(
                "Sphere radius must be positive and finite, got {radius}"
            )));
        }
        if origin.iter().any(|v| !v.is_finite()) {
            return Err(DipoleError::DegenerateGeometry(
                "Sphere origin has non-finite coordinates".to_string(),
            ));
        }
        Ok(SphereModel { origin, radius })
    }

    pub fn origin(&self) -> &Vec3 {
        &self.origin
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Position relative to the sphere origin
    pub fn relative(&self, p: &Vec3) -> Vec3 {
        p - self.origin
    }

    /// Strictly inside the conductor
    pub fn contains(&self, p: &Vec3) -> bool {
        self.relative(p).norm() < self.radius
    }

    /// Distance from `p` to the sphere surface (negative outside)
    pub fn depth(&self, p: &Vec3) -> f64 {
        self.radius - self.relative(p).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_rejects_bad_radius() {
        for r in [0.0, -0.08, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                SphereModel::new(Vec3::zeros(), r),
                Err(DipoleError::DegenerateGeometry(_))
            ));
        }
        assert!(SphereModel::new(Vec3::new(f64::NAN, 0.0, 0.0), 0.08).is_err());
    }

    #[test]
    fn test_contains_and_depth() {
        let sphere = SphereModel::new(Vec3::new(0.0, 0.0, 0.04), 0.08).unwrap();
        assert!(sphere.contains(&Vec3::new(0.0, 0.0, 0.1)));
        assert!(!sphere.contains(&Vec3::new(0.0, 0.0, 0.121)));
        assert!(!sphere.contains(&Vec3::new(0.0, 0.0, -0.05)));
        assert!((sphere.depth(&Vec3::new(0.0, 0.0, 0.04)) - 0.08).abs() < 1e-15);
        assert!(sphere.depth(&Vec3::new(0.1, 0.0, 0.04)) < 0.0);
    }

    #[test]
    fn test_surface_is_outside() {
        // Exactly representable values, so the boundary is hit exactly
        let sphere = SphereModel::new(Vec3::zeros(), 0.5).unwrap();
        assert!(!sphere.contains(&Vec3::new(0.0, 0.0, 0.5)));
        assert!(!sphere.contains(&Vec3::new(-0.5, 0.0, 0.0)));
        assert_eq!(sphere.depth(&Vec3::new(0.0, 0.5, 0.0)), 0.0);
        assert!(sphere.contains(&Vec3::new(0.0, 0.0, 0.25)));
    }
}

//! Single equivalent current dipole fitting.
//!
//! The fit is a separable least-squares problem. For any candidate position
//! the moment enters linearly, so it is solved in closed form from the SVD of
//! the whitened lead field; only the three position coordinates are searched,
//! with a Nelder-Mead simplex started from the best point of a coarse grid.
//!
//! In a sphere the radial moment component is silent. Its singular value is
//! therefore tiny and it is only included when it carries a meaningful share
//! of the lead field (`moment_rank_ratio`).

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::dipole::{Dipole, DipoleFit};
use crate::epochs::EvokedSample;
use crate::error::{DipoleError, Result};
use crate::forward::lead_field;
use crate::sensors::SensorArray;
use crate::simplex::{self, SimplexOptions};
use crate::sphere::SphereModel;
use crate::whiten::Whitener;
use crate::{DMat, DVec, Vec3};

/// Finest spacing (m) accepted for the initial-guess grid
pub const MIN_GRID_SPACING: f64 = 0.002;

/// Where the simplex starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitialGuess {
    SphereCenter,
    Fixed { position: [f64; 3] },
    /// Best point of a cubic grid centred on the sphere origin
    Grid { spacing: f64, exclude: f64 },
}

impl Default for InitialGuess {
    fn default() -> Self {
        InitialGuess::Grid {
            spacing: 0.02,
            exclude: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    #[serde(default)]
    pub initial_guess: InitialGuess,
    /// Minimum distance of the dipole from the sphere surface (m)
    #[serde(default = "FitConfig::default_min_dist")]
    pub min_dist: f64,
    #[serde(default = "FitConfig::default_initial_step")]
    pub initial_step: f64,
    #[serde(default = "FitConfig::default_xtol")]
    pub xtol: f64,
    /// Cost spread tolerance relative to the whitened data energy
    #[serde(default = "FitConfig::default_ftol")]
    pub ftol: f64,
    #[serde(default = "FitConfig::default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "FitConfig::default_moment_rank_ratio")]
    pub moment_rank_ratio: f64,
}

impl FitConfig {
    fn default_min_dist() -> f64 {
        0.005
    }
    fn default_initial_step() -> f64 {
        0.01
    }
    fn default_xtol() -> f64 {
        1e-7
    }
    fn default_ftol() -> f64 {
        1e-12
    }
    fn default_max_iterations() -> usize {
        2000
    }
    fn default_moment_rank_ratio() -> f64 {
        0.2
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("min_dist", self.min_dist, true),
            ("initial_step", self.initial_step, false),
            ("xtol", self.xtol, false),
            ("ftol", self.ftol, true),
        ];
        for (name, value, zero_ok) in positive {
            if !value.is_finite() || value < 0.0 || (!zero_ok && value == 0.0) {
                return Err(DipoleError::InvalidInput(format!(
                    "fit.{name} must be {}, got {value}",
                    if zero_ok { "non-negative" } else { "positive" }
                )));
            }
        }
        if self.max_iterations == 0 {
            return Err(DipoleError::InvalidInput(
                "fit.max_iterations must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.moment_rank_ratio) {
            return Err(DipoleError::InvalidInput(format!(
                "fit.moment_rank_ratio must lie in [0, 1], got {}",
                self.moment_rank_ratio
            )));
        }
        if let InitialGuess::Grid { spacing, exclude } = self.initial_guess {
            if !(spacing >= MIN_GRID_SPACING) || !spacing.is_finite() || !(exclude >= 0.0) {
                return Err(DipoleError::InvalidInput(format!(
                    "Grid guess needs spacing >= {MIN_GRID_SPACING} m and exclude >= 0, got {spacing} / {exclude}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            initial_guess: InitialGuess::default(),
            min_dist: Self::default_min_dist(),
            initial_step: Self::default_initial_step(),
            xtol: Self::default_xtol(),
            ftol: Self::default_ftol(),
            max_iterations: Self::default_max_iterations(),
            moment_rank_ratio: Self::default_moment_rank_ratio(),
        }
    }
}

/// Best moment at a fixed position
#[derive(Debug, Clone)]
struct MomentSolution {
    moment: Vec3,   // A·m
    explained: f64, // Whitened energy captured by the dipole
    cost: f64,      // Whitened residual energy
}

/// Fits dipoles to samples sharing one sensor array, sphere and whitener
pub struct DipoleFitter<'a> {
    sensors: &'a SensorArray,
    sphere: &'a SphereModel,
    whitener: &'a Whitener,
    config: &'a FitConfig,
}

impl<'a> DipoleFitter<'a> {
    pub fn new(
        sensors: &'a SensorArray,
        sphere: &'a SphereModel,
        whitener: &'a Whitener,
        config: &'a FitConfig,
    ) -> Result<Self> {
        config.validate()?;
        if whitener.n_channels() != sensors.len() {
            return Err(DipoleError::DimensionMismatch(format!(
                "Whitener covers {} channels, sensor array has {}",
                whitener.n_channels(),
                sensors.len()
            )));
        }
        if config.min_dist >= sphere.radius() {
            return Err(DipoleError::DegenerateGeometry(format!(
                "min_dist {:.1} mm leaves no room in a {:.1} mm sphere",
                config.min_dist * 1e3,
                sphere.radius() * 1e3
            )));
        }
        Ok(DipoleFitter {
            sensors,
            sphere,
            whitener,
            config,
        })
    }

    /// Fit one dipole to one averaged sample
    pub fn fit(&self, sample: &EvokedSample) -> Result<DipoleFit> {
        if sample.data.len() != self.sensors.len() {
            return Err(DipoleError::DimensionMismatch(format!(
                "Sample has {} values for {} sensors",
                sample.data.len(),
                self.sensors.len()
            )));
        }
        if sample.data.iter().any(|v| !v.is_finite()) {
            return Err(DipoleError::InvalidInput(
                "Sample contains non-finite values".to_string(),
            ));
        }

        let y_w = self.whitener.whiten(&sample.data)?;
        let energy = y_w.norm_squared();
        if energy == 0.0 {
            debug!("Condition {}: zero measurement, nothing to fit", sample.condition);
            return Ok(DipoleFit {
                dipole: Dipole::from_moment(*self.sphere.origin(), &Vec3::zeros(), 0.0, sample.time),
                residual: sample.data.clone(),
                residual_energy: 0.0,
                iterations: 0,
                converged: true,
            });
        }

        let start = self.initial_position(&y_w)?;
        debug!(
            "Condition {}: initial guess ({:.1}, {:.1}, {:.1}) mm",
            sample.condition,
            start.x * 1e3,
            start.y * 1e3,
            start.z * 1e3
        );

        let options = SimplexOptions {
            initial_step: self.config.initial_step,
            xtol: self.config.xtol,
            ftol: self.config.ftol * energy,
            max_iterations: self.config.max_iterations,
        };
        let result = simplex::minimize(|p| self.cost(p, &y_w), &start, &options);
        if !result.value.is_finite() {
            return Err(DipoleError::DegenerateGeometry(
                "Simplex found no admissible dipole position".to_string(),
            ));
        }

        let fit = self.finish(&result.x, sample, &y_w, energy, result.iterations, result.converged)?;
        debug!(
            "Condition {}: gof {:.4} after {} iterations",
            sample.condition,
            fit.dipole.gof(),
            fit.iterations
        );

        if !result.converged {
            warn!(
                "Condition {}: simplex hit the {} iteration cap",
                sample.condition, self.config.max_iterations
            );
            return Err(DipoleError::DipoleFitDiverged {
                iterations: result.iterations,
                fit: Box::new(fit),
            });
        }
        Ok(fit)
    }

    /// Whitened residual energy at `position`, `+∞` where no dipole may sit
    fn cost(&self, position: &Vec3, y_w: &DVec) -> f64 {
        if !self.admissible(position) {
            return f64::INFINITY;
        }
        match self.solve_at(position, y_w) {
            Ok((_, solution)) => solution.cost,
            Err(_) => f64::INFINITY,
        }
    }

    fn admissible(&self, position: &Vec3) -> bool {
        self.sphere.relative(position).norm() < self.sphere.radius() - self.config.min_dist
    }

    fn solve_at(&self, position: &Vec3, y_w: &DVec) -> Result<(DMat, MomentSolution)> {
        let g = lead_field(position, self.sphere, self.sensors)?;
        let g_w = self.whitener.whiten_matrix(&g)?;
        let solution = solve_moment(&g_w, y_w, self.config.moment_rank_ratio)?;
        Ok((g, solution))
    }

    fn initial_position(&self, y_w: &DVec) -> Result<Vec3> {
        match &self.config.initial_guess {
            InitialGuess::SphereCenter => Ok(*self.sphere.origin()),
            InitialGuess::Fixed { position } => {
                let p = Vec3::from_column_slice(position);
                if !self.admissible(&p) {
                    return Err(DipoleError::DegenerateGeometry(format!(
                        "Initial position ({:.1}, {:.1}, {:.1}) mm is too close to or outside the sphere",
                        p.x * 1e3,
                        p.y * 1e3,
                        p.z * 1e3
                    )));
                }
                Ok(p)
            }
            InitialGuess::Grid { spacing, exclude } => {
                let mut candidates = self.grid(*spacing, *exclude);
                if candidates.is_empty() {
                    candidates.push(*self.sphere.origin());
                }
                candidates
                    .into_iter()
                    .map(|p| (self.cost(&p, y_w), p))
                    .filter(|(c, _)| c.is_finite())
                    .min_by(|a, b| a.0.total_cmp(&b.0))
                    .map(|(_, p)| p)
                    .ok_or_else(|| {
                        DipoleError::DegenerateGeometry(
                            "No grid point gives a valid lead field".to_string(),
                        )
                    })
            }
        }
    }

    /// Cubic grid points inside the admissible ball, outside the `exclude` core
    fn grid(&self, spacing: f64, exclude: f64) -> Vec<Vec3> {
        let limit = self.sphere.radius() - self.config.min_dist;
        let n = (limit / spacing).floor() as i64;
        let mut points = Vec::new();
        for i in -n..=n {
            for j in -n..=n {
                for k in -n..=n {
                    let rel = Vec3::new(i as f64, j as f64, k as f64) * spacing;
                    let d = rel.norm();
                    if d < limit && d >= exclude {
                        points.push(self.sphere.origin() + rel);
                    }
                }
            }
        }
        points
    }

    fn finish(
        &self,
        position: &Vec3,
        sample: &EvokedSample,
        y_w: &DVec,
        energy: f64,
        iterations: usize,
        converged: bool,
    ) -> Result<DipoleFit> {
        let (g, solution) = self.solve_at(position, y_w)?;
        let predicted = &g * solution.moment;
        let gof = solution.explained / energy;
        Ok(DipoleFit {
            dipole: Dipole::from_moment(*position, &solution.moment, gof, sample.time),
            residual: &sample.data - predicted,
            residual_energy: solution.cost,
            iterations,
            converged,
        })
    }
}

/// Fit one sample (convenience wrapper around [`DipoleFitter`])
pub fn fit(
    sample: &EvokedSample,
    sensors: &SensorArray,
    sphere: &SphereModel,
    whitener: &Whitener,
    config: &FitConfig,
) -> Result<DipoleFit> {
    DipoleFitter::new(sensors, sphere, whitener, config)?.fit(sample)
}

/// Least-squares moment for a whitened lead field `g_w` (n x 3)
fn solve_moment(g_w: &DMat, y_w: &DVec, rank_ratio: f64) -> Result<MomentSolution> {
    let energy = y_w.norm_squared();
    let svd = g_w.clone().svd(true, true);
    let (u, v_t) = match (&svd.u, &svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(DipoleError::DegenerateGeometry(
                "Lead field decomposition failed".to_string(),
            ))
        }
    };
    let s = &svd.singular_values;

    let mut order: Vec<usize> = (0..s.len()).collect();
    order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));
    let s1 = order.first().map_or(0.0, |&i| s[i]);

    let mut moment = Vec3::zeros();
    let mut explained = 0.0;
    if s1 > 0.0 {
        for (rank, &i) in order.iter().enumerate() {
            let si = s[i];
            if si <= f64::EPSILON * s1 || (rank >= 2 && si <= rank_ratio * s1) {
                continue;
            }
            let proj = u.column(i).dot(y_w);
            explained += proj * proj;
            moment += Vec3::new(v_t[(i, 0)], v_t[(i, 1)], v_t[(i, 2)]) * (proj / si);
        }
    }

    Ok(MomentSolution {
        moment,
        explained,
        cost: (energy - explained).max(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::covariance::CovarianceMatrix;
    use crate::forward::predict;
    use crate::phantom::helmet;
    use crate::whiten::WhitenerConfig;
    use crate::CoordTrans;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    const MAG_SD: f64 = 20e-15;
    const GRAD_SD: f64 = 4e-13;

    fn helmet_array(n_locations: usize) -> SensorArray {
        let t = CoordTrans::identity(FIFFV_COORD_DEVICE, FIFFV_COORD_HEAD);
        SensorArray::from_channels(&helmet(n_locations, 0.12, &t), &t, &[]).unwrap()
    }

    fn noise_whitener(sensors: &SensorArray) -> Whitener {
        let variances: Vec<f64> = sensors
            .coils()
            .iter()
            .map(|c| if c.is_gradiometer() { GRAD_SD * GRAD_SD } else { MAG_SD * MAG_SD })
            .collect();
        let cov = CovarianceMatrix::diagonal(&variances).unwrap();
        Whitener::new(&cov, &WhitenerConfig::default()).unwrap()
    }

    fn sphere() -> SphereModel {
        SphereModel::new(Vec3::zeros(), 0.08).unwrap()
    }

    fn sample(data: DVec) -> EvokedSample {
        EvokedSample {
            data,
            time: 0.036,
            condition: 1,
            nave: 1,
        }
    }

    #[test]
    fn test_noiseless_recovery() {
        let sensors = helmet_array(60);
        let whitener = noise_whitener(&sensors);
        let truth = Dipole::new(Vec3::new(0.03, 0.0, 0.02), Vec3::y(), 100.0, 1.0, 0.036).unwrap();
        let data = predict(&truth, &sphere(), &sensors).unwrap();

        let fit = fit(&sample(data), &sensors, &sphere(), &whitener, &FitConfig::default()).unwrap();
        assert!(fit.converged);
        let d = &fit.dipole;
        let pos_err_mm = (d.position() - truth.position()).norm() * 1e3;
        let cos = d.orientation().dot(truth.orientation()).abs().min(1.0);
        assert!(pos_err_mm < 1.0, "position error {pos_err_mm} mm");
        assert!(cos.acos().to_degrees() < 1.0);
        assert!((d.amplitude().abs() - 100.0).abs() < 1.0);
        assert!(d.gof() > 0.99999);
        assert_eq!(d.time(), 0.036);
    }

    #[test]
    fn test_noisy_fit_stays_close() {
        let sensors = helmet_array(60);
        let whitener = noise_whitener(&sensors);
        let truth =
            Dipole::new(Vec3::new(-0.02, 0.035, 0.04), Vec3::new(1.0, 0.0, 0.5), 80.0, 1.0, 0.0)
                .unwrap();
        let mut data = predict(&truth, &sphere(), &sensors).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for (value, coil) in data.iter_mut().zip(sensors.coils()) {
            let sd = if coil.is_gradiometer() { GRAD_SD } else { MAG_SD };
            *value += Normal::new(0.0, sd).unwrap().sample(&mut rng);
        }

        let fit = fit(&sample(data.clone()), &sensors, &sphere(), &whitener, &FitConfig::default())
            .unwrap();
        let pos_err_mm = (fit.dipole.position() - truth.position()).norm() * 1e3;
        assert!(pos_err_mm < 3.0, "position error {pos_err_mm} mm");
        assert!(fit.dipole.gof() > 0.9 && fit.dipole.gof() < 1.0);
        assert!(fit.residual_energy > 0.0);
        // Residual is what the fitted dipole does not explain (compared in fT)
        let predicted = predict(&fit.dipole, &sphere(), &sensors).unwrap();
        assert_relative_eq!(
            (&predicted + &fit.residual) * 1e15,
            data * 1e15,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_zero_observation() {
        let sensors = helmet_array(20);
        let whitener = noise_whitener(&sensors);
        let fit = fit(
            &sample(DVec::zeros(sensors.len())),
            &sensors,
            &sphere(),
            &whitener,
            &FitConfig::default(),
        )
        .unwrap();
        assert_eq!(fit.dipole.gof(), 0.0);
        assert_eq!(fit.dipole.amplitude(), 0.0);
        assert_eq!(*fit.dipole.orientation(), Vec3::x());
    }

    #[test]
    fn test_dimension_mismatch() {
        let sensors = helmet_array(20);
        let whitener = noise_whitener(&sensors);
        let result = fit(
            &sample(DVec::zeros(sensors.len() - 1)),
            &sensors,
            &sphere(),
            &whitener,
            &FitConfig::default(),
        );
        assert!(matches!(result, Err(DipoleError::DimensionMismatch(_))));

        let other = noise_whitener(&helmet_array(10));
        assert!(matches!(
            DipoleFitter::new(&sensors, &sphere(), &other, &FitConfig::default()),
            Err(DipoleError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_iteration_cap_reports_best_effort() {
        let sensors = helmet_array(20);
        let whitener = noise_whitener(&sensors);
        let truth = Dipole::new(Vec3::new(0.03, 0.0, 0.02), Vec3::y(), 100.0, 1.0, 0.0).unwrap();
        let data = predict(&truth, &sphere(), &sensors).unwrap();
        let config = FitConfig {
            max_iterations: 3,
            ..Default::default()
        };
        match fit(&sample(data), &sensors, &sphere(), &whitener, &config) {
            Err(err @ DipoleError::DipoleFitDiverged { .. }) => {
                let best = err.best_effort().unwrap();
                assert!(!best.converged);
                assert_eq!(best.iterations, 3);
                assert!(best.dipole.gof() > 0.0);
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn test_initial_guess_variants() {
        let sensors = helmet_array(40);
        let whitener = noise_whitener(&sensors);
        let truth = Dipole::new(Vec3::new(0.0, 0.04, 0.03), Vec3::x(), 50.0, 1.0, 0.0).unwrap();
        let data = predict(&truth, &sphere(), &sensors).unwrap();

        for guess in [
            InitialGuess::SphereCenter,
            InitialGuess::Fixed {
                position: [0.0, 0.03, 0.03],
            },
        ] {
            let config = FitConfig {
                initial_guess: guess,
                ..Default::default()
            };
            let fit = fit(&sample(data.clone()), &sensors, &sphere(), &whitener, &config).unwrap();
            assert!((fit.dipole.position() - truth.position()).norm() < 1e-3);
        }

        let outside = FitConfig {
            initial_guess: InitialGuess::Fixed {
                position: [0.0, 0.0, 0.078],
            },
            ..Default::default()
        };
        assert!(matches!(
            fit(&sample(data), &sensors, &sphere(), &whitener, &outside),
            Err(DipoleError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_solve_moment_drops_weak_component() {
        // Two strong directions and a weak third
        let g = DMat::from_row_slice(4, 3, &[10.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.1, 0.0, 0.0, 0.0]);
        let y = DVec::from_vec(vec![20.0, -5.0, 1.0, 0.0]);
        let sol = solve_moment(&g, &y, 0.2).unwrap();
        assert_relative_eq!(sol.moment, Vec3::new(2.0, -1.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(sol.explained, 425.0, epsilon = 1e-9);
        assert_relative_eq!(sol.cost, 1.0, epsilon = 1e-9);

        // With a permissive ratio the third component is used as well
        let sol = solve_moment(&g, &y, 0.0).unwrap();
        assert_relative_eq!(sol.moment, Vec3::new(2.0, -1.0, 10.0), epsilon = 1e-9);
        assert_relative_eq!(sol.cost, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_config_validation_and_toml() {
        assert!(FitConfig::default().validate().is_ok());
        let bad = FitConfig {
            xtol: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = FitConfig {
            initial_guess: InitialGuess::Grid {
                spacing: 0.0,
                exclude: 0.02,
            },
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        for spacing in [1e-5, f64::NAN, f64::INFINITY] {
            let fine = FitConfig {
                initial_guess: InitialGuess::Grid {
                    spacing,
                    exclude: 0.0,
                },
                ..Default::default()
            };
            assert!(matches!(fine.validate(), Err(DipoleError::InvalidInput(_))));
        }
        let finest_allowed = FitConfig {
            initial_guess: InitialGuess::Grid {
                spacing: MIN_GRID_SPACING,
                exclude: 0.0,
            },
            ..Default::default()
        };
        assert!(finest_allowed.validate().is_ok());

        let config: FitConfig =
            toml::from_str("max_iterations = 500\n[initial_guess]\nkind = \"sphere_center\"\n")
                .unwrap();
        assert_eq!(config.max_iterations, 500);
        assert_eq!(config.initial_guess, InitialGuess::SphereCenter);
        assert_eq!(config.min_dist, 0.005);

        let config: FitConfig =
            toml::from_str("[initial_guess]\nkind = \"fixed\"\nposition = [0.0, 0.01, 0.05]\n")
                .unwrap();
        assert_eq!(
            config.initial_guess,
            InitialGuess::Fixed {
                position: [0.0, 0.01, 0.05]
            }
        );
    }
}

//! Independent dipole fits over many samples.

use log::{info, warn};
use rayon::prelude::*;

use crate::covariance::CovarianceMatrix;
use crate::dipole::DipoleFit;
use crate::epochs::EvokedSample;
use crate::error::{DipoleError, Result};
use crate::fit::{DipoleFitter, FitConfig};
use crate::sensors::SensorArray;
use crate::sphere::SphereModel;
use crate::whiten::{Whitener, WhitenerConfig};

/// Outcome of one sample; failures stay attached to their index
pub type SampleOutcome = Result<DipoleFit>;

/// Noise covariance for a batch
#[derive(Debug, Clone, Copy)]
pub enum CovarianceSource<'a> {
    /// One covariance for every sample
    Shared(&'a CovarianceMatrix),
    /// One covariance per sample, in sample order
    PerSample(&'a [CovarianceMatrix]),
}

#[derive(Debug, Clone, Default)]
pub struct BatchConfig {
    pub parallel: bool,
    pub whitening: WhitenerConfig,
    pub fit: FitConfig,
}

/// Whitening prepared once per batch
enum Whitening<'a> {
    Shared(Result<Whitener>),
    PerSample(&'a [CovarianceMatrix]),
}

/// Fit every sample independently, preserving input order.
///
/// Only a structural problem with the inputs (a per-sample covariance list of
/// the wrong length) fails the whole batch; anything that goes wrong for one
/// sample is recorded in its outcome and the batch continues.
pub fn fit_all(
    samples: &[EvokedSample],
    sensors: &SensorArray,
    sphere: &SphereModel,
    covariances: CovarianceSource<'_>,
    config: &BatchConfig,
) -> Result<Vec<SampleOutcome>> {
    let whitening = match covariances {
        CovarianceSource::Shared(cov) => Whitening::Shared(Whitener::new(cov, &config.whitening)),
        CovarianceSource::PerSample(covs) => {
            if covs.len() != samples.len() {
                return Err(DipoleError::DimensionMismatch(format!(
                    "{} covariances for {} samples",
                    covs.len(),
                    samples.len()
                )));
            }
            Whitening::PerSample(covs)
        }
    };

    let fit_one = |idx: usize| -> SampleOutcome {
        let sample = &samples[idx];
        match &whitening {
            Whitening::Shared(Ok(whitener)) => {
                DipoleFitter::new(sensors, sphere, whitener, &config.fit)?.fit(sample)
            }
            Whitening::Shared(Err(err)) => Err(replicate(err)),
            Whitening::PerSample(covs) => {
                let whitener = Whitener::new(&covs[idx], &config.whitening)?;
                DipoleFitter::new(sensors, sphere, &whitener, &config.fit)?.fit(sample)
            }
        }
    };

    let outcomes: Vec<SampleOutcome> = if config.parallel {
        (0..samples.len()).into_par_iter().map(fit_one).collect()
    } else {
        (0..samples.len()).map(fit_one).collect()
    };

    BatchReport::from_outcomes(&outcomes).log();
    Ok(outcomes)
}

/// Copy of a shared setup error for each sample it affects
fn replicate(err: &DipoleError) -> DipoleError {
    match err {
        DipoleError::IllConditionedCovariance {
            smallest,
            largest,
            tolerance,
        } => DipoleError::IllConditionedCovariance {
            smallest: *smallest,
            largest: *largest,
            tolerance: *tolerance,
        },
        DipoleError::DegenerateGeometry(msg) => DipoleError::DegenerateGeometry(msg.clone()),
        DipoleError::DimensionMismatch(msg) => DipoleError::DimensionMismatch(msg.clone()),
        DipoleError::NoData(msg) => DipoleError::NoData(msg.clone()),
        other => DipoleError::InvalidInput(other.to_string()),
    }
}

/// Success / failure tally of a batch
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub diverged: usize,
    pub failures: Vec<(usize, &'static str, String)>, // (index, kind, message)
}

impl BatchReport {
    pub fn from_outcomes(outcomes: &[SampleOutcome]) -> Self {
        let mut report = BatchReport {
            total: outcomes.len(),
            ..Default::default()
        };
        for (idx, outcome) in outcomes.iter().enumerate() {
            match outcome {
                Ok(_) => report.succeeded += 1,
                Err(err) => {
                    if matches!(err, DipoleError::DipoleFitDiverged { .. }) {
                        report.diverged += 1;
                    }
                    report.failures.push((idx, err.kind_label(), err.to_string()));
                }
            }
        }
        report
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn log(&self) {
        for (idx, kind, message) in &self.failures {
            warn!("Sample {idx} failed ({kind}): {message}");
        }
        info!(
            "Batch: {}/{} fits succeeded, {} failed ({} diverged)",
            self.succeeded,
            self.total,
            self.failed(),
            self.diverged
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::dipole::Dipole;
    use crate::forward::predict;
    use crate::phantom::{helmet, phantom_dipoles};
    use crate::{CoordTrans, Vec3};

    fn setup() -> (SensorArray, SphereModel, CovarianceMatrix) {
        let t = CoordTrans::identity(FIFFV_COORD_DEVICE, FIFFV_COORD_HEAD);
        let sensors = SensorArray::from_channels(&helmet(24, 0.12, &t), &t, &[]).unwrap();
        let variances: Vec<f64> = sensors
            .coils()
            .iter()
            .map(|c| if c.is_gradiometer() { 1.6e-25 } else { 4e-28 })
            .collect();
        let cov = CovarianceMatrix::diagonal(&variances).unwrap();
        (sensors, SphereModel::new(Vec3::zeros(), 0.08).unwrap(), cov)
    }

    fn samples_for(dipoles: &[Dipole], sensors: &SensorArray, sphere: &SphereModel) -> Vec<EvokedSample> {
        dipoles
            .iter()
            .enumerate()
            .map(|(i, d)| EvokedSample {
                data: predict(d, sphere, sensors).unwrap(),
                time: 0.036,
                condition: i as u32 + 1,
                nave: 1,
            })
            .collect()
    }

    #[test]
    fn test_one_singular_covariance_in_32() {
        let (sensors, sphere, cov) = setup();
        let truth = phantom_dipoles(100.0).unwrap();
        let samples = samples_for(&truth, &sensors, &sphere);

        let mut covs = vec![cov.clone(); 32];
        covs[13] = CovarianceMatrix::diagonal(&vec![0.0; sensors.len()]).unwrap();

        let config = BatchConfig {
            parallel: true,
            ..Default::default()
        };
        let outcomes = fit_all(&samples, &sensors, &sphere, CovarianceSource::PerSample(&covs), &config)
            .unwrap();
        assert_eq!(outcomes.len(), 32);
        assert!(matches!(
            outcomes[13],
            Err(DipoleError::IllConditionedCovariance { .. })
        ));
        let ok = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(ok, 31);

        // Order is preserved: each fit lands near its own dipole
        for (i, outcome) in outcomes.iter().enumerate() {
            if let Ok(fit) = outcome {
                assert!((fit.dipole.position() - truth[i].position()).norm() < 1e-3);
            }
        }

        let report = BatchReport::from_outcomes(&outcomes);
        assert_eq!(report.succeeded, 31);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].0, 13);
        assert_eq!(report.failures[0].1, "ill_conditioned_covariance");
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let (sensors, sphere, cov) = setup();
        let truth = &phantom_dipoles(100.0).unwrap()[..4];
        let samples = samples_for(truth, &sensors, &sphere);

        let run = |parallel| {
            let config = BatchConfig {
                parallel,
                ..Default::default()
            };
            fit_all(&samples, &sensors, &sphere, CovarianceSource::Shared(&cov), &config).unwrap()
        };
        let seq = run(false);
        let par = run(true);
        for (a, b) in seq.iter().zip(&par) {
            let (a, b) = (a.as_ref().unwrap(), b.as_ref().unwrap());
            assert_eq!(a.dipole.position(), b.dipole.position());
            assert_eq!(a.iterations, b.iterations);
        }
    }

    #[test]
    fn test_shared_error_reaches_every_sample() {
        let (sensors, sphere, _) = setup();
        let truth = &phantom_dipoles(100.0).unwrap()[..3];
        let samples = samples_for(truth, &sensors, &sphere);
        let singular = CovarianceMatrix::diagonal(&vec![0.0; sensors.len()]).unwrap();

        let outcomes = fit_all(
            &samples,
            &sensors,
            &sphere,
            CovarianceSource::Shared(&singular),
            &BatchConfig::default(),
        )
        .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Err(DipoleError::IllConditionedCovariance { .. }))));
    }

    #[test]
    fn test_per_sample_length_mismatch() {
        let (sensors, sphere, cov) = setup();
        let truth = &phantom_dipoles(100.0).unwrap()[..2];
        let samples = samples_for(truth, &sensors, &sphere);
        let covs = vec![cov];
        assert!(matches!(
            fit_all(
                &samples,
                &sensors,
                &sphere,
                CovarianceSource::PerSample(&covs),
                &BatchConfig::default()
            ),
            Err(DipoleError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_mismatched_sample_is_isolated() {
        let (sensors, sphere, cov) = setup();
        let truth = &phantom_dipoles(100.0).unwrap()[..2];
        let mut samples = samples_for(truth, &sensors, &sphere);
        samples[0].data = samples[0].data.rows(0, 5).into_owned();

        let outcomes = fit_all(
            &samples,
            &sensors,
            &sphere,
            CovarianceSource::Shared(&cov),
            &BatchConfig::default(),
        )
        .unwrap();
        assert!(matches!(outcomes[0], Err(DipoleError::DimensionMismatch(_))));
        assert!(outcomes[1].is_ok());
    }
}

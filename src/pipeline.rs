//! Phantom validation pipeline.
//!
//! Epoch the recording around its events, estimate the noise covariance from
//! the pre-stimulus interval, average each condition, fit one dipole per
//! condition at the analysis latency and compare each fit with the phantom
//! dipole that condition drives (condition id `k` is dipole `k`, 1-based).

use log::info;

use crate::batch::{fit_all, BatchReport, CovarianceSource, SampleOutcome};
use crate::compare::{compare_outcomes, Comparison};
use crate::config::Config;
use crate::covariance::{estimate_covariance, CovarianceMatrix};
use crate::dipole::Dipole;
use crate::epochs::{Epochs, Evoked, EvokedSample};
use crate::error::{DipoleError, Result};
use crate::io::Recording;
use crate::phantom::phantom_dipoles;
use crate::sensors::SensorArray;

/// Everything the pipeline produced, in condition order
#[derive(Debug)]
pub struct PipelineOutput {
    pub sensors: SensorArray,
    pub covariance: CovarianceMatrix,
    pub evokeds: Vec<Evoked>,
    pub samples: Vec<EvokedSample>,
    pub outcomes: Vec<SampleOutcome>,
    pub truth: Vec<Dipole>,
    pub comparison: Comparison,
    pub report: BatchReport,
}

pub fn run(recording: &Recording, config: &Config) -> Result<PipelineOutput> {
    let sphere = config.sphere_model()?;
    let sensors = recording.sensor_array()?;
    info!(
        "Fitting with {} MEG channels, sphere radius {:.1} mm",
        sensors.len(),
        sphere.radius() * 1e3
    );

    let epochs = Epochs::new(
        &recording.raw,
        &recording.events,
        sensors.channel_indices(),
        &config.epochs,
    )?;
    if epochs.is_empty() {
        return Err(DipoleError::NoData(
            "No epochs survived selection".to_string(),
        ));
    }
    let covariance = estimate_covariance(&epochs, None, Some(config.analysis.covariance_tmax))?;

    let evokeds = epochs.average_all()?;
    let samples = evokeds
        .iter()
        .map(|evoked| evoked.sample_at(config.analysis.t_peak))
        .collect::<Result<Vec<_>>>()?;

    // Noise in an average of `nave` trials shrinks by 1/nave
    let covariances: Vec<CovarianceMatrix> = samples
        .iter()
        .map(|s| covariance.scaled(1.0 / s.nave as f64))
        .collect();

    let all_truth = phantom_dipoles(config.analysis.true_amplitude_nam)?;
    let truth = samples
        .iter()
        .map(|s| {
            (s.condition as usize)
                .checked_sub(1)
                .and_then(|i| all_truth.get(i))
                .cloned()
                .ok_or_else(|| {
                    DipoleError::InvalidInput(format!(
                        "Condition {} does not name a phantom dipole",
                        s.condition
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let outcomes = fit_all(
        &samples,
        &sensors,
        &sphere,
        CovarianceSource::PerSample(&covariances),
        &config.batch_config(),
    )?;
    let comparison = compare_outcomes(&outcomes, &truth)?;
    let report = BatchReport::from_outcomes(&outcomes);

    info!(
        "Compared {} dipoles: mean position error {:.2} mm, angle {:.2} deg, amplitude {:.2} nAm",
        comparison.len(),
        comparison.mean_position_error_mm,
        comparison.mean_angle_error_deg,
        comparison.mean_amplitude_error_nam
    );

    Ok(PipelineOutput {
        sensors,
        covariance,
        evokeds,
        samples,
        outcomes,
        truth,
        comparison,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epochs::Event;
    use crate::phantom::{simulate, SimulationConfig};

    fn small_session() -> (Recording, Config) {
        let mut config = Config::default();
        config.simulation = SimulationConfig {
            n_locations: 30,
            n_dipoles: 3,
            trials_per_dipole: 4,
            ..Default::default()
        };
        let recording = simulate(&config.simulation, &config.sphere_model().unwrap()).unwrap();
        (recording, config)
    }

    #[test]
    fn test_small_session() {
        let (recording, config) = small_session();
        let out = run(&recording, &config).unwrap();

        assert_eq!(out.evokeds.len(), 3);
        // First and last trial of each condition are trimmed
        assert!(out.evokeds.iter().all(|e| e.nave == 2));
        assert_eq!(out.samples[0].condition, 1);
        assert!((out.samples[0].time - 0.036).abs() < 1e-9);
        assert_eq!(out.covariance.n_channels(), out.sensors.len());
        assert_eq!(out.outcomes.len(), 3);
        assert_eq!(out.truth.len(), 3);
        assert_eq!(out.report.total, 3);
        assert_eq!(out.comparison.len(), 3);
        assert!(out.comparison.mean_position_error_mm < 10.0);
    }

    #[test]
    fn test_unknown_condition() {
        let (mut recording, config) = small_session();
        for event in recording.events.iter_mut().filter(|e| e.id == 3) {
            *event = Event {
                sample: event.sample,
                id: 40,
            };
        }
        assert!(matches!(
            run(&recording, &config),
            Err(DipoleError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_no_events() {
        let (mut recording, config) = small_session();
        recording.events.clear();
        assert!(matches!(run(&recording, &config), Err(DipoleError::NoData(_))));
    }
}

//! Simulated phantom session through the whole fitting pipeline.

use dipfit::phantom::{simulate, SimulationConfig};
use dipfit::pipeline;
use dipfit::report::{write_comparison_csv, write_dipoles_csv};
use dipfit::{Config, Recording};

fn session_config() -> Config {
    let mut config = Config::default();
    config.simulation = SimulationConfig {
        n_locations: 40,
        n_dipoles: 8,
        trials_per_dipole: 5,
        seed: 1234,
        ..Default::default()
    };
    config
}

#[test]
fn test_simulated_phantom_is_localized() {
    let config = session_config();
    let sphere = config.sphere_model().unwrap();
    let recording = simulate(&config.simulation, &sphere).unwrap();

    // Through the JSON format and back
    let mut buf = Vec::new();
    recording.to_writer(&mut buf).unwrap();
    let recording = Recording::from_reader(buf.as_slice()).unwrap();

    let out = pipeline::run(&recording, &config).unwrap();
    assert_eq!(out.outcomes.len(), 8);
    assert_eq!(out.report.succeeded, 8, "failures: {:?}", out.report.failures);
    assert!(out.evokeds.iter().all(|e| e.nave == 3));

    let cmp = &out.comparison;
    assert_eq!(cmp.len(), 8);
    assert!(
        cmp.mean_position_error_mm < 5.0,
        "mean position error {:.2} mm",
        cmp.mean_position_error_mm
    );
    assert!(cmp.mean_angle_error_deg < 10.0);
    assert!(cmp.mean_amplitude_error_nam < 20.0);

    for outcome in &out.outcomes {
        let fit = outcome.as_ref().unwrap();
        assert!(fit.converged);
        assert!(fit.dipole.gof() > 0.5);
        assert_eq!(fit.residual.len(), out.sensors.len());
    }

    let mut dipoles_csv = Vec::new();
    write_dipoles_csv(&mut dipoles_csv, &out.outcomes).unwrap();
    assert_eq!(String::from_utf8(dipoles_csv).unwrap().lines().count(), 9);

    let mut comparison_csv = Vec::new();
    write_comparison_csv(&mut comparison_csv, cmp).unwrap();
    assert_eq!(String::from_utf8(comparison_csv).unwrap().lines().count(), 9);
}

#[test]
fn test_bad_channels_are_excluded() {
    let config = session_config();
    let sphere = config.sphere_model().unwrap();
    let mut recording = simulate(&config.simulation, &sphere).unwrap();
    recording.bads = vec!["MEG 0011".to_string(), "MEG 0102".to_string()];

    let out = pipeline::run(&recording, &config).unwrap();
    assert_eq!(out.sensors.len(), 3 * 40 - 2);
    assert!(!out.sensors.names().contains(&"MEG 0011"));
    assert!(out.comparison.mean_position_error_mm < 5.0);
}

//! The Elekta/Neuromag Vectorview phantom and synthetic recordings of it.
//!
//! The phantom holds 32 current dipoles on four arcs. Their positions and
//! orientations are known exactly, which makes the recordings a ground truth
//! for dipole localization. [`simulate`] produces a recording with the same
//! structure as a real phantom session: a helmet of magnetometer and planar
//! gradiometer triplets, one condition per dipole, and sensor noise.

use std::f64::consts::PI;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::dipole::Dipole;
use crate::epochs::{Event, Raw};
use crate::error::{DipoleError, Result};
use crate::forward::lead_field;
use crate::io::Recording;
use crate::sensors::SensorArray;
use crate::sphere::SphereModel;
use crate::{ChannelInfo, CoordTrans, DMat, Vec3};

/// Number of dipoles in the phantom
pub const N_PHANTOM_DIPOLES: usize = 32;

/// Polar extent of the synthetic helmet, measured from the vertex
const HELMET_MAX_POLAR_DEG: f64 = 100.0;

// Arc coordinates (mm)
const ARC_A: [f64; 8] = [59.7, 48.6, 35.8, 24.8, 37.2, 27.5, 15.8, 7.9];
const ARC_B: [f64; 8] = [46.1, 41.9, 38.3, 31.5, 13.9, 16.2, 20.0, 19.3];
const ARC_C: [f64; 8] = [22.9, 23.5, 25.5, 23.1, 52.0, 46.4, 41.0, 33.0];
const ARC_D: [f64; 8] = [44.4, 34.0, 21.6, 12.7, 62.4, 51.5, 39.1, 27.9];

/// Dipole positions in head coordinates (m)
pub fn phantom_positions() -> Vec<Vec3> {
    let mut positions = Vec::with_capacity(N_PHANTOM_DIPOLES);
    for i in 0..8 {
        positions.push(Vec3::new(ARC_A[i], 0.0, ARC_C[i]));
    }
    for i in 0..8 {
        positions.push(Vec3::new(0.0, -ARC_A[i], ARC_C[i]));
    }
    for i in 0..8 {
        positions.push(Vec3::new(-ARC_B[i], 0.0, ARC_D[i]));
    }
    for i in 0..8 {
        positions.push(Vec3::new(0.0, ARC_B[i], ARC_D[i]));
    }
    positions.into_iter().map(|p| p * 1e-3).collect()
}

/// Unit orientations, tangential to each dipole's arc
pub fn phantom_orientations() -> Vec<Vec3> {
    phantom_positions()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            // The two non-zero coordinates, swapped and with the second negated
            let nonzero: Vec<usize> = (0..3).filter(|&k| p[k] != 0.0).collect();
            let norm = p.norm();
            let mut ori = Vec3::zeros();
            if let [a, b] = nonzero[..] {
                ori[a] = p[b] / norm;
                ori[b] = -p[a] / norm;
            }
            ori * polarity(i)
        })
        .collect()
}

/// Sign pattern of the phantom drive wiring
fn polarity(index: usize) -> f64 {
    let k = index % 16;
    let first = if k < 8 { 1.0 } else { -1.0 };
    if k % 2 == 0 {
        first
    } else {
        -first
    }
}

/// The 32 phantom dipoles with a common amplitude (nAm)
pub fn phantom_dipoles(amplitude_nam: f64) -> Result<Vec<Dipole>> {
    phantom_positions()
        .into_iter()
        .zip(phantom_orientations())
        .map(|(p, o)| Dipole::new(p, o, amplitude_nam, 1.0, 0.0))
        .collect()
}

/// Synthetic Vectorview-like helmet: `n_locations` triplets (two orthogonal
/// planar gradiometers and a magnetometer) on a spherical cap of `radius`
/// around the head origin, stored in device coordinates.
pub fn helmet(n_locations: usize, radius: f64, dev_head_t: &CoordTrans) -> Vec<ChannelInfo> {
    let head_dev = dev_head_t.inverse();
    let golden = PI * (3.0 - 5.0_f64.sqrt());
    let cos_max = HELMET_MAX_POLAR_DEG.to_radians().cos();

    let mut channels = Vec::with_capacity(3 * n_locations);
    for i in 0..n_locations {
        // Fibonacci lattice, equal area per location
        let z = 1.0 - (1.0 - cos_max) * (i as f64 + 0.5) / n_locations as f64;
        let rho = (1.0 - z * z).max(0.0).sqrt();
        let phi = golden * i as f64;
        let ez = Vec3::new(rho * phi.cos(), rho * phi.sin(), z);
        let ex = Vec3::new(-phi.sin(), phi.cos(), 0.0);
        let ey = ez.cross(&ex);

        let pos = head_dev.apply_point(&(ez * radius));
        let (ex, ey, ez) = (
            head_dev.apply_vector(&ex),
            head_dev.apply_vector(&ey),
            head_dev.apply_vector(&ez),
        );

        let triplet = [
            ('2', FIFFV_COIL_VV_PLANAR_T1, ex, ey),
            ('3', FIFFV_COIL_VV_PLANAR_T1, ey, -ex),
            ('1', FIFFV_COIL_VV_MAG_T3, ex, ey),
        ];
        for (suffix, coil_type, cx, cy) in triplet {
            channels.push(ChannelInfo {
                ch_name: format!("MEG {:03}{}", i + 1, suffix),
                kind: FIFFV_MEG_CH,
                coil_type,
                loc: ChannelInfo::pack_loc(&pos, &cx, &cy, &ez),
            });
        }
    }
    channels
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "SimulationConfig::default_sfreq")]
    pub sfreq: f64,
    #[serde(default = "SimulationConfig::default_n_locations")]
    pub n_locations: usize,
    #[serde(default = "SimulationConfig::default_helmet_radius")]
    pub helmet_radius: f64,
    /// Device origin in head coordinates (m)
    #[serde(default = "SimulationConfig::default_device_origin")]
    pub device_origin: [f64; 3],
    /// Drive the first `n_dipoles` phantom dipoles
    #[serde(default = "SimulationConfig::default_n_dipoles")]
    pub n_dipoles: usize,
    #[serde(default = "SimulationConfig::default_trials_per_dipole")]
    pub trials_per_dipole: usize,
    /// Time between consecutive events (s)
    #[serde(default = "SimulationConfig::default_trial_interval")]
    pub trial_interval: f64,
    #[serde(default = "SimulationConfig::default_t_peak")]
    pub t_peak: f64,
    /// Full width of the Hann pulse (s)
    #[serde(default = "SimulationConfig::default_pulse_width")]
    pub pulse_width: f64,
    #[serde(default = "SimulationConfig::default_amplitude_nam")]
    pub amplitude_nam: f64,
    /// Magnetometer noise SD (T)
    #[serde(default = "SimulationConfig::default_noise_mag")]
    pub noise_mag: f64,
    /// Gradiometer noise SD (T/m)
    #[serde(default = "SimulationConfig::default_noise_grad")]
    pub noise_grad: f64,
    #[serde(default)]
    pub first_samp: usize,
    #[serde(default = "SimulationConfig::default_seed")]
    pub seed: u64,
}

impl SimulationConfig {
    fn default_sfreq() -> f64 {
        1000.0
    }
    fn default_n_locations() -> usize {
        102
    }
    fn default_helmet_radius() -> f64 {
        0.12
    }
    fn default_device_origin() -> [f64; 3] {
        [0.0, 0.01, 0.04]
    }
    fn default_n_dipoles() -> usize {
        N_PHANTOM_DIPOLES
    }
    fn default_trials_per_dipole() -> usize {
        5
    }
    fn default_trial_interval() -> f64 {
        0.3
    }
    fn default_t_peak() -> f64 {
        0.036
    }
    fn default_pulse_width() -> f64 {
        0.04
    }
    fn default_amplitude_nam() -> f64 {
        100.0
    }
    fn default_noise_mag() -> f64 {
        20e-15
    }
    fn default_noise_grad() -> f64 {
        4e-13
    }
    fn default_seed() -> u64 {
        42
    }

    pub fn dev_head_t(&self) -> CoordTrans {
        CoordTrans::translation(
            FIFFV_COORD_DEVICE,
            FIFFV_COORD_HEAD,
            Vec3::from_column_slice(&self.device_origin),
        )
    }

    fn validate(&self) -> Result<()> {
        if !(self.sfreq > 0.0) || !(self.trial_interval > 0.0) || !(self.pulse_width > 0.0) {
            return Err(DipoleError::InvalidInput(
                "Simulation needs positive sfreq, trial_interval and pulse_width".to_string(),
            ));
        }
        if self.n_dipoles == 0 || self.n_dipoles > N_PHANTOM_DIPOLES {
            return Err(DipoleError::InvalidInput(format!(
                "n_dipoles must lie in 1..={N_PHANTOM_DIPOLES}, got {}",
                self.n_dipoles
            )));
        }
        for (name, sd) in [("noise_mag", self.noise_mag), ("noise_grad", self.noise_grad)] {
            if !sd.is_finite() || sd < 0.0 {
                return Err(DipoleError::InvalidInput(format!(
                    "{name} must be a finite non-negative SD, got {sd}"
                )));
            }
        }
        if self.n_locations == 0 || self.trials_per_dipole == 0 {
            return Err(DipoleError::InvalidInput(
                "Simulation needs at least one sensor location and one trial".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sfreq: Self::default_sfreq(),
            n_locations: Self::default_n_locations(),
            helmet_radius: Self::default_helmet_radius(),
            device_origin: Self::default_device_origin(),
            n_dipoles: Self::default_n_dipoles(),
            trials_per_dipole: Self::default_trials_per_dipole(),
            trial_interval: Self::default_trial_interval(),
            t_peak: Self::default_t_peak(),
            pulse_width: Self::default_pulse_width(),
            amplitude_nam: Self::default_amplitude_nam(),
            noise_mag: Self::default_noise_mag(),
            noise_grad: Self::default_noise_grad(),
            first_samp: 0,
            seed: Self::default_seed(),
        }
    }
}

/// Simulate a phantom session: every event drives one dipole (condition id =
/// dipole number, 1-based) with a Hann pulse peaking `t_peak` after onset.
pub fn simulate(config: &SimulationConfig, sphere: &SphereModel) -> Result<Recording> {
    config.validate()?;
    let dev_head_t = config.dev_head_t();

    let mut channels = helmet(config.n_locations, config.helmet_radius, &dev_head_t);
    channels.push(ChannelInfo {
        ch_name: "STI 014".to_string(),
        kind: FIFFV_STIM_CH,
        coil_type: FIFFV_COIL_NONE,
        loc: [0.0; 12],
    });
    let stim_row = channels.len() - 1;
    let sensors = SensorArray::from_channels(&channels, &dev_head_t, &[])?;

    // Field pattern of each driven dipole at 1 nAm
    let dipoles = phantom_dipoles(1.0)?;
    let patterns = dipoles[..config.n_dipoles]
        .iter()
        .map(|d| lead_field(d.position(), sphere, &sensors).map(|g| g * (d.moment())))
        .collect::<Result<Vec<_>>>()?;

    let lead_in = 0.5;
    let n_events = config.n_dipoles * config.trials_per_dipole;
    let duration = 2.0 * lead_in + n_events as f64 * config.trial_interval;
    let n_times = (duration * config.sfreq).ceil() as usize;
    let mut data = DMat::zeros(channels.len(), n_times);

    let mut events = Vec::with_capacity(n_events);
    for trial in 0..config.trials_per_dipole {
        for dip in 0..config.n_dipoles {
            let k = trial * config.n_dipoles + dip;
            let onset = ((lead_in + k as f64 * config.trial_interval) * config.sfreq).round() as usize;
            events.push(Event {
                sample: config.first_samp + onset,
                id: dip as u32 + 1,
            });
        }
    }

    let peak_offset = (config.t_peak * config.sfreq).round() as i64;
    let half = (0.5 * config.pulse_width * config.sfreq).floor() as i64;
    for event in &events {
        let pattern = &patterns[event.id as usize - 1];
        let peak = (event.sample - config.first_samp) as i64 + peak_offset;
        data[(stim_row, event.sample - config.first_samp)] = event.id as f64;
        for k in -half..=half {
            let col = peak + k;
            if col < 0 || col as usize >= n_times {
                continue;
            }
            let w = hann(k as f64 / config.sfreq, config.pulse_width) * config.amplitude_nam;
            for (row, &ch) in sensors.channel_indices().iter().enumerate() {
                data[(ch, col as usize)] += pattern[row] * w;
            }
        }
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let noise = |sd: f64| {
        Normal::new(0.0, sd)
            .map_err(|e| DipoleError::InvalidInput(format!("Noise level {sd}: {e}")))
    };
    let mag_noise = noise(config.noise_mag)?;
    let grad_noise = noise(config.noise_grad)?;
    for (coil, &ch) in sensors.coils().iter().zip(sensors.channel_indices()) {
        let dist = if coil.is_gradiometer() { &grad_noise } else { &mag_noise };
        for col in 0..n_times {
            data[(ch, col)] += dist.sample(&mut rng);
        }
    }

    debug!(
        "Simulated {} channels x {} samples, noise {:.1} fT / {:.1} fT/cm",
        channels.len(),
        n_times,
        config.noise_mag * 1e15,
        config.noise_grad * 1e13
    );
    info!(
        "Simulated phantom session: {} dipoles x {} trials at {} Hz",
        config.n_dipoles, config.trials_per_dipole, config.sfreq
    );

    Ok(Recording {
        channels,
        dev_head_t,
        bads: Vec::new(),
        raw: Raw::new(data, config.sfreq, config.first_samp)?,
        events,
    })
}

/// Hann window of full width `width`, centred on zero, peak 1
fn hann(t: f64, width: f64) -> f64 {
    if t.abs() > 0.5 * width {
        0.0
    } else {
        0.5 * (1.0 + (2.0 * PI * t / width).cos())
    }
}

//! Continuous data, event-locked epochs and per-condition averages.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{DipoleError, Result};
use crate::{DMat, DVec};

/// Continuous recording: channels x times
#[derive(Debug, Clone)]
pub struct Raw {
    data: DMat,
    sfreq: f64,        // Sampling frequency (Hz)
    first_samp: usize, // Absolute index of the first column
}

impl Raw {
    pub fn new(data: DMat, sfreq: f64, first_samp: usize) -> Result<Self> {
        if !sfreq.is_finite() || sfreq <= 0.0 {
            return Err(DipoleError::InvalidInput(format!(
                "Sampling frequency must be positive, got {sfreq}"
            )));
        }
        Ok(Raw {
            data,
            sfreq,
            first_samp,
        })
    }

    pub fn data(&self) -> &DMat {
        &self.data
    }

    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    pub fn first_samp(&self) -> usize {
        self.first_samp
    }

    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }
}

/// Stimulus onset: absolute sample index and condition id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub sample: usize,
    pub id: u32,
}

/// Baseline window in seconds; `None` edges extend to the epoch limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochConfig {
    #[serde(default = "EpochConfig::default_tmin")]
    pub tmin: f64,
    #[serde(default = "EpochConfig::default_tmax")]
    pub tmax: f64,
    #[serde(default = "EpochConfig::default_baseline")]
    pub baseline: Option<Baseline>,
    #[serde(default = "EpochConfig::default_decim")]
    pub decim: usize,
    /// Drop the first and last trial of every condition
    #[serde(default = "EpochConfig::default_trim_edges")]
    pub trim_edges: bool,
}

impl EpochConfig {
    fn default_tmin() -> f64 {
        -0.1
    }
    fn default_tmax() -> f64 {
        0.1
    }
    fn default_baseline() -> Option<Baseline> {
        Some(Baseline {
            start: None,
            end: Some(-0.01),
        })
    }
    fn default_decim() -> usize {
        1
    }
    fn default_trim_edges() -> bool {
        true
    }
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            tmin: Self::default_tmin(),
            tmax: Self::default_tmax(),
            baseline: Self::default_baseline(),
            decim: Self::default_decim(),
            trim_edges: Self::default_trim_edges(),
        }
    }
}

/// Trials cut around events, each `n_picks x n_times`
#[derive(Debug, Clone)]
pub struct Epochs {
    data: Vec<DMat>,
    conditions: Vec<u32>,
    times: Vec<f64>,
    sfreq: f64, // After decimation
}

impl Epochs {
    /// Cut `picks` rows of `raw` around every event
    pub fn new(raw: &Raw, events: &[Event], picks: &[usize], config: &EpochConfig) -> Result<Self> {
        if !(config.tmin <= config.tmax) {
            return Err(DipoleError::InvalidInput(format!(
                "Epoch window [{}, {}] is empty",
                config.tmin, config.tmax
            )));
        }
        if config.decim == 0 {
            return Err(DipoleError::InvalidInput(
                "Decimation factor must be at least 1".to_string(),
            ));
        }
        if let Some(&bad) = picks.iter().find(|&&p| p >= raw.n_channels()) {
            return Err(DipoleError::DimensionMismatch(format!(
                "Pick {bad} out of range for {} channels",
                raw.n_channels()
            )));
        }

        let sfreq = raw.sfreq();
        // No epoch longer than the recording, or offset past its sample range, can fit
        let limit = (raw.first_samp() + raw.n_times()) as f64;
        if !config.tmin.is_finite()
            || !config.tmax.is_finite()
            || (config.tmax - config.tmin) * sfreq >= raw.n_times() as f64
            || (config.tmin * sfreq).abs() > limit
            || (config.tmax * sfreq).abs() > limit
        {
            return Err(DipoleError::InvalidInput(format!(
                "Epoch window [{}, {}] s does not fit in {} samples at {sfreq} Hz",
                config.tmin,
                config.tmax,
                raw.n_times()
            )));
        }
        let start = (config.tmin * sfreq).round() as i64;
        let stop = (config.tmax * sfreq).round() as i64;
        let n_full = (stop - start + 1) as usize;
        let full_times: Vec<f64> = (start..=stop).map(|s| s as f64 / sfreq).collect();

        let baseline = match &config.baseline {
            Some(b) => Some(baseline_range(b, &full_times, sfreq)?),
            None => None,
        };

        // Keep events whose window fits in the data, grouped by condition in order
        let mut by_condition: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        let mut dropped = 0usize;
        for event in events {
            let onset = event.sample as i64 - raw.first_samp() as i64 + start;
            if onset < 0 || onset as usize + n_full > raw.n_times() {
                dropped += 1;
                continue;
            }
            by_condition.entry(event.id).or_default().push(onset as usize);
        }
        if dropped > 0 {
            warn!("Dropped {dropped} epochs extending past the data");
        }

        if config.trim_edges {
            for onsets in by_condition.values_mut() {
                if onsets.len() < 3 {
                    onsets.clear();
                } else {
                    onsets.pop();
                    onsets.remove(0);
                }
            }
        }

        let keep: Vec<usize> = (0..n_full).step_by(config.decim).collect();
        let times: Vec<f64> = keep.iter().map(|&i| full_times[i]).collect();

        let mut data = Vec::new();
        let mut conditions = Vec::new();
        for (&id, onsets) in &by_condition {
            for &onset in onsets {
                let mut epoch = DMat::zeros(picks.len(), keep.len());
                for (row, &ch) in picks.iter().enumerate() {
                    let full = raw.data().view((ch, onset), (1, n_full));
                    let offset = match baseline {
                        Some((lo, hi)) => full.columns_range(lo..hi + 1).mean(),
                        None => 0.0,
                    };
                    for (col, &i) in keep.iter().enumerate() {
                        epoch[(row, col)] = full[(0, i)] - offset;
                    }
                }
                data.push(epoch);
                conditions.push(id);
            }
        }

        info!(
            "Created {} epochs in {} conditions ({} channels, {} samples each)",
            data.len(),
            by_condition.values().filter(|v| !v.is_empty()).count(),
            picks.len(),
            times.len()
        );

        Ok(Epochs {
            data,
            conditions,
            times,
            sfreq: sfreq / config.decim as f64,
        })
    }

    pub fn data(&self) -> &[DMat] {
        &self.data
    }

    /// Condition id of every epoch
    pub fn conditions(&self) -> &[u32] {
        &self.conditions
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    pub fn n_channels(&self) -> usize {
        self.data.first().map_or(0, |e| e.nrows())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Distinct condition ids, ascending
    pub fn condition_ids(&self) -> Vec<u32> {
        let mut ids = self.conditions.clone();
        ids.dedup();
        ids
    }

    /// Average all epochs of one condition
    pub fn average(&self, id: u32) -> Result<Evoked> {
        let mut sum: Option<DMat> = None;
        let mut nave = 0usize;
        for (epoch, _) in self.data.iter().zip(&self.conditions).filter(|(_, c)| **c == id) {
            match sum.as_mut() {
                Some(s) => *s += epoch,
                None => sum = Some(epoch.clone()),
            }
            nave += 1;
        }
        let sum = sum.ok_or_else(|| DipoleError::NoData(format!("No epochs for condition {id}")))?;
        debug!("Averaged condition {id}: nave = {nave}");
        Ok(Evoked {
            data: sum / nave as f64,
            times: self.times.clone(),
            nave,
            condition: id,
        })
    }

    /// One average per condition, in ascending id order
    pub fn average_all(&self) -> Result<Vec<Evoked>> {
        self.condition_ids().into_iter().map(|id| self.average(id)).collect()
    }
}

/// Per-condition average
#[derive(Debug, Clone)]
pub struct Evoked {
    pub data: DMat, // channels x times
    pub times: Vec<f64>,
    pub nave: usize,
    pub condition: u32,
}

impl Evoked {
    /// The measurement vector at the time index nearest to `t`
    pub fn sample_at(&self, t: f64) -> Result<EvokedSample> {
        if !t.is_finite() {
            return Err(DipoleError::InvalidInput(format!("Invalid sample time {t}")));
        }
        let idx = self
            .times
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - t).abs().total_cmp(&(b.1 - t).abs()))
            .map(|(i, _)| i)
            .ok_or_else(|| DipoleError::NoData("Evoked response has no samples".to_string()))?;
        Ok(EvokedSample {
            data: self.data.column(idx).into_owned(),
            time: self.times[idx],
            condition: self.condition,
            nave: self.nave,
        })
    }
}

/// Averaged measurement at one time instant
#[derive(Debug, Clone)]
pub struct EvokedSample {
    pub data: DVec, // One value per sensor
    pub time: f64,
    pub condition: u32,
    pub nave: usize,
}

/// Column range of the baseline window within the full-rate epoch times
fn baseline_range(baseline: &Baseline, times: &[f64], sfreq: f64) -> Result<(usize, usize)> {
    let slack = 0.5 / sfreq;
    let lo = baseline.start.unwrap_or(f64::NEG_INFINITY);
    let hi = baseline.end.unwrap_or(f64::INFINITY);
    let first = times.iter().position(|&t| t >= lo - slack);
    let last = times.iter().rposition(|&t| t <= hi + slack);
    match (first, last) {
        (Some(a), Some(b)) if a <= b => Ok((a, b)),
        _ => Err(DipoleError::InvalidInput(format!(
            "Baseline window {:?}..{:?} s is outside the epoch",
            baseline.start, baseline.end
        ))),
    }
}

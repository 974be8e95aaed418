//! Fitted vs. true dipole errors.

use serde::Serialize;

use crate::batch::SampleOutcome;
use crate::dipole::Dipole;
use crate::error::{DipoleError, Result};

/// Errors of one fitted dipole against its ground truth
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub index: usize,
    pub position_error_mm: f64,
    pub angle_error_deg: f64,
    pub amplitude_error_nam: f64,
}

impl ComparisonRow {
    fn new(index: usize, fitted: &Dipole, truth: &Dipole) -> Self {
        // Orientation sign is arbitrary, only the axis is compared
        let cos = fitted
            .orientation()
            .dot(truth.orientation())
            .abs()
            .clamp(-1.0, 1.0);
        ComparisonRow {
            index,
            position_error_mm: (fitted.position() - truth.position()).norm() * 1e3,
            angle_error_deg: cos.acos().to_degrees(),
            amplitude_error_nam: (truth.amplitude().abs() - fitted.amplitude().abs()).abs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub rows: Vec<ComparisonRow>,
    pub mean_position_error_mm: f64,
    pub mean_angle_error_deg: f64,
    pub mean_amplitude_error_nam: f64,
}

impl Comparison {
    fn from_rows(rows: Vec<ComparisonRow>) -> Self {
        // NaN means when nothing was compared
        let mean = |f: fn(&ComparisonRow) -> f64| {
            rows.iter().map(f).sum::<f64>() / rows.len() as f64
        };
        Comparison {
            mean_position_error_mm: mean(|r| r.position_error_mm),
            mean_angle_error_deg: mean(|r| r.angle_error_deg),
            mean_amplitude_error_nam: mean(|r| r.amplitude_error_nam),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Largest position error (mm), if any row exists
    pub fn max_position_error_mm(&self) -> Option<f64> {
        self.rows
            .iter()
            .map(|r| r.position_error_mm)
            .max_by(f64::total_cmp)
    }
}

/// Compare fitted dipoles to the truth, pairing by index
pub fn compare(fitted: &[Dipole], truth: &[Dipole]) -> Result<Comparison> {
    if fitted.len() != truth.len() {
        return Err(DipoleError::DimensionMismatch(format!(
            "{} fitted dipoles for {} true dipoles",
            fitted.len(),
            truth.len()
        )));
    }
    let rows = fitted
        .iter()
        .zip(truth)
        .enumerate()
        .map(|(i, (f, t))| ComparisonRow::new(i, f, t))
        .collect();
    Ok(Comparison::from_rows(rows))
}

/// Compare batch outcomes to the truth. Failed samples are skipped; diverged
/// fits contribute their best estimate. Rows keep the sample index.
pub fn compare_outcomes(outcomes: &[SampleOutcome], truth: &[Dipole]) -> Result<Comparison> {
    if outcomes.len() != truth.len() {
        return Err(DipoleError::DimensionMismatch(format!(
            "{} outcomes for {} true dipoles",
            outcomes.len(),
            truth.len()
        )));
    }
    let rows = outcomes
        .iter()
        .zip(truth)
        .enumerate()
        .filter_map(|(i, (outcome, t))| {
            let fit = match outcome {
                Ok(fit) => Some(fit),
                Err(err) => err.best_effort(),
            };
            fit.map(|fit| ComparisonRow::new(i, &fit.dipole, t))
        })
        .collect();
    Ok(Comparison::from_rows(rows))
}

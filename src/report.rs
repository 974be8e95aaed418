//! CSV export and text summaries of batch results.

use std::io::Write;

use serde::Serialize;

use crate::batch::{BatchReport, SampleOutcome};
use crate::compare::Comparison;
use crate::error::Result;

/// One CSV line per sample; fit columns are empty when nothing was fit
#[derive(Debug, Serialize)]
struct DipoleRow<'a> {
    index: usize,
    status: &'a str,
    time: Option<f64>,
    x_mm: Option<f64>,
    y_mm: Option<f64>,
    z_mm: Option<f64>,
    ori_x: Option<f64>,
    ori_y: Option<f64>,
    ori_z: Option<f64>,
    amplitude_nam: Option<f64>,
    gof: Option<f64>,
    iterations: Option<usize>,
    message: String,
}

impl<'a> DipoleRow<'a> {
    fn new(index: usize, outcome: &'a SampleOutcome) -> Self {
        let (status, fit, message) = match outcome {
            Ok(fit) => ("ok", Some(fit), String::new()),
            Err(err) => (err.kind_label(), err.best_effort(), err.to_string()),
        };
        let pos = fit.map(|f| f.dipole.position() * 1e3);
        let ori = fit.map(|f| *f.dipole.orientation());
        DipoleRow {
            index,
            status,
            time: fit.map(|f| f.dipole.time()),
            x_mm: pos.map(|p| p.x),
            y_mm: pos.map(|p| p.y),
            z_mm: pos.map(|p| p.z),
            ori_x: ori.map(|o| o.x),
            ori_y: ori.map(|o| o.y),
            ori_z: ori.map(|o| o.z),
            amplitude_nam: fit.map(|f| f.dipole.amplitude()),
            gof: fit.map(|f| f.dipole.gof()),
            iterations: fit.map(|f| f.iterations),
            message,
        }
    }
}

/// Write one row per outcome, failures included
pub fn write_dipoles_csv<W: Write>(writer: W, outcomes: &[SampleOutcome]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for (i, outcome) in outcomes.iter().enumerate() {
        wtr.serialize(DipoleRow::new(i, outcome))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_comparison_csv<W: Write>(writer: W, comparison: &Comparison) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in &comparison.rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Human-readable summary of a batch and its comparison
pub fn format_summary(report: &BatchReport, comparison: &Comparison) -> String {
    let mut out = format!(
        "Fits: {}/{} succeeded, {} failed ({} diverged)\n",
        report.succeeded,
        report.total,
        report.failed(),
        report.diverged
    );
    for (idx, kind, message) in &report.failures {
        out.push_str(&format!("  sample {idx:>3}: {kind}: {message}\n"));
    }
    if comparison.is_empty() {
        out.push_str("No dipoles to compare\n");
        return out;
    }
    out.push_str(&format!(
        "Compared {} dipoles\n  mean position error:  {:.2} mm\n  mean angle error:     {:.2} deg\n  mean amplitude error: {:.2} nAm\n",
        comparison.len(),
        comparison.mean_position_error_mm,
        comparison.mean_angle_error_deg,
        comparison.mean_amplitude_error_nam
    ));
    if let Some(max) = comparison.max_position_error_mm() {
        out.push_str(&format!("  max position error:   {max:.2} mm\n"));
    }
    out
}

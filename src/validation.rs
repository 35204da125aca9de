//! Pre-flight checks run before any command is compiled.
//!
//! [`validate`] collects every independent violation instead of stopping at the
//! first one, so an operator sees all problems with a scan in one pass.

use crate::params::{Axis, Limits, ScanParameters};
use tracing::{error, info, warn};

/// Successful validation summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationReport {
    /// Wavetable points the scan needs
    pub total_points: f64,
    /// Share of the device capacity used, in percent
    pub capacity_used_percent: f64,
}

/// Wavetable points a scan occupies: `Σ_axis (MOVETIME + EXPOSURE) * N_axis`,
/// with each duration rounded to whole points the way the compiler emits them.
pub fn required_datapoints(params: &ScanParameters) -> f64 {
    let step = params.step_points() as f64;
    Axis::ALL
        .iter()
        .map(|&axis| step * f64::from(params.steps(axis)))
        .sum()
}

/// Check a scan against travel limits and the wavetable memory budget.
///
/// Returns every violation found; the list is never empty on `Err`.
pub fn validate(params: &ScanParameters, limits: &Limits) -> Result<ValidationReport, Vec<String>> {
    let mut failures = Vec::new();

    check_fields(params, &mut failures);
    check_row_count(params);

    for axis in Axis::ALL {
        let travel = limits.range(axis);
        let half_range = params.travel(axis) / 2.0;
        let centre = params.centre(axis);

        if centre - half_range <= travel.min {
            failures.push(format!("Will hit {axis} negative limit"));
        }
        if centre + half_range >= travel.max {
            failures.push(format!("Will hit {axis} positive limit"));
        }
    }

    let total_points = required_datapoints(params);
    let capacity = limits.max_datapoints as f64;
    let capacity_used_percent = total_points / capacity * 100.0;

    if total_points > capacity {
        failures.push(format!(
            "Too many points in scan. Requested {total_points:.0} but only {} available on controller",
            limits.max_datapoints
        ));
    } else {
        info!(
            "Wavetable will use {total_points:.0} of {} data points ({capacity_used_percent:.1}%)",
            limits.max_datapoints
        );
    }

    if failures.is_empty() {
        info!("Parameter checks passed");
        Ok(ValidationReport {
            total_points,
            capacity_used_percent,
        })
    } else {
        error!("Parameter checks failed. Reasons: {}", failures.join("; "));
        Err(failures)
    }
}

fn check_fields(params: &ScanParameters, failures: &mut Vec<String>) {
    for axis in Axis::ALL {
        if params.steps(axis) < 1 {
            failures.push(format!("N{} must be at least 1", axis.label().to_uppercase()));
        }
        let step = params.step_size(axis);
        if !(step.is_finite() && step > 0.0) {
            failures.push(format!("D{} must be a positive step size", axis.label().to_uppercase()));
        }
        if !params.centre(axis).is_finite() {
            failures.push(format!("{}0 must be finite", axis.label().to_uppercase()));
        }
    }
    if !(params.movetime.is_finite() && params.movetime > 0.0) {
        failures.push("MOVETIME must be positive".to_string());
    }
    if !(params.exposure.is_finite() && params.exposure > 0.0) {
        failures.push("EXPOSURE must be positive".to_string());
    }
    if !params.theta.is_finite() {
        failures.push("THETA must be finite".to_string());
    }
}

/// The Y generator repeats a row pair `NY / 2` times, so an odd `NY` drops
/// the last row and `NY = 1` programs zero cycles, which the controller
/// treats as endless output.
fn check_row_count(params: &ScanParameters) {
    match params.ny {
        1 => warn!("NY = 1 gives WGC 1 0: the wave generators will run until aborted"),
        ny if ny % 2 == 1 => warn!(
            "NY = {ny} is odd: only {} rows will be scanned",
            2 * params.row_pair_cycles()
        ),
        _ => {}
    }
}

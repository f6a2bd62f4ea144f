//! Reconciliation check: driver contributions must add back up to the
//! observed change of the outcome metric.

use crate::decomposition::{DriverContribution, OutcomeInfo};
use crate::error::{DecompositionError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Fixed tolerance for the percentage-point check.
pub const PPT_TOLERANCE: f64 = 0.01;

/// Default absolute tolerance: 0.1% of the change, at least 0.01.
pub fn default_tolerance(absolute_change: f64) -> f64 {
    (absolute_change.abs() * 0.001).max(0.01)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationCheck {
    pub ok: bool,
    /// Empty when `ok`
    pub message: String,
    pub absolute_difference: f64,
    pub ppt_difference: f64,
    pub tolerance: f64,
}

impl ReconciliationCheck {
    /// Turn a failed check into `ReconciliationMismatch`.
    pub fn into_result(self) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(DecompositionError::ReconciliationMismatch(self.message))
        }
    }
}

/// Compare summed contributions against the outcome's observed change.
///
/// Never fails; a mismatch is reported through `ok = false` and a message
/// carrying both differences.
pub fn validate_decomposition(
    drivers: &[DriverContribution],
    outcome: &OutcomeInfo,
    tolerance: Option<f64>,
) -> ReconciliationCheck {
    let tolerance = tolerance.unwrap_or_else(|| default_tolerance(outcome.absolute_change));

    let absolute_difference =
        (outcome.sum_absolute_contributions - outcome.absolute_change).abs();
    let ppt_difference =
        (outcome.sum_ppt_contributions - outcome.percentage_points_change).abs();

    // Rows must also agree with the totals recorded in the outcome.
    let row_abs_sum: f64 = drivers.iter().map(|d| d.absolute_contribution).sum();
    let row_ppt_sum: f64 = drivers
        .iter()
        .map(|d| d.percentage_points_contribution)
        .sum();
    let rows_consistent = (row_abs_sum - outcome.sum_absolute_contributions).abs() < tolerance
        && (row_ppt_sum - outcome.sum_ppt_contributions).abs() < PPT_TOLERANCE;

    let ok = absolute_difference < tolerance && ppt_difference < PPT_TOLERANCE && rows_consistent;

    let message = if absolute_difference >= tolerance || ppt_difference >= PPT_TOLERANCE {
        format!(
            "Sum of driver contributions does not match total change in {}. \
             Absolute difference: {:.2}, PPT difference: {:.2} ppts.",
            outcome.metric_name, absolute_difference, ppt_difference
        )
    } else if !rows_consistent {
        format!(
            "Driver rows of {} do not sum to the recorded totals. \
             Rows: {:.2} ({:.2} ppts), recorded: {:.2} ({:.2} ppts).",
            outcome.metric_name,
            row_abs_sum,
            row_ppt_sum,
            outcome.sum_absolute_contributions,
            outcome.sum_ppt_contributions
        )
    } else {
        String::new()
    };

    if !ok {
        warn!("Reconciliation failed: {}", message);
    }

    ReconciliationCheck {
        ok,
        message,
        absolute_difference,
        ppt_difference,
        tolerance,
    }
}

//! Log decomposition of a multiplicative metric
//!
//! For `metric = prod(numerators) / prod(denominators) * k` the identity
//! `ln(metric_t1 / metric_t0) = sum(log_driver)` holds, where `log_driver` is
//! `ln(growth)` for numerators and `-ln(growth)` for denominators. Each driver's
//! share of the total log change apportions the metric's absolute and
//! percentage-point change, so contributions reconcile exactly.

use crate::error::{DecompositionError, Result};
use crate::formula::{DriverRole, FormulaSpec};
use crate::validation::{self, ReconciliationCheck};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

/// Below this magnitude the total log change is treated as zero.
pub const DEGENERATE_LOG_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    fn of(absolute_contribution: f64) -> Self {
        if absolute_contribution >= 0.0 {
            Direction::Positive
        } else {
            Direction::Negative
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Positive => "positive",
            Direction::Negative => "negative",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribution row for a single driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverContribution {
    pub driver: String,
    pub role: DriverRole,
    pub time0_value: f64,
    pub time1_value: f64,
    /// t1 / t0
    pub growth_factor: f64,
    /// (t1 - t0) / t0
    pub pct_change: f64,
    /// Signed log term; negated for denominators
    pub log_driver: f64,
    /// log_driver / total log; shares sum to 1
    pub log_share: f64,
    pub percentage_points_contribution: f64,
    pub absolute_contribution: f64,
    pub direction: Direction,
}

/// Observed change of the outcome metric alongside the summed contributions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeInfo {
    pub metric_name: String,
    pub time0_value: f64,
    pub time1_value: f64,
    pub absolute_change: f64,
    pub percentage_points_change: f64,
    pub sum_absolute_contributions: f64,
    pub sum_ppt_contributions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub drivers: Vec<DriverContribution>,
    pub outcome: OutcomeInfo,
}

impl Decomposition {
    pub fn driver(&self, name: &str) -> Option<&DriverContribution> {
        self.drivers.iter().find(|d| d.driver == name)
    }

    pub fn total_log(&self) -> f64 {
        self.drivers.iter().map(|d| d.log_driver).sum()
    }

    /// Driver with the largest absolute contribution.
    pub fn primary_driver(&self) -> Option<&DriverContribution> {
        self.drivers.iter().max_by(|a, b| {
            a.absolute_contribution
                .abs()
                .partial_cmp(&b.absolute_contribution.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Reconciliation check with the default tolerance.
    pub fn validate(&self) -> ReconciliationCheck {
        validation::validate_decomposition(&self.drivers, &self.outcome, None)
    }
}

/// Check that every name has a value in both periods.
pub fn validate_inputs(
    t0: &HashMap<String, f64>,
    t1: &HashMap<String, f64>,
    required: &[&str],
) -> Result<()> {
    for (context, values) in [("t0", t0), ("t1", t1)] {
        let missing: Vec<String> = required
            .iter()
            .filter(|name| !values.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DecompositionError::missing(context, missing));
        }
    }
    Ok(())
}

fn growth_factor(name: &str, time0_value: f64, time1_value: f64) -> Result<f64> {
    let growth = time1_value / time0_value;
    if time0_value == 0.0 || !growth.is_finite() || growth <= 0.0 {
        return Err(DecompositionError::InvalidGrowth {
            driver: name.to_string(),
            time0_value,
            time1_value,
        });
    }
    Ok(growth)
}

/// Attribute the change of `metric_name` between `t0` and `t1` to its drivers.
///
/// Rows come back numerators first, then denominators, each in list order.
pub fn decompose(
    metric_name: &str,
    t0: &HashMap<String, f64>,
    t1: &HashMap<String, f64>,
    numerators: &[String],
    denominators: &[String],
) -> Result<Decomposition> {
    let roles: Vec<(&str, DriverRole)> = numerators
        .iter()
        .map(|n| (n.as_str(), DriverRole::Numerator))
        .chain(denominators.iter().map(|d| (d.as_str(), DriverRole::Denominator)))
        .collect();

    let mut required: Vec<&str> = roles.iter().map(|(name, _)| *name).collect();
    required.push(metric_name);
    validate_inputs(t0, t1, &required)?;

    struct Partial<'a> {
        driver: &'a str,
        role: DriverRole,
        time0_value: f64,
        time1_value: f64,
        growth_factor: f64,
        log_driver: f64,
    }

    let mut partials = Vec::with_capacity(roles.len());
    for (driver, role) in roles {
        let time0_value = t0[driver];
        let time1_value = t1[driver];
        let growth = growth_factor(driver, time0_value, time1_value)?;
        let log_driver = match role {
            DriverRole::Numerator => growth.ln(),
            DriverRole::Denominator => -growth.ln(),
        };
        partials.push(Partial {
            driver,
            role,
            time0_value,
            time1_value,
            growth_factor: growth,
            log_driver,
        });
    }

    let total_log: f64 = partials.iter().map(|p| p.log_driver).sum();
    if total_log.abs() <= DEGENERATE_LOG_EPSILON {
        return Err(DecompositionError::DegenerateTotal { total_log });
    }

    let metric_t0 = t0[metric_name];
    let metric_t1 = t1[metric_name];
    let metric_growth = growth_factor(metric_name, metric_t0, metric_t1)?;
    let metric_pct_change = (metric_growth - 1.0) * 100.0;
    let metric_abs_change = metric_t1 - metric_t0;

    let drivers: Vec<DriverContribution> = partials
        .into_iter()
        .map(|p| {
            let log_share = p.log_driver / total_log;
            let absolute_contribution = log_share * metric_abs_change;
            DriverContribution {
                driver: p.driver.to_string(),
                role: p.role,
                time0_value: p.time0_value,
                time1_value: p.time1_value,
                growth_factor: p.growth_factor,
                pct_change: (p.time1_value - p.time0_value) / p.time0_value,
                log_driver: p.log_driver,
                log_share,
                percentage_points_contribution: log_share * metric_pct_change,
                absolute_contribution,
                direction: Direction::of(absolute_contribution),
            }
        })
        .collect();

    let outcome = OutcomeInfo {
        metric_name: metric_name.to_string(),
        time0_value: metric_t0,
        time1_value: metric_t1,
        absolute_change: metric_abs_change,
        percentage_points_change: metric_pct_change,
        sum_absolute_contributions: drivers.iter().map(|d| d.absolute_contribution).sum(),
        sum_ppt_contributions: drivers
            .iter()
            .map(|d| d.percentage_points_contribution)
            .sum(),
    };

    debug!(
        "Decomposed {}: {} drivers, total log {:.6}, change {:.4} ({:.4} ppts)",
        metric_name,
        drivers.len(),
        total_log,
        metric_abs_change,
        metric_pct_change
    );

    Ok(Decomposition { drivers, outcome })
}

/// Decompose using only a formula string.
///
/// The metric is the single key of `t0` that is not one of the formula's drivers.
pub fn decompose_expression(
    formula: &str,
    t0: &HashMap<String, f64>,
    t1: &HashMap<String, f64>,
) -> Result<Decomposition> {
    let parsed = crate::formula::parse_formula(formula);
    let candidates: BTreeSet<&str> = t0
        .keys()
        .map(String::as_str)
        .filter(|key| {
            !parsed.numerators.iter().any(|n| n == key)
                && !parsed.denominators.iter().any(|d| d == key)
        })
        .collect();

    if candidates.len() != 1 {
        return Err(DecompositionError::MetricNotFound(format!(
            "could not uniquely identify the metric for '{}'; non-driver keys in t0: [{}]",
            formula,
            candidates.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }

    let metric_name = candidates.into_iter().next().unwrap_or_default().to_string();
    FormulaSpec::new(metric_name, parsed.numerators, parsed.denominators)?.decompose(t0, t1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sales_periods() -> (HashMap<String, f64>, HashMap<String, f64>) {
        (
            values(&[("Sales", 100000.0), ("Spend", 50000.0), ("CPA", 50.0), ("AOV", 100.0)]),
            values(&[("Sales", 40000.0), ("Spend", 30000.0), ("CPA", 60.0), ("AOV", 80.0)]),
        )
    }

    #[test]
    fn test_decompose_sales_scenario() {
        let (t0, t1) = sales_periods();
        let result = decompose("Sales", &t0, &t1, &names(&["Spend", "AOV"]), &names(&["CPA"])).unwrap();

        let order: Vec<&str> = result.drivers.iter().map(|d| d.driver.as_str()).collect();
        assert_eq!(order, vec!["Spend", "AOV", "CPA"]);

        let spend = result.driver("Spend").unwrap();
        assert!((spend.growth_factor - 0.6).abs() < 1e-12);
        assert!((spend.log_driver - 0.6f64.ln()).abs() < 1e-12);
        assert!((spend.pct_change + 0.4).abs() < 1e-12);

        let cpa = result.driver("CPA").unwrap();
        assert_eq!(cpa.role, DriverRole::Denominator);
        assert!((cpa.log_driver + 1.2f64.ln()).abs() < 1e-12);
        assert_eq!(cpa.direction, Direction::Negative);

        let aov = result.driver("AOV").unwrap();
        assert!((aov.log_driver - 0.8f64.ln()).abs() < 1e-12);

        assert_eq!(result.outcome.absolute_change, -60000.0);
        assert!((result.outcome.percentage_points_change + 60.0).abs() < 1e-9);
        assert!((result.total_log() - 0.4f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_contributions_reconcile_exactly() {
        let (t0, t1) = sales_periods();
        let result = decompose("Sales", &t0, &t1, &names(&["Spend", "AOV"]), &names(&["CPA"])).unwrap();
        let share_sum: f64 = result.drivers.iter().map(|d| d.log_share).sum();
        assert!((share_sum - 1.0).abs() < 1e-12);
        assert!((result.outcome.sum_absolute_contributions - result.outcome.absolute_change).abs() < 1e-6);
        assert!((result.outcome.sum_ppt_contributions - result.outcome.percentage_points_change).abs() < 1e-9);
        assert!(result.validate().ok);
    }

    #[test]
    fn test_primary_driver_is_largest_absolute() {
        let (t0, t1) = sales_periods();
        let result = decompose("Sales", &t0, &t1, &names(&["Spend", "AOV"]), &names(&["CPA"])).unwrap();
        assert_eq!(result.primary_driver().unwrap().driver, "Spend");
    }

    #[test]
    fn test_degenerate_total_is_an_error() {
        let t0 = values(&[("M", 1.0), ("A", 1.0), ("B", 1.0)]);
        let t1 = values(&[("M", 1.0), ("A", 2.0), ("B", 2.0)]);
        let err = decompose("M", &t0, &t1, &names(&["A"]), &names(&["B"])).unwrap_err();
        assert!(matches!(err, DecompositionError::DegenerateTotal { .. }));
    }

    #[test]
    fn test_zero_t0_is_invalid_growth() {
        let t0 = values(&[("M", 1.0), ("A", 0.0)]);
        let t1 = values(&[("M", 2.0), ("A", 2.0)]);
        let err = decompose("M", &t0, &t1, &names(&["A"]), &[]).unwrap_err();
        match err {
            DecompositionError::InvalidGrowth { driver, .. } => assert_eq!(driver, "A"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_t1_is_invalid_growth() {
        let t0 = values(&[("M", 1.0), ("A", 1.0)]);
        let t1 = values(&[("M", 0.0), ("A", 0.0)]);
        let err = decompose("M", &t0, &t1, &names(&["A"]), &[]).unwrap_err();
        assert!(matches!(err, DecompositionError::InvalidGrowth { .. }));
    }

    #[test]
    fn test_sign_flip_is_invalid_growth() {
        let t0 = values(&[("M", 1.0), ("A", 1.0), ("B", -1.0)]);
        let t1 = values(&[("M", 1.0), ("A", 1.0), ("B", 1.0)]);
        let err = decompose("M", &t0, &t1, &names(&["A"]), &names(&["B"])).unwrap_err();
        assert!(matches!(err, DecompositionError::InvalidGrowth { ref driver, .. } if driver == "B"));
    }

    #[test]
    fn test_zero_metric_at_t0_is_invalid_growth() {
        let t0 = values(&[("M", 0.0), ("A", 1.0), ("B", 1.0)]);
        let t1 = values(&[("M", 5.0), ("A", 2.0), ("B", 1.0)]);
        let err = decompose("M", &t0, &t1, &names(&["A"]), &names(&["B"])).unwrap_err();
        match err {
            DecompositionError::InvalidGrowth { driver, time0_value, .. } => {
                assert_eq!(driver, "M");
                assert_eq!(time0_value, 0.0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_negative_metric_at_t1_is_invalid_growth() {
        let t0 = values(&[("M", 2.0), ("A", 1.0), ("B", 1.0)]);
        let t1 = values(&[("M", -4.0), ("A", 2.0), ("B", 1.0)]);
        let err = decompose("M", &t0, &t1, &names(&["A"]), &names(&["B"])).unwrap_err();
        match err {
            DecompositionError::InvalidGrowth { driver, time1_value, .. } => {
                assert_eq!(driver, "M");
                assert_eq!(time1_value, -4.0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_near_zero_total_log_is_degenerate() {
        // ln(2) - ln(2 + 4e-14) is about -2e-14: not zero, but inside the epsilon.
        let t0 = values(&[("M", 1.0), ("A", 1.0), ("B", 1.0)]);
        let t1 = values(&[("M", 1.0), ("A", 2.0), ("B", 2.0 + 4e-14)]);
        let err = decompose("M", &t0, &t1, &names(&["A"]), &names(&["B"])).unwrap_err();
        match err {
            DecompositionError::DegenerateTotal { total_log } => {
                assert_ne!(total_log, 0.0);
                assert!(total_log.abs() <= DEGENERATE_LOG_EPSILON);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_values_are_reported_per_period() {
        let t0 = values(&[("M", 1.0), ("A", 1.0), ("B", 1.0)]);
        let t1 = values(&[("M", 2.0)]);
        let err = decompose("M", &t0, &t1, &names(&["A"]), &names(&["B"])).unwrap_err();
        match err {
            DecompositionError::MissingDriver { context, names } => {
                assert_eq!(context, "t1");
                assert_eq!(names, vec!["A", "B"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decompose_expression_infers_metric() {
        let (t0, t1) = sales_periods();
        let result = decompose_expression("Spend / CPA * AOV", &t0, &t1).unwrap();
        assert_eq!(result.outcome.metric_name, "Sales");
        assert_eq!(result.drivers.len(), 3);
    }

    #[test]
    fn test_decompose_expression_ambiguous_metric() {
        let (mut t0, t1) = sales_periods();
        t0.insert("Orders".to_string(), 1000.0);
        let err = decompose_expression("Spend / CPA * AOV", &t0, &t1).unwrap_err();
        assert!(matches!(err, DecompositionError::MetricNotFound(_)));
    }
}

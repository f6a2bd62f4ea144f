use crate::error::{DecompositionError, Result};
use std::collections::HashMap;

/// Compute a metric from driver values:
/// `(product of numerators / product of denominators) * multiplier`.
///
/// Empty products are 1. Every listed driver must be present in `values`.
pub fn evaluate(
    values: &HashMap<String, f64>,
    numerators: &[String],
    denominators: &[String],
    multiplier: f64,
) -> Result<f64> {
    let missing: Vec<String> = numerators
        .iter()
        .chain(denominators.iter())
        .filter(|driver| !values.contains_key(driver.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(DecompositionError::missing("values", missing));
    }

    let numerator_product: f64 = numerators.iter().map(|n| values[n.as_str()]).product();
    let denominator_product: f64 = denominators.iter().map(|d| values[d.as_str()]).product();

    if denominator_product == 0.0 {
        return Err(DecompositionError::DivisionByZero);
    }

    Ok((numerator_product / denominator_product) * multiplier)
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

    #[test]
    fn test_evaluate_basic() {
        let v = values(&[("Spend", 50000.0), ("CPA", 50.0), ("AOV", 100.0)]);
        let result = evaluate(&v, &names(&["Spend", "AOV"]), &names(&["CPA"]), 1.0).unwrap();
        assert_eq!(result, 50000.0 / 50.0 * 100.0);
    }

    #[test]
    fn test_evaluate_applies_multiplier() {
        let v = values(&[("CPM", 20.0), ("CTR", 0.02), ("CVR", 0.05)]);
        let result = evaluate(&v, &names(&["CPM"]), &names(&["CTR", "CVR"]), 0.001).unwrap();
        assert!((result - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_empty_lists_yield_multiplier() {
        let v = values(&[]);
        assert_eq!(evaluate(&v, &[], &[], 3.5).unwrap(), 3.5);
    }

    #[test]
    fn test_evaluate_missing_value_names_driver() {
        let v = values(&[("Spend", 50000.0), ("CPA", 50.0)]);
        let err = evaluate(&v, &names(&["Spend", "AOV"]), &names(&["CPA"]), 1.0).unwrap_err();
        match err {
            DecompositionError::MissingDriver { names, .. } => assert_eq!(names, vec!["AOV"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_evaluate_missing_denominator() {
        let v = values(&[("Spend", 50000.0), ("AOV", 100.0)]);
        let err = evaluate(&v, &names(&["Spend", "AOV"]), &names(&["CPA"]), 1.0).unwrap_err();
        assert!(err.to_string().contains("CPA"));
    }

    #[test]
    fn test_evaluate_division_by_zero() {
        let v = values(&[("Spend", 50000.0), ("CPA", 0.0), ("AOV", 100.0)]);
        let err = evaluate(&v, &names(&["Spend", "AOV"]), &names(&["CPA"]), 1.0).unwrap_err();
        assert!(matches!(err, DecompositionError::DivisionByZero));
    }
}

//! Waterfall chart series
//!
//! Builds the bars of a start-to-end waterfall: the t0 value, one floating bar
//! per driver contribution, and the t1 value. Drawing is left to the caller.

use crate::decomposition::Decomposition;
use crate::error::{DecompositionError, Result};
use crate::report;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarKind {
    Start,
    Delta,
    End,
}

/// How a bar should be read for this metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Neutral,
    Favorable,
    Unfavorable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallBar {
    pub label: String,
    pub kind: BarKind,
    /// Bar height; signed for deltas
    pub height: f64,
    /// Where the bar starts
    pub base: f64,
    pub tone: Tone,
    /// Percentage-point contribution, deltas only
    pub ppt_contribution: Option<f64>,
}

impl WaterfallBar {
    /// Top of the bar after applying its height.
    pub fn end(&self) -> f64 {
        self.base + self.height
    }
}

/// Bars in display order. A positive delta is favorable when `higher_is_better`.
pub fn build_waterfall(
    decomposition: &Decomposition,
    driver_order: &[String],
    higher_is_better: bool,
) -> Result<Vec<WaterfallBar>> {
    let outcome = &decomposition.outcome;
    let metric = report::clean_metric_name(&outcome.metric_name);

    let unknown: Vec<String> = driver_order
        .iter()
        .filter(|name| decomposition.driver(name).is_none())
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(DecompositionError::missing("driver order", unknown));
    }

    let mut bars = Vec::with_capacity(driver_order.len() + 2);
    bars.push(WaterfallBar {
        label: format!("{} (t0)", metric),
        kind: BarKind::Start,
        height: outcome.time0_value,
        base: 0.0,
        tone: Tone::Neutral,
        ppt_contribution: None,
    });

    let mut running = outcome.time0_value;
    for contribution in driver_order.iter().filter_map(|name| decomposition.driver(name)) {
        let delta = contribution.absolute_contribution;
        let tone = if (delta >= 0.0) == higher_is_better {
            Tone::Favorable
        } else {
            Tone::Unfavorable
        };
        bars.push(WaterfallBar {
            label: contribution.driver.clone(),
            kind: BarKind::Delta,
            height: delta,
            base: running,
            tone,
            ppt_contribution: Some(contribution.percentage_points_contribution),
        });
        running += delta;
    }

    bars.push(WaterfallBar {
        label: format!("{} (t1)", metric),
        kind: BarKind::End,
        height: outcome.time1_value,
        base: 0.0,
        tone: Tone::Neutral,
        ppt_contribution: None,
    });

    Ok(bars)
}

/// Replace driver names on delta bars with their display labels.
pub fn apply_driver_labels(bars: &mut [WaterfallBar], labels: &HashMap<String, String>) {
    for bar in bars.iter_mut().filter(|b| b.kind == BarKind::Delta) {
        if let Some(label) = labels.get(&bar.label) {
            bar.label = label.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaSpec;

    fn period(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn order(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_waterfall_walks_from_t0_to_t1() {
        let spec = FormulaSpec::from_expression("Sales", "Spend / CPA * AOV").unwrap();
        let t0 = period(&[("Sales", 100000.0), ("Spend", 50000.0), ("CPA", 50.0), ("AOV", 100.0)]);
        let t1 = period(&[("Sales", 40000.0), ("Spend", 30000.0), ("CPA", 60.0), ("AOV", 80.0)]);
        let decomposition = spec.decompose(&t0, &t1).unwrap();

        let bars = build_waterfall(&decomposition, &order(&["Spend", "CPA", "AOV"]), true).unwrap();
        assert_eq!(bars.len(), 5);
        assert_eq!(bars[0].label, "Sales (t0)");
        assert_eq!(bars[1].label, "Spend");
        assert_eq!(bars[1].base, 100000.0);
        assert_eq!(bars[2].base, bars[1].end());
        assert!((bars[3].end() - 40000.0).abs() < 1e-6);
        assert_eq!(bars[4].kind, BarKind::End);
        assert!(bars[1..4].iter().all(|b| b.tone == Tone::Unfavorable));
    }

    #[test]
    fn test_tone_follows_higher_is_better() {
        let spec = FormulaSpec::from_expression("CPA", "CPM / (CTR * CVR)").unwrap();
        let t0 = period(&[("CPA", 20.0), ("CPM", 10.0), ("CTR", 0.01), ("CVR", 0.05)]);
        let t1 = period(&[("CPA", 25.0), ("CPM", 12.5), ("CTR", 0.01), ("CVR", 0.05)]);
        let decomposition = spec.decompose(&t0, &t1).unwrap();

        let bars = build_waterfall(&decomposition, &order(&["CPM"]), false).unwrap();
        assert_eq!(bars[1].tone, Tone::Unfavorable);
        let bars = build_waterfall(&decomposition, &order(&["CPM"]), true).unwrap();
        assert_eq!(bars[1].tone, Tone::Favorable);
    }

    #[test]
    fn test_driver_labels_replace_delta_names() {
        let spec = FormulaSpec::from_expression("ROAS", "AOV / CPA").unwrap();
        let t0 = period(&[("ROAS", 2.0), ("AOV", 100.0), ("CPA", 50.0)]);
        let t1 = period(&[("ROAS", 2.5), ("AOV", 100.0), ("CPA", 40.0)]);
        let decomposition = spec.decompose(&t0, &t1).unwrap();

        let mut bars = build_waterfall(&decomposition, &order(&["AOV", "CPA"]), true).unwrap();
        let labels: HashMap<String, String> =
            [("CPA".to_string(), "Cost per acquisition".to_string())].into();
        apply_driver_labels(&mut bars, &labels);
        assert_eq!(bars[1].label, "AOV");
        assert_eq!(bars[2].label, "Cost per acquisition");
        assert_eq!(bars[0].label, "ROAS (t0)");
    }

    #[test]
    fn test_unknown_driver_in_order() {
        let spec = FormulaSpec::from_expression("ROAS", "AOV / CPA").unwrap();
        let t0 = period(&[("ROAS", 2.0), ("AOV", 100.0), ("CPA", 50.0)]);
        let t1 = period(&[("ROAS", 2.5), ("AOV", 100.0), ("CPA", 40.0)]);
        let decomposition = spec.decompose(&t0, &t1).unwrap();
        let err = build_waterfall(&decomposition, &order(&["AOV", "Clicks"]), true).unwrap_err();
        assert!(matches!(err, DecompositionError::MissingDriver { .. }));
    }
}

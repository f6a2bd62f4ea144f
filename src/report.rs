//! Presentation helpers
//!
//! Numbers stay numbers everywhere else in the crate; this module is where they
//! become strings and tables.

use crate::decomposition::{Decomposition, DriverContribution, OutcomeInfo};
use crate::error::Result;
use comfy_table::{Cell, Table};
use polars::prelude::*;
use std::collections::HashMap;
use std::fmt;

/// `$1,234.56` when `currency`, `1234.56` otherwise.
pub fn format_value(value: f64, currency: bool) -> String {
    if !currency {
        return format!("{:.2}", value);
    }
    let fixed = format!("{:.2}", value.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("${}{}.{}", sign, grouped, fraction)
}

/// Metric name without a variant suffix: `Sales_2` becomes `Sales`.
pub fn clean_metric_name(metric_name: &str) -> &str {
    metric_name.split('_').next().unwrap_or(metric_name)
}

/// Sales and CPA metrics are shown as currency.
pub fn is_currency_metric(metric_name: &str) -> bool {
    metric_name.starts_with("Sales") || metric_name.starts_with("CPA")
}

/// Outcome change in percent; 0 when the starting value is 0.
pub fn percent_change(outcome: &OutcomeInfo) -> f64 {
    if outcome.time0_value == 0.0 {
        0.0
    } else {
        (outcome.time1_value - outcome.time0_value) / outcome.time0_value * 100.0
    }
}

/// Driver rows as a DataFrame, one row per driver.
pub fn to_dataframe(decomposition: &Decomposition) -> Result<DataFrame> {
    let rows = &decomposition.drivers;
    let column = |f: fn(&DriverContribution) -> f64| rows.iter().map(f).collect::<Vec<f64>>();

    let df = df![
        "metric" => rows.iter().map(|d| d.driver.as_str()).collect::<Vec<_>>(),
        "role" => rows.iter().map(|d| match d.role {
            crate::formula::DriverRole::Numerator => "numerator",
            crate::formula::DriverRole::Denominator => "denominator",
        }).collect::<Vec<_>>(),
        "time0_value" => column(|d| d.time0_value),
        "time1_value" => column(|d| d.time1_value),
        "growth_factor" => column(|d| d.growth_factor),
        "pct_change" => column(|d| d.pct_change),
        "log_driver" => column(|d| d.log_driver),
        "log_share" => column(|d| d.log_share),
        "percentage_points_contribution" => column(|d| d.percentage_points_contribution),
        "absolute_contribution" => column(|d| d.absolute_contribution),
        "direction_label" => rows.iter().map(|d| d.direction.as_str()).collect::<Vec<_>>(),
    ]?;
    Ok(df)
}

/// Text rendering of a decomposition: outcome summary plus driver table with totals.
pub struct DecompositionReport<'a> {
    decomposition: &'a Decomposition,
    driver_order: Option<&'a [String]>,
    driver_labels: Option<&'a HashMap<String, String>>,
}

impl<'a> DecompositionReport<'a> {
    pub fn new(decomposition: &'a Decomposition) -> Self {
        Self {
            decomposition,
            driver_order: None,
            driver_labels: None,
        }
    }

    /// List drivers in this order; names not in the decomposition are skipped.
    pub fn with_driver_order(mut self, order: &'a [String]) -> Self {
        self.driver_order = Some(order);
        self
    }

    /// Display names for drivers; unlisted drivers keep their own name.
    pub fn with_driver_labels(mut self, labels: &'a HashMap<String, String>) -> Self {
        self.driver_labels = Some(labels);
        self
    }

    fn ordered_drivers(&self) -> Vec<&'a DriverContribution> {
        match self.driver_order {
            Some(order) => order
                .iter()
                .filter_map(|name| self.decomposition.driver(name))
                .collect(),
            None => self.decomposition.drivers.iter().collect(),
        }
    }

    fn label_of<'b>(&self, driver: &'b str) -> &'b str
    where
        'a: 'b,
    {
        self.driver_labels
            .and_then(|labels| labels.get(driver))
            .map(String::as_str)
            .unwrap_or(driver)
    }

    /// Single-row outcome table.
    pub fn outcome_table(&self) -> Table {
        let outcome = &self.decomposition.outcome;
        let currency = is_currency_metric(&outcome.metric_name);

        let mut table = Table::new();
        table.set_header(vec!["Metric", "t0 Value", "t1 Value", "Percent Change", "Absolute Change"]);
        table.add_row(vec![
            clean_metric_name(&outcome.metric_name).to_string(),
            format_value(outcome.time0_value, currency),
            format_value(outcome.time1_value, currency),
            format!("{:.2}%", percent_change(outcome)),
            format_value(outcome.absolute_change, currency),
        ]);
        table
    }

    /// One row per driver, then a Total row.
    pub fn driver_table(&self) -> Table {
        let currency = is_currency_metric(&self.decomposition.outcome.metric_name);
        let drivers = self.ordered_drivers();

        let mut table = Table::new();
        table.set_header(vec![
            "Driver",
            "t0 Value",
            "t1 Value",
            "Percent Change",
            "Abs Contribution",
            "Percentage Points Contribution",
        ]);
        for d in &drivers {
            table.add_row(vec![
                Cell::new(self.label_of(&d.driver)),
                Cell::new(format_value(d.time0_value, currency)),
                Cell::new(format_value(d.time1_value, currency)),
                Cell::new(format!("{:.2}%", d.pct_change * 100.0)),
                Cell::new(format_value(d.absolute_contribution, currency)),
                Cell::new(format!("{:.2} ppts", d.percentage_points_contribution)),
            ]);
        }
        table.add_row(vec![
            Cell::new("Total"),
            Cell::new(""),
            Cell::new(""),
            Cell::new(""),
            Cell::new(format_value(
                drivers.iter().map(|d| d.absolute_contribution).sum(),
                currency,
            )),
            Cell::new(format!(
                "{:.2} ppts",
                drivers
                    .iter()
                    .map(|d| d.percentage_points_contribution)
                    .sum::<f64>()
            )),
        ]);
        table
    }
}

impl fmt::Display for DecompositionReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Outcome Metric Summary ===")?;
        writeln!(f, "{}", self.outcome_table())?;
        writeln!(f, "\n=== Driver Contributions ===")?;
        writeln!(f, "{}", self.driver_table())
    }
}

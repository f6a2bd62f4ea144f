//! Formula catalog and summary-service settings
//!
//! The catalog is a YAML list of formula definitions. It is loaded once and
//! handed to whatever needs it; nothing here is global.

use crate::decomposition::Decomposition;
use crate::error::{DecompositionError, Result};
use crate::formula::{self, FormulaSpec};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

fn default_multiplier() -> f64 {
    1.0
}

fn default_higher_is_better() -> bool {
    true
}

/// One selectable metric, as written in the catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaDefinition {
    /// Display label, e.g. `"Sales = Spend / CPA * AOV"`
    #[serde(rename = "formula_drop_down")]
    pub label: String,
    pub output_metric: String,
    #[serde(default)]
    pub numerators: Vec<String>,
    #[serde(default)]
    pub denominators: Vec<String>,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Used only when both driver lists are empty
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub driver_labels: HashMap<String, String>,
    #[serde(default)]
    pub driver_order: Option<Vec<String>>,
    #[serde(default = "default_higher_is_better")]
    pub higher_is_better: bool,
}

impl FormulaDefinition {
    /// Right-hand side of the label (`"Spend / CPA * AOV"`), or the whole label.
    pub fn expression(&self) -> &str {
        match self.label.split_once('=') {
            Some((_, rhs)) => rhs.trim(),
            None => &self.label,
        }
    }

    /// Explicit lists win; otherwise the lists come from parsing the formula text.
    pub fn spec(&self) -> Result<FormulaSpec> {
        let spec = if self.numerators.is_empty() && self.denominators.is_empty() {
            let expression = self.formula.as_deref().unwrap_or_else(|| self.expression());
            FormulaSpec::from_expression(self.output_metric.clone(), expression)?
        } else {
            FormulaSpec::new(
                self.output_metric.clone(),
                self.numerators.clone(),
                self.denominators.clone(),
            )?
        };
        spec.with_multiplier(self.multiplier)
    }

    pub fn driver_label<'a>(&'a self, driver: &'a str) -> &'a str {
        self.driver_labels
            .get(driver)
            .map(String::as_str)
            .unwrap_or(driver)
    }
}

/// A catalog entry with its validated formula
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub definition: FormulaDefinition,
    pub spec: FormulaSpec,
    driver_order: Vec<String>,
}

impl CatalogEntry {
    fn new(definition: FormulaDefinition) -> Result<Self> {
        let spec = definition.spec()?;
        let driver_order = match &definition.driver_order {
            Some(order) => {
                check_driver_order(&spec, order)?;
                order.clone()
            }
            None => spec.drivers().map(String::from).collect(),
        };
        Ok(Self {
            definition,
            spec,
            driver_order,
        })
    }

    /// Display order for drivers; numerators then denominators unless configured.
    pub fn driver_order(&self) -> &[String] {
        &self.driver_order
    }

    pub fn higher_is_better(&self) -> bool {
        self.definition.higher_is_better
    }
}

/// A display order must list every driver of the formula exactly once.
fn check_driver_order(spec: &FormulaSpec, order: &[String]) -> Result<()> {
    let metric = spec.metric_name();
    if let Some(unknown) = order.iter().find(|d| spec.role_of(d).is_none()) {
        return Err(DecompositionError::Config(format!(
            "driver_order of {} references unknown driver '{}'",
            metric, unknown
        )));
    }
    if let Some(repeated) = order.iter().duplicates().next() {
        return Err(DecompositionError::Config(format!(
            "driver_order of {} lists '{}' more than once",
            metric, repeated
        )));
    }
    let omitted: Vec<&str> = spec
        .drivers()
        .filter(|d| !order.iter().any(|o| o == d))
        .collect();
    if !omitted.is_empty() {
        return Err(DecompositionError::Config(format!(
            "driver_order of {} omits {}",
            metric,
            omitted.join(", ")
        )));
    }
    Ok(())
}

/// Immutable table of formula definitions
#[derive(Debug, Clone, Default)]
pub struct FormulaCatalog {
    entries: Vec<CatalogEntry>,
    by_metric: HashMap<String, usize>,
    by_label: HashMap<String, usize>,
}

impl FormulaCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DecompositionError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_yaml_str(&content)?;
        info!(
            "Loaded {} formula definitions from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let definitions: Vec<FormulaDefinition> = serde_yaml::from_str(content)?;
        Self::from_definitions(definitions)
    }

    pub fn from_definitions(definitions: Vec<FormulaDefinition>) -> Result<Self> {
        let mut catalog = Self::default();
        for definition in definitions {
            let entry = CatalogEntry::new(definition)?;
            let index = catalog.entries.len();
            let metric = entry.definition.output_metric.clone();
            if catalog.by_metric.insert(metric.clone(), index).is_some() {
                return Err(DecompositionError::Config(format!(
                    "output metric '{}' is defined more than once",
                    metric
                )));
            }
            catalog.by_label.insert(entry.definition.label.clone(), index);
            catalog.entries.push(entry);
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Labels in file order, for a metric picker.
    pub fn labels(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.definition.label.as_str())
            .collect()
    }

    pub fn get(&self, metric: &str) -> Option<&CatalogEntry> {
        self.by_metric.get(metric).map(|&i| &self.entries[i])
    }

    pub fn by_label(&self, label: &str) -> Option<&CatalogEntry> {
        self.by_label.get(label).map(|&i| &self.entries[i])
    }

    pub fn decompose(
        &self,
        metric: &str,
        t0: &HashMap<String, f64>,
        t1: &HashMap<String, f64>,
    ) -> Result<Decomposition> {
        let entry = self
            .get(metric)
            .ok_or_else(|| DecompositionError::MetricNotFound(format!(
                "'{}' is not in the formula catalog",
                metric
            )))?;
        entry.spec.decompose(t0, t1)
    }
}

/// Settings for the executive-summary service
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub review_model: String,
    pub timeout: Duration,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            review_model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl SummaryConfig {
    /// Read `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `SUMMARY_MODEL`,
    /// `SUMMARY_REVIEW_MODEL` and `SUMMARY_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("SUMMARY_MODEL").unwrap_or(defaults.model),
            review_model: std::env::var("SUMMARY_REVIEW_MODEL").unwrap_or(defaults.review_model),
            timeout: std::env::var("SUMMARY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().is_some_and(|k| !k.is_empty())
    }
}

/// Split a label like `"Sales = Spend / CPA * AOV"` into metric and expression.
pub fn split_label(label: &str) -> Option<(&str, &str)> {
    label
        .split_once('=')
        .map(|(metric, expr)| (metric.trim(), expr.trim()))
        .filter(|(metric, expr)| !metric.is_empty() && !formula::parse_formula(expr).is_empty())
}

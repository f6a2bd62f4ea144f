//! Formula model
//!
//! A formula is a chain of multiplications and divisions over named drivers and
//! numeric constants. Drivers are split into two ordered, disjoint sets:
//! - numerators: multiplied into the metric
//! - denominators: divided out of the metric
//!
//! Explicit driver lists (as supplied by the formula catalog) are the primary
//! way to build a [`FormulaSpec`]. [`parse_formula`] derives the same lists from
//! a flat expression string such as `"Spend / CPA * AOV"`.

use crate::decomposition::{self, Decomposition};
use crate::error::{DecompositionError, Result};
use crate::evaluator;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

lazy_static! {
    /// `/ ( ... )`: a division directly followed by a parenthesized group.
    static ref DENOMINATOR_GROUP: Regex = Regex::new(r"/\s*\(([^()]*)\)").unwrap();
    static ref OPERATOR: Regex = Regex::new(r"[*/]").unwrap();
    static ref NUMERIC_CONSTANT: Regex =
        Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").unwrap();
}

/// Algebraic role of a driver within a formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverRole {
    Numerator,
    Denominator,
}

/// Raw output of the string parser
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedFormula {
    pub numerators: Vec<String>,
    pub denominators: Vec<String>,
}

impl ParsedFormula {
    pub fn is_empty(&self) -> bool {
        self.numerators.is_empty() && self.denominators.is_empty()
    }
}

enum Token<'a> {
    Operand(&'a str),
    Multiply,
    Divide,
}

fn tokenize(expression: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for op in OPERATOR.find_iter(expression) {
        tokens.push(Token::Operand(expression[last..op.start()].trim()));
        tokens.push(if op.as_str() == "*" {
            Token::Multiply
        } else {
            Token::Divide
        });
        last = op.end();
    }
    tokens.push(Token::Operand(expression[last..].trim()));
    tokens
}

/// True when the token is a decimal or scientific literal such as `1000` or `1e3`.
pub fn is_numeric_constant(token: &str) -> bool {
    NUMERIC_CONSTANT.is_match(token.trim())
}

fn is_variable(token: &str) -> bool {
    !token.is_empty() && !is_numeric_constant(token)
}

/// Every variable operand of `expression`, ignoring which operator precedes it.
fn variable_tokens(expression: &str) -> Vec<String> {
    tokenize(expression)
        .into_iter()
        .filter_map(|token| match token {
            Token::Operand(op) if is_variable(op) => Some(op.to_string()),
            _ => None,
        })
        .collect()
}

fn parse_chain(expression: &str, parsed: &mut ParsedFormula) {
    let mut current = DriverRole::Numerator;
    for token in tokenize(expression) {
        match token {
            Token::Multiply => current = DriverRole::Numerator,
            Token::Divide => current = DriverRole::Denominator,
            Token::Operand(op) if !is_variable(op) => {}
            Token::Operand(op) => match current {
                DriverRole::Numerator => parsed.numerators.push(op.to_string()),
                DriverRole::Denominator => parsed.denominators.push(op.to_string()),
            },
        }
    }
}

/// Split a formula expression into numerator and denominator drivers.
///
/// Numeric constants are dropped. When the expression contains a division
/// followed by a parenthesized group (`CPM / (CTR * CVR * 1000)`), every
/// variable inside the group is a denominator and every variable outside it is
/// a numerator. That includes variables after an extra `/` ahead of the group,
/// so `A / B / (C * D)` classifies `B` as a numerator; use explicit driver lists
/// for formulas of that shape.
pub fn parse_formula(expression: &str) -> ParsedFormula {
    let mut parsed = ParsedFormula::default();

    if let Some(caps) = DENOMINATOR_GROUP.captures(expression) {
        if let (Some(whole), Some(group)) = (caps.get(0), caps.get(1)) {
            parsed
                .numerators
                .extend(variable_tokens(&expression[..whole.start()]));
            parsed.denominators.extend(
                group
                    .as_str()
                    .split('*')
                    .map(str::trim)
                    .filter(|token| is_variable(token))
                    .map(String::from),
            );
            parsed
                .numerators
                .extend(variable_tokens(&expression[whole.end()..]));
            return parsed;
        }
    }

    parse_chain(expression, &mut parsed);
    parsed
}

/// Operand tokens in raw appearance order, used for display ordering.
///
/// Unlike [`parse_formula`], constants and repeated names are kept.
pub fn driver_order(expression: &str) -> Vec<String> {
    tokenize(expression)
        .into_iter()
        .filter_map(|token| match token {
            Token::Operand(op) if !op.is_empty() => Some(op.to_string()),
            _ => None,
        })
        .collect()
}

/// Validated formula definition: output metric, driver split and multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaSpec {
    metric_name: String,
    numerators: Vec<String>,
    denominators: Vec<String>,
    multiplier: f64,
}

impl FormulaSpec {
    /// Build from explicit driver lists.
    pub fn new(
        metric_name: impl Into<String>,
        numerators: Vec<String>,
        denominators: Vec<String>,
    ) -> Result<Self> {
        let metric_name = metric_name.into();
        validate_driver_lists(&metric_name, &numerators, &denominators)?;
        Ok(Self {
            metric_name,
            numerators,
            denominators,
            multiplier: 1.0,
        })
    }

    /// Build by parsing a flat formula expression.
    pub fn from_expression(metric_name: impl Into<String>, expression: &str) -> Result<Self> {
        let parsed = parse_formula(expression);
        if parsed.is_empty() {
            return Err(DecompositionError::MalformedFormula(format!(
                "'{}' references no drivers",
                expression
            )));
        }
        Self::new(metric_name, parsed.numerators, parsed.denominators)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Result<Self> {
        if !multiplier.is_finite() || multiplier == 0.0 {
            return Err(DecompositionError::MalformedFormula(format!(
                "multiplier for {} must be finite and non-zero, got {}",
                self.metric_name, multiplier
            )));
        }
        self.multiplier = multiplier;
        Ok(self)
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn numerators(&self) -> &[String] {
        &self.numerators
    }

    pub fn denominators(&self) -> &[String] {
        &self.denominators
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Numerators first, then denominators.
    pub fn drivers(&self) -> impl Iterator<Item = &str> {
        self.numerators
            .iter()
            .chain(self.denominators.iter())
            .map(String::as_str)
    }

    pub fn role_of(&self, driver: &str) -> Option<DriverRole> {
        if self.numerators.iter().any(|n| n == driver) {
            Some(DriverRole::Numerator)
        } else if self.denominators.iter().any(|d| d == driver) {
            Some(DriverRole::Denominator)
        } else {
            None
        }
    }

    /// Metric value for one period's driver values.
    pub fn evaluate(&self, values: &HashMap<String, f64>) -> Result<f64> {
        evaluator::evaluate(values, &self.numerators, &self.denominators, self.multiplier)
    }

    /// Compute the metric and store it under the metric's own key.
    pub fn complete_period(&self, values: &mut HashMap<String, f64>) -> Result<f64> {
        let value = self.evaluate(values)?;
        values.insert(self.metric_name.clone(), value);
        Ok(value)
    }

    pub fn decompose(
        &self,
        t0: &HashMap<String, f64>,
        t1: &HashMap<String, f64>,
    ) -> Result<Decomposition> {
        decomposition::decompose(&self.metric_name, t0, t1, &self.numerators, &self.denominators)
    }
}

fn validate_driver_lists(
    metric_name: &str,
    numerators: &[String],
    denominators: &[String],
) -> Result<()> {
    if metric_name.trim().is_empty() {
        return Err(DecompositionError::MalformedFormula(
            "metric name is empty".to_string(),
        ));
    }
    if numerators.is_empty() && denominators.is_empty() {
        return Err(DecompositionError::MalformedFormula(format!(
            "{} has no drivers",
            metric_name
        )));
    }

    let mut seen = HashSet::new();
    for driver in numerators.iter().chain(denominators.iter()) {
        if driver.trim().is_empty() {
            return Err(DecompositionError::MalformedFormula(format!(
                "{} has an empty driver name",
                metric_name
            )));
        }
        if is_numeric_constant(driver) {
            return Err(DecompositionError::MalformedFormula(format!(
                "driver '{}' of {} is a numeric constant",
                driver, metric_name
            )));
        }
        if driver == metric_name {
            return Err(DecompositionError::MalformedFormula(format!(
                "{} cannot be its own driver",
                metric_name
            )));
        }
        if !seen.insert(driver.as_str()) {
            return Err(DecompositionError::MalformedFormula(format!(
                "driver '{}' appears more than once in {}",
                driver, metric_name
            )));
        }
    }

    Ok(())
}

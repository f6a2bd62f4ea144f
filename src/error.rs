use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecompositionError {
    #[error("Malformed formula: {0}")]
    MalformedFormula(String),

    #[error("Missing driver value in {context}: {}", .names.join(", "))]
    MissingDriver { context: String, names: Vec<String> },

    #[error("Division by zero: denominator product is zero")]
    DivisionByZero,

    #[error("Invalid growth for {driver}: t0={time0_value}, t1={time1_value} (growth factor must be finite and positive)")]
    InvalidGrowth {
        driver: String,
        time0_value: f64,
        time1_value: f64,
    },

    #[error("Driver log contributions cancel out (total log = {total_log}); log shares are undefined")]
    DegenerateTotal { total_log: f64 },

    #[error("Reconciliation mismatch: {0}")]
    ReconciliationMismatch(String),

    #[error("Metric not found: {0}")]
    MetricNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for DecompositionError {
    fn from(err: polars::error::PolarsError) -> Self {
        DecompositionError::Polars(err.to_string())
    }
}

impl DecompositionError {
    pub(crate) fn missing(context: &str, names: Vec<String>) -> Self {
        DecompositionError::MissingDriver {
            context: context.to_string(),
            names,
        }
    }
}

pub type Result<T> = std::result::Result<T, DecompositionError>;

pub mod config;
pub mod decomposition;
pub mod error;
pub mod evaluator;
pub mod formula;
pub mod llm;
pub mod report;
pub mod validation;
pub mod waterfall;

pub use config::{FormulaCatalog, FormulaDefinition, SummaryConfig};
pub use decomposition::{decompose, decompose_expression, Decomposition, Direction, DriverContribution, OutcomeInfo};
pub use error::{DecompositionError, Result};
pub use evaluator::evaluate;
pub use formula::{driver_order, parse_formula, DriverRole, FormulaSpec, ParsedFormula};
pub use validation::{validate_decomposition, ReconciliationCheck};

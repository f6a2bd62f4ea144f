use anyhow::{anyhow, Context, Result};
use clap::Parser;
use driver_decomposition::config::{split_label, FormulaCatalog};
use driver_decomposition::error::DecompositionError;
use driver_decomposition::formula::FormulaSpec;
use driver_decomposition::llm::LlmClient;
use driver_decomposition::report::DecompositionReport;
use driver_decomposition::validation::validate_decomposition;
use driver_decomposition::waterfall::{apply_driver_labels, build_waterfall};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "decompose")]
#[command(about = "Attribute the period-over-period change of a metric to its drivers")]
struct Args {
    /// Metric to decompose (catalog output metric or label)
    #[arg(short, long)]
    metric: Option<String>,

    /// Formula instead of a catalog entry, e.g. "Sales = Spend / CPA * AOV"
    #[arg(short, long)]
    formula: Option<String>,

    /// Path to the formula catalog (default: ./config/formulas.yaml)
    #[arg(short, long, default_value = "config/formulas.yaml")]
    config: PathBuf,

    /// Time 0 value as NAME=VALUE (repeatable)
    #[arg(long = "t0", value_parser = parse_assignment)]
    t0: Vec<(String, f64)>,

    /// Time 1 value as NAME=VALUE (repeatable)
    #[arg(long = "t1", value_parser = parse_assignment)]
    t1: Vec<(String, f64)>,

    /// Absolute tolerance for the reconciliation check
    #[arg(long)]
    tolerance: Option<f64>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Generate an executive summary
    #[arg(long)]
    summary: bool,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// List catalog formulas and exit
    #[arg(long)]
    list: bool,
}

fn parse_assignment(raw: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for {}: {}", name.trim(), e))?;
    Ok((name.trim().to_string(), value))
}

struct Selection {
    spec: FormulaSpec,
    expression: String,
    driver_order: Vec<String>,
    driver_labels: HashMap<String, String>,
    higher_is_better: bool,
}

fn select_formula(args: &Args) -> Result<Selection> {
    if let Some(formula) = &args.formula {
        let (metric, expression) = match split_label(formula) {
            Some((metric, expression)) => (
                args.metric.clone().unwrap_or_else(|| metric.to_string()),
                expression.to_string(),
            ),
            None => (
                args.metric
                    .clone()
                    .ok_or_else(|| anyhow!("--metric is required with a formula that has no 'Metric = ' prefix"))?,
                formula.clone(),
            ),
        };
        let spec = FormulaSpec::from_expression(metric, &expression)?;
        let driver_order = spec.drivers().map(String::from).collect();
        return Ok(Selection {
            spec,
            expression,
            driver_order,
            driver_labels: HashMap::new(),
            higher_is_better: true,
        });
    }

    let catalog = FormulaCatalog::load(&args.config)
        .with_context(|| format!("loading formula catalog {}", args.config.display()))?;
    let metric = args
        .metric
        .as_deref()
        .ok_or_else(|| anyhow!("--metric or --formula is required"))?;
    let entry = catalog
        .get(metric)
        .or_else(|| catalog.by_label(metric))
        .ok_or_else(|| DecompositionError::MetricNotFound(metric.to_string()))?;

    let driver_labels = entry
        .spec
        .drivers()
        .map(|d| (d.to_string(), entry.definition.driver_label(d).to_string()))
        .collect();

    Ok(Selection {
        spec: entry.spec.clone(),
        expression: entry.definition.expression().to_string(),
        driver_order: entry.driver_order().to_vec(),
        driver_labels,
        higher_is_better: entry.higher_is_better(),
    })
}

fn period(
    name: &str,
    assignments: &[(String, f64)],
    spec: &FormulaSpec,
) -> Result<HashMap<String, f64>> {
    let mut values: HashMap<String, f64> = assignments.iter().cloned().collect();
    if !values.contains_key(spec.metric_name()) {
        let computed = spec
            .complete_period(&mut values)
            .with_context(|| format!("computing {} ({})", spec.metric_name(), name))?;
        info!("{} ({}) computed: {:.2}", spec.metric_name(), name, computed);
    }
    Ok(values)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if args.list {
        let catalog = FormulaCatalog::load(&args.config)?;
        for label in catalog.labels() {
            println!("{}", label);
        }
        return Ok(());
    }

    let selection = select_formula(&args)?;
    let spec = &selection.spec;
    info!("Decomposing {} = {}", spec.metric_name(), selection.expression);

    let t0 = period("t0", &args.t0, spec)?;
    let t1 = period("t1", &args.t1, spec)?;

    let decomposition = spec.decompose(&t0, &t1)?;
    let check = validate_decomposition(&decomposition.drivers, &decomposition.outcome, args.tolerance);
    if !check.ok {
        error!("Validation failed: {}", check.message);
        return Err(DecompositionError::ReconciliationMismatch(check.message).into());
    }

    if args.json {
        let mut waterfall = build_waterfall(
            &decomposition,
            &selection.driver_order,
            selection.higher_is_better,
        )?;
        apply_driver_labels(&mut waterfall, &selection.driver_labels);
        let output = serde_json::json!({
            "decomposition": decomposition,
            "reconciliation": check,
            "waterfall": waterfall,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "{}",
            DecompositionReport::new(&decomposition)
                .with_driver_order(&selection.driver_order)
                .with_driver_labels(&selection.driver_labels)
        );
    }

    if args.summary {
        let mut client = LlmClient::from_env();
        if let Some(key) = args.api_key.clone() {
            client = client.with_api_key(key);
        }
        match client
            .generate_executive_summary(&selection.expression, spec, &decomposition)
            .await
        {
            Ok(summary) => {
                println!("\n=== Executive Summary ===");
                println!("{}", summary.summary);
            }
            Err(e @ DecompositionError::MissingCredentials(_)) => {
                warn!("Could not generate executive summary: {}", e);
            }
            Err(e) => {
                error!("Error generating executive summary: {}", e);
            }
        }
    }

    Ok(())
}

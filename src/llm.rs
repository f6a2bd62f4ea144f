//! Executive-summary client
//!
//! Turns a finished decomposition into prose through a chat-completions API.
//! The decomposition is only read here; nothing flows back into the numbers.

use crate::config::SummaryConfig;
use crate::decomposition::Decomposition;
use crate::error::{DecompositionError, Result};
use crate::formula::{DriverRole, FormulaSpec};
use crate::report;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub metric_name: String,
    pub draft: String,
    pub summary: String,
}

pub struct LlmClient {
    config: SummaryConfig,
}

impl LlmClient {
    pub fn new(config: SummaryConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(SummaryConfig::from_env())
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    /// Draft a summary, then have it rewritten for an executive audience.
    pub async fn generate_executive_summary(
        &self,
        formula: &str,
        spec: &FormulaSpec,
        decomposition: &Decomposition,
    ) -> Result<ExecutiveSummary> {
        let api_key = self.api_key()?;

        info!(
            "Generating executive summary for {}",
            decomposition.outcome.metric_name
        );
        let prompt = build_summary_prompt(formula, spec, decomposition);
        let draft = self.call_llm(api_key, &self.config.model, &prompt).await?;

        let review = build_review_prompt(&draft);
        let summary = self
            .call_llm(api_key, &self.config.review_model, &review)
            .await?;

        Ok(ExecutiveSummary {
            metric_name: decomposition.outcome.metric_name.clone(),
            draft,
            summary,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                DecompositionError::MissingCredentials(
                    "OPENAI_API_KEY not found in environment variables. \
                     Please set it in your .env file."
                        .to_string(),
                )
            })
    }

    async fn call_llm(&self, api_key: &str, model: &str, prompt: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| DecompositionError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        let body = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": "You are a precise data analyst. Use only the numbers you are given."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.2
        });

        debug!("Calling {} with {} prompt chars", model, prompt.len());
        let response = client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| DecompositionError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecompositionError::Llm(format!(
                "LLM API returned {}: {}",
                status,
                error_detail(&body)
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DecompositionError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| DecompositionError::Llm("No content in LLM response".to_string()))?;

        Ok(content.trim().to_string())
    }
}

/// `error.message` from a JSON error body, else the start of the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response body".to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        })
}

fn list_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "None".to_string()
    } else {
        names.iter().join(", ")
    }
}

fn outcome_table(decomposition: &Decomposition) -> String {
    let outcome = &decomposition.outcome;
    let currency = report::is_currency_metric(&outcome.metric_name);
    format!(
        "| Metric | t0 Value | t1 Value | Percent Change | Absolute Change |\n\
         |---|---|---|---|---|\n\
         | {} | {} | {} | {:.2}% | {} |",
        report::clean_metric_name(&outcome.metric_name),
        report::format_value(outcome.time0_value, currency),
        report::format_value(outcome.time1_value, currency),
        report::percent_change(outcome),
        report::format_value(outcome.absolute_change, currency),
    )
}

fn driver_table(decomposition: &Decomposition) -> String {
    let header = "| Driver | Role | t0 Value | t1 Value | Percent Change | Abs Contribution | PPT Contribution | Direction |\n\
                  |---|---|---|---|---|---|---|---|";
    let rows = decomposition.drivers.iter().map(|d| {
        let role = match d.role {
            DriverRole::Numerator => "numerator",
            DriverRole::Denominator => "denominator",
        };
        format!(
            "| {} | {} | {} | {} | {:.2}% | {:.2} | {:.2} ppts | {} |",
            d.driver,
            role,
            d.time0_value,
            d.time1_value,
            d.pct_change * 100.0,
            d.absolute_contribution,
            d.percentage_points_contribution,
            d.direction
        )
    });
    std::iter::once(header.to_string()).chain(rows).join("\n")
}

/// Analyst prompt: formula logic, driver classification and both tables.
pub fn build_summary_prompt(formula: &str, spec: &FormulaSpec, decomposition: &Decomposition) -> String {
    let metric = report::clean_metric_name(&decomposition.outcome.metric_name);
    format!(
        r#"You are an expert data analyst. Write a short, accurate, formula-aligned summary of the period-over-period change in {metric}.
Do not add information that is not present in the inputs.

1. Metric logic
Formula: {formula}
- Numerators (direct effect, increasing them increases {metric}): {numerators}
- Denominators (inverse effect, increasing them decreases {metric}): {denominators}

2. Input tables
A. Outcome metric
{outcome}

B. Driver contributions
{drivers}

3. Required output
A. Headline (2 bullets): the overall % and absolute change in {metric}, and the so-what for an executive.
B. Driver attribution: for each driver say whether it was a tailwind (+) or headwind (-), its own change, and its contribution, using numerator/denominator logic.
C. Primary driver (1 sentence): the driver with the largest absolute contribution and whether it explains most of the change.
D. Next step ideas: 2 to 3 follow-up analyses.

4. Style
Plain text only. Concise and deterministic. No speculation, metaphors, emojis, bold or italics. At most 10 sentences."#,
        metric = metric,
        formula = formula,
        numerators = list_or_none(spec.numerators()),
        denominators = list_or_none(spec.denominators()),
        outcome = outcome_table(decomposition),
        drivers = driver_table(decomposition),
    )
}

/// Second pass: tighten wording without touching numbers.
pub fn build_review_prompt(draft: &str) -> String {
    format!(
        r#"You are an expert data analyst and executive communication coach.
Rewrite the executive summary below so it is clear, concise and easy for an executive to read.
Fix grammar, spacing and punctuation. Do not change any numbers or the business meaning.
Output plain text only: section labels such as "A. Headline", line breaks and bullets starting with "- ".
No markdown headings, bold, italics, code blocks, LaTeX or emojis. Start directly with "A. Headline".

Executive summary draft:
{}"#,
        draft
    )
}

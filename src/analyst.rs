//! Qualitative assessment by a language model.
//!
//! The model is untrusted input. Its reply must be a single JSON object:
//!
//! ```json
//! {
//!   "score": 0-100,
//!   "band": "Good" | "Medium" | "Poor",
//!   "drivers": [{"text": "...", "polarity": "positive" | "negative"}],
//!   "evidence": [{"claim": "...", "guideline_source": "...", "comparison": "..."}],
//!   "summary": "optional plain-language summary"
//! }
//! ```
//!
//! A reply that violates the shape gets exactly one repair round-trip with
//! the violations listed. A second violation is reported as
//! [`AssessmentError::Schema`]; values are never guessed or coerced.

use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AssessmentError;
use crate::guidelines::{self, fmt_num, Concern};
use crate::models::{
    Band, Driver, Evidence, NutriScoreResult, Polarity, ProductRecord, QualitativeAssessment,
};
use crate::traits::{ChatMessage, LanguageModel};

const MAX_INGREDIENTS: usize = 60;
const MAX_INGREDIENT_CHARS: usize = 80;

const SYSTEM_PROMPT: &str = "\
You are a nutrition analyst. You judge packaged food against published \
public-health guidelines. You answer with a single JSON object and nothing else.";

const RESPONSE_SHAPE: &str = r#"{
  "score": <integer 0-100, higher is healthier>,
  "band": "Good" | "Medium" | "Poor",
  "drivers": [{"text": "<short factor>", "polarity": "positive" | "negative"}],
  "evidence": [{"claim": "<claim>", "guideline_source": "<named guideline>", "comparison": "<value vs threshold>"}],
  "summary": "<two sentences for a shopper>"
}"#;

pub struct AnalystAgent {
    model: Arc<dyn LanguageModel>,
}

impl AnalystAgent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn analyze(
        &self,
        record: &ProductRecord,
        rule: &NutriScoreResult,
    ) -> Result<QualitativeAssessment, AssessmentError> {
        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_prompt(record, rule)),
        ];

        let reply = self.call(&messages).await?;
        let violations = match parse_assessment(&reply) {
            Ok(assessment) => {
                info!(score = assessment.score, band = %assessment.band, "model assessment accepted");
                return Ok(assessment);
            }
            Err(violations) => violations,
        };

        warn!(
            violations = violations.len(),
            model = self.model.name(),
            "model reply violated the schema, requesting repair"
        );
        messages.push(ChatMessage::assistant(reply));
        messages.push(ChatMessage::user(repair_prompt(&violations)));

        let reply = self.call(&messages).await?;
        match parse_assessment(&reply) {
            Ok(assessment) => {
                info!(score = assessment.score, band = %assessment.band, "repaired model assessment accepted");
                Ok(assessment)
            }
            Err(violations) => {
                warn!(?violations, "repaired reply still violates the schema");
                Err(AssessmentError::Schema { violations })
            }
        }
    }

    async fn call(&self, messages: &[ChatMessage]) -> Result<String, AssessmentError> {
        self.model
            .complete(messages)
            .await
            .map_err(|e| AssessmentError::Unavailable {
                reason: e.to_string(),
            })
    }
}

/// Build the analysis prompt for one product.
pub fn build_prompt(record: &ProductRecord, rule: &NutriScoreResult) -> String {
    let mut p = String::new();

    let _ = writeln!(p, "Assess the healthiness of this product.\n");
    let _ = writeln!(p, "PRODUCT");
    let _ = writeln!(p, "- name: {}", record.name);
    if let Some(brand) = &record.brand {
        let _ = writeln!(p, "- brand: {}", brand);
    }
    let _ = writeln!(p, "- category: {}", record.category);
    let _ = writeln!(p, "- data source confidence: {}", record.source_confidence.as_str());

    let _ = writeln!(p, "\nINGREDIENTS (in label order)");
    if record.ingredients.is_empty() {
        let _ = writeln!(p, "- not available");
    }
    for ingredient in record.ingredients.iter().take(MAX_INGREDIENTS) {
        let short: String = ingredient.chars().take(MAX_INGREDIENT_CHARS).collect();
        let _ = writeln!(p, "- {}", short);
    }
    if record.ingredients.len() > MAX_INGREDIENTS {
        let _ = writeln!(
            p,
            "- ... {} more",
            record.ingredients.len() - MAX_INGREDIENTS
        );
    }

    let _ = writeln!(p, "\nNUTRITION PER 100g/100ml");
    match &record.nutrition {
        None => {
            let _ = writeln!(p, "- not available; judge from ingredients only");
        }
        Some(n) => {
            for (label, value, unit) in [
                ("energy", n.energy_kcal, "kcal"),
                ("sugar", n.sugar_g, "g"),
                ("total fat", n.fat_g, "g"),
                ("saturated fat", n.saturated_fat_g, "g"),
                ("sodium", n.sodium_mg, "mg"),
                ("fiber", n.fiber_g, "g"),
                ("protein", n.protein_g, "g"),
                ("fruit/vegetables", n.fruit_veg_pct, "%"),
            ] {
                match value {
                    Some(v) => {
                        let _ = writeln!(p, "- {}: {}{}", label, fmt_num(v), unit);
                    }
                    None => {
                        let _ = writeln!(p, "- {}: not reported", label);
                    }
                }
            }
        }
    }

    let _ = writeln!(p, "\nRULE-BASED SCORE (Nutri-Score)");
    let _ = writeln!(
        p,
        "- grade {} ({} points), normalized {}/100",
        rule.grade, rule.points, rule.normalized_score
    );
    if !rule.assumed_worst.is_empty() {
        let _ = writeln!(
            p,
            "- scored conservatively because not reported: {}",
            rule.assumed_worst.join(", ")
        );
    }

    let _ = writeln!(p, "\nGUIDELINE THRESHOLDS");
    let _ = writeln!(p, "{}", guidelines::reference_block());

    let flags = guidelines::flag_additives(&record.ingredients);
    if !flags.is_empty() {
        let _ = writeln!(p, "\nFLAGGED ADDITIVES");
        for f in &flags {
            let level = match f.concern {
                Concern::High => "high concern",
                Concern::Moderate => "moderate concern",
            };
            let _ = writeln!(p, "- {} ({}, {})", f.name, f.class, level);
        }
    }

    let _ = writeln!(p, "\nINSTRUCTIONS");
    let _ = writeln!(
        p,
        "1. Compare sugar, sodium and saturated fat against the named guideline thresholds above."
    );
    let _ = writeln!(
        p,
        "2. Flag ultra-processed ingredients and additives of concern."
    );
    let _ = writeln!(
        p,
        "3. Every evidence entry must name the guideline it relies on."
    );
    let _ = writeln!(
        p,
        "4. Reply with JSON only, exactly this shape, no markdown:\n{}",
        RESPONSE_SHAPE
    );

    p
}

fn repair_prompt(violations: &[String]) -> String {
    let mut p = String::from("Your previous reply did not match the required JSON shape:\n");
    for v in violations {
        let _ = writeln!(p, "- {}", v);
    }
    let _ = write!(
        p,
        "Reply again with a single corrected JSON object of exactly this shape and nothing else:\n{}",
        RESPONSE_SHAPE
    );
    p
}

/// The JSON object inside a reply, with code fences and surrounding prose removed.
pub fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&reply[start..=end])
}

/// Validate a model reply. Returns every violation found, not just the first.
pub fn parse_assessment(reply: &str) -> Result<QualitativeAssessment, Vec<String>> {
    let Some(json) = extract_json(reply) else {
        return Err(vec!["reply contains no JSON object".to_string()]);
    };
    let value: Value = serde_json::from_str(json)
        .map_err(|e| vec![format!("reply is not valid JSON: {}", e)])?;
    let Value::Object(obj) = value else {
        return Err(vec!["reply is not a JSON object".to_string()]);
    };

    let mut violations = Vec::new();

    let score = match obj.get("score") {
        None => {
            violations.push("missing required key 'score'".to_string());
            None
        }
        Some(Value::Number(n)) => match n.as_f64() {
            Some(s) if (0.0..=100.0).contains(&s) => Some(s.round() as u8),
            _ => {
                violations.push(format!("'score' must be between 0 and 100, got {}", n));
                None
            }
        },
        Some(other) => {
            violations.push(format!("'score' must be a number, got {}", other));
            None
        }
    };

    let band = match obj.get("band") {
        None => {
            violations.push("missing required key 'band'".to_string());
            None
        }
        Some(Value::String(s)) => match Band::parse(s) {
            Some(b) => Some(b),
            None => {
                violations.push(format!(
                    "'band' must be one of Good, Medium, Poor, got '{}'",
                    s
                ));
                None
            }
        },
        Some(other) => {
            violations.push(format!("'band' must be a string, got {}", other));
            None
        }
    };

    let drivers = records(&obj, "drivers", &mut violations, |i, item, v| {
        let text = required_str(item, "text", "drivers", i, v)?;
        let polarity = match item.get("polarity").and_then(Value::as_str) {
            Some(p) if p.trim().eq_ignore_ascii_case("positive") => Polarity::Positive,
            Some(p) if p.trim().eq_ignore_ascii_case("negative") => Polarity::Negative,
            _ => {
                v.push(format!(
                    "drivers[{}].polarity must be \"positive\" or \"negative\"",
                    i
                ));
                return None;
            }
        };
        Some(Driver { text, polarity })
    });

    let evidence = records(&obj, "evidence", &mut violations, |i, item, v| {
        let claim = required_str(item, "claim", "evidence", i, v);
        let source = required_str(item, "guideline_source", "evidence", i, v);
        let comparison = required_str(item, "comparison", "evidence", i, v);
        Some(Evidence {
            claim: claim?,
            guideline_source: source?,
            comparison: comparison?,
        })
    });

    let summary = match obj.get("summary") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(other) => {
            violations.push(format!("'summary' must be a string, got {}", other));
            None
        }
    };

    match (score, band, drivers, evidence) {
        (Some(score), Some(band), Some(drivers), Some(evidence)) if violations.is_empty() => {
            Ok(QualitativeAssessment {
                score,
                band,
                drivers,
                evidence,
                summary,
            })
        }
        _ => Err(violations),
    }
}

/// Validate an array of objects under `key`, collecting item violations.
fn records<T>(
    obj: &Map<String, Value>,
    key: &str,
    violations: &mut Vec<String>,
    mut item: impl FnMut(usize, &Map<String, Value>, &mut Vec<String>) -> Option<T>,
) -> Option<Vec<T>> {
    let items = match obj.get(key) {
        None => {
            violations.push(format!("missing required key '{}'", key));
            return None;
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            violations.push(format!("'{}' must be an array", key));
            return None;
        }
    };

    let mut out = Vec::with_capacity(items.len());
    let before = violations.len();
    for (i, raw) in items.iter().enumerate() {
        match raw {
            Value::Object(map) => {
                if let Some(parsed) = item(i, map, violations) {
                    out.push(parsed);
                }
            }
            _ => violations.push(format!("{}[{}] must be an object", key, i)),
        }
    }
    (violations.len() == before).then_some(out)
}

fn required_str(
    item: &Map<String, Value>,
    field: &str,
    key: &str,
    i: usize,
    violations: &mut Vec<String>,
) -> Option<String> {
    match item.get(field).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => {
            violations.push(format!("{}[{}].{} must be a non-empty string", key, i, field));
            None
        }
    }
}

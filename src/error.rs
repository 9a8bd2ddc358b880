//! Error taxonomy for the analysis pipeline.
//!
//! Every failure that can reach a caller is a [`PipelineError`] variant with
//! a human-readable message, a stable machine code (used by the HTTP API),
//! and, where one exists, an actionable next step.
//!
//! | Code | Propagates? | Typical cause |
//! |------|-------------|---------------|
//! | `malformed_nutrition` | no (degrades) | non-numeric or negative nutrient |
//! | `product_not_found` | yes | unknown barcode, no search match |
//! | `ambiguous_match` | yes | several plausible search results |
//! | `source_unavailable` | yes | catalog or OCR down after retries |
//! | `assessment_schema` | no (degrades) | model violated the JSON contract twice |
//! | `assessment_unavailable` | no (degrades) | model call failed or disabled |
//! | `insufficient_data` | yes | no nutrition and no AI assessment |
//! | `timeout` | yes | request deadline expired |
//! | `invalid_input` | yes | malformed barcode, empty query, bad image |

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A search candidate offered back to the caller for disambiguation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSummary {
    pub code: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Malformed nutrition value for '{field}': {reason}")]
    MalformedNutrition { field: String, reason: String },

    #[error("Product not found: {what}")]
    ProductNotFound { what: String },

    #[error("'{query}' matches {} products; pick one", candidates.len())]
    AmbiguousMatch {
        query: String,
        candidates: Vec<CandidateSummary>,
    },

    #[error("{source_name} unavailable after {attempts} attempt(s): {reason}")]
    SourceUnavailable {
        source_name: String,
        attempts: u32,
        reason: String,
    },

    #[error("AI assessment violated the response schema: {}", violations.join("; "))]
    AssessmentSchema { violations: Vec<String> },

    #[error("AI assessment unavailable: {reason}")]
    AssessmentUnavailable { reason: String },

    #[error("Not enough data to score this product: no nutrition facts and no AI assessment")]
    InsufficientData,

    #[error("Analysis timed out after {}s", after.as_secs_f64())]
    Timeout { after: Duration },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    /// Stable snake_case tag for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::MalformedNutrition { .. } => "malformed_nutrition",
            PipelineError::ProductNotFound { .. } => "product_not_found",
            PipelineError::AmbiguousMatch { .. } => "ambiguous_match",
            PipelineError::SourceUnavailable { .. } => "source_unavailable",
            PipelineError::AssessmentSchema { .. } => "assessment_schema",
            PipelineError::AssessmentUnavailable { .. } => "assessment_unavailable",
            PipelineError::InsufficientData => "insufficient_data",
            PipelineError::Timeout { .. } => "timeout",
            PipelineError::InvalidInput(_) => "invalid_input",
        }
    }

    /// What the user can do next, if anything.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            PipelineError::MalformedNutrition { .. } => {
                Some("Check the nutrition table values or try a clearer label photo.")
            }
            PipelineError::ProductNotFound { .. } => Some(
                "Try a label photo instead, or search by product name.",
            ),
            PipelineError::AmbiguousMatch { .. } => Some(
                "Pick one of the listed candidates and scan its barcode, or refine the search text.",
            ),
            PipelineError::SourceUnavailable { .. } => {
                Some("The data source is not responding. Try again in a minute.")
            }
            PipelineError::InsufficientData => Some(
                "Take a photo of the nutrition table so the product can be scored.",
            ),
            PipelineError::Timeout { .. } => {
                Some("Try again, or use a barcode which resolves faster than a photo.")
            }
            PipelineError::InvalidInput(_) => {
                Some("Barcodes are 8, 12, 13 or 14 digits; search text must not be empty.")
            }
            PipelineError::AssessmentSchema { .. } | PipelineError::AssessmentUnavailable { .. } => {
                None
            }
        }
    }

    /// Whether the caller can reasonably retry or switch input method.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PipelineError::InsufficientData)
    }

    /// Products the caller can pick from, for [`PipelineError::AmbiguousMatch`].
    pub fn candidates(&self) -> Option<&[CandidateSummary]> {
        match self {
            PipelineError::AmbiguousMatch { candidates, .. } => Some(candidates),
            _ => None,
        }
    }

    /// `{"error": {code, message, hint?, candidates?}}`, the shape both the
    /// CLI (`--json`) and the HTTP API report failures in.
    pub fn to_json(&self) -> serde_json::Value {
        let mut detail = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(hint) = self.hint() {
            detail["hint"] = hint.into();
        }
        if let Some(candidates) = self.candidates() {
            detail["candidates"] = serde_json::to_value(candidates).unwrap_or_default();
        }
        serde_json::json!({ "error": detail })
    }
}

/// Failure of the qualitative (language model) stage.
///
/// Never fatal on its own: the reconciler falls back to the rule score.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssessmentError {
    #[error("response violated the schema: {}", violations.join("; "))]
    Schema { violations: Vec<String> },

    #[error("{reason}")]
    Unavailable { reason: String },
}

impl From<AssessmentError> for PipelineError {
    fn from(e: AssessmentError) -> Self {
        match e {
            AssessmentError::Schema { violations } => PipelineError::AssessmentSchema { violations },
            AssessmentError::Unavailable { reason } => {
                PipelineError::AssessmentUnavailable { reason }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_has_actionable_hint() {
        let err = PipelineError::ProductNotFound {
            what: "barcode 0000000000000".to_string(),
        };
        assert_eq!(err.code(), "product_not_found");
        assert!(err.hint().unwrap().contains("label photo"));
        assert!(err.to_string().contains("0000000000000"));
    }

    #[test]
    fn test_ambiguous_message_counts_candidates() {
        let err = PipelineError::AmbiguousMatch {
            query: "cola".to_string(),
            candidates: vec![
                CandidateSummary {
                    code: Some("1".into()),
                    name: "Cola".into(),
                    brand: None,
                    confidence: 1.0,
                },
                CandidateSummary {
                    code: Some("2".into()),
                    name: "Cola".into(),
                    brand: Some("Other".into()),
                    confidence: 1.0,
                },
            ],
        };
        assert_eq!(err.to_string(), "'cola' matches 2 products; pick one");

        let body = err.to_json();
        assert_eq!(body["error"]["code"], "ambiguous_match");
        assert_eq!(body["error"]["candidates"][1]["brand"], "Other");
        assert_eq!(body["error"]["candidates"][0]["code"], "1");
        assert!(body["error"]["hint"].is_string());
    }

    #[test]
    fn test_json_omits_absent_fields() {
        let body = PipelineError::AssessmentUnavailable {
            reason: "disabled".into(),
        }
        .to_json();
        assert_eq!(body["error"]["code"], "assessment_unavailable");
        assert!(body["error"].get("hint").is_none());
        assert!(body["error"].get("candidates").is_none());
    }

    #[test]
    fn test_assessment_error_converts() {
        let err: PipelineError = AssessmentError::Unavailable {
            reason: "timeout".into(),
        }
        .into();
        assert_eq!(err.code(), "assessment_unavailable");
        assert!(!PipelineError::InsufficientData.is_recoverable());
    }
}

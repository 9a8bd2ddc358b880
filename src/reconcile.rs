//! Merging the rule score and the model's assessment into one [`Verdict`].
//!
//! | Rule data | Assessment | Score | Band |
//! |-----------|------------|-------|------|
//! | present | ok, bands ≤ 1 step apart | `rule_weight·rule + model_weight·model` | from score |
//! | present | ok, bands 2 steps apart | blend capped to the lower band | lower band |
//! | absent | ok | model score | from score |
//! | present | failed | rule score | rule band |
//! | absent | failed | `InsufficientData` | |

use chrono::Utc;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::config::ScoringConfig;
use crate::error::{AssessmentError, PipelineError};
use crate::guidelines;
use crate::models::{
    Band, Driver, Evidence, NutriScoreResult, ProductRecord, QualitativeAssessment, Verdict,
};

pub struct VerdictReconciler {
    scoring: ScoringConfig,
}

impl VerdictReconciler {
    pub fn new(scoring: ScoringConfig) -> Self {
        Self { scoring }
    }

    pub fn band_for(&self, score: u8) -> Band {
        if score >= self.scoring.good_min {
            Band::Good
        } else if score >= self.scoring.medium_min {
            Band::Medium
        } else {
            Band::Poor
        }
    }

    /// Clamp `score` into the numeric range of `band`.
    ///
    /// An empty range (e.g. Poor when `medium_min` is 0) collapses to its
    /// lower bound.
    fn cap_to_band(&self, score: u8, band: Band) -> u8 {
        let (lo, hi) = match band {
            Band::Good => (self.scoring.good_min, 100),
            Band::Medium => (
                self.scoring.medium_min,
                self.scoring.good_min.saturating_sub(1),
            ),
            Band::Poor => (0, self.scoring.medium_min.saturating_sub(1)),
        };
        score.clamp(lo, hi.max(lo))
    }

    pub fn reconcile(
        &self,
        record: &ProductRecord,
        rule: &NutriScoreResult,
        assessment: Result<QualitativeAssessment, AssessmentError>,
    ) -> Result<Verdict, PipelineError> {
        let has_nutrition = record.nutrition.as_ref().is_some_and(|n| !n.is_empty());
        let mut notes = record.notes.clone();

        let (rule_drivers, rule_evidence) = guidelines::rule_findings(record);
        let rule_band = self.band_for(rule.normalized_score);

        if has_nutrition {
            for nutrient in &rule.assumed_worst {
                notes.push(format!(
                    "{} was not reported and was scored at its worst level",
                    nutrient.replace('_', " ")
                ));
            }
        } else {
            notes.push("No nutrition facts available".to_string());
        }

        let (final_score, band, drivers, evidence, summary, ai_assessed) = match assessment {
            Ok(a) => {
                let (score, band) = if has_nutrition {
                    let blended = (self.scoring.rule_weight * rule.normalized_score as f64
                        + self.scoring.model_weight * a.score as f64)
                        .round()
                        .clamp(0.0, 100.0) as u8;
                    if rule_band.distance(a.band) >= 2 {
                        let band = rule_band.min(a.band);
                        notes.push(format!(
                            "Rule-based score ({}) and AI assessment ({}) disagree; the more conservative band was used",
                            rule_band, a.band
                        ));
                        (self.cap_to_band(blended, band), band)
                    } else {
                        if rule_band != a.band {
                            notes.push(format!(
                                "Rule-based score ({}) and AI assessment ({}) differ by one band; the scores were blended",
                                rule_band, a.band
                            ));
                        }
                        (blended, self.band_for(blended))
                    }
                } else {
                    notes.push(
                        "Score is based on the AI assessment of ingredients only".to_string(),
                    );
                    (a.score, self.band_for(a.score))
                };
                (
                    score,
                    band,
                    merge_drivers(rule_drivers, a.drivers),
                    merge_evidence(rule_evidence, a.evidence),
                    a.summary,
                    true,
                )
            }
            Err(e) => {
                if !has_nutrition {
                    warn!(identity = %record.identity, error = %e, "no nutrition and no assessment");
                    return Err(PipelineError::InsufficientData);
                }
                warn!(identity = %record.identity, error = %e, "falling back to rule-only verdict");
                notes.push(format!(
                    "AI analysis unavailable ({}); the verdict uses the rule-based score only",
                    e
                ));
                (
                    rule.normalized_score,
                    rule_band,
                    merge_drivers(rule_drivers, Vec::new()),
                    rule_evidence,
                    None,
                    false,
                )
            }
        };

        let explanation = summary
            .unwrap_or_else(|| guidelines::explain(record, rule, final_score, band, &drivers));

        info!(
            identity = %record.identity,
            final_score,
            band = %band,
            ai_assessed,
            "verdict reconciled"
        );

        Ok(Verdict {
            product_identity: record.identity.clone(),
            product_name: record.name.clone(),
            final_score,
            band,
            drivers,
            evidence,
            explanation,
            missing_data_notes: notes,
            source_confidence: record.source_confidence,
            nutri_score: rule.clone(),
            ai_assessed,
            timestamp: Utc::now(),
        })
    }
}

/// Lowercase words joined by single spaces.
fn normalized(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn merge_drivers(rule: Vec<Driver>, model: Vec<Driver>) -> Vec<Driver> {
    let mut seen = HashSet::new();
    rule.into_iter()
        .chain(model)
        .filter(|d| seen.insert(normalized(&d.text)))
        .collect()
}

fn merge_evidence(rule: Vec<Evidence>, model: Vec<Evidence>) -> Vec<Evidence> {
    let mut seen = HashSet::new();
    rule.into_iter()
        .chain(model)
        .filter(|e| seen.insert(normalized(&e.claim)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, NutritionFacts, Polarity, SourceConfidence};
    use crate::nutriscore;

    fn reconciler() -> VerdictReconciler {
        VerdictReconciler::new(ScoringConfig::default())
    }

    fn record(nutrition: Option<NutritionFacts>) -> ProductRecord {
        ProductRecord {
            identity: "8000000000001".into(),
            name: "Salted Crackers".into(),
            brand: None,
            category: Category::Snack,
            ingredients: vec!["Wheat flour".into(), "Salt".into()],
            nutrition,
            source_confidence: SourceConfidence::High,
            notes: vec![],
        }
    }

    fn salty() -> NutritionFacts {
        NutritionFacts {
            energy_kcal: Some(480.0),
            sugar_g: Some(3.0),
            saturated_fat_g: Some(6.0),
            sodium_mg: Some(900.0),
            fiber_g: Some(2.0),
            protein_g: Some(9.0),
            fruit_veg_pct: Some(0.0),
            fat_g: Some(20.0),
        }
    }

    fn assessment(score: u8, band: Band) -> QualitativeAssessment {
        QualitativeAssessment {
            score,
            band,
            drivers: vec![
                Driver {
                    text: "High Sodium: 900mg/100g exceeds WHO guideline of 600mg".into(),
                    polarity: Polarity::Negative,
                },
                Driver {
                    text: "refined flour".into(),
                    polarity: Polarity::Negative,
                },
            ],
            evidence: vec![],
            summary: None,
        }
    }

    #[test]
    fn test_unavailable_falls_back_to_rule_band() {
        let rec = record(Some(salty()));
        let rule = nutriscore::score(rec.nutrition.as_ref().unwrap(), rec.category);
        let verdict = reconciler()
            .reconcile(
                &rec,
                &rule,
                Err(AssessmentError::Unavailable {
                    reason: "connection refused".into(),
                }),
            )
            .unwrap();
        assert_eq!(verdict.band, reconciler().band_for(rule.normalized_score));
        assert_eq!(verdict.final_score, rule.normalized_score);
        assert!(!verdict.ai_assessed);
        assert!(verdict
            .missing_data_notes
            .iter()
            .any(|n| n.contains("AI analysis unavailable")));
    }

    #[test]
    fn test_schema_failure_also_falls_back() {
        let rec = record(Some(salty()));
        let rule = nutriscore::score(rec.nutrition.as_ref().unwrap(), rec.category);
        let verdict = reconciler()
            .reconcile(
                &rec,
                &rule,
                Err(AssessmentError::Schema {
                    violations: vec!["bad".into()],
                }),
            )
            .unwrap();
        assert_eq!(verdict.final_score, rule.normalized_score);
        assert!(!verdict.missing_data_notes.is_empty());
    }

    #[test]
    fn test_no_nutrition_and_no_assessment_is_insufficient() {
        let rec = record(None);
        let rule = nutriscore::score(&NutritionFacts::default(), rec.category);
        let err = reconciler()
            .reconcile(
                &rec,
                &rule,
                Err(AssessmentError::Unavailable {
                    reason: "disabled".into(),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData));
    }

    #[test]
    fn test_blend_weights() {
        let rec = record(Some(salty()));
        let mut rule = nutriscore::score(rec.nutrition.as_ref().unwrap(), rec.category);
        rule.normalized_score = 50;
        let verdict = reconciler()
            .reconcile(&rec, &rule, Ok(assessment(45, Band::Medium)))
            .unwrap();
        // 0.4 * 50 + 0.6 * 45 = 47
        assert_eq!(verdict.final_score, 47);
        assert_eq!(verdict.band, Band::Medium);
        assert!(verdict.ai_assessed);
    }

    #[test]
    fn test_two_step_disagreement_takes_lower_band() {
        let rec = record(Some(salty()));
        let mut rule = nutriscore::score(rec.nutrition.as_ref().unwrap(), rec.category);
        rule.normalized_score = 90;
        let verdict = reconciler()
            .reconcile(&rec, &rule, Ok(assessment(30, Band::Poor)))
            .unwrap();
        // blend would be 54 (Medium); capped into Poor.
        assert_eq!(verdict.band, Band::Poor);
        assert_eq!(verdict.final_score, 39);
        assert!(verdict
            .missing_data_notes
            .iter()
            .any(|n| n.contains("disagree")));
    }

    #[test]
    fn test_one_step_disagreement_is_blended_and_noted() {
        let rec = record(Some(salty()));
        let mut rule = nutriscore::score(rec.nutrition.as_ref().unwrap(), rec.category);
        rule.normalized_score = 70;
        let verdict = reconciler()
            .reconcile(&rec, &rule, Ok(assessment(50, Band::Medium)))
            .unwrap();
        // 0.4 * 70 + 0.6 * 50 = 58
        assert_eq!(verdict.final_score, 58);
        assert_eq!(verdict.band, Band::Medium);
        assert!(verdict
            .missing_data_notes
            .iter()
            .any(|n| n.contains("differ by one band")));
    }

    #[test]
    fn test_agreeing_bands_add_no_disagreement_note() {
        let rec = record(Some(salty()));
        let mut rule = nutriscore::score(rec.nutrition.as_ref().unwrap(), rec.category);
        rule.normalized_score = 50;
        let verdict = reconciler()
            .reconcile(&rec, &rule, Ok(assessment(45, Band::Medium)))
            .unwrap();
        assert!(!verdict
            .missing_data_notes
            .iter()
            .any(|n| n.contains("differ") || n.contains("disagree")));
    }

    #[test]
    fn test_cap_with_zero_medium_min_does_not_underflow() {
        let reconciler = VerdictReconciler::new(ScoringConfig {
            medium_min: 0,
            good_min: 60,
            ..ScoringConfig::default()
        });
        assert_eq!(reconciler.cap_to_band(10, Band::Poor), 0);
        assert_eq!(reconciler.cap_to_band(90, Band::Medium), 59);

        let rec = record(Some(salty()));
        let mut rule = nutriscore::score(rec.nutrition.as_ref().unwrap(), rec.category);
        rule.normalized_score = 90;
        let verdict = reconciler
            .reconcile(&rec, &rule, Ok(assessment(10, Band::Poor)))
            .unwrap();
        assert_eq!(verdict.band, Band::Poor);
        assert_eq!(verdict.final_score, 0);
    }

    #[test]
    fn test_drivers_deduplicated_by_normalized_text() {
        let rec = record(Some(salty()));
        let rule = nutriscore::score(rec.nutrition.as_ref().unwrap(), rec.category);
        let verdict = reconciler()
            .reconcile(&rec, &rule, Ok(assessment(30, Band::Poor)))
            .unwrap();
        let sodium: Vec<_> = verdict
            .drivers
            .iter()
            .filter(|d| d.text.to_lowercase().starts_with("high sodium"))
            .collect();
        assert_eq!(sodium.len(), 1);
        assert!(verdict.drivers.iter().any(|d| d.text == "refined flour"));
    }

    #[test]
    fn test_model_only_when_no_nutrition() {
        let rec = record(None);
        let rule = nutriscore::score(&NutritionFacts::default(), rec.category);
        let verdict = reconciler()
            .reconcile(&rec, &rule, Ok(assessment(35, Band::Poor)))
            .unwrap();
        assert_eq!(verdict.final_score, 35);
        assert!(verdict
            .missing_data_notes
            .iter()
            .any(|n| n.contains("ingredients only")));
    }
}

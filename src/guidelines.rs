//! Published nutrition guidelines and the rule-derived drivers built from them.
//!
//! The same thresholds are used in three places: rule drivers and evidence
//! attached to every verdict, the reference block in the analyst prompt, and
//! the generated explanation when the model gives none.

use crate::models::{
    Band, Driver, Evidence, NutriScoreResult, NutritionFacts, Polarity, ProductRecord,
};

/// A per-100 g threshold pair for one nutrient.
#[derive(Debug, Clone, Copy)]
pub struct Guideline {
    pub nutrient: &'static str,
    pub unit: &'static str,
    /// Boundary of the healthy range.
    pub good: f64,
    /// Boundary of the acceptable range.
    pub medium: f64,
    /// Fiber: more is better. Everything else: less is better.
    pub higher_is_better: bool,
    pub authority: &'static str,
    pub source: &'static str,
}

pub const SUGAR: Guideline = Guideline {
    nutrient: "sugar",
    unit: "g",
    good: 5.0,
    medium: 15.0,
    higher_is_better: false,
    authority: "WHO",
    source: "WHO: Guideline: Sugars intake for adults and children (2015)",
};

pub const SATURATED_FAT: Guideline = Guideline {
    nutrient: "saturated fat",
    unit: "g",
    good: 1.5,
    medium: 5.0,
    higher_is_better: false,
    authority: "WHO",
    source: "WHO: Healthy diet (2020)",
};

pub const SODIUM: Guideline = Guideline {
    nutrient: "sodium",
    unit: "mg",
    good: 120.0,
    medium: 600.0,
    higher_is_better: false,
    authority: "WHO",
    source: "WHO: Guideline: Sodium intake for adults and children (2012)",
};

pub const FIBER: Guideline = Guideline {
    nutrient: "fiber",
    unit: "g",
    good: 6.0,
    medium: 3.0,
    higher_is_better: true,
    authority: "ICMR-NIN",
    source: "ICMR-NIN: Dietary Guidelines for Indians (2020)",
};

pub const ALL: [Guideline; 4] = [SUGAR, SATURATED_FAT, SODIUM, FIBER];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Good,
    Medium,
    Poor,
}

impl Guideline {
    pub fn level(&self, value: f64) -> Level {
        if self.higher_is_better {
            if value >= self.good {
                Level::Good
            } else if value >= self.medium {
                Level::Medium
            } else {
                Level::Poor
            }
        } else if value <= self.good {
            Level::Good
        } else if value <= self.medium {
            Level::Medium
        } else {
            Level::Poor
        }
    }

    fn value_of(&self, facts: &NutritionFacts) -> Option<f64> {
        match self.nutrient {
            "sugar" => facts.sugar_g,
            "saturated fat" => facts.saturated_fat_g,
            "sodium" => facts.sodium_mg,
            "fiber" => facts.fiber_g,
            _ => None,
        }
    }

    /// One line for the analyst prompt.
    pub fn reference_line(&self) -> String {
        if self.higher_is_better {
            format!(
                "- {}: good >= {}{u}, acceptable >= {}{u} per 100g ({})",
                self.nutrient,
                fmt_num(self.good),
                fmt_num(self.medium),
                self.source,
                u = self.unit
            )
        } else {
            format!(
                "- {}: good <= {}{u}, acceptable <= {}{u} per 100g ({})",
                self.nutrient,
                fmt_num(self.good),
                fmt_num(self.medium),
                self.source,
                u = self.unit
            )
        }
    }
}

/// Guideline reference block for the analyst prompt.
pub fn reference_block() -> String {
    ALL.iter()
        .map(Guideline::reference_line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concern {
    High,
    Moderate,
}

/// An ingredient on the additive concern list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditiveFlag {
    pub name: &'static str,
    pub class: &'static str,
    pub concern: Concern,
    /// The ingredient text that matched.
    pub ingredient: String,
}

const ADDITIVE_SOURCE: &str =
    "FSSAI: Food Products Standards and Food Additives Regulations (2011); EFSA opinions on food additives";

/// (name, class, concern, aliases)
const ADDITIVES: &[(&str, &str, Concern, &[&str])] = &[
    ("aspartame", "artificial sweetener", Concern::High, &["aspartame", "e951"]),
    ("saccharin", "artificial sweetener", Concern::High, &["saccharin", "e954"]),
    (
        "acesulfame K",
        "artificial sweetener",
        Concern::High,
        &["acesulfame", "ace k", "e950"],
    ),
    ("tartrazine", "artificial colour", Concern::High, &["tartrazine", "yellow 5", "e102"]),
    (
        "sunset yellow",
        "artificial colour",
        Concern::High,
        &["sunset yellow", "yellow 6", "e110"],
    ),
    ("carmoisine", "artificial colour", Concern::High, &["carmoisine", "azorubine", "e122"]),
    ("sodium benzoate", "preservative", Concern::High, &["sodium benzoate", "e211"]),
    ("potassium sorbate", "preservative", Concern::High, &["potassium sorbate", "e202"]),
    ("sodium nitrite", "preservative", Concern::High, &["sodium nitrite", "e250"]),
    (
        "monosodium glutamate",
        "flavour enhancer",
        Concern::High,
        &["monosodium glutamate", "msg", "e621"],
    ),
    (
        "high fructose corn syrup",
        "added sugar",
        Concern::Moderate,
        &["high fructose corn syrup", "glucose fructose syrup", "hfcs"],
    ),
    (
        "hydrogenated oil",
        "processed fat",
        Concern::Moderate,
        &["hydrogenated", "partially hydrogenated"],
    ),
    ("sodium phosphate", "additive", Concern::Moderate, &["sodium phosphate", "e339"]),
];

const SWEETENERS: &[&str] = &[
    "aspartame",
    "sucralose",
    "saccharin",
    "stevia",
    "steviol",
    "acesulfame",
    "neotame",
    "cyclamate",
    "e950",
    "e951",
    "e952",
    "e954",
    "e955",
    "e960",
    "e961",
];

/// Lowercase, alphanumeric-only, space-padded text for whole-word matching.
fn words(s: &str) -> String {
    let joined = s
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    format!(" {} ", joined)
}

fn mentions(haystack: &str, needle: &str) -> bool {
    haystack.contains(&words(needle))
}

/// Flag ingredients on the additive concern list. Each additive is reported once.
pub fn flag_additives(ingredients: &[String]) -> Vec<AdditiveFlag> {
    let mut flags: Vec<AdditiveFlag> = Vec::new();
    for ingredient in ingredients {
        let text = words(ingredient);
        for (name, class, concern, aliases) in ADDITIVES {
            if flags.iter().any(|f| f.name == *name) {
                continue;
            }
            if aliases.iter().any(|a| mentions(&text, a)) {
                flags.push(AdditiveFlag {
                    name: *name,
                    class: *class,
                    concern: *concern,
                    ingredient: ingredient.clone(),
                });
            }
        }
    }
    flags
}

/// Whether any ingredient is a non-nutritive sweetener.
pub fn has_non_nutritive_sweetener(ingredients: &[String]) -> bool {
    ingredients.iter().any(|i| {
        let text = words(i);
        SWEETENERS.iter().any(|s| mentions(&text, s))
    })
}

/// Drivers and evidence derived from the guideline table and additive list.
pub fn rule_findings(record: &ProductRecord) -> (Vec<Driver>, Vec<Evidence>) {
    let mut drivers = Vec::new();
    let mut evidence = Vec::new();

    if let Some(facts) = &record.nutrition {
        for g in ALL {
            let Some(value) = g.value_of(facts) else {
                continue;
            };
            let v = fmt_num(value);
            let level = g.level(value);
            let (driver, comparison) = match (level, g.higher_is_better) {
                (Level::Poor, false) => (
                    Some((
                        format!(
                            "high {}: {}{u}/100g exceeds {} guideline of {}{u}",
                            g.nutrient,
                            v,
                            g.authority,
                            fmt_num(g.medium),
                            u = g.unit
                        ),
                        Polarity::Negative,
                    )),
                    format!("{}{u} > {}{u} per 100g", v, fmt_num(g.medium), u = g.unit),
                ),
                (Level::Good, false) => (
                    Some((
                        format!(
                            "low {}: {}{u}/100g is within {} guideline of {}{u}",
                            g.nutrient,
                            v,
                            g.authority,
                            fmt_num(g.good),
                            u = g.unit
                        ),
                        Polarity::Positive,
                    )),
                    format!("{}{u} <= {}{u} per 100g", v, fmt_num(g.good), u = g.unit),
                ),
                (Level::Medium, false) => (
                    None,
                    format!("{}{u} <= {}{u} per 100g", v, fmt_num(g.medium), u = g.unit),
                ),
                (Level::Good, true) => (
                    Some((
                        format!(
                            "high {}: {}{u}/100g meets {} guideline of {}{u}",
                            g.nutrient,
                            v,
                            g.authority,
                            fmt_num(g.good),
                            u = g.unit
                        ),
                        Polarity::Positive,
                    )),
                    format!("{}{u} >= {}{u} per 100g", v, fmt_num(g.good), u = g.unit),
                ),
                (Level::Medium, true) => (
                    None,
                    format!("{}{u} >= {}{u} per 100g", v, fmt_num(g.medium), u = g.unit),
                ),
                (Level::Poor, true) => (
                    Some((
                        format!(
                            "low {}: {}{u}/100g is below {} guideline of {}{u}",
                            g.nutrient,
                            v,
                            g.authority,
                            fmt_num(g.medium),
                            u = g.unit
                        ),
                        Polarity::Negative,
                    )),
                    format!("{}{u} < {}{u} per 100g", v, fmt_num(g.medium), u = g.unit),
                ),
            };

            if let Some((text, polarity)) = driver {
                drivers.push(Driver { text, polarity });
            }
            evidence.push(Evidence {
                claim: format!("{} level is {}", capitalize(g.nutrient), level_word(level)),
                guideline_source: g.source.to_string(),
                comparison,
            });
        }
    }

    for flag in flag_additives(&record.ingredients) {
        drivers.push(Driver {
            text: format!("contains {} ({})", flag.name, flag.class),
            polarity: Polarity::Negative,
        });
        let concern = match flag.concern {
            Concern::High => "high-concern",
            Concern::Moderate => "moderate-concern",
        };
        evidence.push(Evidence {
            claim: format!("Contains {} additive {}", concern, flag.name),
            guideline_source: ADDITIVE_SOURCE.to_string(),
            comparison: format!("ingredient '{}' is on the {} list", flag.ingredient, concern),
        });
    }

    (drivers, evidence)
}

/// Plain-language explanation built from the rule breakdown.
pub fn explain(
    record: &ProductRecord,
    rule: &NutriScoreResult,
    final_score: u8,
    band: Band,
    drivers: &[Driver],
) -> String {
    let mut parts = vec![format!(
        "{} scores {}/100 ({}). Nutri-Score grade {} ({} points).",
        record.name, final_score, band, rule.grade, rule.points
    )];

    let concerns: Vec<&str> = drivers
        .iter()
        .filter(|d| d.polarity == Polarity::Negative)
        .map(|d| short(&d.text))
        .collect();
    let positives: Vec<&str> = drivers
        .iter()
        .filter(|d| d.polarity == Polarity::Positive)
        .map(|d| short(&d.text))
        .collect();

    if !concerns.is_empty() {
        parts.push(format!("Main concerns: {}.", concerns.join(", ")));
    }
    if !positives.is_empty() {
        parts.push(format!("Positives: {}.", positives.join(", ")));
    }
    if !rule.assumed_worst.is_empty() {
        parts.push(format!(
            "Not reported and scored conservatively: {}.",
            rule.assumed_worst.join(", ").replace('_', " ")
        ));
    }
    parts.join(" ")
}

/// The part of a driver before its colon.
fn short(text: &str) -> &str {
    text.split(':').next().unwrap_or(text).trim()
}

fn level_word(level: Level) -> &'static str {
    match level {
        Level::Good => "within the healthy range",
        Level::Medium => "moderate",
        Level::Poor => "outside the recommended range",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Format a number without trailing zeros: `40`, `1.5`, `0.25`.
pub fn fmt_num(v: f64) -> String {
    let s = format!("{:.2}", v);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

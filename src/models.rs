//! Core data models used throughout HealthLens.
//!
//! These types represent the inputs, canonical product records, scores and
//! verdicts that flow through the analysis pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw evidence supplied by the caller for one analysis request.
#[derive(Debug, Clone)]
pub enum RawInput {
    Barcode(String),
    LabelImage { bytes: Vec<u8>, mime: String },
    SearchText(String),
}

impl RawInput {
    pub fn kind(&self) -> InputKind {
        match self {
            RawInput::Barcode(_) => InputKind::Barcode,
            RawInput::LabelImage { .. } => InputKind::LabelImage,
            RawInput::SearchText(_) => InputKind::SearchText,
        }
    }
}

/// Which acquisition method produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Barcode,
    LabelImage,
    SearchText,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Barcode => "barcode",
            InputKind::LabelImage => "label_image",
            InputKind::SearchText => "search_text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "barcode" => Some(InputKind::Barcode),
            "label_image" => Some(InputKind::LabelImage),
            "search_text" => Some(InputKind::SearchText),
            _ => None,
        }
    }
}

/// Product category. Selects the Nutri-Score threshold table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Beverage,
    Water,
    Dairy,
    Cheese,
    FatsOils,
    Snack,
    Cereal,
    PreparedMeal,
    Condiment,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Beverage => "beverage",
            Category::Water => "water",
            Category::Dairy => "dairy",
            Category::Cheese => "cheese",
            Category::FatsOils => "fats_oils",
            Category::Snack => "snack",
            Category::Cereal => "cereal",
            Category::PreparedMeal => "prepared_meal",
            Category::Condiment => "condiment",
            Category::Unknown => "unknown",
        }
    }

    pub fn is_beverage(&self) -> bool {
        matches!(self, Category::Beverage | Category::Water)
    }

    /// Infer a category from catalog tags (`en:beverages`) or free text.
    ///
    /// More specific categories are checked first so that "cheese" wins
    /// over "dairy" and "water" wins over "beverage".
    pub fn infer<'a>(hints: impl IntoIterator<Item = &'a str>) -> Category {
        let words: Vec<String> = hints
            .into_iter()
            .flat_map(|h| {
                h.to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        let text = format!(" {} ", words.join(" "));

        const RULES: &[(Category, &[&str])] = &[
            (Category::Water, &["mineral water", "spring water", "waters", "drinking water"]),
            (Category::Cheese, &["cheese", "fromage", "cheddar", "mozzarella"]),
            (
                Category::FatsOils,
                &["vegetable oil", "olive oil", "sunflower oil", "fats", "butter", "margarine", "oils"],
            ),
            (
                Category::Beverage,
                &[
                    "beverage", "drink", "soda", "juice", "cola", "tea", "coffee", "lemonade",
                    "smoothie", "nectar",
                ],
            ),
            (Category::Dairy, &["dairies", "dairy", "milk", "yogurt", "yoghurt", "cream", "kefir"]),
            (Category::Cereal, &["cereal", "muesli", "granola", "oats", "corn flakes"]),
            (
                Category::Snack,
                &["snack", "chips", "crisps", "biscuit", "cookie", "cracker", "candy", "chocolate", "confectionery"],
            ),
            (
                Category::PreparedMeal,
                &["ready meal", "meals", "instant noodles", "pizza", "soup"],
            ),
            (
                Category::Condiment,
                &["sauce", "ketchup", "mayonnaise", "mustard", "dressing", "condiment", "spread"],
            ),
        ];

        for (category, needles) in RULES {
            let hit = needles.iter().any(|n| {
                text.contains(&format!(" {} ", n)) || text.contains(&format!(" {}s ", n))
            });
            if hit {
                return *category;
            }
        }
        Category::Unknown
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much the product data can be trusted, based on how it was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfidence {
    Low,
    Medium,
    High,
}

impl SourceConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceConfidence::Low => "low",
            SourceConfidence::Medium => "medium",
            SourceConfidence::High => "high",
        }
    }
}

/// Canonical nutrition values per 100 g / 100 ml.
///
/// `None` means "not reported". A present zero is a claim; absence is not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionFacts {
    pub energy_kcal: Option<f64>,
    pub sugar_g: Option<f64>,
    pub saturated_fat_g: Option<f64>,
    pub sodium_mg: Option<f64>,
    pub fiber_g: Option<f64>,
    pub protein_g: Option<f64>,
    pub fruit_veg_pct: Option<f64>,
    pub fat_g: Option<f64>,
}

impl NutritionFacts {
    pub fn is_empty(&self) -> bool {
        self.present_fields().is_empty()
    }

    /// Names of the fields that carry a value.
    pub fn present_fields(&self) -> Vec<&'static str> {
        self.fields()
            .into_iter()
            .filter_map(|(name, v)| v.map(|_| name))
            .collect()
    }

    fn fields(&self) -> [(&'static str, Option<f64>); 8] {
        [
            ("energy_kcal", self.energy_kcal),
            ("sugar_g", self.sugar_g),
            ("saturated_fat_g", self.saturated_fat_g),
            ("sodium_mg", self.sodium_mg),
            ("fiber_g", self.fiber_g),
            ("protein_g", self.protein_g),
            ("fruit_veg_pct", self.fruit_veg_pct),
            ("fat_g", self.fat_g),
        ]
    }
}

/// Canonical product shape produced by the source resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub identity: String,
    pub name: String,
    pub brand: Option<String>,
    pub category: Category,
    pub ingredients: Vec<String>,
    pub nutrition: Option<NutritionFacts>,
    pub source_confidence: SourceConfidence,
    /// Notes recorded while resolving (degraded OCR, malformed fields, ...).
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Nutri-Score letter grade, A best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Points awarded for one nutrient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentPoints {
    pub nutrient: String,
    pub value: Option<f64>,
    pub points: i32,
    pub negative: bool,
}

/// Result of the deterministic rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutriScoreResult {
    pub points: i32,
    pub grade: Grade,
    pub normalized_score: u8,
    pub components: Vec<ComponentPoints>,
    /// Negative nutrients that were missing and scored at their worst bucket.
    pub assumed_worst: Vec<String>,
}

/// Coarse three-level rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Band {
    Poor,
    Medium,
    Good,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Poor => "Poor",
            Band::Medium => "Medium",
            Band::Good => "Good",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" => Some(Band::Good),
            "medium" => Some(Band::Medium),
            "poor" => Some(Band::Poor),
            _ => None,
        }
    }

    fn rank(&self) -> i32 {
        match self {
            Band::Poor => 0,
            Band::Medium => 1,
            Band::Good => 2,
        }
    }

    /// Number of steps between two bands (0, 1 or 2).
    pub fn distance(&self, other: Band) -> i32 {
        (self.rank() - other.rank()).abs()
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

/// A short explanatory factor contributing to the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub text: String,
    pub polarity: Polarity,
}

/// A claim tied to an external guideline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub claim: String,
    pub guideline_source: String,
    pub comparison: String,
}

/// The language model's judgment, after schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitativeAssessment {
    pub score: u8,
    pub band: Band,
    pub drivers: Vec<Driver>,
    pub evidence: Vec<Evidence>,
    pub summary: Option<String>,
}

/// The externally visible result of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub product_identity: String,
    pub product_name: String,
    pub final_score: u8,
    pub band: Band,
    pub drivers: Vec<Driver>,
    pub evidence: Vec<Evidence>,
    pub explanation: String,
    pub missing_data_notes: Vec<String>,
    pub source_confidence: SourceConfidence,
    pub nutri_score: NutriScoreResult,
    pub ai_assessed: bool,
    pub timestamp: DateTime<Utc>,
}

/// One row in the analysis history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub product_identity: String,
    pub input_kind: InputKind,
    pub verdict: Verdict,
}

impl HistoryEntry {
    pub fn new(verdict: Verdict, input_kind: InputKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            product_identity: verdict.product_identity.clone(),
            input_kind,
            verdict,
        }
    }
}

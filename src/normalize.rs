//! Nutrition payload normalization.
//!
//! Catalog records, label transcriptions and hand-written inputs all describe
//! the same handful of nutrients with different key names and units.
//! [`normalize`] maps any of them onto the canonical per-100 g/ml
//! [`NutritionFacts`] shape:
//!
//! | Canonical field | Unit | Accepted keys (case-insensitive, `-` = `_`) |
//! |-----------------|------|---------------------------------------------|
//! | `energy_kcal` | kcal | `energy_kcal_100g`, `energy_kcal`, `calories`, `energy_100g` (kJ), `energy_kj`, `energy` (kJ) |
//! | `sugar_g` | g | `sugars_100g`, `sugar`, `sugars`, `total_sugars` |
//! | `saturated_fat_g` | g | `saturated_fat_100g`, `saturated_fat`, `saturates` |
//! | `sodium_mg` | mg | `sodium_100g` (g), `sodium_mg`, `sodium` (mg), `salt_100g`, `salt` (g, ×400) |
//! | `fiber_g` | g | `fiber_100g`, `fibre_100g`, `fiber`, `fibre`, `dietary_fiber` |
//! | `protein_g` | g | `proteins_100g`, `protein`, `proteins` |
//! | `fruit_veg_pct` | % | `fruits_vegetables_nuts_100g`, `fruit_veg_pct`, ... |
//! | `fat_g` | g | `fat_100g`, `fat`, `total_fat` |
//!
//! The unit in parentheses is assumed for bare numbers. String values may
//! carry their own unit (`"500 mg"`, `"1046 kJ"`, `"<0.5 g"`), which takes
//! precedence. Absent and `null` fields stay absent: a zero is a claim,
//! absence is not.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::PipelineError;
use crate::models::NutritionFacts;

/// Grams of sodium per gram of salt, expressed as mg sodium per g salt.
const SODIUM_MG_PER_G_SALT: f64 = 400.0;
const KJ_PER_KCAL: f64 = 4.184;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Unit {
    Kcal,
    Kj,
    Gram,
    Milligram,
    Microgram,
    Kilogram,
    Percent,
}

impl Unit {
    fn parse(s: &str) -> Option<Unit> {
        match s {
            "kcal" | "cal" | "calories" => Some(Unit::Kcal),
            "kj" => Some(Unit::Kj),
            "g" | "gr" | "gram" | "grams" => Some(Unit::Gram),
            "mg" => Some(Unit::Milligram),
            "µg" | "μg" | "mcg" | "ug" => Some(Unit::Microgram),
            "kg" => Some(Unit::Kilogram),
            "%" => Some(Unit::Percent),
            _ => None,
        }
    }

    fn grams(&self, v: f64) -> Option<f64> {
        match self {
            Unit::Gram | Unit::Percent => Some(v),
            Unit::Milligram => Some(v / 1000.0),
            Unit::Microgram => Some(v / 1_000_000.0),
            Unit::Kilogram => Some(v * 1000.0),
            Unit::Kcal | Unit::Kj => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Energy,
    Sugar,
    SaturatedFat,
    Sodium,
    Salt,
    Fiber,
    Protein,
    FruitVeg,
    Fat,
}

/// Alias table in lookup priority order. The first present key wins.
const ALIASES: &[(&str, Field, Unit)] = &[
    ("energy_kcal_100g", Field::Energy, Unit::Kcal),
    ("energy_kcal", Field::Energy, Unit::Kcal),
    ("calories", Field::Energy, Unit::Kcal),
    ("kcal", Field::Energy, Unit::Kcal),
    ("energy_100g", Field::Energy, Unit::Kj),
    ("energy_kj_100g", Field::Energy, Unit::Kj),
    ("energy_kj", Field::Energy, Unit::Kj),
    ("energy", Field::Energy, Unit::Kj),
    ("sugars_100g", Field::Sugar, Unit::Gram),
    ("sugar_g", Field::Sugar, Unit::Gram),
    ("sugar", Field::Sugar, Unit::Gram),
    ("sugars", Field::Sugar, Unit::Gram),
    ("total_sugars", Field::Sugar, Unit::Gram),
    ("saturated_fat_100g", Field::SaturatedFat, Unit::Gram),
    ("saturated_fat_g", Field::SaturatedFat, Unit::Gram),
    ("saturated_fat", Field::SaturatedFat, Unit::Gram),
    ("saturates", Field::SaturatedFat, Unit::Gram),
    ("sat_fat", Field::SaturatedFat, Unit::Gram),
    ("sodium_100g", Field::Sodium, Unit::Gram),
    ("sodium_mg", Field::Sodium, Unit::Milligram),
    ("sodium", Field::Sodium, Unit::Milligram),
    ("salt_100g", Field::Salt, Unit::Gram),
    ("salt_g", Field::Salt, Unit::Gram),
    ("salt", Field::Salt, Unit::Gram),
    ("fiber_100g", Field::Fiber, Unit::Gram),
    ("fibre_100g", Field::Fiber, Unit::Gram),
    ("fiber_g", Field::Fiber, Unit::Gram),
    ("fiber", Field::Fiber, Unit::Gram),
    ("fibre", Field::Fiber, Unit::Gram),
    ("dietary_fiber", Field::Fiber, Unit::Gram),
    ("proteins_100g", Field::Protein, Unit::Gram),
    ("protein_g", Field::Protein, Unit::Gram),
    ("protein", Field::Protein, Unit::Gram),
    ("proteins", Field::Protein, Unit::Gram),
    ("fruits_vegetables_nuts_100g", Field::FruitVeg, Unit::Percent),
    (
        "fruits_vegetables_nuts_estimate_from_ingredients_100g",
        Field::FruitVeg,
        Unit::Percent,
    ),
    ("fruit_veg_pct", Field::FruitVeg, Unit::Percent),
    ("fruits_vegetables_pct", Field::FruitVeg, Unit::Percent),
    ("fat_100g", Field::Fat, Unit::Gram),
    ("fat_g", Field::Fat, Unit::Gram),
    ("total_fat", Field::Fat, Unit::Gram),
    ("fat", Field::Fat, Unit::Gram),
];

/// Normalize a raw nutrition mapping into canonical [`NutritionFacts`].
///
/// Unknown keys are ignored. Fails with [`PipelineError::MalformedNutrition`]
/// if a recognized key holds a value that is non-numeric, non-finite,
/// negative, or carries a unit that makes no sense for the nutrient.
pub fn normalize(raw: &Map<String, Value>) -> Result<NutritionFacts, PipelineError> {
    let keyed: HashMap<String, (&str, &Value)> = raw
        .iter()
        .map(|(k, v)| (canonical_key(k), (k.as_str(), v)))
        .collect();

    let mut facts = NutritionFacts::default();
    let mut salt_mg: Option<f64> = None;

    for (alias, field, default_unit) in ALIASES {
        let Some((original_key, value)) = keyed.get(*alias) else {
            continue;
        };
        let slot_taken = match field {
            Field::Energy => facts.energy_kcal.is_some(),
            Field::Sugar => facts.sugar_g.is_some(),
            Field::SaturatedFat => facts.saturated_fat_g.is_some(),
            Field::Sodium => facts.sodium_mg.is_some(),
            Field::Salt => salt_mg.is_some(),
            Field::Fiber => facts.fiber_g.is_some(),
            Field::Protein => facts.protein_g.is_some(),
            Field::FruitVeg => facts.fruit_veg_pct.is_some(),
            Field::Fat => facts.fat_g.is_some(),
        };
        if slot_taken {
            continue;
        }

        let Some((number, unit)) = parse_value(original_key, value)? else {
            continue;
        };
        let unit = unit.unwrap_or(*default_unit);
        let converted = convert(original_key, *field, number, unit)?;

        match field {
            Field::Energy => facts.energy_kcal = Some(converted),
            Field::Sugar => facts.sugar_g = Some(converted),
            Field::SaturatedFat => facts.saturated_fat_g = Some(converted),
            Field::Sodium => facts.sodium_mg = Some(converted),
            Field::Salt => salt_mg = Some(converted),
            Field::Fiber => facts.fiber_g = Some(converted),
            Field::Protein => facts.protein_g = Some(converted),
            Field::FruitVeg => facts.fruit_veg_pct = Some(converted),
            Field::Fat => facts.fat_g = Some(converted),
        }
    }

    if facts.sodium_mg.is_none() {
        facts.sodium_mg = salt_mg;
    }

    Ok(facts)
}

fn canonical_key(k: &str) -> String {
    k.trim().to_lowercase().replace(['-', ' '], "_")
}

/// Parse a JSON value into a number and an optional explicit unit.
///
/// `Ok(None)` means the value is absent (`null` or an empty string).
fn parse_value(key: &str, value: &Value) -> Result<Option<(f64, Option<Unit>)>, PipelineError> {
    let (number, unit) = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => match n.as_f64() {
            Some(v) => (v, None),
            None => return Err(malformed(key, "number is not representable")),
        },
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            let (number, unit) = parse_quantity(s).ok_or_else(|| {
                malformed(key, &format!("'{}' is not a number with an optional unit", s))
            })?;
            (number, unit)
        }
        other => {
            return Err(malformed(
                key,
                &format!("expected a number or string, got {}", json_type(other)),
            ))
        }
    };

    if !number.is_finite() {
        return Err(malformed(key, "value is not finite"));
    }
    if number < 0.0 {
        return Err(malformed(key, &format!("negative value {}", number)));
    }
    Ok(Some((number, unit)))
}

/// Parse text like `"12 g"`, `"500mg"`, `"<0.5 g"`, `"1,5 g"` or `"250"`.
///
/// Returns `None` when there is no leading number or the suffix is not a
/// known unit.
fn parse_quantity(s: &str) -> Option<(f64, Option<Unit>)> {
    let s = s
        .trim()
        .trim_start_matches(['<', '>', '~', '≈'])
        .trim_start();
    let split = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-' || *c == '+'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (num, rest) = s.split_at(split);
    if num.is_empty() {
        return None;
    }
    let number: f64 = num.replace(',', ".").parse().ok()?;

    let suffix = rest.trim().to_lowercase();
    if suffix.is_empty() {
        return Some((number, None));
    }
    Unit::parse(&suffix).map(|u| (number, Some(u)))
}

fn convert(key: &str, field: Field, v: f64, unit: Unit) -> Result<f64, PipelineError> {
    let out = match field {
        Field::Energy => match unit {
            Unit::Kcal => v,
            Unit::Kj => v / KJ_PER_KCAL,
            _ => return Err(malformed(key, "energy must be in kcal or kJ")),
        },
        Field::Sodium => grams(key, v, unit)? * 1000.0,
        Field::Salt => grams(key, v, unit)? * SODIUM_MG_PER_G_SALT,
        Field::Sugar
        | Field::SaturatedFat
        | Field::Fiber
        | Field::Protein
        | Field::FruitVeg
        | Field::Fat => grams(key, v, unit)?,
    };
    Ok(round3(out))
}

fn grams(key: &str, v: f64, unit: Unit) -> Result<f64, PipelineError> {
    unit.grams(v)
        .ok_or_else(|| malformed(key, "energy unit used for a mass nutrient"))
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn malformed(key: &str, reason: &str) -> PipelineError {
    PipelineError::MalformedNutrition {
        field: key.to_string(),
        reason: reason.to_string(),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_differently_keyed_payloads_normalize_equal() {
        let catalog = map(json!({
            "sugars_100g": 12,
            "salt_100g": 1.25,
            "energy_100g": 1046,
            "saturated-fat_100g": 2.5,
            "proteins_100g": 3.0,
        }));
        let label = map(json!({
            "Sugar": "12 g",
            "sodium": "500 mg",
            "energy_kcal": "250 kcal",
            "Saturated Fat": "2500mg",
            "protein": "3g",
        }));

        let a = normalize(&catalog).unwrap();
        let b = normalize(&label).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.energy_kcal, Some(250.0));
        assert_eq!(a.sodium_mg, Some(500.0));
    }

    #[test]
    fn test_absent_stays_absent() {
        let facts = normalize(&map(json!({ "sugar": 0, "fiber": null, "colour": "red" }))).unwrap();
        assert_eq!(facts.sugar_g, Some(0.0));
        assert_eq!(facts.fiber_g, None);
        assert_eq!(facts.sodium_mg, None);
        assert_eq!(facts.protein_g, None);
    }

    #[test]
    fn test_sodium_preferred_over_salt() {
        let facts = normalize(&map(json!({ "salt": 2.0, "sodium_mg": 300 }))).unwrap();
        assert_eq!(facts.sodium_mg, Some(300.0));
    }

    #[test]
    fn test_kcal_preferred_over_kj() {
        let facts =
            normalize(&map(json!({ "energy_100g": 2000, "energy-kcal_100g": 480 }))).unwrap();
        assert_eq!(facts.energy_kcal, Some(480.0));
    }

    #[test]
    fn test_less_than_prefix_and_decimal_comma() {
        let facts = normalize(&map(json!({ "fibre": "<0,5 g", "sugar": "1,2g" }))).unwrap();
        assert_eq!(facts.fiber_g, Some(0.5));
        assert_eq!(facts.sugar_g, Some(1.2));
    }

    #[test]
    fn test_negative_is_malformed() {
        let err = normalize(&map(json!({ "sugar": -1 }))).unwrap_err();
        assert_eq!(err.code(), "malformed_nutrition");
        assert!(err.to_string().contains("sugar"));
    }

    #[test]
    fn test_non_numeric_is_malformed() {
        assert!(normalize(&map(json!({ "sodium": "lots" }))).is_err());
        assert!(normalize(&map(json!({ "protein": true }))).is_err());
        assert!(normalize(&map(json!({ "energy_kcal": "12 g" }))).is_err());
        assert!(normalize(&map(json!({ "sugar": "10 kcal" }))).is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("500mg"), Some((500.0, Some(Unit::Milligram))));
        assert_eq!(parse_quantity(" 42 "), Some((42.0, None)));
        assert_eq!(parse_quantity("15 mcg"), Some((15.0, Some(Unit::Microgram))));
        assert_eq!(parse_quantity("g"), None);
        assert_eq!(parse_quantity("3 spoons"), None);
    }
}

//! Label photo handling: image cleanup before OCR and heuristic parsing of
//! the transcribed text.
//!
//! Parsing is deliberately forgiving. Nutrition tables come in many layouts,
//! so each line is matched on its leading nutrient name and the first
//! quantity that follows it. Anything unrecognized is ignored.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde_json::{Map, Value};
use std::io::Cursor;

use crate::traits::ImagePreprocessor;

/// What could be read off a label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLabel {
    pub name: Option<String>,
    pub ingredients: Vec<String>,
    /// Raw nutrition pairs such as `"sugar": "12 g"`, ready for normalization.
    pub nutrition: Map<String, Value>,
}

/// Line prefixes, checked in order. `None` marks a line to skip.
const NUTRIENT_LABELS: &[(&str, Option<&str>)] = &[
    ("unsaturat", None),
    ("monounsaturat", None),
    ("polyunsaturat", None),
    ("trans", None),
    ("carbohydrate", None),
    ("saturat", Some("saturated_fat")),
    ("of which saturates", Some("saturated_fat")),
    ("sugar", Some("sugar")),
    ("of which sugars", Some("sugar")),
    ("total sugars", Some("sugar")),
    ("energy", Some("energy")),
    ("calories", Some("energy")),
    ("sodium", Some("sodium")),
    ("salt", Some("salt")),
    ("dietary fib", Some("fiber")),
    ("fibre", Some("fiber")),
    ("fiber", Some("fiber")),
    ("protein", Some("protein")),
    ("total fat", Some("fat")),
    ("fat", Some("fat")),
];

const SECTION_WORDS: &[&str] = &[
    "ingredients",
    "nutrition",
    "nutritional",
    "per 100",
    "typical values",
    "allergen",
    "best before",
    "store",
];

/// Parse OCR text into name, ingredients and nutrition pairs.
pub fn parse_label_text(text: &str) -> ParsedLabel {
    let mut parsed = ParsedLabel::default();
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let lower = line.to_lowercase();

        if lower.starts_with("ingredients") {
            let mut body = line
                .split_once(':')
                .map(|(_, rest)| rest.trim().to_string())
                .unwrap_or_default();
            while i + 1 < lines.len() {
                let next = lines[i + 1];
                if next.is_empty() || nutrient_key(&next.to_lowercase()).is_some() {
                    break;
                }
                if SECTION_WORDS.iter().any(|w| next.to_lowercase().starts_with(w)) {
                    break;
                }
                if !body.is_empty() {
                    body.push(' ');
                }
                body.push_str(next);
                i += 1;
            }
            parsed.ingredients = split_ingredients(&body);
        } else if let Some(key) = nutrient_key(&lower) {
            if let Some((k, v)) = nutrient_value(key, &lower) {
                parsed.nutrition.entry(k).or_insert(Value::String(v));
            }
        } else if parsed.name.is_none() && looks_like_name(line, &lower) {
            parsed.name = Some(line.to_string());
        }
        i += 1;
    }

    parsed
}

fn nutrient_key(lower: &str) -> Option<&'static str> {
    let head = lower.trim_start_matches(|c: char| c == '-' || c == '*' || c.is_whitespace());
    for (prefix, key) in NUTRIENT_LABELS {
        if head.starts_with(prefix) {
            // The line must also carry a number to count as a table row.
            return if head.chars().any(|c| c.is_ascii_digit()) {
                *key
            } else {
                None
            };
        }
    }
    None
}

fn nutrient_value(key: &str, lower: &str) -> Option<(String, String)> {
    let quantities = scan_quantities(lower);
    if key == "energy" {
        if let Some((n, _)) = quantities.iter().find(|(_, u)| u == "kcal") {
            return Some(("energy_kcal".to_string(), format!("{} kcal", n)));
        }
        if let Some((n, _)) = quantities.iter().find(|(_, u)| u == "kj") {
            return Some(("energy_kj".to_string(), format!("{} kj", n)));
        }
        // "Calories 250" with no unit.
        let (n, _) = quantities.first()?;
        return Some(("energy_kcal".to_string(), n.clone()));
    }
    let (n, unit) = quantities.first()?;
    let value = if unit.is_empty() {
        n.clone()
    } else {
        format!("{} {}", n, unit)
    };
    Some((key.to_string(), value))
}

/// Every `number [unit]` pair in `s`, in order.
fn scan_quantities(s: &str) -> Vec<(String, String)> {
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == ',')
        {
            i += 1;
        }
        let number = parse_number(&chars[start..i].iter().collect::<String>());
        let mut j = i;
        while j < chars.len() && chars[j] == ' ' {
            j += 1;
        }
        let unit_start = j;
        while j < chars.len() && (chars[j].is_alphabetic() || chars[j] == '%') {
            j += 1;
        }
        let unit: String = chars[unit_start..j].iter().collect();
        let unit = match unit.as_str() {
            "g" | "mg" | "mcg" | "µg" | "kcal" | "kj" | "%" => unit,
            _ => String::new(),
        };
        if !unit.is_empty() {
            i = j;
        }
        out.push((number, unit));
    }
    out
}

/// Canonical decimal form of a printed number.
///
/// `1,883` is a thousands group, `1,5` and `0,125` are decimal commas. With
/// both marks present the later one is the decimal point.
fn parse_number(raw: &str) -> String {
    let raw = raw.trim_end_matches(['.', ',']);
    match (raw.rfind('.'), raw.rfind(',')) {
        (Some(dot), Some(comma)) => {
            let (group, decimal) = if dot > comma { (',', '.') } else { ('.', ',') };
            raw.replace(group, "").replace(decimal, ".")
        }
        (None, Some(_)) if is_thousands_grouped(raw) => raw.replace(',', ""),
        _ => raw.replace(',', "."),
    }
}

fn is_thousands_grouped(raw: &str) -> bool {
    let mut groups = raw.split(',');
    let head = groups.next().unwrap_or_default();
    !head.is_empty() && head.len() <= 3 && !head.starts_with('0') && groups.all(|g| g.len() == 3)
}

fn looks_like_name(line: &str, lower: &str) -> bool {
    !line.is_empty()
        && line.len() <= 80
        && !line.contains(':')
        && line.chars().any(char::is_alphabetic)
        && !SECTION_WORDS.iter().any(|w| lower.starts_with(w))
}

/// Split an ingredient list on top-level commas and semicolons.
///
/// Commas inside parentheses or brackets belong to the enclosing ingredient:
/// `"Sugar, Emulsifier (E322, E471), Salt."` gives three entries.
pub fn split_ingredients(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = (depth - 1).max(0);
                current.push(c);
            }
            ',' | ';' if depth == 0 => {
                push_ingredient(&mut out, &current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push_ingredient(&mut out, &current);
    out
}

fn push_ingredient(out: &mut Vec<String>, raw: &str) {
    let cleaned = raw.trim().trim_end_matches('.').trim().replace('_', "");
    if !cleaned.is_empty() {
        out.push(cleaned);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Image preprocessing
// ═══════════════════════════════════════════════════════════════════════

/// Grayscale, contrast, denoise and sharpen with the `image` crate.
///
/// Output is PNG, downscaled so the longest side is at most `max_side`.
pub struct ImageCrateEnhancer {
    pub max_side: u32,
    pub contrast: f32,
}

impl Default for ImageCrateEnhancer {
    fn default() -> Self {
        Self {
            max_side: 2048,
            contrast: 25.0,
        }
    }
}

impl ImagePreprocessor for ImageCrateEnhancer {
    fn preprocess(&self, bytes: &[u8], mime: &str) -> Result<(Vec<u8>, String)> {
        let img = match ImageFormat::from_mime_type(mime) {
            Some(format) => image::load_from_memory_with_format(bytes, format),
            None => image::load_from_memory(bytes),
        }
        .with_context(|| format!("Failed to decode {} image", mime))?;

        let img = if img.width().max(img.height()) > self.max_side {
            img.resize(self.max_side, self.max_side, FilterType::Lanczos3)
        } else {
            img
        };

        let gray = DynamicImage::ImageLuma8(img.to_luma8());
        let contrasted = gray.adjust_contrast(self.contrast);
        let denoised = contrasted.blur(0.6);
        let sharpened = denoised.unsharpen(1.2, 3);

        let mut out = Vec::new();
        sharpened
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .context("Failed to encode preprocessed image")?;
        Ok((out, "image/png".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABEL: &str = "\
Crunchy Oat Bars

INGREDIENTS: Oats (45%), Sugar, Palm Oil, Glucose Syrup,
Emulsifier (Soy Lecithin, E471), Salt.

NUTRITION INFORMATION per 100g
Energy 1883 kJ / 450 kcal
Fat 18.5 g
 of which saturates 7.2g
Carbohydrate 60 g
 of which sugars 24 g
Fibre 5,1 g
Protein 7 g
Salt 0.6 g
";

    #[test]
    fn test_parse_label_text() {
        let parsed = parse_label_text(LABEL);
        assert_eq!(parsed.name.as_deref(), Some("Crunchy Oat Bars"));
        assert_eq!(
            parsed.ingredients,
            vec![
                "Oats (45%)",
                "Sugar",
                "Palm Oil",
                "Glucose Syrup",
                "Emulsifier (Soy Lecithin, E471)",
                "Salt"
            ]
        );
        let n = &parsed.nutrition;
        assert_eq!(n["energy_kcal"], "450 kcal");
        assert_eq!(n["fat"], "18.5 g");
        assert_eq!(n["saturated_fat"], "7.2 g");
        assert_eq!(n["sugar"], "24 g");
        assert_eq!(n["fiber"], "5.1 g");
        assert_eq!(n["protein"], "7 g");
        assert_eq!(n["salt"], "0.6 g");
        assert!(!n.contains_key("carbohydrate"));
    }

    #[test]
    fn test_parse_normalizes() {
        let parsed = parse_label_text(LABEL);
        let facts = crate::normalize::normalize(&parsed.nutrition).unwrap();
        assert_eq!(facts.energy_kcal, Some(450.0));
        assert_eq!(facts.sodium_mg, Some(240.0));
        assert_eq!(facts.fiber_g, Some(5.1));
    }

    #[test]
    fn test_garbage_yields_nothing() {
        let parsed = parse_label_text("@@ ## ~~\n\n");
        assert!(parsed.nutrition.is_empty());
        assert!(parsed.ingredients.is_empty());
    }

    #[test]
    fn test_thousands_separator_is_not_a_decimal_comma() {
        let parsed = parse_label_text("Energy 1,883 kJ\nFat 1,5 g\nSalt 0,125 g\nSodium 1,250.5 mg");
        assert_eq!(parsed.nutrition["energy_kj"], "1883 kj");
        assert_eq!(parsed.nutrition["fat"], "1.5 g");
        assert_eq!(parsed.nutrition["salt"], "0.125 g");
        assert_eq!(parsed.nutrition["sodium"], "1250.5 mg");
        assert_eq!(parse_number("2.400,75"), "2400.75");
        assert_eq!(parse_number("12,"), "12");
    }

    #[test]
    fn test_split_ingredients_respects_parentheses() {
        assert_eq!(
            split_ingredients("Water; Sugar, Acid (Citric Acid, E330), _Milk_."),
            vec!["Water", "Sugar", "Acid (Citric Acid, E330)", "Milk"]
        );
    }

    #[test]
    fn test_enhancer_round_trips_png() {
        let img = image::RgbImage::from_fn(32, 16, |x, y| image::Rgb([(x * 8) as u8, (y * 16) as u8, 128]));
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let (out, mime) = ImageCrateEnhancer::default()
            .preprocess(&png, "image/png")
            .unwrap();
        assert_eq!(mime, "image/png");
        let decoded = image::load_from_memory_with_format(&out, ImageFormat::Png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[test]
    fn test_enhancer_rejects_non_image() {
        assert!(ImageCrateEnhancer::default()
            .preprocess(b"not an image", "image/jpeg")
            .is_err());
    }
}

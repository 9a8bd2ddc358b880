//! Deterministic Nutri-Score rule engine.
//!
//! A pure function of ([`NutritionFacts`], [`Category`]): no I/O, no hidden
//! state, no configuration. Negative nutrients (energy, sugar, saturated fat,
//! sodium) earn points by the number of bucket thresholds they exceed;
//! positive nutrients (fiber, protein, fruit/vegetable share) earn credit the
//! same way. The total is clipped to the category's range, graded A..E and
//! rescaled to a 0–100 score where higher is healthier.
//!
//! # Unknown values
//!
//! A missing negative nutrient is scored at its worst bucket and listed in
//! [`NutriScoreResult::assumed_worst`]. A missing positive nutrient earns no
//! credit. An incomplete label can therefore never look healthier than the
//! same label with the unknown values filled in.
//!
//! # Tables
//!
//! | Table | Used for | Points range | Grade cut points |
//! |-------|----------|--------------|------------------|
//! | solid | food, cheese, fats/oils | −15..=40 | A ≤ −1, B ≤ 2, C ≤ 10, D ≤ 18, E |
//! | beverage | drinks | −20..=44 | B ≤ 1, C ≤ 5, D ≤ 9, E |
//!
//! Plain water is always grade A. Cheese always counts protein. Fats and oils
//! score saturated fat by its share of total fat.

use crate::models::{Category, ComponentPoints, Grade, NutriScoreResult, NutritionFacts};

const KJ_PER_KCAL: f64 = 4.184;

/// Inputs to the rule engine that are not nutrient values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreModifiers {
    /// The ingredient list contains a non-nutritive sweetener.
    /// Penalized for beverages only.
    pub non_nutritive_sweeteners: bool,
}

struct Table {
    energy_kj: &'static [f64],
    sugar_g: &'static [f64],
    fruit_veg: &'static [(f64, i32)],
    min: i32,
    max: i32,
    /// Inclusive upper bound of points for each grade, best first.
    grades: &'static [(i32, Grade)],
}

const SOLID: Table = Table {
    energy_kj: &[
        335.0, 670.0, 1005.0, 1340.0, 1675.0, 2010.0, 2345.0, 2680.0, 3015.0, 3350.0,
    ],
    sugar_g: &[4.5, 9.0, 13.5, 18.0, 22.5, 27.0, 31.0, 36.0, 40.0, 45.0],
    fruit_veg: &[(40.0, 1), (60.0, 2), (80.0, 5)],
    min: -15,
    max: 40,
    grades: &[
        (-1, Grade::A),
        (2, Grade::B),
        (10, Grade::C),
        (18, Grade::D),
        (i32::MAX, Grade::E),
    ],
};

const BEVERAGE: Table = Table {
    energy_kj: &[0.0, 30.0, 60.0, 90.0, 120.0, 150.0, 180.0, 210.0, 240.0, 270.0],
    sugar_g: &[0.0, 1.5, 3.0, 4.5, 6.0, 7.5, 9.0, 10.5, 12.0, 13.5],
    fruit_veg: &[(40.0, 2), (60.0, 4), (80.0, 10)],
    min: -20,
    max: 44,
    grades: &[
        (1, Grade::B),
        (5, Grade::C),
        (9, Grade::D),
        (i32::MAX, Grade::E),
    ],
};

const SATURATED_FAT_G: &[f64] = &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
const SATURATED_RATIO_PCT: &[f64] = &[10.0, 16.0, 22.0, 28.0, 34.0, 40.0, 46.0, 52.0, 58.0, 64.0];
const SODIUM_MG: &[f64] = &[
    90.0, 180.0, 270.0, 360.0, 450.0, 540.0, 630.0, 720.0, 810.0, 900.0,
];
const FIBER_G: &[f64] = &[0.9, 1.9, 2.8, 3.7, 4.7];
const PROTEIN_G: &[f64] = &[1.6, 3.2, 4.8, 6.4, 8.0];

/// Points added to a beverage sweetened with non-nutritive sweeteners.
pub const SWEETENER_PENALTY: i32 = 4;

/// Negative points at or above which protein stops counting.
const PROTEIN_CAP_NEGATIVE: i32 = 11;
/// Fruit/vegetable points at or above which protein counts regardless.
const PROTEIN_CAP_FRUIT: i32 = 5;

/// Score bands for each grade, as (best, worst) normalized scores.
const GRADE_SCORE_BANDS: [(Grade, u8, u8); 5] = [
    (Grade::A, 100, 80),
    (Grade::B, 79, 60),
    (Grade::C, 59, 40),
    (Grade::D, 39, 20),
    (Grade::E, 19, 0),
];

/// Score `facts` for `category` with no modifiers.
pub fn score(facts: &NutritionFacts, category: Category) -> NutriScoreResult {
    score_with(facts, category, ScoreModifiers::default())
}

/// Score `facts` for `category`.
pub fn score_with(
    facts: &NutritionFacts,
    category: Category,
    modifiers: ScoreModifiers,
) -> NutriScoreResult {
    if category == Category::Water {
        return NutriScoreResult {
            points: 0,
            grade: Grade::A,
            normalized_score: 100,
            components: Vec::new(),
            assumed_worst: Vec::new(),
        };
    }

    let table = if category.is_beverage() {
        &BEVERAGE
    } else {
        &SOLID
    };

    let mut components = Vec::with_capacity(8);
    let mut assumed_worst = Vec::new();

    let energy_kj = facts.energy_kcal.map(|kcal| kcal * KJ_PER_KCAL);
    let mut negative = 0;
    negative += negative_component(
        "energy",
        facts.energy_kcal,
        energy_kj,
        table.energy_kj,
        &mut components,
        &mut assumed_worst,
    );
    negative += negative_component(
        "sugar",
        facts.sugar_g,
        facts.sugar_g,
        table.sugar_g,
        &mut components,
        &mut assumed_worst,
    );
    if category == Category::FatsOils {
        let ratio = match (facts.saturated_fat_g, facts.fat_g) {
            (Some(_), Some(fat)) if fat <= 0.0 => Some(0.0),
            (Some(sat), Some(fat)) => Some(sat / fat * 100.0),
            _ => None,
        };
        negative += negative_component(
            "saturated_fat_ratio",
            ratio,
            ratio,
            SATURATED_RATIO_PCT,
            &mut components,
            &mut assumed_worst,
        );
    } else {
        negative += negative_component(
            "saturated_fat",
            facts.saturated_fat_g,
            facts.saturated_fat_g,
            SATURATED_FAT_G,
            &mut components,
            &mut assumed_worst,
        );
    }
    negative += negative_component(
        "sodium",
        facts.sodium_mg,
        facts.sodium_mg,
        SODIUM_MG,
        &mut components,
        &mut assumed_worst,
    );

    if modifiers.non_nutritive_sweeteners && category.is_beverage() {
        negative += SWEETENER_PENALTY;
        components.push(ComponentPoints {
            nutrient: "non_nutritive_sweeteners".to_string(),
            value: None,
            points: SWEETENER_PENALTY,
            negative: true,
        });
    }

    let fiber = facts.fiber_g.map(|v| bucket(v, FIBER_G)).unwrap_or(0);
    let fruit = facts
        .fruit_veg_pct
        .map(|v| fruit_points(v, table.fruit_veg))
        .unwrap_or(0);
    let protein_counts = category == Category::Cheese
        || negative < PROTEIN_CAP_NEGATIVE
        || fruit >= PROTEIN_CAP_FRUIT;
    let protein = if protein_counts {
        facts.protein_g.map(|v| bucket(v, PROTEIN_G)).unwrap_or(0)
    } else {
        0
    };

    for (name, value, points) in [
        ("fiber", facts.fiber_g, fiber),
        ("protein", facts.protein_g, protein),
        ("fruit_veg", facts.fruit_veg_pct, fruit),
    ] {
        components.push(ComponentPoints {
            nutrient: name.to_string(),
            value,
            points,
            negative: false,
        });
    }

    let points = (negative - fiber - protein - fruit).clamp(table.min, table.max);
    let grade = grade_for(points, table);
    let normalized_score = normalize_points(points, grade, table);

    NutriScoreResult {
        points,
        grade,
        normalized_score,
        components,
        assumed_worst,
    }
}

fn negative_component(
    name: &str,
    reported: Option<f64>,
    scored: Option<f64>,
    thresholds: &[f64],
    components: &mut Vec<ComponentPoints>,
    assumed_worst: &mut Vec<String>,
) -> i32 {
    let points = match scored {
        Some(v) => bucket(v, thresholds),
        None => {
            assumed_worst.push(name.to_string());
            thresholds.len() as i32
        }
    };
    components.push(ComponentPoints {
        nutrient: name.to_string(),
        value: reported,
        points,
        negative: true,
    });
    points
}

/// Number of thresholds strictly exceeded.
fn bucket(value: f64, thresholds: &[f64]) -> i32 {
    thresholds.iter().take_while(|t| value > **t).count() as i32
}

fn fruit_points(pct: f64, steps: &[(f64, i32)]) -> i32 {
    steps
        .iter()
        .rev()
        .find(|(threshold, _)| pct > *threshold)
        .map(|(_, points)| *points)
        .unwrap_or(0)
}

fn grade_for(points: i32, table: &Table) -> Grade {
    table
        .grades
        .iter()
        .find(|(upper, _)| points <= *upper)
        .map(|(_, grade)| *grade)
        .unwrap_or(Grade::E)
}

/// Rescale `points` linearly inside its grade's point span onto the grade's
/// score band. Lower points map to higher scores.
fn normalize_points(points: i32, grade: Grade, table: &Table) -> u8 {
    let idx = table
        .grades
        .iter()
        .position(|(_, g)| *g == grade)
        .unwrap_or(table.grades.len() - 1);
    let lo = if idx == 0 {
        table.min
    } else {
        table.grades[idx - 1].0 + 1
    };
    let hi = table.grades[idx].0.min(table.max);

    let (best, worst) = GRADE_SCORE_BANDS
        .iter()
        .find(|(g, _, _)| *g == grade)
        .map(|(_, best, worst)| (*best as f64, *worst as f64))
        .unwrap_or((19.0, 0.0));

    if hi <= lo {
        return best as u8;
    }
    let t = (points - lo) as f64 / (hi - lo) as f64;
    (best - t * (best - worst)).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(sugar: f64, sat: f64, sodium: f64, fiber: f64, protein: f64) -> NutritionFacts {
        NutritionFacts {
            energy_kcal: Some(200.0),
            sugar_g: Some(sugar),
            saturated_fat_g: Some(sat),
            sodium_mg: Some(sodium),
            fiber_g: Some(fiber),
            protein_g: Some(protein),
            fruit_veg_pct: Some(0.0),
            fat_g: Some(10.0),
        }
    }

    const CATEGORIES: [Category; 5] = [
        Category::Snack,
        Category::Beverage,
        Category::Cheese,
        Category::FatsOils,
        Category::Unknown,
    ];

    #[test]
    fn test_sugary_beverage_scenario() {
        let facts = NutritionFacts {
            sugar_g: Some(40.0),
            saturated_fat_g: Some(1.0),
            sodium_mg: Some(50.0),
            fiber_g: Some(5.0),
            protein_g: Some(3.0),
            ..Default::default()
        };
        let result = score(&facts, Category::Beverage);
        assert!(matches!(result.grade, Grade::D | Grade::E));
        assert!(result.normalized_score < 40);
        assert_eq!(result.assumed_worst, vec!["energy".to_string()]);
    }

    #[test]
    fn test_deterministic() {
        let facts = full(12.0, 3.0, 400.0, 2.0, 6.0);
        for category in CATEGORIES {
            assert_eq!(score(&facts, category), score(&facts, category));
        }
    }

    #[test]
    fn test_missing_negative_never_better_than_worst() {
        let base = full(10.0, 2.0, 200.0, 3.0, 4.0);
        for category in CATEGORIES {
            let mut missing = base.clone();
            missing.sodium_mg = None;
            let mut worst = base.clone();
            worst.sodium_mg = Some(5000.0);
            let m = score(&missing, category);
            let w = score(&worst, category);
            assert!(m.normalized_score <= w.normalized_score, "{category}");
            assert!(m.points >= w.points);
            assert!(m.assumed_worst.contains(&"sodium".to_string()));

            let mut missing = base.clone();
            missing.sugar_g = None;
            let mut worst = base.clone();
            worst.sugar_g = Some(100.0);
            assert!(score(&missing, category).points >= score(&worst, category).points);
        }
    }

    #[test]
    fn test_missing_positive_never_better_than_zero() {
        let base = full(10.0, 2.0, 200.0, 3.0, 4.0);
        for category in CATEGORIES {
            let mut missing = base.clone();
            missing.fiber_g = None;
            missing.protein_g = None;
            let mut zero = base.clone();
            zero.fiber_g = Some(0.0);
            zero.protein_g = Some(0.0);
            assert!(
                score(&missing, category).normalized_score
                    <= score(&zero, category).normalized_score
            );
        }
    }

    #[test]
    fn test_monotonic_in_negative_nutrients() {
        for category in CATEGORIES {
            let mut prev = u8::MAX;
            for step in 0..60 {
                let s = score(&full(step as f64, 2.0, 200.0, 2.0, 3.0), category).normalized_score;
                assert!(s <= prev, "sugar {step} {category}");
                prev = s;
            }
            let mut prev = u8::MAX;
            for step in 0..15 {
                let s = score(&full(5.0, step as f64, 200.0, 2.0, 3.0), category).normalized_score;
                assert!(s <= prev, "sat fat {step} {category}");
                prev = s;
            }
            let mut prev = u8::MAX;
            for step in 0..20 {
                let s = score(&full(5.0, 2.0, step as f64 * 60.0, 2.0, 3.0), category)
                    .normalized_score;
                assert!(s <= prev, "sodium {step} {category}");
                prev = s;
            }
        }
    }

    #[test]
    fn test_monotonic_in_positive_nutrients() {
        for category in CATEGORIES {
            for sugar in [2.0, 20.0, 50.0] {
                let mut prev = 0u8;
                for step in 0..12 {
                    let s = score(&full(sugar, 4.0, 500.0, step as f64 * 0.5, 3.0), category)
                        .normalized_score;
                    assert!(s >= prev, "fiber {step} {category}");
                    prev = s;
                }
                let mut prev = 0u8;
                for step in 0..12 {
                    let s = score(&full(sugar, 4.0, 500.0, 2.0, step as f64), category)
                        .normalized_score;
                    assert!(s >= prev, "protein {step} {category}");
                    prev = s;
                }
            }
        }
    }

    #[test]
    fn test_protein_not_counted_for_unhealthy_food() {
        let facts = full(40.0, 8.0, 800.0, 0.0, 20.0);
        let result = score(&facts, Category::Snack);
        let protein = result
            .components
            .iter()
            .find(|c| c.nutrient == "protein")
            .unwrap();
        assert_eq!(protein.points, 0);

        let cheese = score(&facts, Category::Cheese);
        assert!(cheese.points < result.points);
    }

    #[test]
    fn test_sweetener_penalty_beverage_only() {
        let facts = full(0.0, 0.0, 0.0, 0.0, 0.0);
        let sweet = ScoreModifiers {
            non_nutritive_sweeteners: true,
        };
        let plain = score(&facts, Category::Beverage);
        let diet = score_with(&facts, Category::Beverage, sweet);
        assert_eq!(diet.points, plain.points + SWEETENER_PENALTY);
        assert_eq!(
            score_with(&facts, Category::Snack, sweet),
            score(&facts, Category::Snack)
        );
    }

    #[test]
    fn test_water_is_grade_a() {
        let result = score(&NutritionFacts::default(), Category::Water);
        assert_eq!(result.grade, Grade::A);
        assert_eq!(result.normalized_score, 100);
    }

    #[test]
    fn test_fats_oils_missing_total_fat_is_worst() {
        let mut facts = full(0.0, 2.0, 0.0, 0.0, 0.0);
        facts.fat_g = None;
        let result = score(&facts, Category::FatsOils);
        assert!(result
            .assumed_worst
            .contains(&"saturated_fat_ratio".to_string()));
    }

    #[test]
    fn test_grade_boundaries_solid() {
        let healthy = NutritionFacts {
            energy_kcal: Some(50.0),
            sugar_g: Some(1.0),
            saturated_fat_g: Some(0.1),
            sodium_mg: Some(10.0),
            fiber_g: Some(6.0),
            protein_g: Some(9.0),
            fruit_veg_pct: Some(90.0),
            fat_g: Some(0.5),
        };
        let result = score(&healthy, Category::PreparedMeal);
        assert_eq!(result.points, -15);
        assert_eq!(result.grade, Grade::A);
        assert_eq!(result.normalized_score, 100);

        let worst = score(&NutritionFacts::default(), Category::Snack);
        assert_eq!(worst.points, 40);
        assert_eq!(worst.grade, Grade::E);
        assert_eq!(worst.normalized_score, 0);
    }
}

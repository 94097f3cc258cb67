//! Integration tests for recipe extraction and repair

use mealplan_recipes::pipeline::DocumentJob;
use mealplan_recipes::segmenter::{Classification, SectionReducer};
use mealplan_recipes::{
    detect_merge, format_canonical, parse_for_display, partition, reconstruct_lines, segment,
    DocumentProfile, Extractor, Fragment, FragmentSource, Grammar, JsonFileStore, MealFilter,
    MealStore, MealType, MemoryStore, NewMeal, OutcomeStatus, PipelineConfig, Region,
    RegionLayout, Repairer, SegmentedRecipe, StaticSource,
};
use std::path::PathBuf;
use tempfile::TempDir;

// Helper to lay out text lines as one column of fragments
fn make_column(x: f32, top: f32, lines: &[&str]) -> Vec<Fragment> {
    lines
        .iter()
        .enumerate()
        .map(|(i, text)| Fragment::new(*text, x, top - 18.0 * i as f32))
        .collect()
}

fn make_recipe(ingredients: &[&str], instructions: &[&str]) -> SegmentedRecipe {
    SegmentedRecipe {
        title: "Chicken Chili".to_string(),
        servings: "4 SERVINGS".to_string(),
        ingredients: ingredients.iter().map(|s| s.to_string()).collect(),
        instructions: instructions.iter().map(|s| s.to_string()).collect(),
        nutritional_info: Some("410 cal / 35g protein / 9g fiber".to_string()),
    }
}

fn make_job(phase: &str, week: u32) -> DocumentJob {
    DocumentJob {
        path: PathBuf::from(format!("{} week {}.pdf", phase, week)),
        phase_id: phase.to_string(),
        week,
    }
}

const TOFU_SPAN: &str = "Tofu Stir-Fry (2 SERVINGS) 2 tsp sesame oil 8 oz tofu, cubed \
    HEAT oil in a pan. ADD tofu and cook 5 minutes. \
    Nutritional info per serving: 300 cal / 20g protein / 5g fiber";

const MERGED_BOWL: &str = "Greek Yogurt Bowl (1 SERVING) 1 cup Greek yogurt 1/2 cup berries \
    TOP yogurt with berries. SPRINKLE with granola. \
    Nutritional info per serving: 280 cal / 22g protein / 4g fiber \
    Turkey Wrap (1 SERVING) 1 whole wheat tortilla 4 oz sliced turkey \
    ROLL turkey in the tortilla. \
    Nutritional info per serving: 350 cal / 30g protein / 6g fiber";

// ============================================================================
// Line Reconstruction Tests
// ============================================================================

#[test]
fn test_close_fragments_form_one_line_in_x_order() {
    let fragments = vec![Fragment::new("world", 50.0, 501.0), Fragment::new("hello", 10.0, 500.0)];
    let lines = reconstruct_lines(&fragments, 5.0);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].text(), "hello world");
}

#[test]
fn test_lines_read_top_to_bottom() {
    let fragments = make_column(40.0, 700.0, &["first", "second", "third"]);
    let texts: Vec<String> = reconstruct_lines(&fragments, 5.0)
        .iter()
        .map(|l| l.text())
        .collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
}

// ============================================================================
// Region Tests
// ============================================================================

#[test]
fn test_boundary_fragment_lands_in_exactly_one_region() {
    let layout = RegionLayout::new(vec![
        Region::new("left", (0.0, 100.0), (0.0, 800.0)),
        Region::new("right", (100.0, 200.0), (0.0, 800.0)),
    ]);
    assert!(layout.validate().is_ok());

    let fragments = vec![Fragment::new("edge", 100.0, 400.0)];
    for _ in 0..3 {
        let split = partition(&fragments, &layout, 5.0);
        assert_eq!(split.dropped, 0);
        assert!(split.get("left").unwrap().lines.is_empty());
        assert_eq!(split.get("right").unwrap().text(), "edge");
    }
}

#[test]
fn test_quadrant_profile_assigns_by_meal_type() {
    let store = MemoryStore::new();
    store
        .insert(NewMeal::new("Berry Smoothie", MealType::Breakfast, "bonus", 4, "1", 1))
        .unwrap();
    store
        .insert(NewMeal::new("Lemon Chicken", MealType::Dinner, "bonus", 4, "1", 1))
        .unwrap();

    let mut fragments = make_column(
        50.0,
        700.0,
        &[
            "Berry Smoothie (1 SERVING)",
            "1 cup frozen berries",
            "1 cup almond milk",
            "BLEND until smooth.",
        ],
    );
    fragments.extend(make_column(
        320.0,
        300.0,
        &[
            "Lemon Chicken (2 SERVINGS)",
            "8 oz chicken breast",
            "1 lemon, juiced",
            "BAKE chicken with lemon for 25 minutes.",
        ],
    ));
    let source = StaticSource::new().with_page(1, fragments);

    let extractor = Extractor::new(&store, PipelineConfig::default()).unwrap();
    let outcomes = extractor
        .extract_document(&make_job("bonus", 4), &source)
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Extracted));

    let meals = store.find(&MealFilter::new().recipe_present()).unwrap();
    let smoothie = meals.iter().find(|m| m.name == "Berry Smoothie").unwrap();
    assert!(smoothie.recipe_text.as_ref().unwrap().contains("• 1 cup frozen berries"));
    let chicken = meals.iter().find(|m| m.name == "Lemon Chicken").unwrap();
    assert!(chicken.recipe_text.as_ref().unwrap().contains("1. Bake chicken with lemon"));
}

// ============================================================================
// Segmentation Tests
// ============================================================================

#[test]
fn test_segment_inline_span() {
    let recipe = segment(TOFU_SPAN, "Tofu Stir-Fry", Grammar::default_grammar()).unwrap();
    assert_eq!(recipe.servings, "2 SERVINGS");
    assert_eq!(recipe.ingredients, vec!["2 tsp sesame oil", "8 oz tofu, cubed"]);
    assert_eq!(
        recipe.instructions,
        vec!["Heat oil in a pan.", "Add tofu and cook 5 minutes."]
    );
    assert_eq!(
        recipe.nutritional_info.as_deref(),
        Some("300 cal / 20g protein / 5g fiber")
    );
}

#[test]
fn test_no_ingredient_after_first_instruction() {
    let grammar = Grammar::default_grammar();
    let units = [
        "2 cups spinach",
        "WHISK the eggs.",
        "1 cup milk",
        "salt and pepper",
        "POUR into the pan.",
        "3 oz feta",
    ];
    let mut reducer = SectionReducer::new(grammar);
    let mut seen_instruction = false;
    for unit in units {
        let class = reducer.feed(unit);
        if seen_instruction {
            assert!(!matches!(
                class,
                Classification::Ingredient | Classification::IngredientContinuation
            ));
        }
        if class == Classification::Instruction {
            seen_instruction = true;
        }
    }
    assert!(seen_instruction);
}

// ============================================================================
// Format Tests
// ============================================================================

#[test]
fn test_format_then_display_round_trip() {
    let cases = [
        make_recipe(
            &["1 lb ground chicken", "1 can black beans, rinsed", "2 tsp chili powder"],
            &["Brown the chicken in a pot.", "Add beans and simmer 20 minutes."],
        ),
        make_recipe(&["1 apple"], &["Slice and serve."]),
        make_recipe(&[], &["Mix everything together."]),
        make_recipe(&["2 cups mixed greens", "1 tbsp olive oil"], &[]),
    ];
    for recipe in cases {
        let text = format_canonical(&recipe);
        let parsed = parse_for_display(&text, &recipe.title).unwrap();
        assert_eq!(parsed.ingredients, recipe.ingredients);
        assert_eq!(parsed.instructions, recipe.instructions);
        assert_eq!(parsed.servings, recipe.servings);
        assert_eq!(parsed.nutritional_info, recipe.nutritional_info);
    }
}

// ============================================================================
// Merge Detection & Repair Tests
// ============================================================================

#[test]
fn test_two_servings_tokens_flag_merge_without_names() {
    let text = "(1 SERVING) 1 cup oats STIR well. (2 SERVINGS) 6 oz salmon BAKE it.";
    let signals = detect_merge(text, "Overnight Oats", &[]);
    assert!(signals.other_names.is_empty());
    assert_eq!(signals.servings_tokens, 2);
    assert!(signals.is_merged());
}

fn make_merged_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .insert(
            NewMeal::new("Greek Yogurt Bowl", MealType::Breakfast, "m9", 2, "3", 7)
                .with_recipe(MERGED_BOWL),
        )
        .unwrap();
    store
        .insert(
            NewMeal::new("Turkey Wrap", MealType::Lunch, "m9", 2, "3", 7)
                .with_recipe(MERGED_BOWL),
        )
        .unwrap();
    store
}

#[test]
fn test_repair_removes_cross_contamination() {
    let store = make_merged_store();
    let summary = Repairer::new(&store)
        .apply(true)
        .run(&MealFilter::new())
        .unwrap();
    assert_eq!(summary.repaired, 2);

    let meals = store.find(&MealFilter::new()).unwrap();
    for meal in &meals {
        let text = meal.recipe_text.as_ref().unwrap().to_lowercase();
        for other in meals.iter().filter(|m| m.id != meal.id) {
            assert!(!text.contains(&other.name.to_lowercase()));
        }
    }
    let wrap = meals.iter().find(|m| m.name == "Turkey Wrap").unwrap();
    assert!(wrap.recipe_text.as_ref().unwrap().contains("• 4 oz sliced turkey"));
}

#[test]
fn test_repair_twice_equals_repair_once() {
    let store = make_merged_store();
    let repairer = Repairer::new(&store).apply(true);

    repairer.run(&MealFilter::new()).unwrap();
    let once = store.find(&MealFilter::new()).unwrap();

    let second = repairer.run(&MealFilter::new()).unwrap();
    assert_eq!(second.repaired, 0);
    assert_eq!(second.already_clean, 2);
    assert_eq!(store.find(&MealFilter::new()).unwrap(), once);
}

#[test]
fn test_repair_is_dry_run_by_default() {
    let store = make_merged_store();
    let summary = Repairer::new(&store).run(&MealFilter::new()).unwrap();
    assert_eq!(summary.repaired, 2);
    let meals = store.find(&MealFilter::new()).unwrap();
    assert!(meals.iter().all(|m| m.recipe_text.as_deref() == Some(MERGED_BOWL)));
}

// ============================================================================
// End-to-end Tests
// ============================================================================

#[test]
fn test_extract_into_json_store_then_display() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meals.json");
    {
        let store = JsonFileStore::open(&path).unwrap();
        store
            .insert(NewMeal::new("Tofu Stir-Fry", MealType::Dinner, "phase-2", 3, "5", 1))
            .unwrap();
        store
            .insert(NewMeal::new("Apple Slices", MealType::Snack, "phase-2", 3, "5", 1))
            .unwrap();

        let lines = [
            "DINNER",
            "Tofu Stir-Fry (2 SERVINGS)",
            "2 tsp sesame oil",
            "8 oz tofu, cubed",
            "HEAT oil in a pan. ADD tofu and cook 5 minutes.",
            "Nutritional info per serving: 300 cal / 20g protein / 5g fiber",
            "SNACK",
            "Apple Slices (1 SERVING)",
            "1 apple",
            "2 tbsp peanut butter",
            "SLICE the apple and dip.",
        ];
        let source = StaticSource::new().with_page(1, make_column(60.0, 720.0, &lines));
        let extractor = Extractor::new(&store, PipelineConfig::default()).unwrap();
        let summary = extractor.run_with(&[make_job("phase-2", 3)], |_| {
            Ok(Box::new(source.clone()) as Box<dyn FragmentSource>)
        });
        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.failed, 0);
    }

    let reopened = JsonFileStore::open(&path).unwrap();
    let meals = reopened.find(&MealFilter::new().recipe_missing()).unwrap();
    assert!(meals.is_empty());

    let tofu = reopened
        .find(&MealFilter::new().phase("phase-2").week(3))
        .unwrap()
        .into_iter()
        .find(|m| m.name == "Tofu Stir-Fry")
        .unwrap();
    let text = tofu.recipe_text.unwrap();
    assert!(!text.to_lowercase().contains("apple"));
    let shown = parse_for_display(&text, &tofu.name).unwrap();
    assert_eq!(shown.ingredients, vec!["2 tsp sesame oil", "8 oz tofu, cubed"]);
    assert_eq!(
        shown.instructions,
        vec!["Heat oil in a pan.", "Add tofu and cook 5 minutes."]
    );
}

#[test]
fn test_custom_profile_from_config() {
    let mut config = PipelineConfig::default();
    let mut profile = DocumentProfile::whole_page();
    profile.name = "tight".to_string();
    profile.y_tolerance = 1.0;
    config.profiles.insert(profile.name.clone(), profile);
    config.phases.insert("m7".to_string(), "tight".to_string());
    assert!(config.validate().is_ok());
    assert_eq!(config.profile_for("m7").unwrap().y_tolerance, 1.0);

    config.phases.insert("m7".to_string(), "missing".to_string());
    let store = MemoryStore::new();
    assert!(Extractor::new(&store, config).is_err());
}

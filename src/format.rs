//! Canonical recipe text
//!
//! Recipes are persisted in one deterministic layout:
//!
//! ```text
//! Nutritional info per serving: 300 cal / 20g protein / 5g fiber
//!
//! (2 SERVINGS)
//!
//! INGREDIENTS:
//! • 2 tsp sesame oil
//!
//! INSTRUCTIONS:
//! 1. Heat oil in a pan.
//! ```
//!
//! `parse_for_display` reads that layout back exactly, and falls back to the
//! segmenter for older raw extractions.

use crate::grammar::Grammar;
use crate::segmenter::{is_garbage, segment, SegmentedRecipe};
use once_cell::sync::Lazy;
use regex::Regex;

const NUTRITION_PREFIX: &str = "Nutritional info per serving:";
const INGREDIENTS_HEADER: &str = "INGREDIENTS:";
const INSTRUCTIONS_HEADER: &str = "INSTRUCTIONS:";
const BULLET: &str = "•";

static SERVINGS_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\((\d+ SERVINGS?)\)$").unwrap());

static STEP_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\s+(.+)$").unwrap());

/// Render a recipe in the canonical persisted layout
pub fn format_canonical(recipe: &SegmentedRecipe) -> String {
    let mut blocks: Vec<String> = Vec::new();

    if let Some(info) = &recipe.nutritional_info {
        blocks.push(format!("{} {}", NUTRITION_PREFIX, info));
    }
    blocks.push(format!("({})", recipe.servings));

    if !recipe.ingredients.is_empty() {
        let mut block = String::from(INGREDIENTS_HEADER);
        for ingredient in &recipe.ingredients {
            block.push('\n');
            block.push_str(BULLET);
            block.push(' ');
            block.push_str(ingredient);
        }
        blocks.push(block);
    }

    if !recipe.instructions.is_empty() {
        let mut block = String::from(INSTRUCTIONS_HEADER);
        for (i, step) in recipe.instructions.iter().enumerate() {
            block.push_str(&format!("\n{}. {}", i + 1, step));
        }
        blocks.push(block);
    }

    blocks.join("\n\n")
}

/// Whether stored text already follows the canonical layout
pub fn is_canonical(text: &str) -> bool {
    let text = text.trim_start();
    let opens_canonically = text.starts_with(NUTRITION_PREFIX)
        || text.starts_with(INGREDIENTS_HEADER)
        || text
            .lines()
            .next()
            .is_some_and(|l| SERVINGS_LINE_RE.is_match(l.trim()));
    opens_canonically && (text.contains(INGREDIENTS_HEADER) || text.contains(INSTRUCTIONS_HEADER))
}

/// Structured form of stored recipe text for display
///
/// Canonical text parses exactly; anything else goes through the segmenter.
/// Returns `None` for text that holds no recipe.
pub fn parse_for_display(text: &str, meal_name: &str) -> Option<SegmentedRecipe> {
    if is_canonical(text) {
        if let Some(recipe) = parse_canonical(text, meal_name) {
            return Some(recipe);
        }
    }
    if is_garbage(text) {
        return None;
    }
    segment(text, meal_name, Grammar::default_grammar()).ok()
}

#[derive(Clone, Copy, PartialEq)]
enum Block {
    Preamble,
    Ingredients,
    Instructions,
}

/// Strict line parser for the canonical layout
fn parse_canonical(text: &str, meal_name: &str) -> Option<SegmentedRecipe> {
    let mut recipe = SegmentedRecipe {
        title: meal_name.to_string(),
        servings: String::from("1 SERVING"),
        ingredients: Vec::new(),
        instructions: Vec::new(),
        nutritional_info: None,
    };
    let mut block = Block::Preamble;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line == INGREDIENTS_HEADER {
            block = Block::Ingredients;
            continue;
        }
        if line == INSTRUCTIONS_HEADER {
            block = Block::Instructions;
            continue;
        }

        match block {
            Block::Preamble => {
                if let Some(info) = line.strip_prefix(NUTRITION_PREFIX) {
                    recipe.nutritional_info = Some(info.trim().to_string());
                } else if let Some(caps) = SERVINGS_LINE_RE.captures(line) {
                    recipe.servings = caps[1].to_string();
                } else {
                    return None;
                }
            }
            Block::Ingredients => {
                let item = line.strip_prefix(BULLET)?;
                recipe.ingredients.push(item.trim().to_string());
            }
            Block::Instructions => {
                let caps = STEP_LINE_RE.captures(line)?;
                recipe.instructions.push(caps[1].to_string());
            }
        }
    }

    if recipe.ingredients.is_empty() && recipe.instructions.is_empty() {
        return None;
    }
    Some(recipe)
}

//! Recipe segmentation
//!
//! Splits a located meal span into servings, ingredients, instructions and
//! nutrition facts. Classification is a finite-state reducer over text units:
//! the section moves `Unknown -> Ingredients -> Instructions` and never back,
//! so nothing after the first instruction can become an ingredient.

use crate::grammar::{strip_step_number, Grammar};
use crate::locator::{normalize, Located, MatchKind};
use crate::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Lines longer than this are not taken as bare ingredient names
const MAX_LOOSE_INGREDIENT_CHARS: usize = 60;

/// Structured form of one recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentedRecipe {
    pub title: String,
    /// e.g. `2 SERVINGS`
    pub servings: String,
    pub ingredients: Vec<String>,
    /// Steps in execution order, without numbering
    pub instructions: Vec<String>,
    /// e.g. `300 cal / 20g protein / 5g fiber`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nutritional_info: Option<String>,
}

/// Section of the recipe the reducer is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Unknown,
    Ingredients,
    Instructions,
}

/// What the reducer did with one unit of text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ingredient,
    IngredientContinuation,
    Instruction,
    InstructionContinuation,
    Dropped,
}

/// Finite-state classifier for recipe text units
pub struct SectionReducer<'g> {
    grammar: &'g Grammar,
    state: Section,
    ingredients: Vec<String>,
    instructions: Vec<String>,
}

impl<'g> SectionReducer<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self {
            grammar,
            state: Section::Unknown,
            ingredients: Vec::new(),
            instructions: Vec::new(),
        }
    }

    pub fn state(&self) -> Section {
        self.state
    }

    /// Classify one unit and fold it into the collected lists
    pub fn feed(&mut self, unit: &str) -> Classification {
        let unit = unit.trim();
        if unit.is_empty() {
            return Classification::Dropped;
        }

        if let Some(step) = strip_step_number(unit) {
            return self.start_instruction(step);
        }
        if self.grammar.starts_with_verb(unit) {
            return self.start_instruction(unit);
        }

        if self.state == Section::Instructions {
            if let Some(last) = self.instructions.last_mut() {
                last.push(' ');
                last.push_str(unit);
            }
            return Classification::InstructionContinuation;
        }

        if self.grammar.starts_with_quantity(unit) || self.grammar.starts_with_staple(unit) {
            return self.start_ingredient(unit);
        }
        if unit.chars().count() >= MAX_LOOSE_INGREDIENT_CHARS {
            return Classification::Dropped;
        }
        match self.ingredients.last_mut() {
            Some(last) if continues_ingredient(last, unit) => {
                last.push(' ');
                last.push_str(unit);
                Classification::IngredientContinuation
            }
            _ => self.start_ingredient(unit),
        }
    }

    fn start_instruction(&mut self, text: &str) -> Classification {
        self.state = Section::Instructions;
        self.instructions.push(text.to_string());
        Classification::Instruction
    }

    fn start_ingredient(&mut self, text: &str) -> Classification {
        self.state = Section::Ingredients;
        self.ingredients.push(text.to_string());
        Classification::Ingredient
    }

    /// Cleaned `(ingredients, instructions)`
    pub fn finish(self) -> (Vec<String>, Vec<String>) {
        let grammar = self.grammar;
        let ingredients = self
            .ingredients
            .iter()
            .map(|i| tidy_ingredient(i))
            .filter(|i| i.chars().count() > 1)
            .collect();
        let instructions = self
            .instructions
            .iter()
            .map(|i| tidy_instruction(i, grammar))
            .filter(|i| i.chars().count() > 1)
            .collect();
        (ingredients, instructions)
    }
}

fn continues_ingredient(previous: &str, unit: &str) -> bool {
    let starts_lower = unit
        .chars()
        .next()
        .is_some_and(|c| c.is_lowercase() || c == '(');
    let previous = previous.trim_end();
    starts_lower
        || previous.ends_with(',')
        || previous.ends_with('-')
        || previous.ends_with(" and")
        || previous.ends_with(" or")
        || previous.ends_with(" of")
}

static SERVINGS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\(\s*(\d+)\s*servings?\s*\)").unwrap());

static NUTRITION_TRIPLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s*cal(?:ories)?\s*[/|,]\s*(\d+)\s*g\s*protein\s*[/|,]\s*(\d+)\s*g\s*fiber")
        .unwrap()
});

static NUTRITION_PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d+\s*cal\s*/\s*\d+\s*g\s*protein").unwrap());

static NUTRITION_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)nu\s?tritional\s+info(?:rmation)?(?:\s+per\s+serving)?\s*:?").unwrap()
});

static DISCLAIMER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)Nutritional counts are approximate\..*?with your doctor\.").unwrap()
});

static WEIGHT_CALLOUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bIF\s+YOU\s+WEIGH\b").unwrap());

static MEAL_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:B\s*R\s*E\s*A\s*K\s*F\s*A\s*S\s*T|L\s*U\s*N\s*C\s*H|D\s*I\s*N\s*N\s*E\s*R|S\s*N\s*A\s*C\s*K|D\s*E\s*S\s*S\s*E\s*R\s*T)(?:\s+ROTATION)?$",
    )
    .unwrap()
});

static SECTION_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:ingredients|instructions|directions)\s*:?$").unwrap());

static INLINE_HYPHEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{Ll}) - (\p{Ll})").unwrap());

static FRACTION_SPACING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d)\s*/\s*(\d)").unwrap());

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static YES_NO_GRID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)YES\s+NO\s+YES\s+NO").unwrap());

static ALL_CAPS_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2,}(?:\s+[A-Z]{2,}){2,}\b").unwrap());

/// Remove the plan disclaimer paragraph
pub fn scrub_boilerplate(text: &str) -> String {
    DISCLAIMER_RE.replace_all(text, "").into_owned()
}

/// Text produced by a bad extraction (checkbox grids, footers, header soup)
pub fn is_garbage(text: &str) -> bool {
    if YES_NO_GRID_RE.is_match(text) || text.to_uppercase().contains("TRACK YOUR THOUGHTS") {
        return true;
    }
    ALL_CAPS_RUN_RE.find_iter(text).count() > 5
}

/// Count of `(<N> SERVING[S])` tokens
pub fn count_servings_tokens(text: &str) -> usize {
    SERVINGS_RE.find_iter(text).count()
}

/// Count of `<N> cal / <N>g protein` nutrition facts
pub fn count_nutrition_lines(text: &str) -> usize {
    NUTRITION_PAIR_RE.find_iter(text).count()
}

/// Canonical servings label for a count
pub fn servings_label(count: u32) -> String {
    if count == 1 {
        "1 SERVING".to_string()
    } else {
        format!("{} SERVINGS", count)
    }
}

/// Split a located span into recipe fields
pub fn segment(
    span: &str,
    meal_name: &str,
    grammar: &Grammar,
) -> Result<SegmentedRecipe, ExtractError> {
    let text = scrub_boilerplate(span);
    if is_garbage(&text) {
        log::debug!("rejecting garbage text for {:?}", meal_name);
        return Err(ExtractError::SegmentationEmpty(meal_name.to_string()));
    }

    let text = strip_title(&text, meal_name);
    let (nutritional_info, text) = take_nutrition(&text);
    let (servings, text) = take_servings(&text);
    let text = cut_at_callout(&text);

    let lines = logical_lines(&text, meal_name);
    let mut reducer = SectionReducer::new(grammar);
    for unit in split_units(&lines, grammar) {
        reducer.feed(&unit);
    }
    let (ingredients, instructions) = reducer.finish();

    if ingredients.is_empty() && instructions.is_empty() {
        return Err(ExtractError::SegmentationEmpty(meal_name.to_string()));
    }

    Ok(SegmentedRecipe {
        title: meal_name.to_string(),
        servings,
        ingredients,
        instructions,
        nutritional_info,
    })
}

/// Segment the located span of `block`
///
/// Prefix and token-overlap matches point at a printed title that differs
/// from the meal name, so `segment` cannot recognise it. That title is cut
/// here; a servings token or recipe body on the same line is kept.
pub fn segment_located(
    block: &str,
    located: &Located,
    meal_name: &str,
    grammar: &Grammar,
) -> Result<SegmentedRecipe, ExtractError> {
    match located.kind {
        MatchKind::Exact | MatchKind::Anchored => {
            segment(located.span(block), meal_name, grammar)
        }
        MatchKind::Prefix | MatchKind::TokenOverlap => {
            segment(&without_title(block, located, grammar), meal_name, grammar)
        }
    }
}

/// Span text after the printed title line
fn without_title(block: &str, located: &Located, grammar: &Grammar) -> String {
    let title_end = located.title_end.clamp(located.start, located.end);
    let line_end = block[title_end..located.end]
        .find('\n')
        .map_or(located.end, |i| title_end + i);

    let title_line = &block[located.start..line_end];
    let after_title = &block[title_end..line_end];
    let kept = match SERVINGS_RE.find(title_line) {
        Some(m) => &title_line[m.start()..],
        None => {
            let body_start = grammar
                .ingredient_split_positions(after_title)
                .into_iter()
                .chain(grammar.inline_verb_positions(after_title))
                .min();
            match body_start {
                Some(pos) => &after_title[pos..],
                None if grammar.starts_with_quantity(after_title.trim_start()) => after_title,
                None => "",
            }
        }
    };

    let mut body = kept.trim().to_string();
    body.push_str(&block[line_end..located.end]);
    body
}

/// Drop the meal name when the span opens with it
fn strip_title(text: &str, meal_name: &str) -> String {
    let words: Vec<String> = meal_name.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return text.to_string();
    }
    match Regex::new(&format!(r"(?i)^\s*{}", words.join(r"\s+"))) {
        Ok(re) => re.replace(text, "").into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Pull the nutrition facts out; text after them belongs to another recipe
fn take_nutrition(text: &str) -> (Option<String>, String) {
    let label = NUTRITION_LABEL_RE.find(text);
    let triple = NUTRITION_TRIPLE_RE.captures(text);

    let (info, cut_start, cut_end) = match (label, triple) {
        (label, Some(caps)) => {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            let info = format!(
                "{} cal / {}g protein / {}g fiber",
                &caps[1], &caps[2], &caps[3]
            );
            let start = match label {
                Some(l) if l.end() <= whole.start && text[l.end()..whole.start].trim().is_empty() => {
                    l.start()
                }
                _ => whole.start,
            };
            (info, start, whole.end)
        }
        (Some(l), None) => {
            let rest = &text[l.end()..];
            let line_end = rest.find('\n').map_or(text.len(), |i| l.end() + i);
            let mut info = text[l.end()..line_end].trim().to_string();
            if let Some(fiber) = info.to_lowercase().find("fiber") {
                info.truncate(fiber + "fiber".len());
            }
            (info, l.start(), line_end)
        }
        (None, None) => return (None, text.to_string()),
    };

    let before = &text[..cut_start];
    let remaining = if has_recipe_body(before) {
        before.to_string()
    } else {
        format!("{}\n{}", before, &text[cut_end..])
    };
    let info = (!info.is_empty()).then_some(info);
    (info, remaining)
}

/// Enough text (beyond a servings token) to hold ingredients or steps
fn has_recipe_body(text: &str) -> bool {
    let without_servings = SERVINGS_RE.replace_all(text, "");
    without_servings.chars().filter(|c| c.is_alphabetic()).count() >= 10
}

fn take_servings(text: &str) -> (String, String) {
    match SERVINGS_RE.captures(text) {
        Some(caps) => {
            let count = caps[1].parse::<u32>().unwrap_or(1);
            let range = caps.get(0).map_or(0..0, |m| m.range());
            let rest = format!("{} {}", &text[..range.start], &text[range.end..]);
            (servings_label(count), rest)
        }
        None => (servings_label(1), text.to_string()),
    }
}

/// Weight-adjustment callouts close a recipe
fn cut_at_callout(text: &str) -> String {
    match WEIGHT_CALLOUT_RE.find(text) {
        Some(m) if has_recipe_body(&text[..m.start()]) => text[..m.start()].to_string(),
        _ => text.to_string(),
    }
}

/// Trimmed lines with headers, markers and title repeats removed
fn logical_lines(text: &str, meal_name: &str) -> Vec<String> {
    let name = normalize(meal_name);
    let mut joined: Vec<String> = Vec::new();

    for raw in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match joined.last_mut() {
            Some(prev) if ends_with_word_hyphen(prev) => {
                let next_lower = raw.chars().next().is_some_and(char::is_lowercase);
                if next_lower {
                    prev.pop();
                }
                prev.push_str(raw);
            }
            _ => joined.push(raw.to_string()),
        }
    }

    let mut lines = Vec::new();
    let mut seen_body = false;
    for line in joined {
        let line = INLINE_HYPHEN_RE.replace_all(&line, "$1$2");
        let line = strip_bullet(&line);
        if line.is_empty() || is_noise_line(line) {
            continue;
        }
        let normalized = normalize(line);
        let is_title = !name.is_empty()
            && (normalized == name
                || (!seen_body && normalized.len() >= 4 && name.contains(&normalized)));
        if is_title {
            continue;
        }
        seen_body = true;
        lines.push(line.to_string());
    }
    lines
}

fn ends_with_word_hyphen(line: &str) -> bool {
    let mut chars = line.chars().rev();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_alphabetic)
}

fn strip_bullet(line: &str) -> &str {
    line.trim_start_matches(['•', '·', '*'])
        .trim_start_matches("- ")
        .trim()
}

fn is_noise_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    MEAL_HEADER_RE.is_match(line)
        || SECTION_HEADER_RE.is_match(line)
        || (line.len() == 1 && matches!(line, "A" | "B" | "C" | "D"))
        || line.contains("MONTH")
        || line.contains("MEAL PLAN")
        || line.contains("CHOOSE ONE")
        || (lower.contains("back to") && lower.contains("serving"))
}

/// Break lines into classifiable units
///
/// Upper-case verbs always open a new unit. Before the first instruction,
/// runs of ingredients are also split at each quantity + unit token.
fn split_units(lines: &[String], grammar: &Grammar) -> Vec<String> {
    let mut units = Vec::new();
    let mut instructions_begun = false;

    for line in lines {
        // Never cut between a step number and its text
        let body_start = strip_step_number(line).map_or(0, |step| line.len() - step.len());
        let mut cuts: Vec<usize> = grammar
            .inline_verb_positions(line)
            .into_iter()
            .filter(|&pos| pos > body_start)
            .collect();
        cuts.insert(0, 0);
        cuts.push(line.len());

        for window in cuts.windows(2) {
            let piece = line[window[0]..window[1]].trim();
            if piece.is_empty() {
                continue;
            }
            if grammar.starts_with_verb(piece) || strip_step_number(piece).is_some() {
                instructions_begun = true;
            }
            if instructions_begun {
                units.push(piece.to_string());
            } else {
                units.extend(split_ingredients(piece, grammar));
            }
        }
    }
    units
}

fn split_ingredients(text: &str, grammar: &Grammar) -> Vec<String> {
    let mut bounds = grammar.ingredient_split_positions(text);
    bounds.insert(0, 0);
    bounds.push(text.len());
    bounds
        .windows(2)
        .map(|w| text[w[0]..w[1]].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn tidy_ingredient(text: &str) -> String {
    let text = WHITESPACE_RE.replace_all(text.trim(), " ");
    let text = FRACTION_SPACING_RE.replace_all(&text, "$1/$2");
    text.trim_end_matches([',', ';']).trim().to_string()
}

fn tidy_instruction(text: &str, grammar: &Grammar) -> String {
    let text = WHITESPACE_RE.replace_all(text.trim(), " ");
    let mut text = grammar
        .title_case_verbs(&text)
        .trim_end_matches([',', ';', ':'])
        .trim()
        .to_string();
    if !text.is_empty() && !text.ends_with(['.', '!', '?']) {
        text.push('.');
    }
    text
}

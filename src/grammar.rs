//! Recipe text grammar
//!
//! Word lists that decide what a piece of recipe text is: imperative cooking
//! verbs open instructions, quantity + unit tokens open ingredients, and a
//! short list of staples are ingredients without a quantity. The lists are
//! data (`Vocabulary`) so a document family can extend them; `Grammar` is the
//! compiled form.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

const DEFAULT_VERBS: &[&str] = &[
    "ADD", "ARRANGE", "BAKE", "BEAT", "BLEND", "BOIL", "BRING", "BROIL", "BRUSH", "CHILL",
    "CHOP", "COAT", "COMBINE", "COOK", "COVER", "CUT", "DICE", "DIVIDE", "DRAIN", "DRIZZLE",
    "ENJOY", "FILL", "FLIP", "FOLD", "FRY", "GARNISH", "GRILL", "HEAT", "LAYER", "LET",
    "MARINATE", "MASH", "MELT", "MIX", "PLACE", "POUR", "PREHEAT", "PRESS", "REDUCE",
    "REFRIGERATE", "REMOVE", "RINSE", "ROAST", "ROLL", "SAUTE", "SAUTÉ", "SEASON", "SERVE",
    "SET", "SIMMER", "SLICE", "SPOON", "SPREAD", "SPRINKLE", "STIR", "STUFF", "TOP", "TOSS",
    "TRANSFER", "WARM", "WHISK",
];

const DEFAULT_UNITS: &[&str] = &[
    "oz", "ounce", "ounces", "cup", "cups", "tbsp", "tsp", "tablespoon", "tablespoons",
    "teaspoon", "teaspoons", "lb", "lbs", "pound", "pounds", "g", "grams", "kg", "mg", "ml",
    "slice", "slices", "piece", "pieces", "clove", "cloves", "can", "cans", "bunch", "handful",
    "pinch", "dash", "sprig", "sprigs", "medium", "large", "small", "ear", "ears", "scoop",
    "scoops", "stalk", "stalks", "head", "heads", "package", "container", "jar", "bag",
];

const DEFAULT_STAPLES: &[&str] = &[
    "cooking spray",
    "nonstick spray",
    "salt",
    "pepper",
    "olive oil",
    "water",
    "ice",
];

const DEFAULT_MODIFIERS: &[&str] = &[
    "black", "chopped", "coarse", "cracked", "dried", "extra", "fresh", "freshly", "ground",
    "kosher", "sea", "smoked", "virgin", "white",
];

const FRACTION_GLYPHS: &str = "½¼¾⅓⅔⅛⅜⅝⅞";

/// Word lists for one document family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    /// Imperative verbs that open an instruction step
    pub verbs: Vec<String>,
    /// Unit words that may follow a quantity
    pub units: Vec<String>,
    /// Ingredients recognised without a quantity
    pub staples: Vec<String>,
    /// Words that qualify a following ingredient name (`black` pepper)
    pub modifiers: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            verbs: owned(DEFAULT_VERBS),
            units: owned(DEFAULT_UNITS),
            staples: owned(DEFAULT_STAPLES),
            modifiers: owned(DEFAULT_MODIFIERS),
        }
    }
}

/// Compiled matchers for a `Vocabulary`
#[derive(Debug, Clone)]
pub struct Grammar {
    /// Verb at the start of a unit, any case, then space/comma/period/end
    verb_start: Regex,
    /// Upper-case verb anywhere, preceded by whitespace or start
    verb_inline: Regex,
    /// Upper-case verb as a whole word (for title-casing)
    verb_word: Regex,
    /// Quantity + unit token (ingredient split points)
    quantity_unit: Regex,
    /// Quantity at the start of a unit
    quantity_start: Regex,
    staple_start: Regex,
    /// Capitalised staple phrase inside running text
    staple_inline: Regex,
    /// A single unit or modifier word; an ingredient cannot end on one
    open_word: Regex,
}

static DEFAULT_GRAMMAR: Lazy<Grammar> =
    Lazy::new(|| Grammar::new(&Vocabulary::default()).expect("default vocabulary compiles"));

/// Numbered step prefix such as `2. ` or `3) `
static NUMBERED_STEP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}[.)]\s+([^\d\s].*)$").unwrap());

impl Grammar {
    pub fn new(vocabulary: &Vocabulary) -> Result<Self, regex::Error> {
        let verbs = alternation(vocabulary.verbs.iter().map(|v| v.to_uppercase()));
        let units = alternation(vocabulary.units.iter().cloned());
        let staples = alternation(vocabulary.staples.iter().cloned());
        let staples_capitalised = alternation(vocabulary.staples.iter().map(|s| capitalise(s)));
        let open_words = alternation(
            vocabulary
                .units
                .iter()
                .chain(&vocabulary.modifiers)
                .cloned(),
        );
        let quantity = format!(
            r"(?:\d+(?:\s+\d+\s*/\s*\d+|\s*/\s*\d+|\.\d+)?[{g}]?|[{g}])",
            g = FRACTION_GLYPHS
        );

        Ok(Self {
            verb_start: Regex::new(&format!(r"(?i)^(?:{verbs})(?:[ ,.]|$)"))?,
            verb_inline: Regex::new(&format!(r"(?:^|\s)((?:{verbs}))(?:[ ,.]|$)"))?,
            verb_word: Regex::new(&format!(r"\b(?:{verbs})\b"))?,
            quantity_unit: Regex::new(&format!(r"(?i){quantity}\s*-?\s*(?:{units})\b"))?,
            quantity_start: Regex::new(&format!(r"^{quantity}"))?,
            staple_start: Regex::new(&format!(r"(?i)^(?:{staples})\b"))?,
            staple_inline: Regex::new(&format!(r"\b(?:{staples_capitalised})\b"))?,
            open_word: Regex::new(&format!(r"(?i)^(?:{open_words})$"))?,
        })
    }

    /// The shared grammar for the built-in vocabulary
    pub fn default_grammar() -> &'static Grammar {
        &DEFAULT_GRAMMAR
    }

    pub fn starts_with_verb(&self, text: &str) -> bool {
        self.verb_start.is_match(text.trim_start())
    }

    pub fn starts_with_quantity(&self, text: &str) -> bool {
        self.quantity_start.is_match(text.trim_start())
    }

    pub fn starts_with_staple(&self, text: &str) -> bool {
        self.staple_start.is_match(text.trim_start())
    }

    /// Byte offsets where an upper-case instruction verb begins
    pub fn inline_verb_positions(&self, text: &str) -> Vec<usize> {
        self.verb_inline
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.start()))
            .collect()
    }

    /// Byte offsets where a new ingredient begins inside running text
    pub fn ingredient_split_positions(&self, text: &str) -> Vec<usize> {
        let preceded_by_space = |pos: usize| {
            pos == 0
                || text[..pos]
                    .chars()
                    .next_back()
                    .is_some_and(char::is_whitespace)
        };
        let staples = self
            .staple_inline
            .find_iter(text)
            .map(|m| m.start())
            .filter(|&pos| self.closes_ingredient(&text[..pos]));
        let mut positions: Vec<usize> = self
            .quantity_unit
            .find_iter(text)
            .map(|m| m.start())
            .chain(staples)
            .filter(|&pos| pos > 0 && preceded_by_space(pos))
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions
    }

    /// Whether an ingredient can end with `before`'s last word
    ///
    /// A quantity, unit or modifier leaves the ingredient open, so a staple
    /// after it (`1/4 tsp Black Pepper`) is part of the same ingredient.
    fn closes_ingredient(&self, before: &str) -> bool {
        match before.split_whitespace().next_back() {
            Some(word) => {
                !(self.quantity_start.is_match(word) || self.open_word.is_match(word))
            }
            None => false,
        }
    }

    /// Rewrite every upper-case vocabulary verb as `Title` case
    pub fn title_case_verbs(&self, text: &str) -> String {
        self.verb_word
            .replace_all(text, |caps: &Captures| capitalise(&caps[0].to_lowercase()))
            .into_owned()
    }
}

impl Default for Grammar {
    fn default() -> Self {
        DEFAULT_GRAMMAR.clone()
    }
}

/// Strip a `N. ` / `N) ` step number, returning the step text
pub fn strip_step_number(text: &str) -> Option<&str> {
    NUMBERED_STEP_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Build a regex alternation, longest words first so prefixes never win
fn alternation(words: impl Iterator<Item = String>) -> String {
    let mut words: Vec<String> = words.filter(|w| !w.trim().is_empty()).collect();
    words.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    words.dedup();
    words
        .iter()
        .map(|w| regex::escape(w.trim()))
        .collect::<Vec<_>>()
        .join("|")
}

fn capitalise(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

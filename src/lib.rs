//! Recipe extraction and repair for meal-plan PDFs
//!
//! This crate provides:
//! - Positioned text extraction from PDF pages and line reconstruction
//! - Region partitioning for multi-meal page layouts
//! - Locating one meal's recipe inside a page or region block
//! - Segmenting recipe text into servings, ingredients, steps and nutrition
//! - A canonical persisted recipe format with a display parser
//! - Detection and repair of recipes merged with their page neighbours

pub mod config;
pub mod format;
pub mod grammar;
pub mod lines;
pub mod locator;
pub mod pipeline;
pub mod regions;
pub mod repair;
pub mod segmenter;
pub mod source;
pub mod store;

pub use config::{DocumentProfile, LocatorConfig, PipelineConfig, RepairConfig};
pub use format::{format_canonical, is_canonical, parse_for_display};
pub use grammar::{Grammar, Vocabulary};
pub use lines::{lines_to_text, reconstruct_lines, TextLine};
pub use locator::{Located, Locator, MatchKind};
pub use pipeline::{
    discover_documents, DocumentJob, Extractor, MealOutcome, OutcomeStatus, RunSummary,
};
pub use regions::{partition, Assignment, LayoutError, Region, RegionLayout};
pub use repair::{detect_merge, MergeSignals, Repairer};
pub use segmenter::{segment, segment_located, SegmentedRecipe};
pub use source::{Fragment, FragmentSource, PdfSource, StaticSource};
pub use store::{
    JsonFileStore, Meal, MealFilter, MealPatch, MealStore, MealType, MemoryStore, NewMeal,
    StoreError,
};

/// Locate a meal inside a block of text and segment its recipe
///
/// This is the extraction path shared by the batch pipeline and the repair
/// pass:
/// 1. Find the meal's span, bounded by the other names on the page
/// 2. Segment the span into recipe fields, minus the printed title
pub fn extract_recipe(
    block: &str,
    meal_name: &str,
    others: &[&str],
    locator: &Locator,
    grammar: &Grammar,
) -> Result<(Located, SegmentedRecipe), ExtractError> {
    let located = locator
        .locate(block, meal_name, others)
        .ok_or_else(|| ExtractError::LocatorMiss(meal_name.to_string()))?;
    let recipe = segment_located(block, &located, meal_name, grammar)?;
    Ok((located, recipe))
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("meal {0:?} not found in text block")]
    LocatorMiss(String),
    #[error("no ingredients or instructions for {0:?}")]
    SegmentationEmpty(String),
    #[error("region layout error: {0}")]
    RegionMismatch(#[from] LayoutError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("repair of meal {id} rejected: {reason}")]
    RepairRegression { id: u64, reason: String },
    #[error("page {0} out of range")]
    PageOutOfRange(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parsing error: {0}")]
    Parse(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<lopdf::Error> for ExtractError {
    fn from(e: lopdf::Error) -> Self {
        ExtractError::Parse(e.to_string())
    }
}

impl From<regex::Error> for ExtractError {
    fn from(e: regex::Error) -> Self {
        ExtractError::Config(e.to_string())
    }
}

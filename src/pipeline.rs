//! Batch recipe extraction
//!
//! One job per `(phase, week)` document. Documents run in parallel on the
//! rayon pool; the pages of one document run in order. Every meal that was
//! a target ends with one `MealOutcome`; only a document that cannot be read
//! or a store that cannot be queried stops a job early.

use crate::config::{DocumentProfile, PipelineConfig};
use crate::format::format_canonical;
use crate::grammar::Grammar;
use crate::lines::{lines_to_text, reconstruct_lines, TextLine};
use crate::locator::Locator;
use crate::regions::{partition, Partition, RegionLayout};
use crate::segmenter::SegmentedRecipe;
use crate::source::{Fragment, FragmentSource, PdfSource};
use crate::store::{Meal, MealFilter, MealPatch, MealStore};
use crate::{extract_recipe, ExtractError};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Failure reasons kept in a `RunSummary`
const MAX_REPORTED_FAILURES: usize = 20;

/// Result class of one meal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Extracted,
    Skipped,
    Failed,
    Repaired,
    AlreadyClean,
}

/// What happened to one meal in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealOutcome {
    pub status: OutcomeStatus,
    pub meal_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_count_before: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_count_after: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MealOutcome {
    fn new(status: OutcomeStatus, meal_id: u64) -> Self {
        Self {
            status,
            meal_id,
            char_count_before: None,
            char_count_after: None,
            reason: None,
        }
    }

    pub fn extracted(meal_id: u64, chars_after: usize) -> Self {
        Self {
            char_count_after: Some(chars_after),
            ..Self::new(OutcomeStatus::Extracted, meal_id)
        }
    }

    pub fn repaired(meal_id: u64, chars_before: usize, chars_after: usize) -> Self {
        Self {
            char_count_before: Some(chars_before),
            char_count_after: Some(chars_after),
            ..Self::new(OutcomeStatus::Repaired, meal_id)
        }
    }

    pub fn already_clean(meal_id: u64, chars: usize) -> Self {
        Self {
            char_count_before: Some(chars),
            ..Self::new(OutcomeStatus::AlreadyClean, meal_id)
        }
    }

    pub fn skipped(meal_id: u64, reason: impl Into<String>) -> Self {
        Self::new(OutcomeStatus::Skipped, meal_id).with_reason(reason)
    }

    pub fn failed(meal_id: u64, reason: impl Into<String>) -> Self {
        Self::new(OutcomeStatus::Failed, meal_id).with_reason(reason)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Counts and outcomes of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub extracted: usize,
    pub repaired: usize,
    pub already_clean: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Documents that could not be processed at all
    pub documents_failed: usize,
    /// First reasons for skips and failures
    pub failures: Vec<String>,
    pub outcomes: Vec<MealOutcome>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = MealOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            summary.record(outcome);
        }
        summary
    }

    pub fn record(&mut self, outcome: MealOutcome) {
        match outcome.status {
            OutcomeStatus::Extracted => self.extracted += 1,
            OutcomeStatus::Repaired => self.repaired += 1,
            OutcomeStatus::AlreadyClean => self.already_clean += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Failed => self.failed += 1,
        }
        if let Some(reason) = &outcome.reason {
            if matches!(outcome.status, OutcomeStatus::Skipped | OutcomeStatus::Failed) {
                self.note_failure(format!("meal {}: {}", outcome.meal_id, reason));
            }
        }
        self.outcomes.push(outcome);
    }

    pub fn record_document_failure(&mut self, job: &DocumentJob, error: &ExtractError) {
        self.documents_failed += 1;
        self.note_failure(format!("{}: {}", job.path.display(), error));
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.extracted += other.extracted;
        self.repaired += other.repaired;
        self.already_clean += other.already_clean;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.documents_failed += other.documents_failed;
        for failure in other.failures {
            self.note_failure(failure);
        }
        self.outcomes.extend(other.outcomes);
    }

    /// Meals with an outcome
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    fn note_failure(&mut self, reason: String) {
        if self.failures.len() < MAX_REPORTED_FAILURES {
            self.failures.push(reason);
        }
    }
}

/// One source document and the meals it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentJob {
    pub path: PathBuf,
    pub phase_id: String,
    pub week: u32,
}

static PHASE_FOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^phase\s*(\d+)$").unwrap());

static MONTH_FOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^month\s*(\d+)$").unwrap());

static WEEK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)week\s*(\d+)").unwrap());

/// Phase id for a document folder (`PHASE 1` -> `phase-1`, `Month 8` -> `m8`)
pub fn phase_for_folder(folder: &str) -> Option<String> {
    let folder = folder.trim();
    if let Some(caps) = PHASE_FOLDER_RE.captures(folder) {
        return Some(format!("phase-{}", &caps[1]));
    }
    if let Some(caps) = MONTH_FOLDER_RE.captures(folder) {
        return Some(format!("m{}", &caps[1]));
    }
    if folder.to_lowercase().contains("bonus") {
        return Some("bonus".to_string());
    }
    None
}

/// Week number from a document file name; bonus files default to week 0
pub fn week_from_filename(name: &str) -> Option<u32> {
    if let Some(week) = WEEK_RE
        .captures(name)
        .and_then(|caps| caps[1].parse::<u32>().ok())
    {
        return Some(week);
    }
    name.to_lowercase().contains("bonus").then_some(0)
}

/// Find every PDF under `root/<phase folder>/`
///
/// Files whose name mentions "bonus" belong to the bonus phase whatever
/// folder they sit in.
pub fn discover_documents<P: AsRef<Path>>(root: P) -> Result<Vec<DocumentJob>, ExtractError> {
    let mut folders: Vec<PathBuf> = std::fs::read_dir(root.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    folders.sort();

    let mut jobs = Vec::new();
    for folder in folders {
        let Some(folder_name) = folder.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if folder_name.starts_with('.') {
            continue;
        }
        let Some(folder_phase) = phase_for_folder(folder_name) else {
            log::debug!("ignoring folder {}", folder.display());
            continue;
        };

        let mut files: Vec<PathBuf> = std::fs::read_dir(&folder)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
            })
            .collect();
        files.sort();

        for path in files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(week) = week_from_filename(file_name) else {
                log::debug!("no week number in {}", path.display());
                continue;
            };
            let phase_id = if file_name.to_lowercase().contains("bonus") {
                "bonus".to_string()
            } else {
                folder_phase.clone()
            };
            jobs.push(DocumentJob {
                path,
                phase_id,
                week,
            });
        }
    }
    Ok(jobs)
}

/// Reconstructed text of a page, as the extractor sees it
#[derive(Debug, Clone)]
pub enum PageView {
    Lines(Vec<TextLine>),
    Regions(Partition),
}

/// Lines or region texts of one page under a profile
pub fn inspect_page(
    source: &dyn FragmentSource,
    page: u32,
    profile: &DocumentProfile,
) -> Result<PageView, ExtractError> {
    let fragments = source.page_fragments(page)?;
    Ok(match &profile.layout {
        None => PageView::Lines(reconstruct_lines(&fragments, profile.y_tolerance)),
        Some(layout) => PageView::Regions(partition(&fragments, layout, profile.y_tolerance)),
    })
}

/// Fills in missing recipes from source documents
pub struct Extractor<'s> {
    store: &'s dyn MealStore,
    config: PipelineConfig,
    grammar: Grammar,
    locator: Locator,
}

impl<'s> Extractor<'s> {
    pub fn new(store: &'s dyn MealStore, config: PipelineConfig) -> Result<Self, ExtractError> {
        config.validate()?;
        let grammar = Grammar::new(&config.vocabulary)?;
        let locator = Locator::new(config.locator.clone())?;
        Ok(Self {
            store,
            config,
            grammar,
            locator,
        })
    }

    /// Process documents from disk
    pub fn run(&self, jobs: &[DocumentJob]) -> RunSummary {
        self.run_with(jobs, |job| {
            let source = PdfSource::open(&job.path)?;
            Ok(Box::new(source) as Box<dyn FragmentSource>)
        })
    }

    /// Process documents through a custom source opener
    pub fn run_with<F>(&self, jobs: &[DocumentJob], open: F) -> RunSummary
    where
        F: Fn(&DocumentJob) -> Result<Box<dyn FragmentSource>, ExtractError> + Sync,
    {
        jobs.par_iter()
            .map(|job| {
                let mut summary = RunSummary::default();
                let result =
                    open(job).and_then(|source| self.extract_document(job, source.as_ref()));
                match result {
                    Ok(outcomes) => outcomes.into_iter().for_each(|o| summary.record(o)),
                    Err(e) => {
                        log::error!("{}: {}", job.path.display(), e);
                        summary.record_document_failure(job, &e);
                    }
                }
                summary
            })
            .reduce(RunSummary::default, |mut a, b| {
                a.merge(b);
                a
            })
    }

    /// Extract every missing recipe of one document
    pub fn extract_document(
        &self,
        job: &DocumentJob,
        source: &dyn FragmentSource,
    ) -> Result<Vec<MealOutcome>, ExtractError> {
        let profile = self.config.profile_for(&job.phase_id)?;
        let meals = self
            .store
            .find(&MealFilter::new().phase(&job.phase_id).week(job.week))?;

        let mut pages: BTreeMap<u32, Vec<Meal>> = BTreeMap::new();
        for meal in meals {
            pages.entry(meal.page).or_default().push(meal);
        }
        log::info!(
            "{} week {}: {} pages with meals, profile {}",
            job.phase_id,
            job.week,
            pages.len(),
            profile.name
        );

        let mut outcomes = Vec::new();
        for (page, page_meals) in &pages {
            let targets: Vec<&Meal> = page_meals
                .iter()
                .filter(|m| m.recipe_text.is_none())
                .collect();
            if targets.is_empty() {
                continue;
            }
            if *page == 0 || *page > source.page_count() {
                let reason = format!(
                    "page {} beyond document ({} pages)",
                    page,
                    source.page_count()
                );
                outcomes.extend(targets.iter().map(|m| MealOutcome::skipped(m.id, reason.clone())));
                continue;
            }
            let fragments = match source.page_fragments(*page) {
                Ok(fragments) => fragments,
                Err(e) => {
                    log::warn!("page {}: {}", page, e);
                    outcomes.extend(
                        targets
                            .iter()
                            .map(|m| MealOutcome::failed(m.id, e.to_string())),
                    );
                    continue;
                }
            };
            outcomes.extend(match &profile.layout {
                None => self.extract_whole_page(&fragments, profile, page_meals),
                Some(layout) => self.extract_regions(&fragments, profile, layout, page_meals),
            });
        }
        Ok(outcomes)
    }

    fn extract_whole_page(
        &self,
        fragments: &[Fragment],
        profile: &DocumentProfile,
        page_meals: &[Meal],
    ) -> Vec<MealOutcome> {
        let text = lines_to_text(fragments, profile.y_tolerance);
        page_meals
            .iter()
            .filter(|m| m.recipe_text.is_none())
            .map(|meal| {
                let others = neighbour_names(page_meals, meal.id);
                match extract_recipe(&text, &meal.name, &others, &self.locator, &self.grammar) {
                    Ok((_, recipe)) => self.persist(meal, &recipe),
                    Err(e) => MealOutcome::skipped(meal.id, e.to_string()),
                }
            })
            .collect()
    }

    /// Pair meals with regions and extract from the assigned region
    ///
    /// A meal missing from its assigned region is looked for in the regions
    /// no other meal has claimed; it is skipped rather than force-assigned.
    fn extract_regions(
        &self,
        fragments: &[Fragment],
        profile: &DocumentProfile,
        layout: &RegionLayout,
        page_meals: &[Meal],
    ) -> Vec<MealOutcome> {
        let partition = partition(fragments, layout, profile.y_tolerance);
        if partition.dropped_ratio() > self.config.max_dropped_ratio {
            log::warn!(
                "{:.0}% of fragments fell outside the {} regions; layout may not match",
                partition.dropped_ratio() * 100.0,
                profile.name
            );
        }
        for region in partition.regions.iter().filter(|r| r.lines.is_empty()) {
            log::debug!("region {} is empty", region.label);
        }

        let texts: Vec<String> = partition.regions.iter().map(|r| r.text()).collect();
        let assigned: Vec<Option<usize>> = page_meals
            .iter()
            .enumerate()
            .map(|(i, m)| profile.assignment.region_for(layout, i, m.meal_type))
            .collect();
        let mut claimed = vec![false; texts.len()];
        let mut outcomes = Vec::new();

        for (meal, region) in page_meals.iter().zip(&assigned) {
            if meal.recipe_text.is_some() {
                continue;
            }
            let Some(region) = *region else {
                outcomes.push(MealOutcome::skipped(meal.id, "no region assigned"));
                continue;
            };
            let others = neighbour_names(page_meals, meal.id);
            let attempt = |idx: usize| {
                extract_recipe(&texts[idx], &meal.name, &others, &self.locator, &self.grammar)
            };

            let result = match attempt(region) {
                Err(ExtractError::LocatorMiss(_)) => {
                    let fallback = (0..texts.len())
                        .filter(|&idx| idx != region && !claimed[idx])
                        .find_map(|idx| attempt(idx).ok().map(|found| (idx, found)));
                    match fallback {
                        Some((idx, found)) => {
                            log::warn!(
                                "{:?} not in region {}, found in region {}",
                                meal.name,
                                layout.regions[region].label,
                                layout.regions[idx].label
                            );
                            Ok((idx, found.1))
                        }
                        None => Err(ExtractError::LocatorMiss(meal.name.clone())),
                    }
                }
                other => other.map(|(_, recipe)| (region, recipe)),
            };

            match result {
                Ok((idx, recipe)) => {
                    claimed[idx] = true;
                    outcomes.push(self.persist(meal, &recipe));
                }
                Err(e) => outcomes.push(MealOutcome::skipped(meal.id, e.to_string())),
            }
        }
        outcomes
    }

    fn persist(&self, meal: &Meal, recipe: &SegmentedRecipe) -> MealOutcome {
        let text = format_canonical(recipe);
        let chars = text.chars().count();
        match self.store.update(meal.id, &MealPatch::recipe_text(text)) {
            Ok(()) => {
                log::debug!("stored recipe for meal {} ({} chars)", meal.id, chars);
                MealOutcome::extracted(meal.id, chars)
            }
            Err(e) => {
                log::warn!("meal {}: {}", meal.id, e);
                MealOutcome::failed(meal.id, e.to_string())
            }
        }
    }
}

fn neighbour_names(meals: &[Meal], id: u64) -> Vec<&str> {
    meals
        .iter()
        .filter(|m| m.id != id)
        .map(|m| m.name.as_str())
        .collect()
}

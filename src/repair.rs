//! Merge detection and repair
//!
//! A recipe is "merged" when its stored text also carries a neighbour's
//! recipe from the same page. Repair re-locates the meal's own span inside
//! the stored text, re-segments it and writes canonical text back, but only
//! when the new span is clearly shorter and the result is itself clean.

use crate::config::RepairConfig;
use crate::format::{format_canonical, is_canonical};
use crate::grammar::Grammar;
use crate::locator::Locator;
use crate::pipeline::{MealOutcome, RunSummary};
use crate::segmenter::{count_nutrition_lines, count_servings_tokens, segment_located};
use crate::store::{Meal, MealFilter, MealPatch, MealStore, PageKey};
use crate::ExtractError;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Evidence that a recipe text holds more than one recipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSignals {
    /// Co-located meal names found in the text
    pub other_names: Vec<String>,
    pub nutrition_lines: usize,
    pub servings_tokens: usize,
}

impl MergeSignals {
    pub fn is_merged(&self) -> bool {
        !self.other_names.is_empty() || self.nutrition_lines > 1 || self.servings_tokens > 1
    }
}

/// Check `text` (the recipe of `own_name`) for merge signals
///
/// An other name that is part of `own_name` only counts when it occurs more
/// often than the own name accounts for.
pub fn detect_merge(text: &str, own_name: &str, others: &[&str]) -> MergeSignals {
    let lower = text.to_lowercase();
    let own = own_name.trim().to_lowercase();
    let own_hits = if own.is_empty() {
        0
    } else {
        lower.matches(own.as_str()).count()
    };

    let other_names = others
        .iter()
        .filter(|other| {
            let other = other.trim().to_lowercase();
            if other.is_empty() || other == own {
                return false;
            }
            let hits = lower.matches(other.as_str()).count();
            let inside_own = own_hits * own.matches(other.as_str()).count();
            hits > inside_own
        })
        .map(|other| other.to_string())
        .collect();

    MergeSignals {
        other_names,
        nutrition_lines: count_nutrition_lines(text),
        servings_tokens: count_servings_tokens(text),
    }
}

/// A merged recipe found by `Repairer::scan`
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub meal_id: u64,
    pub name: String,
    pub group: PageKey,
    pub chars: usize,
    pub signals: MergeSignals,
}

/// One mutex per page group
#[derive(Default)]
pub struct PageGroupLocks {
    locks: Mutex<HashMap<PageKey, Arc<Mutex<()>>>>,
}

impl PageGroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock serializing work on `key`
    pub fn lock_for(&self, key: &PageKey) -> Result<Arc<Mutex<()>>, ExtractError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ExtractError::Config("page group lock table poisoned".to_string()))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }
}

/// Detects and repairs merged recipes in a store
pub struct Repairer<'s> {
    store: &'s dyn MealStore,
    config: RepairConfig,
    locator: Locator,
    grammar: Grammar,
    apply: bool,
    locks: PageGroupLocks,
}

impl<'s> Repairer<'s> {
    /// Dry-run repairer; nothing is written until `apply(true)`
    pub fn new(store: &'s dyn MealStore) -> Self {
        Self {
            store,
            config: RepairConfig::default(),
            locator: Locator::default(),
            grammar: Grammar::default(),
            apply: false,
            locks: PageGroupLocks::new(),
        }
    }

    pub fn with_config(mut self, config: RepairConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_grammar(mut self, grammar: Grammar) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn apply(mut self, apply: bool) -> Self {
        self.apply = apply;
        self
    }

    /// Merged recipes among the meals matching `filter`, without repairing
    pub fn scan(&self, filter: &MealFilter) -> Result<Vec<MergeReport>, ExtractError> {
        let groups = self.load_groups(filter)?;
        let mut reports = Vec::new();
        for (key, meals) in &groups {
            for meal in meals {
                let Some(text) = meal.recipe_text.as_deref() else {
                    continue;
                };
                let others = other_names(meals, meal.id);
                let signals = detect_merge(text, &meal.name, &others);
                if signals.is_merged() {
                    reports.push(MergeReport {
                        meal_id: meal.id,
                        name: meal.name.clone(),
                        group: key.clone(),
                        chars: text.chars().count(),
                        signals,
                    });
                }
            }
        }
        Ok(reports)
    }

    /// Repair every merged recipe among the meals matching `filter`
    ///
    /// Page groups run in parallel; the meals of one group run in order
    /// under that group's lock.
    pub fn run(&self, filter: &MealFilter) -> Result<RunSummary, ExtractError> {
        let groups = self.load_groups(filter)?;
        log::info!(
            "checking {} page groups for merged recipes{}",
            groups.len(),
            if self.apply { "" } else { " (dry run)" }
        );

        let outcomes: Vec<MealOutcome> = groups
            .par_iter()
            .flat_map_iter(|(key, meals)| self.repair_group(key, meals))
            .collect();

        Ok(RunSummary::from_outcomes(outcomes))
    }

    fn repair_group(&self, key: &PageKey, meals: &[Meal]) -> Vec<MealOutcome> {
        let lock = match self.locks.lock_for(key) {
            Ok(lock) => lock,
            Err(e) => {
                return meals
                    .iter()
                    .map(|m| MealOutcome::failed(m.id, e.to_string()))
                    .collect()
            }
        };
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // Re-read under the lock; the listing may be stale
        let current = match self.store.find(&group_filter(key)) {
            Ok(current) => current,
            Err(e) => {
                return meals
                    .iter()
                    .map(|m| MealOutcome::failed(m.id, e.to_string()))
                    .collect()
            }
        };

        current
            .iter()
            .filter(|m| m.recipe_text.is_some())
            .filter(|m| meals.iter().any(|wanted| wanted.id == m.id))
            .map(|meal| {
                let others = other_names(&current, meal.id);
                self.repair_meal(meal, &others)
            })
            .collect()
    }

    /// Repair one meal given the names of its page neighbours
    pub fn repair_meal(&self, meal: &Meal, others: &[&str]) -> MealOutcome {
        let Some(text) = meal.recipe_text.as_deref() else {
            return MealOutcome::skipped(meal.id, "no recipe text");
        };
        let before = text.chars().count();

        let signals = detect_merge(text, &meal.name, others);
        if !signals.is_merged() {
            return MealOutcome::already_clean(meal.id, before);
        }
        log::debug!("meal {} {:?} merged: {:?}", meal.id, meal.name, signals);

        let candidate = match self.repaired_text(meal, text, others) {
            Ok(candidate) => candidate,
            Err(e) => {
                log::warn!("meal {} {:?} flagged for review: {}", meal.id, meal.name, e);
                return MealOutcome::skipped(meal.id, e.to_string());
            }
        };
        let after = candidate.chars().count();

        if !self.apply {
            return MealOutcome::repaired(meal.id, before, after)
                .with_reason("dry run, not written");
        }
        match self.store.update(meal.id, &MealPatch::recipe_text(candidate)) {
            Ok(()) => {
                log::info!(
                    "repaired meal {} {:?}: {} -> {} chars",
                    meal.id,
                    meal.name,
                    before,
                    after
                );
                MealOutcome::repaired(meal.id, before, after)
            }
            Err(e) => MealOutcome::failed(meal.id, e.to_string()),
        }
    }

    /// Canonical text for the meal's own span, or why there is none
    fn repaired_text(
        &self,
        meal: &Meal,
        text: &str,
        others: &[&str],
    ) -> Result<String, ExtractError> {
        let located = match self.locator.locate(text, &meal.name, others) {
            Some(located) => located,
            None if is_canonical(text) => self.locator.locate_anchored(text, others),
            None => return Err(ExtractError::LocatorMiss(meal.name.clone())),
        };

        let old_len = text.chars().count();
        let span = located.span(text);
        let new_len = span.chars().count();
        if new_len as f64 >= self.config.shrink_ratio * old_len as f64 {
            return Err(ExtractError::RepairRegression {
                id: meal.id,
                reason: format!("span of {} chars not shorter than {}", new_len, old_len),
            });
        }
        if new_len < self.config.min_length {
            return Err(ExtractError::RepairRegression {
                id: meal.id,
                reason: format!(
                    "span of {} chars below minimum {}",
                    new_len, self.config.min_length
                ),
            });
        }

        let recipe = segment_located(text, &located, &meal.name, &self.grammar)?;
        let candidate = format_canonical(&recipe);
        if detect_merge(&candidate, &meal.name, others).is_merged() {
            return Err(ExtractError::RepairRegression {
                id: meal.id,
                reason: "repaired text still carries another recipe".to_string(),
            });
        }
        Ok(candidate)
    }

    /// Meals grouped by page group; groups of a single meal are dropped
    fn load_groups(
        &self,
        filter: &MealFilter,
    ) -> Result<BTreeMap<PageKey, Vec<Meal>>, ExtractError> {
        let mut groups: BTreeMap<PageKey, Vec<Meal>> = BTreeMap::new();
        for meal in self.store.find(filter)? {
            groups.entry(meal.group_key()).or_default().push(meal);
        }
        groups.retain(|_, meals| meals.len() > 1);
        Ok(groups)
    }
}

fn group_filter(key: &PageKey) -> MealFilter {
    MealFilter::new()
        .phase(&key.phase_id)
        .week(key.week)
        .day(&key.day)
        .page(key.page)
}

fn other_names(meals: &[Meal], id: u64) -> Vec<&str> {
    meals
        .iter()
        .filter(|m| m.id != id)
        .map(|m| m.name.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::OutcomeStatus;
    use crate::store::{MealType, MemoryStore, NewMeal, StoreError};

    const MERGED_OATS: &str = "Overnight Oats (1 SERVING) 1 cup rolled oats 1 cup almond milk \
        STIR oats and milk together. REFRIGERATE overnight. \
        Nutritional info per serving: 250 cal / 9g protein / 8g fiber \
        Salmon Rice Bowl (2 SERVINGS) 6 oz salmon 1 cup rice PLACE salmon on rice. \
        Nutritional info per serving: 420 cal / 32g protein / 3g fiber";

    fn make_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert(
                NewMeal::new("Overnight Oats", MealType::Breakfast, "m8", 1, "1", 4)
                    .with_recipe(MERGED_OATS),
            )
            .unwrap();
        store
            .insert(NewMeal::new("Salmon Rice Bowl", MealType::Lunch, "m8", 1, "1", 4))
            .unwrap();
        store
    }

    #[test]
    fn test_detect_merge_signals() {
        let signals = detect_merge(MERGED_OATS, "Overnight Oats", &["Salmon Rice Bowl"]);
        assert!(signals.is_merged());
        assert_eq!(signals.other_names, vec!["Salmon Rice Bowl"]);
        assert_eq!(signals.nutrition_lines, 2);
        assert_eq!(signals.servings_tokens, 2);
    }

    #[test]
    fn test_two_servings_tokens_flag_merge() {
        let text = "(1 SERVING) 1 cup oats STIR. (2 SERVINGS) 6 oz salmon";
        let signals = detect_merge(text, "Oats", &[]);
        assert!(signals.other_names.is_empty());
        assert!(signals.is_merged());
    }

    #[test]
    fn test_other_name_inside_own_name_is_not_a_signal() {
        let text = "Berry Oats (1 SERVING) 1 cup oats STIR in berries.";
        let signals = detect_merge(text, "Berry Oats", &["Oats"]);
        assert!(signals.other_names.is_empty());
        assert!(!signals.is_merged());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let store = make_store();
        let summary = Repairer::new(&store).run(&MealFilter::new()).unwrap();
        assert_eq!(summary.repaired, 1);
        let meals = store.find(&MealFilter::new().recipe_present()).unwrap();
        assert_eq!(meals[0].recipe_text.as_deref(), Some(MERGED_OATS));
    }

    #[test]
    fn test_repair_removes_neighbour_and_is_idempotent() {
        let store = make_store();
        let repairer = Repairer::new(&store).apply(true);

        let first = repairer.run(&MealFilter::new()).unwrap();
        assert_eq!(first.repaired, 1);

        let oats = &store.find(&MealFilter::new().recipe_present()).unwrap()[0];
        let text = oats.recipe_text.clone().unwrap();
        assert!(!text.to_lowercase().contains("salmon rice bowl"));
        assert_eq!(
            text,
            "Nutritional info per serving: 250 cal / 9g protein / 8g fiber\n\n\
             (1 SERVING)\n\n\
             INGREDIENTS:\n• 1 cup rolled oats\n• 1 cup almond milk\n\n\
             INSTRUCTIONS:\n1. Stir oats and milk together.\n2. Refrigerate overnight."
        );

        let second = repairer.run(&MealFilter::new()).unwrap();
        assert_eq!(second.repaired, 0);
        assert_eq!(second.already_clean, 1);
        let again = &store.find(&MealFilter::new().recipe_present()).unwrap()[0];
        assert_eq!(again.recipe_text.as_deref(), Some(text.as_str()));
    }

    #[test]
    fn test_repair_canonical_text_without_title() {
        let merged = "(1 SERVING)\n\nINGREDIENTS:\n• 1 cup rolled oats\n• 1 cup almond milk\n\n\
                      INSTRUCTIONS:\n1. Stir oats and milk together. Salmon Rice Bowl (2 SERVINGS) \
                      6 oz salmon 1 cup rice PLACE salmon on rice. 420 cal / 32g protein / 3g fiber";
        let store = MemoryStore::new();
        let oats = store
            .insert(
                NewMeal::new("Overnight Oats", MealType::Breakfast, "m8", 1, "1", 4)
                    .with_recipe(merged),
            )
            .unwrap();
        let repairer = Repairer::new(&store).apply(true);
        let outcome = repairer.repair_meal(&oats, &["Salmon Rice Bowl"]);
        assert_eq!(outcome.status, OutcomeStatus::Repaired);

        let stored = store.find(&MealFilter::new()).unwrap()[0]
            .recipe_text
            .clone()
            .unwrap();
        assert!(stored.ends_with("INSTRUCTIONS:\n1. Stir oats and milk together."));
    }

    #[test]
    fn test_insufficient_shrink_is_flagged() {
        let text = "Overnight Oats (1 SERVING) 1 cup rolled oats 1 cup almond milk \
                    STIR oats and milk together. REFRIGERATE overnight until thick. (1 SERVING)";
        let store = MemoryStore::new();
        let oats = store
            .insert(
                NewMeal::new("Overnight Oats", MealType::Breakfast, "m8", 1, "1", 4)
                    .with_recipe(text),
            )
            .unwrap();
        let outcome = Repairer::new(&store).apply(true).repair_meal(&oats, &[]);
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert!(outcome.reason.unwrap().contains("not shorter"));
        let stored = &store.find(&MealFilter::new()).unwrap()[0];
        assert_eq!(stored.recipe_text.as_deref(), Some(text));
    }

    #[test]
    fn test_short_span_is_flagged() {
        let text = "Oats (1 SERVING) 1 cup oats STIR. Salmon Rice Bowl (2 SERVINGS) 6 oz salmon \
                    1 cup rice PLACE salmon on rice and serve with lemon wedges and fresh herbs.";
        let store = MemoryStore::new();
        let oats = store
            .insert(NewMeal::new("Oats", MealType::Breakfast, "m8", 1, "1", 4).with_recipe(text))
            .unwrap();
        let outcome = Repairer::new(&store)
            .apply(true)
            .repair_meal(&oats, &["Salmon Rice Bowl"]);
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert!(outcome.reason.unwrap().contains("below minimum"));
        let stored = &store.find(&MealFilter::new()).unwrap()[0];
        assert_eq!(stored.recipe_text.as_deref(), Some(text));
    }

    #[test]
    fn test_candidate_still_merged_is_flagged() {
        // an unlisted neighbour sits inside the oats span
        let text = "Overnight Oats (1 SERVING) 1 cup rolled oats 1 cup almond milk \
                    STIR oats and milk together. Tuna Melt (2 SERVINGS) 4 oz tuna 2 slices bread. \
                    Salmon Rice Bowl (2 SERVINGS) 6 oz salmon 1 cup rice PLACE salmon on rice. \
                    Nutritional info per serving: 420 cal / 32g protein / 3g fiber";
        let store = MemoryStore::new();
        let oats = store
            .insert(
                NewMeal::new("Overnight Oats", MealType::Breakfast, "m8", 1, "1", 4)
                    .with_recipe(text),
            )
            .unwrap();
        let outcome = Repairer::new(&store)
            .apply(true)
            .repair_meal(&oats, &["Salmon Rice Bowl"]);
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert!(outcome.reason.unwrap().contains("still carries another recipe"));
        let stored = &store.find(&MealFilter::new()).unwrap()[0];
        assert_eq!(stored.recipe_text.as_deref(), Some(text));
    }

    struct ReadOnlyStore(MemoryStore);

    impl MealStore for ReadOnlyStore {
        fn find(&self, filter: &MealFilter) -> Result<Vec<Meal>, StoreError> {
            self.0.find(filter)
        }

        fn update(&self, _id: u64, _patch: &MealPatch) -> Result<(), StoreError> {
            Err(StoreError::Backend("read-only".to_string()))
        }

        fn insert(&self, meal: NewMeal) -> Result<Meal, StoreError> {
            self.0.insert(meal)
        }
    }

    #[test]
    fn test_store_write_failure_fails_meal_and_run_continues() {
        let inner = make_store();
        inner
            .insert(
                NewMeal::new("Overnight Oats", MealType::Breakfast, "m8", 1, "2", 9)
                    .with_recipe(MERGED_OATS),
            )
            .unwrap();
        inner
            .insert(NewMeal::new("Salmon Rice Bowl", MealType::Lunch, "m8", 1, "2", 9))
            .unwrap();
        let store = ReadOnlyStore(inner);

        let summary = Repairer::new(&store).apply(true).run(&MealFilter::new()).unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.total(), 2);
        assert!(summary.failures.iter().all(|f| f.contains("read-only")));
        let stored = store.find(&MealFilter::new().recipe_present()).unwrap();
        assert!(stored.iter().all(|m| m.recipe_text.as_deref() == Some(MERGED_OATS)));
    }

    #[test]
    fn test_scan_reports_without_writing() {
        let store = make_store();
        let reports = Repairer::new(&store).scan(&MealFilter::new()).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].meal_id, 1);
        assert_eq!(reports[0].group.page, 4);
        assert_eq!(reports[0].signals.other_names, vec!["Salmon Rice Bowl"]);

        let meals = store.find(&MealFilter::new().recipe_present()).unwrap();
        assert_eq!(meals[0].recipe_text.as_deref(), Some(MERGED_OATS));
    }

    #[test]
    fn test_single_meal_pages_are_not_checked() {
        let store = MemoryStore::new();
        store
            .insert(
                NewMeal::new("Overnight Oats", MealType::Breakfast, "m8", 1, "1", 4)
                    .with_recipe(MERGED_OATS),
            )
            .unwrap();
        let summary = Repairer::new(&store).apply(true).run(&MealFilter::new()).unwrap();
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn test_page_group_locks_are_shared_per_key() {
        let locks = PageGroupLocks::new();
        let key = PageKey {
            phase_id: "m8".into(),
            week: 1,
            day: "1".into(),
            page: 4,
        };
        let a = locks.lock_for(&key).unwrap();
        let b = locks.lock_for(&key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}

//! Meal record store
//!
//! The pipeline only needs find / update / insert over meal records. The
//! `MealStore` trait is that seam; `MemoryStore` backs tests and
//! `JsonFileStore` persists a store as one JSON document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Errors from a record store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("meal {0} not found")]
    NotFound(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Meal slot in a day plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
    Dessert,
    Party,
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MealType::Breakfast => "Breakfast",
            MealType::Lunch => "Lunch",
            MealType::Dinner => "Dinner",
            MealType::Snack => "Snack",
            MealType::Dessert => "Dessert",
            MealType::Party => "Party",
        };
        f.write_str(name)
    }
}

impl FromStr for MealType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            "snack" => Ok(MealType::Snack),
            "dessert" => Ok(MealType::Dessert),
            "party" => Ok(MealType::Party),
            other => Err(StoreError::Backend(format!("invalid meal type: {}", other))),
        }
    }
}

/// A persisted meal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub id: u64,
    pub name: String,
    pub meal_type: MealType,
    pub phase_id: String,
    pub week: u32,
    pub day: String,
    /// Page of the source document the recipe is printed on
    pub page: u32,
    pub calories: Option<u32>,
    pub protein_g: Option<f32>,
    pub fiber_g: Option<f32>,
    pub plan_type: Option<String>,
    pub other_meal_plans: Option<String>,
    /// Canonical recipe text, or `None` until extracted
    pub recipe_text: Option<String>,
}

impl Meal {
    /// Key of the meals laid out together on one page
    pub fn group_key(&self) -> PageKey {
        PageKey {
            phase_id: self.phase_id.clone(),
            week: self.week,
            day: self.day.clone(),
            page: self.page,
        }
    }
}

/// `(phase, week, day, page)` of a page group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub phase_id: String,
    pub week: u32,
    pub day: String,
    pub page: u32,
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} week {} day {} page {}",
            self.phase_id, self.week, self.day, self.page
        )
    }
}

/// Fields of a meal about to be inserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMeal {
    pub name: String,
    pub meal_type: MealType,
    pub phase_id: String,
    pub week: u32,
    pub day: String,
    pub page: u32,
    #[serde(default)]
    pub calories: Option<u32>,
    #[serde(default)]
    pub protein_g: Option<f32>,
    #[serde(default)]
    pub fiber_g: Option<f32>,
    #[serde(default)]
    pub plan_type: Option<String>,
    #[serde(default)]
    pub other_meal_plans: Option<String>,
    #[serde(default)]
    pub recipe_text: Option<String>,
}

impl NewMeal {
    pub fn new(
        name: &str,
        meal_type: MealType,
        phase_id: &str,
        week: u32,
        day: &str,
        page: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            meal_type,
            phase_id: phase_id.to_string(),
            week,
            day: day.to_string(),
            page,
            calories: None,
            protein_g: None,
            fiber_g: None,
            plan_type: None,
            other_meal_plans: None,
            recipe_text: None,
        }
    }

    pub fn with_recipe(mut self, text: &str) -> Self {
        self.recipe_text = Some(text.to_string());
        self
    }

    fn into_meal(self, id: u64) -> Meal {
        Meal {
            id,
            name: self.name,
            meal_type: self.meal_type,
            phase_id: self.phase_id,
            week: self.week,
            day: self.day,
            page: self.page,
            calories: self.calories,
            protein_g: self.protein_g,
            fiber_g: self.fiber_g,
            plan_type: self.plan_type,
            other_meal_plans: self.other_meal_plans,
            recipe_text: self.recipe_text,
        }
    }
}

/// Predicate on the recipe text column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextPredicate {
    #[default]
    Any,
    IsNull,
    NotNull,
}

/// Equality and null filters over meals
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MealFilter {
    /// Any of these phases; empty matches all
    pub phase_ids: Vec<String>,
    pub week: Option<u32>,
    pub day: Option<String>,
    pub page: Option<u32>,
    pub recipe_text: TextPredicate,
}

impl MealFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(mut self, phase_id: &str) -> Self {
        self.phase_ids.push(phase_id.to_string());
        self
    }

    pub fn week(mut self, week: u32) -> Self {
        self.week = Some(week);
        self
    }

    pub fn day(mut self, day: &str) -> Self {
        self.day = Some(day.to_string());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn recipe_missing(mut self) -> Self {
        self.recipe_text = TextPredicate::IsNull;
        self
    }

    pub fn recipe_present(mut self) -> Self {
        self.recipe_text = TextPredicate::NotNull;
        self
    }

    pub fn matches(&self, meal: &Meal) -> bool {
        (self.phase_ids.is_empty() || self.phase_ids.contains(&meal.phase_id))
            && self.week.map_or(true, |w| w == meal.week)
            && self.day.as_ref().map_or(true, |d| *d == meal.day)
            && self.page.map_or(true, |p| p == meal.page)
            && match self.recipe_text {
                TextPredicate::Any => true,
                TextPredicate::IsNull => meal.recipe_text.is_none(),
                TextPredicate::NotNull => meal.recipe_text.is_some(),
            }
    }
}

/// Changes applied by `MealStore::update`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MealPatch {
    /// `Some(None)` clears the recipe
    pub recipe_text: Option<Option<String>>,
}

impl MealPatch {
    pub fn recipe_text(text: impl Into<String>) -> Self {
        Self {
            recipe_text: Some(Some(text.into())),
        }
    }

    fn apply(&self, meal: &mut Meal) {
        if let Some(text) = &self.recipe_text {
            meal.recipe_text = text.clone();
        }
    }
}

/// CRUD + filter access to meal records
///
/// `find` returns meals ordered by phase, week, page, day, then id.
pub trait MealStore: Send + Sync {
    fn find(&self, filter: &MealFilter) -> Result<Vec<Meal>, StoreError>;
    fn update(&self, id: u64, patch: &MealPatch) -> Result<(), StoreError>;
    fn insert(&self, meal: NewMeal) -> Result<Meal, StoreError>;
}

fn store_order(a: &Meal, b: &Meal) -> std::cmp::Ordering {
    (&a.phase_id, a.week, a.page, &a.day, a.id).cmp(&(&b.phase_id, b.week, b.page, &b.day, b.id))
}

/// Store held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    meals: RwLock<BTreeMap<u64, Meal>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with existing records; ids are kept
    pub fn from_meals(meals: Vec<Meal>) -> Self {
        let next_id = meals.iter().map(|m| m.id).max().unwrap_or(0);
        Self {
            meals: RwLock::new(meals.into_iter().map(|m| (m.id, m)).collect()),
            next_id: AtomicU64::new(next_id),
        }
    }

    /// Every record, in store order
    pub fn snapshot(&self) -> Result<Vec<Meal>, StoreError> {
        self.find(&MealFilter::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<u64, Meal>>, StoreError> {
        self.meals
            .read()
            .map_err(|_| StoreError::Backend("meal table lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<u64, Meal>>, StoreError> {
        self.meals
            .write()
            .map_err(|_| StoreError::Backend("meal table lock poisoned".to_string()))
    }
}

impl MealStore for MemoryStore {
    fn find(&self, filter: &MealFilter) -> Result<Vec<Meal>, StoreError> {
        let mut found: Vec<Meal> = self
            .read()?
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        found.sort_by(store_order);
        Ok(found)
    }

    fn update(&self, id: u64, patch: &MealPatch) -> Result<(), StoreError> {
        let mut meals = self.write()?;
        let meal = meals.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply(meal);
        Ok(())
    }

    fn insert(&self, meal: NewMeal) -> Result<Meal, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let meal = meal.into_meal(id);
        self.write()?.insert(id, meal.clone());
        Ok(meal)
    }
}

/// Store persisted as a JSON array of meals, rewritten on every change
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open a store file; a missing file starts an empty store
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let meals: Vec<Meal> = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            Vec::new()
        };
        log::debug!("opened {} with {} meals", path.display(), meals.len());
        Ok(Self {
            path,
            inner: MemoryStore::from_meals(meals),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole table through a sibling temp file
    fn save(&self, meals: &BTreeMap<u64, Meal>) -> Result<(), StoreError> {
        let mut rows: Vec<&Meal> = meals.values().collect();
        rows.sort_by(|a, b| store_order(a, b));
        let data = serde_json::to_string_pretty(&rows)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl MealStore for JsonFileStore {
    fn find(&self, filter: &MealFilter) -> Result<Vec<Meal>, StoreError> {
        self.inner.find(filter)
    }

    fn update(&self, id: u64, patch: &MealPatch) -> Result<(), StoreError> {
        let mut meals = self.inner.write()?;
        let meal = meals.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let previous = meal.clone();
        patch.apply(meal);
        if let Err(e) = self.save(&meals) {
            meals.insert(id, previous);
            return Err(e);
        }
        Ok(())
    }

    fn insert(&self, meal: NewMeal) -> Result<Meal, StoreError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let meal = meal.into_meal(id);
        let mut meals = self.inner.write()?;
        meals.insert(id, meal.clone());
        if let Err(e) = self.save(&meals) {
            meals.remove(&id);
            return Err(e);
        }
        Ok(meal)
    }
}

//! Region partitioning for multi-meal page layouts
//!
//! Some documents lay two to four meals side by side on one page, either as a
//! 2x2 grid of quadrants or as four columns. Region bounds are static per
//! document family; they are never inferred from content.
//!
//! Bounds are half-open: a region contains `x_min <= x < x_max` and
//! `y_min <= y < y_max`, so a fragment sitting exactly on a shared edge belongs
//! to the region whose lower edge it is on.

use crate::lines::{reconstruct_lines, TextLine};
use crate::source::Fragment;
use crate::store::MealType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A labelled rectangle on the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub label: String,
    pub x_min: f32,
    pub x_max: f32,
    pub y_min: f32,
    pub y_max: f32,
}

impl Region {
    pub fn new(label: &str, x: (f32, f32), y: (f32, f32)) -> Self {
        Self {
            label: label.to_string(),
            x_min: x.0,
            x_max: x.1,
            y_min: y.0,
            y_max: y.1,
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x_min && x < self.x_max && y >= self.y_min && y < self.y_max
    }

    fn overlaps(&self, other: &Region) -> bool {
        self.x_min < other.x_max
            && other.x_min < self.x_max
            && self.y_min < other.y_max
            && other.y_min < self.y_max
    }
}

/// Configuration defects in a region layout
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("region {0:?} has empty bounds")]
    EmptyBounds(String),
    #[error("regions {0:?} and {1:?} overlap")]
    Overlap(String, String),
    #[error("duplicate region label {0:?}")]
    DuplicateLabel(String),
    #[error("layout has no regions")]
    NoRegions,
}

/// The region set of one document family, in page order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionLayout {
    pub regions: Vec<Region>,
}

impl RegionLayout {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// 2x2 grid used by the bonus-week documents
    pub fn quadrants() -> Self {
        let left = (35.0, 300.0);
        let right = (300.0, 580.0);
        let top = (380.0, 800.0);
        let bottom = (30.0, 380.0);
        Self::new(vec![
            Region::new("top-left", left, top),
            Region::new("top-right", right, top),
            Region::new("bottom-left", left, bottom),
            Region::new("bottom-right", right, bottom),
        ])
    }

    /// Four meal columns A-D used by the mix-and-match documents
    pub fn four_columns() -> Self {
        let y = (0.0, 1000.0);
        Self::new(vec![
            Region::new("A", (40.0, 156.0), y),
            Region::new("B", (156.0, 281.0), y),
            Region::new("C", (281.0, 421.0), y),
            Region::new("D", (421.0, 571.0), y),
        ])
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.label == label)
    }

    /// Reject layouts that cannot partition a page consistently
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.regions.is_empty() {
            return Err(LayoutError::NoRegions);
        }
        for (i, region) in self.regions.iter().enumerate() {
            if region.x_min >= region.x_max || region.y_min >= region.y_max {
                return Err(LayoutError::EmptyBounds(region.label.clone()));
            }
            for other in &self.regions[i + 1..] {
                if other.label == region.label {
                    return Err(LayoutError::DuplicateLabel(region.label.clone()));
                }
                if region.overlaps(other) {
                    return Err(LayoutError::Overlap(
                        region.label.clone(),
                        other.label.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Index of the first region containing the point
    pub fn locate(&self, x: f32, y: f32) -> Option<usize> {
        self.regions.iter().position(|r| r.contains(x, y))
    }
}

/// Reconstructed text of one region
#[derive(Debug, Clone)]
pub struct RegionText {
    pub label: String,
    pub lines: Vec<TextLine>,
    /// Fragments that landed in this region
    pub fragment_count: usize,
}

impl RegionText {
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(TextLine::text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of splitting a page into its regions
#[derive(Debug, Clone)]
pub struct Partition {
    /// One entry per layout region, in layout order
    pub regions: Vec<RegionText>,
    /// Fragments outside every region
    pub dropped: usize,
}

impl Partition {
    pub fn get(&self, label: &str) -> Option<&RegionText> {
        self.regions.iter().find(|r| r.label == label)
    }

    /// Share of non-blank fragments that fell outside all regions
    pub fn dropped_ratio(&self) -> f32 {
        let kept: usize = self.regions.iter().map(|r| r.fragment_count).sum();
        let total = kept + self.dropped;
        if total == 0 {
            0.0
        } else {
            self.dropped as f32 / total as f32
        }
    }
}

/// Assign fragments to regions and reconstruct each region's lines
pub fn partition(fragments: &[Fragment], layout: &RegionLayout, y_tolerance: f32) -> Partition {
    let mut buckets: Vec<Vec<Fragment>> = vec![Vec::new(); layout.len()];
    let mut dropped = 0;

    for fragment in fragments.iter().filter(|f| !f.text.trim().is_empty()) {
        match layout.locate(fragment.x, fragment.y) {
            Some(idx) => buckets[idx].push(fragment.clone()),
            None => dropped += 1,
        }
    }

    let regions = layout
        .regions
        .iter()
        .zip(buckets)
        .map(|(region, items)| RegionText {
            label: region.label.clone(),
            lines: reconstruct_lines(&items, y_tolerance),
            fragment_count: items.len(),
        })
        .collect();

    Partition { regions, dropped }
}

/// How meals on a page are paired with layout regions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Assignment {
    /// The Nth meal of the page (store order) takes the Nth region
    Positional,
    /// A meal takes the region labelled for its meal type
    ByMealType { labels: BTreeMap<MealType, String> },
}

impl Assignment {
    /// Quadrant pairing of the bonus-week grid
    pub fn quadrant_meal_types() -> Self {
        let labels = [
            (MealType::Breakfast, "top-left"),
            (MealType::Snack, "top-right"),
            (MealType::Lunch, "bottom-left"),
            (MealType::Dinner, "bottom-right"),
        ]
        .into_iter()
        .map(|(t, l)| (t, l.to_string()))
        .collect();
        Assignment::ByMealType { labels }
    }

    /// Region index for the meal at `position` on the page
    pub fn region_for(
        &self,
        layout: &RegionLayout,
        position: usize,
        meal_type: MealType,
    ) -> Option<usize> {
        match self {
            Assignment::Positional => (position < layout.len()).then_some(position),
            Assignment::ByMealType { labels } => labels
                .get(&meal_type)
                .and_then(|label| layout.position(label)),
        }
    }
}

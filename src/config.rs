//! Pipeline configuration
//!
//! Document families differ in line spacing, region layout and how meals pair
//! with regions. Those differences live here as data; the pipeline code is the
//! same for every family.

use crate::grammar::Vocabulary;
use crate::regions::{Assignment, RegionLayout};
use crate::ExtractError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Extraction settings for one family of source documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentProfile {
    pub name: String,
    /// Max Y gap between fragments of one line
    pub y_tolerance: f32,
    /// `None` extracts from the whole page
    #[serde(default)]
    pub layout: Option<RegionLayout>,
    #[serde(default = "positional")]
    pub assignment: Assignment,
}

fn positional() -> Assignment {
    Assignment::Positional
}

impl DocumentProfile {
    /// One meal block per page, read top to bottom
    pub fn whole_page() -> Self {
        Self {
            name: "whole-page".to_string(),
            y_tolerance: 5.0,
            layout: None,
            assignment: Assignment::Positional,
        }
    }

    /// Bonus-week 2x2 grid, one meal type per quadrant
    pub fn quadrants() -> Self {
        Self {
            name: "quadrants".to_string(),
            y_tolerance: 6.0,
            layout: Some(RegionLayout::quadrants()),
            assignment: Assignment::quadrant_meal_types(),
        }
    }

    /// Mix-and-match pages with four meal columns
    pub fn mix_and_match() -> Self {
        Self {
            name: "mix-and-match".to_string(),
            y_tolerance: 8.0,
            layout: Some(RegionLayout::four_columns()),
            assignment: Assignment::Positional,
        }
    }
}

/// Thresholds for accepting a repaired recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Re-located span must be shorter than this share of the original
    pub shrink_ratio: f64,
    /// Minimum length of an accepted span, in characters
    pub min_length: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            shrink_ratio: 0.9,
            min_length: 50,
        }
    }
}

/// Span boundaries for the meal locator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Words of the name tried when the full name is missing
    pub prefix_words: usize,
    /// Section markers closer than this to the title are ignored
    pub min_marker_offset: usize,
    /// Regex patterns that end a recipe
    pub section_markers: Vec<String>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        let section_markers = [
            r"(?i)\bIF\s+YOU\s+WEIGH\b",
            r"(?i)TODAY'?S\s+FEATURED\s+INGREDIENT",
            r"(?i)APPROXIMATE\s+DAILY\s+TOTALS",
            r"PLAN\s+AHEAD:",
            r"(?i)TRACK\s+YOUR\s+THOUGHTS",
            r"\bD\s?A\s?Y\s+\d+\b",
            r"\bW\s?E\s?E\s?K\s+\d+\b",
            r"\[PAGE\s+\d+\]",
            r"(?m)^\s*(?:B\s?R\s?E\s?A\s?K\s?F\s?A\s?S\s?T|L\s?U\s?N\s?C\s?H|D\s?I\s?N\s?N\s?E\s?R|S\s?N\s?A\s?C\s?K|D\s?E\s?S\s?S\s?E\s?R\s?T)\s*$",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        Self {
            prefix_words: 3,
            min_marker_offset: 50,
            section_markers,
        }
    }
}

/// Everything the extraction and repair passes need
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Profiles by name
    pub profiles: BTreeMap<String, DocumentProfile>,
    /// Phase id to profile name
    pub phases: BTreeMap<String, String>,
    /// Profile for phases missing from `phases`
    pub default_profile: String,
    pub repair: RepairConfig,
    pub locator: LocatorConfig,
    pub vocabulary: Vocabulary,
    /// Warn when more than this share of a page falls outside all regions
    pub max_dropped_ratio: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let profiles = [
            DocumentProfile::whole_page(),
            DocumentProfile::quadrants(),
            DocumentProfile::mix_and_match(),
        ]
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect();

        let phases = [
            ("phase-1", "whole-page"),
            ("phase-2", "whole-page"),
            ("phase-3", "whole-page"),
            ("m7", "whole-page"),
            ("m8", "mix-and-match"),
            ("m9", "mix-and-match"),
            ("m10", "mix-and-match"),
            ("bonus", "quadrants"),
        ]
        .into_iter()
        .map(|(phase, profile)| (phase.to_string(), profile.to_string()))
        .collect();

        Self {
            profiles,
            phases,
            default_profile: "whole-page".to_string(),
            repair: RepairConfig::default(),
            locator: LocatorConfig::default(),
            vocabulary: Vocabulary::default(),
            max_dropped_ratio: 0.5,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config; missing fields keep their defaults
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ExtractError> {
        let data = std::fs::read_to_string(path)?;
        let config: PipelineConfig =
            serde_json::from_str(&data).map_err(|e| ExtractError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every profile reference and region layout
    pub fn validate(&self) -> Result<(), ExtractError> {
        for (phase, profile) in &self.phases {
            if !self.profiles.contains_key(profile) {
                return Err(ExtractError::Config(format!(
                    "phase {} uses unknown profile {:?}",
                    phase, profile
                )));
            }
        }
        if !self.profiles.contains_key(&self.default_profile) {
            return Err(ExtractError::Config(format!(
                "unknown default profile {:?}",
                self.default_profile
            )));
        }
        for profile in self.profiles.values() {
            if profile.y_tolerance.is_nan() || profile.y_tolerance <= 0.0 {
                return Err(ExtractError::Config(format!(
                    "profile {:?} needs a positive y_tolerance",
                    profile.name
                )));
            }
            if let Some(layout) = &profile.layout {
                layout.validate()?;
            }
        }
        Ok(())
    }

    /// Profile for a phase, falling back to the default profile
    pub fn profile_for(&self, phase_id: &str) -> Result<&DocumentProfile, ExtractError> {
        let name = self
            .phases
            .get(phase_id)
            .unwrap_or(&self.default_profile);
        self.profiles
            .get(name)
            .ok_or_else(|| ExtractError::Config(format!("unknown profile {:?}", name)))
    }
}

//! Meal locator
//!
//! Finds the span of a block that belongs to one meal. Matching runs on a
//! normalized copy of the block (lowercase, punctuation folded to spaces,
//! whitespace collapsed) while every returned offset points into the original
//! text, so slicing keeps the source formatting.

use crate::config::LocatorConfig;
use once_cell::sync::Lazy;
use regex::Regex;

/// Nutrition facts with or without their label
static NUTRITION_FACTS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:nu\s?tritional\s+info(?:rmation)?(?:\s+per\s+serving)?\s*:?\s*)?\d+\s*cal(?:ories)?\s*[/|,]\s*\d+\s*g\s*protein",
    )
    .unwrap()
});

/// How the meal name was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Full normalized name
    Exact,
    /// Leading words of the name
    Prefix,
    /// Enough significant name words on one line
    TokenOverlap,
    /// No title; span starts at the beginning of the block
    Anchored,
}

/// Byte range of a meal inside a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    pub start: usize,
    pub end: usize,
    /// End of the matched title
    pub title_end: usize,
    pub kind: MatchKind,
}

impl Located {
    pub fn span<'a>(&self, block: &'a str) -> &'a str {
        &block[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Lowercase, fold punctuation to spaces, collapse whitespace
pub fn normalize(text: &str) -> String {
    Normalized::new(text).text
}

/// Normalized text plus the original byte offset behind each normalized byte
struct Normalized {
    text: String,
    offsets: Vec<usize>,
}

impl Normalized {
    fn new(original: &str) -> Self {
        let mut text = String::with_capacity(original.len());
        let mut offsets = Vec::with_capacity(original.len() + 1);
        let mut gap = false;

        for (i, ch) in original.char_indices() {
            if !ch.is_alphanumeric() {
                gap = true;
                continue;
            }
            if gap && !text.is_empty() {
                text.push(' ');
                offsets.push(i);
            }
            gap = false;
            for lower in ch.to_lowercase() {
                let before = text.len();
                text.push(lower);
                offsets.extend(std::iter::repeat(i).take(text.len() - before));
            }
        }
        offsets.push(original.len());
        Self { text, offsets }
    }

    /// Original offset of a normalized start position
    fn start_in(&self, pos: usize) -> usize {
        self.offsets[pos]
    }

    /// Original offset just past the character behind normalized `end - 1`
    fn end_in(&self, original: &str, end: usize) -> usize {
        if end == 0 {
            return 0;
        }
        let last = self.offsets[end - 1];
        last + original[last..].chars().next().map_or(0, char::len_utf8)
    }

    /// First whole-word occurrence of `needle` at or after `from`
    fn find_word(&self, needle: &str, from: usize) -> Option<usize> {
        if needle.is_empty() || from > self.text.len() {
            return None;
        }
        let bytes = self.text.as_bytes();
        self.text[from..]
            .match_indices(needle)
            .map(|(i, _)| from + i)
            .find(|&pos| {
                let end = pos + needle.len();
                (pos == 0 || bytes[pos - 1] == b' ') && (end == bytes.len() || bytes[end] == b' ')
            })
    }
}

/// Finds meal spans using configured boundaries
pub struct Locator {
    config: LocatorConfig,
    markers: Vec<Regex>,
}

impl Locator {
    pub fn new(config: LocatorConfig) -> Result<Self, regex::Error> {
        let markers = config
            .section_markers
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { config, markers })
    }

    /// Span of `name` inside `block`, ending at the first boundary
    ///
    /// `others` are the names of meals sharing the page; any of them found
    /// after the title closes the span.
    pub fn locate(&self, block: &str, name: &str, others: &[&str]) -> Option<Located> {
        let norm = Normalized::new(block);
        let target = normalize(name);
        if target.is_empty() {
            return None;
        }

        let (start, title_end, kind) = self
            .match_exact(block, &norm, &target)
            .or_else(|| self.match_prefix(block, &norm, &target))
            .or_else(|| self.match_tokens(block, &target))?;

        let end = self.span_end(block, &norm, start, title_end, &target, others);
        log::debug!(
            "located {:?} by {:?} at {}..{} of {}",
            name,
            kind,
            start,
            end,
            block.len()
        );
        Some(Located {
            start,
            end,
            title_end,
            kind,
        })
    }

    /// Span opening at the start of a block that carries no title
    pub fn locate_anchored(&self, block: &str, others: &[&str]) -> Located {
        let norm = Normalized::new(block);
        let end = self.span_end(block, &norm, 0, 0, "", others);
        Located {
            start: 0,
            end,
            title_end: 0,
            kind: MatchKind::Anchored,
        }
    }

    fn match_exact(
        &self,
        block: &str,
        norm: &Normalized,
        target: &str,
    ) -> Option<(usize, usize, MatchKind)> {
        let pos = norm.find_word(target, 0)?;
        Some((
            norm.start_in(pos),
            norm.end_in(block, pos + target.len()),
            MatchKind::Exact,
        ))
    }

    fn match_prefix(
        &self,
        block: &str,
        norm: &Normalized,
        target: &str,
    ) -> Option<(usize, usize, MatchKind)> {
        let words: Vec<&str> = target.split(' ').collect();
        if words.len() <= self.config.prefix_words {
            return None;
        }
        let prefix = words[..self.config.prefix_words].join(" ");
        let pos = norm.find_word(&prefix, 0)?;
        Some((
            norm.start_in(pos),
            norm.end_in(block, pos + prefix.len()),
            MatchKind::Prefix,
        ))
    }

    /// Line holding the most significant name words, earliest on ties
    fn match_tokens(&self, block: &str, target: &str) -> Option<(usize, usize, MatchKind)> {
        let significant: Vec<&str> = target.split(' ').filter(|w| w.len() > 2).collect();
        if significant.is_empty() {
            return None;
        }
        let needed = significant.len().min(2);

        let mut best: Option<(usize, usize, usize)> = None;
        let mut line_start = 0;
        for line in block.split('\n') {
            let line_end = line_start + line.len();
            let normalized = normalize(line);
            let words: Vec<&str> = normalized.split(' ').collect();
            let hits = significant.iter().filter(|w| words.contains(w)).count();
            if hits >= needed && best.map_or(true, |(_, _, h)| hits > h) {
                let indent = line.len() - line.trim_start().len();
                best = Some((line_start + indent, line_end, hits));
            }
            line_start = line_end + 1;
        }
        best.map(|(s, e, _)| (s, e, MatchKind::TokenOverlap))
    }

    /// Earliest boundary after the title, or the end of the block
    fn span_end(
        &self,
        block: &str,
        norm: &Normalized,
        start: usize,
        title_end: usize,
        target: &str,
        others: &[&str],
    ) -> usize {
        let mut end = block.len();
        let search_from = norm.offsets.partition_point(|&o| o < title_end);

        for other in others {
            let other = normalize(other);
            if other.is_empty() || other == target {
                continue;
            }
            if let Some(pos) = norm.find_word(&other, search_from) {
                end = end.min(norm.start_in(pos));
            }
        }

        if let Some(second) = NUTRITION_FACTS_RE.find_iter(&block[start..]).nth(1) {
            end = end.min(start + second.start());
        }

        let marker_from = char_boundary_at(block, start + self.config.min_marker_offset);
        for marker in &self.markers {
            if let Some(m) = marker.find(&block[marker_from..]) {
                end = end.min(marker_from + m.start());
            }
        }

        end.max(title_end)
    }
}

impl Default for Locator {
    fn default() -> Self {
        let config = LocatorConfig::default();
        let markers = config
            .section_markers
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self { config, markers }
    }
}

fn char_boundary_at(text: &str, pos: usize) -> usize {
    let mut pos = pos.min(text.len());
    while !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

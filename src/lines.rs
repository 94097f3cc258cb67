//! Line reconstruction
//!
//! Clusters positioned fragments into top-to-bottom text lines. Fragments are
//! ordered by descending Y (PDF space grows upwards) and a new line starts
//! whenever the vertical gap to the previous fragment exceeds the tolerance.
//! The tolerance is calibrated per document family; see `DocumentProfile`.

use crate::source::Fragment;
use std::cmp::Ordering;

/// A line of text (grouped fragments)
#[derive(Debug, Clone)]
pub struct TextLine {
    /// Fragments on this line, left to right
    pub items: Vec<Fragment>,
    /// Y of the topmost fragment in the cluster
    pub y: f32,
}

impl TextLine {
    pub fn text(&self) -> String {
        self.items
            .iter()
            .map(|i| i.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Group fragments into reading-order lines
pub fn reconstruct_lines(fragments: &[Fragment], y_tolerance: f32) -> Vec<TextLine> {
    let mut sorted: Vec<&Fragment> = fragments
        .iter()
        .filter(|f| !f.text.trim().is_empty())
        .collect();
    sorted.sort_by(|a, b| {
        b.y.partial_cmp(&a.y)
            .unwrap_or(Ordering::Equal)
            .then(a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal))
    });

    let mut lines: Vec<TextLine> = Vec::new();
    let mut prev_y: Option<f32> = None;

    for fragment in sorted {
        let continues = prev_y.is_some_and(|py| (py - fragment.y).abs() <= y_tolerance);
        match lines.last_mut() {
            Some(line) if continues => line.items.push(fragment.clone()),
            _ => lines.push(TextLine {
                items: vec![fragment.clone()],
                y: fragment.y,
            }),
        }
        prev_y = Some(fragment.y);
    }

    // A line may span a small Y drift; reading order within it is by X
    for line in &mut lines {
        line.items
            .sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));
    }

    lines
}

/// Reconstruct lines and join them with newlines
pub fn lines_to_text(fragments: &[Fragment], y_tolerance: f32) -> String {
    reconstruct_lines(fragments, y_tolerance)
        .iter()
        .map(TextLine::text)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruct_lines() {
        let fragments = vec![
            Fragment::new("Next line", 100.0, 680.0),
            Fragment::new("World", 160.0, 700.0),
            Fragment::new("Hello", 100.0, 700.0),
        ];

        let lines = reconstruct_lines(&fragments, 5.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text(), "Hello World");
        assert_eq!(lines[1].text(), "Next line");
        assert_eq!(lines[0].y, 700.0);
    }

    #[test]
    fn test_near_equal_y_orders_by_x() {
        let fragments = vec![
            Fragment::new("second", 50.0, 501.0),
            Fragment::new("first", 10.0, 500.0),
        ];
        let lines = reconstruct_lines(&fragments, 5.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text(), "first second");
        assert_eq!(lines[0].y, 501.0);
    }

    #[test]
    fn test_whitespace_fragments_dropped() {
        let fragments = vec![
            Fragment::new("   ", 10.0, 400.0),
            Fragment::new("Only", 10.0, 300.0),
        ];
        let lines = reconstruct_lines(&fragments, 6.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text(), "Only");
    }

    #[test]
    fn test_tolerance_controls_merging() {
        let fragments = vec![
            Fragment::new("a", 10.0, 500.0),
            Fragment::new("b", 10.0, 493.0),
        ];
        assert_eq!(reconstruct_lines(&fragments, 5.0).len(), 2);
        assert_eq!(reconstruct_lines(&fragments, 8.0).len(), 1);
    }

    #[test]
    fn test_lines_to_text() {
        let fragments = vec![
            Fragment::new("1 cup oats", 40.0, 600.0),
            Fragment::new("HEAT milk.", 40.0, 580.0),
        ];
        assert_eq!(lines_to_text(&fragments, 6.0), "1 cup oats\nHEAT milk.");
        assert_eq!(lines_to_text(&[], 6.0), "");
    }
}

//! Hotspot filters over the visible window text.
//!
//! Filters scan each visible line for interesting spans (URLs for now)
//! and report them as hotspots in window coordinates. Recompute the chain
//! after output changes or scrolling; what to do on activation is the
//! embedder's business.

use regex::Regex;

use crate::core::term::screen::Screen;
use crate::window::ScreenWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotKind {
    Url,
}

/// A matched span on one visible row. `end_column` is one past the last
/// cell, like search matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    pub kind: HotspotKind,
    pub row: u16,
    pub start_column: u16,
    pub end_column: u16,
    /// The matched text, e.g. the URL to open
    pub text: String,
}

impl Hotspot {
    pub fn contains(&self, col: u16, row: u16) -> bool {
        row == self.row && col >= self.start_column && col < self.end_column
    }
}

/// Scans one line of visible text for hotspots.
///
/// `columns` maps character index to starting column, with a final
/// one-past-end entry (see `Line::char_columns`).
pub trait Filter: Send {
    fn scan(&self, row: u16, text: &str, columns: &[u16]) -> Vec<Hotspot>;
}

/// Built-in URL matcher.
pub struct UrlFilter {
    regex: Regex,
}

impl UrlFilter {
    pub fn new() -> Self {
        // scheme form plus bare www.; trailing punctuation is excluded
        let regex = Regex::new(r#"(?:(?:https?|ftp)://|www\.)[^\s<>"]+[^\s<>".,;:!?')\]]"#)
            .expect("builtin url pattern is valid");
        Self { regex }
    }
}

impl Default for UrlFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for UrlFilter {
    fn scan(&self, row: u16, text: &str, columns: &[u16]) -> Vec<Hotspot> {
        let byte_to_char: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        let char_index_of = |byte: usize| -> usize {
            byte_to_char
                .iter()
                .position(|&b| b >= byte)
                .unwrap_or(byte_to_char.len())
        };

        self.regex
            .find_iter(text)
            .map(|m| {
                let start_char = char_index_of(m.start());
                let end_char = char_index_of(m.end());
                Hotspot {
                    kind: HotspotKind::Url,
                    row,
                    start_column: columns.get(start_char).copied().unwrap_or(0),
                    end_column: columns.get(end_char).copied().unwrap_or(0),
                    text: m.as_str().to_string(),
                }
            })
            .collect()
    }
}

/// Ordered set of filters plus the hotspots from the last update.
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
    hotspots: Vec<Hotspot>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            hotspots: Vec::new(),
        }
    }

    /// Chain with the builtin URL filter.
    pub fn with_url_filter() -> Self {
        let mut chain = Self::new();
        chain.add_filter(Box::new(UrlFilter::new()));
        chain
    }

    pub fn add_filter(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    /// Rescan the window's visible lines.
    pub fn update(&mut self, window: &ScreenWindow, screen: &Screen) {
        self.hotspots.clear();
        for (row, line) in window.visible_lines(screen).enumerate() {
            let text = line.text();
            if text.is_empty() {
                continue;
            }
            let columns = line.char_columns();
            for filter in &self.filters {
                self.hotspots.extend(filter.scan(row as u16, &text, &columns));
            }
        }
    }

    /// Hotspot under a window position, if any.
    pub fn hotspot_at(&self, col: u16, row: u16) -> Option<&Hotspot> {
        self.hotspots.iter().find(|h| h.contains(col, row))
    }

    pub fn hotspots(&self) -> &[Hotspot] {
        &self.hotspots
    }

    pub fn clear(&mut self) {
        self.hotspots.clear();
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryType;

    fn view_of(lines: &[&str]) -> (ScreenWindow, Screen) {
        let mut screen = Screen::new(60, 6, HistoryType::Bounded(100));
        for text in lines {
            for ch in text.chars() {
                screen.put_char(ch);
            }
            screen.carriage_return();
            screen.linefeed();
        }
        let mut window = ScreenWindow::new();
        window.notify_output_changed(&screen);
        (window, screen)
    }

    #[test]
    fn url_hotspot_has_window_coordinates() {
        let (window, screen) = view_of(&["see https://example.com/docs for more"]);
        let mut chain = FilterChain::with_url_filter();
        chain.update(&window, &screen);

        assert_eq!(chain.hotspots().len(), 1);
        let hotspot = &chain.hotspots()[0];
        assert_eq!(hotspot.kind, HotspotKind::Url);
        assert_eq!(hotspot.row, 0);
        assert_eq!(hotspot.start_column, 4);
        assert_eq!(hotspot.end_column, 4 + "https://example.com/docs".len() as u16);
        assert_eq!(hotspot.text, "https://example.com/docs");
    }

    #[test]
    fn hotspot_lookup_by_position() {
        let (window, screen) = view_of(&["go to www.rust-lang.org now"]);
        let mut chain = FilterChain::with_url_filter();
        chain.update(&window, &screen);

        assert!(chain.hotspot_at(6, 0).is_some());
        assert!(chain.hotspot_at(5, 0).is_none());
        assert!(chain.hotspot_at(6, 1).is_none());
    }

    #[test]
    fn trailing_punctuation_is_not_part_of_the_url() {
        let (window, screen) = view_of(&["read http://example.com/a."]);
        let mut chain = FilterChain::with_url_filter();
        chain.update(&window, &screen);

        assert_eq!(chain.hotspots()[0].text, "http://example.com/a");
    }

    #[test]
    fn plain_text_yields_no_hotspots() {
        let (window, screen) = view_of(&["nothing to click here"]);
        let mut chain = FilterChain::with_url_filter();
        chain.update(&window, &screen);
        assert!(chain.hotspots().is_empty());
    }

    #[test]
    fn update_replaces_previous_hotspots() {
        let (window, screen) = view_of(&["old https://old.example"]);
        let mut chain = FilterChain::with_url_filter();
        chain.update(&window, &screen);
        assert_eq!(chain.hotspots().len(), 1);

        let (window, screen) = view_of(&["no links anymore"]);
        chain.update(&window, &screen);
        assert!(chain.hotspots().is_empty());
    }
}

//! Scrollback search
//!
//! Searches run on a background thread over a [`Snapshot`] copied from
//! the history and the live screen, so output can keep flowing while a
//! long search runs. Each task produces exactly one [`SearchOutcome`];
//! dropping the task cancels it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use regex::Regex;
use thiserror::Error;

use crate::core::term::screen::Screen;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone)]
pub enum SearchPattern {
    /// Literal text, no metacharacters
    FixedString(String),
    /// Regular expression
    Regex(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

/// What to find and where to start looking.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    pub pattern: SearchPattern,
    pub case_sensitive: bool,
    pub direction: SearchDirection,
    /// Absolute line the search starts on
    pub start_line: usize,
    /// Column on the start line; forward searches include it, backward
    /// searches look strictly before it
    pub start_column: u16,
}

/// A found occurrence, in absolute coordinates.
/// `end_column` is one past the last cell of the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    pub start_column: u16,
    pub start_line: usize,
    pub end_column: u16,
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Match(SearchMatch),
    NoMatch,
}

/// Immutable copy of the searchable line space: per-line text plus the
/// column each character starts at (wide characters span two columns).
pub struct Snapshot {
    lines: Vec<SnapshotLine>,
}

struct SnapshotLine {
    text: String,
    columns: Vec<u16>,
}

impl Snapshot {
    /// Copy every retained history line and the live screen rows.
    pub fn capture(screen: &Screen) -> Self {
        let total = screen.total_line_count();
        let mut lines = Vec::with_capacity(total);
        for abs in 0..total {
            let line = match screen.line_at_absolute(abs) {
                Some(line) => line,
                None => continue,
            };
            lines.push(SnapshotLine {
                text: line.text(),
                columns: line.char_columns(),
            });
        }
        Self { lines }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

fn build_regex(spec: &SearchSpec) -> Result<Regex, SearchError> {
    let body = match &spec.pattern {
        SearchPattern::FixedString(s) => regex::escape(s),
        SearchPattern::Regex(s) => s.clone(),
    };
    let pattern = if spec.case_sensitive {
        body
    } else {
        format!("(?i){body}")
    };
    Ok(Regex::new(&pattern)?)
}

/// Find all matches on one snapshot line, as absolute-coordinate results.
fn line_matches(line: &SnapshotLine, abs: usize, regex: &Regex) -> Vec<SearchMatch> {
    // map byte offsets to character indices once per line
    let byte_to_char: Vec<(usize, usize)> = line
        .text
        .char_indices()
        .enumerate()
        .map(|(char_idx, (byte_idx, _))| (byte_idx, char_idx))
        .collect();
    let char_index_of = |byte: usize| -> usize {
        if byte >= line.text.len() {
            return byte_to_char.len();
        }
        byte_to_char
            .iter()
            .find(|&&(b, _)| b >= byte)
            .map(|&(_, c)| c)
            .unwrap_or(byte_to_char.len())
    };

    regex
        .find_iter(&line.text)
        .filter(|m| !m.as_str().is_empty())
        .map(|m| {
            let start_char = char_index_of(m.start());
            let end_char = char_index_of(m.end());
            SearchMatch {
                start_column: line.columns.get(start_char).copied().unwrap_or(0),
                start_line: abs,
                end_column: line.columns.get(end_char).copied().unwrap_or(0),
                end_line: abs,
            }
        })
        .collect()
}

fn run_search(spec: &SearchSpec, snapshot: &Snapshot, cancel: &AtomicBool) -> Option<SearchOutcome> {
    let regex = match build_regex(spec) {
        Ok(r) => r,
        Err(_) => return Some(SearchOutcome::NoMatch),
    };
    let total = snapshot.lines.len();
    if total == 0 {
        return Some(SearchOutcome::NoMatch);
    }
    let start_line = spec.start_line.min(total - 1);

    match spec.direction {
        SearchDirection::Forward => {
            for abs in start_line..total {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let matches = line_matches(&snapshot.lines[abs], abs, &regex);
                let hit = matches.into_iter().find(|m| {
                    abs != start_line || m.start_column >= spec.start_column
                });
                if let Some(m) = hit {
                    return Some(SearchOutcome::Match(m));
                }
            }
        }
        SearchDirection::Backward => {
            for abs in (0..=start_line).rev() {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let matches = line_matches(&snapshot.lines[abs], abs, &regex);
                let hit = matches
                    .into_iter()
                    .filter(|m| abs != start_line || m.start_column < spec.start_column)
                    .last();
                if let Some(m) = hit {
                    return Some(SearchOutcome::Match(m));
                }
            }
        }
    }

    Some(SearchOutcome::NoMatch)
}

/// A search running in the background.
pub struct HistorySearch {
    handle: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    rx: Receiver<SearchOutcome>,
}

impl HistorySearch {
    /// Validate the pattern and start searching the snapshot. Starting a
    /// new search while another runs is fine; drop or cancel the old one.
    pub fn spawn(spec: SearchSpec, snapshot: Snapshot) -> Result<Self, SearchError> {
        // reject bad patterns synchronously
        build_regex(&spec)?;

        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let cancel_worker = cancel.clone();
        let handle = thread::spawn(move || {
            if let Some(outcome) = run_search(&spec, &snapshot, &cancel_worker) {
                let _ = tx.send(outcome);
            }
        });

        Ok(Self {
            handle: Some(handle),
            cancel,
            rx,
        })
    }

    /// Non-blocking poll; `None` until the search completes. A canceled
    /// search never yields an outcome.
    pub fn try_outcome(&mut self) -> Option<SearchOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until the search finishes. `None` if it was canceled.
    pub fn wait(mut self) -> Option<SearchOutcome> {
        let outcome = self.rx.recv().ok();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        outcome
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

impl Drop for HistorySearch {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryType;

    fn snapshot_from(lines: &[&str]) -> Snapshot {
        let mut screen = Screen::new(40, 4, HistoryType::Bounded(100));
        for text in lines {
            for ch in text.chars() {
                screen.put_char(ch);
            }
            screen.carriage_return();
            screen.linefeed();
        }
        Snapshot::capture(&screen)
    }

    fn spec(pattern: SearchPattern, direction: SearchDirection, line: usize, col: u16) -> SearchSpec {
        SearchSpec {
            pattern,
            case_sensitive: true,
            direction,
            start_line: line,
            start_column: col,
        }
    }

    #[test]
    fn forward_fixed_string_reports_half_open_columns() {
        let mut lines = vec!["nothing here"; 5];
        lines[5 - 1] = "          error: it broke";
        let snapshot = snapshot_from(&lines);
        // line 4 in the snapshot has "error" starting at column 10
        let spec = spec(
            SearchPattern::FixedString("error".into()),
            SearchDirection::Forward,
            0,
            0,
        );
        let outcome = HistorySearch::spawn(spec, snapshot).unwrap().wait();
        assert_eq!(
            outcome,
            Some(SearchOutcome::Match(SearchMatch {
                start_column: 10,
                start_line: 4,
                end_column: 15,
                end_line: 4,
            }))
        );
    }

    #[test]
    fn forward_from_match_start_is_idempotent() {
        let snapshot = snapshot_from(&["aaa", "hit me", "bbb"]);
        let s = spec(
            SearchPattern::FixedString("hit".into()),
            SearchDirection::Forward,
            1,
            0,
        );
        let first = HistorySearch::spawn(s.clone(), snapshot).unwrap().wait();
        let snapshot = snapshot_from(&["aaa", "hit me", "bbb"]);
        let again = HistorySearch::spawn(s, snapshot).unwrap().wait();
        assert_eq!(first, again);
    }

    #[test]
    fn forward_skips_matches_before_start_column() {
        let snapshot = snapshot_from(&["foo foo"]);
        let s = spec(
            SearchPattern::FixedString("foo".into()),
            SearchDirection::Forward,
            0,
            1,
        );
        let outcome = HistorySearch::spawn(s, snapshot).unwrap().wait();
        match outcome {
            Some(SearchOutcome::Match(m)) => assert_eq!(m.start_column, 4),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn backward_finds_last_match_before_start() {
        let snapshot = snapshot_from(&["foo foo foo"]);
        let s = spec(
            SearchPattern::FixedString("foo".into()),
            SearchDirection::Backward,
            0,
            8,
        );
        let outcome = HistorySearch::spawn(s, snapshot).unwrap().wait();
        match outcome {
            Some(SearchOutcome::Match(m)) => assert_eq!(m.start_column, 4),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn no_match_is_reported() {
        let snapshot = snapshot_from(&["nothing", "to", "see"]);
        let s = spec(
            SearchPattern::FixedString("missing".into()),
            SearchDirection::Forward,
            0,
            0,
        );
        let outcome = HistorySearch::spawn(s, snapshot).unwrap().wait();
        assert_eq!(outcome, Some(SearchOutcome::NoMatch));
    }

    #[test]
    fn case_insensitive_search() {
        let snapshot = snapshot_from(&["WARNING: stuff"]);
        let mut s = spec(
            SearchPattern::FixedString("warning".into()),
            SearchDirection::Forward,
            0,
            0,
        );
        s.case_sensitive = false;
        let outcome = HistorySearch::spawn(s, snapshot).unwrap().wait();
        match outcome {
            Some(SearchOutcome::Match(m)) => {
                assert_eq!(m.start_column, 0);
                assert_eq!(m.end_column, 7);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn regex_pattern_matches() {
        let snapshot = snapshot_from(&["pid 4231 exited"]);
        let s = spec(
            SearchPattern::Regex(r"pid \d+".into()),
            SearchDirection::Forward,
            0,
            0,
        );
        let outcome = HistorySearch::spawn(s, snapshot).unwrap().wait();
        match outcome {
            Some(SearchOutcome::Match(m)) => {
                assert_eq!(m.start_column, 0);
                assert_eq!(m.end_column, 8);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn invalid_regex_is_rejected_synchronously() {
        let snapshot = snapshot_from(&["text"]);
        let s = spec(SearchPattern::Regex("(unclosed".into()), SearchDirection::Forward, 0, 0);
        assert!(HistorySearch::spawn(s, snapshot).is_err());
    }

    #[test]
    fn wide_characters_shift_match_columns() {
        let snapshot = snapshot_from(&["日本 target"]);
        let s = spec(
            SearchPattern::FixedString("target".into()),
            SearchDirection::Forward,
            0,
            0,
        );
        let outcome = HistorySearch::spawn(s, snapshot).unwrap().wait();
        match outcome {
            // two wide chars occupy columns 0-3, space at 4
            Some(SearchOutcome::Match(m)) => {
                assert_eq!(m.start_column, 5);
                assert_eq!(m.end_column, 11);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn canceled_search_yields_no_outcome() {
        let lines: Vec<String> = (0..500).map(|i| format!("line {i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let mut screen = Screen::new(40, 4, HistoryType::Bounded(1000));
        for text in &refs {
            for ch in text.chars() {
                screen.put_char(ch);
            }
            screen.carriage_return();
            screen.linefeed();
        }
        let snapshot = Snapshot::capture(&screen);

        let s = spec(
            SearchPattern::FixedString("absent".into()),
            SearchDirection::Forward,
            0,
            0,
        );
        let search = HistorySearch::spawn(s, snapshot).unwrap();
        search.cancel();
        // the worker may or may not have finished before the cancel landed;
        // either way no panic and at most one outcome
        let _ = search.wait();
    }
}

//! Scroll-position-aware view over history plus the live screen.
//!
//! A [`ScreenWindow`] owns nothing; it holds a scroll position into the
//! combined line space (absolute row 0 is the oldest retained history
//! line) and composes the visible rows on demand. Several windows can
//! observe the same screen independently.

use crate::core::term::screen::{Line, Screen};

/// A movable viewport over the scrollback and the live screen.
pub struct ScreenWindow {
    /// Absolute line shown at the top of the window
    current_line: usize,
    /// Follow new output by snapping to the bottom
    track_output: bool,
}

impl Default for ScreenWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenWindow {
    pub fn new() -> Self {
        Self {
            current_line: 0,
            track_output: true,
        }
    }

    /// Absolute line of the top row of the window.
    pub fn current_line(&self) -> usize {
        self.current_line
    }

    pub fn track_output(&self) -> bool {
        self.track_output
    }

    pub fn set_track_output(&mut self, track: bool) {
        self.track_output = track;
    }

    /// Topmost position that still shows a full window of lines.
    fn max_top(screen: &Screen) -> usize {
        screen
            .total_line_count()
            .saturating_sub(screen.rows() as usize)
    }

    /// Move the window so `line` is its top row, clamped to valid range.
    /// Scrolling stops following output, even when the target clamps to
    /// the bottom; call [`set_track_output`](Self::set_track_output) to
    /// resume following.
    pub fn scroll_to(&mut self, screen: &Screen, line: usize) {
        let max_top = Self::max_top(screen);
        self.current_line = line.min(max_top);
        self.track_output = false;
    }

    /// Scroll relative to the current position.
    pub fn scroll_by(&mut self, screen: &Screen, delta: isize) {
        let target = if delta < 0 {
            self.current_line.saturating_sub(delta.unsigned_abs())
        } else {
            self.current_line.saturating_add(delta as usize)
        };
        self.scroll_to(screen, target);
    }

    pub fn scroll_pages(&mut self, screen: &Screen, pages: isize) {
        self.scroll_by(screen, pages * screen.rows() as isize);
    }

    /// Re-pin the window after output changed the line space. Call after
    /// every batch of interpreted output.
    pub fn notify_output_changed(&mut self, screen: &Screen) {
        let max_top = Self::max_top(screen);
        if self.track_output {
            self.current_line = max_top;
        } else if self.current_line > max_top {
            self.current_line = max_top;
        }
    }

    /// Absolute line shown at window row `row`.
    pub fn absolute_line(&self, row: u16) -> usize {
        self.current_line + row as usize
    }

    /// Window row showing absolute line `abs`, if visible.
    pub fn window_row(&self, screen: &Screen, abs: usize) -> Option<u16> {
        if abs < self.current_line {
            return None;
        }
        let row = abs - self.current_line;
        if row < screen.rows() as usize {
            Some(row as u16)
        } else {
            None
        }
    }

    /// The lines currently in view, top to bottom. The iterator is
    /// restartable: call again for a fresh pass.
    pub fn visible_lines<'a>(&self, screen: &'a Screen) -> VisibleLines<'a> {
        VisibleLines {
            screen,
            next: self.current_line,
            remaining: screen.rows(),
        }
    }

    /// Cursor position in window coordinates, or `None` when the cursor
    /// is scrolled out of view or hidden.
    pub fn cursor_position(&self, screen: &Screen) -> Option<(u16, u16)> {
        if !screen.cursor().visible {
            return None;
        }
        let cursor = screen.cursor();
        let abs = screen.screen_row_to_absolute(cursor.row);
        self.window_row(screen, abs).map(|row| (cursor.col, row))
    }

    /// Start a selection at a window-relative position.
    pub fn start_selection(
        &self,
        screen: &mut Screen,
        col: u16,
        row: u16,
        whole_line: bool,
    ) {
        screen.set_selection_start(col, self.absolute_line(row), whole_line);
    }

    /// Extend the selection to a window-relative position.
    pub fn extend_selection(&self, screen: &mut Screen, col: u16, row: u16) {
        screen.set_selection_end(col, self.absolute_line(row));
    }
}

/// Iterator over the lines in view. Rows past the end of the line space
/// yield blank lines.
pub struct VisibleLines<'a> {
    screen: &'a Screen,
    next: usize,
    remaining: u16,
}

impl Iterator for VisibleLines<'_> {
    type Item = Line;

    fn next(&mut self) -> Option<Line> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let line = self
            .screen
            .line_at_absolute(self.next)
            .unwrap_or_else(|| Line::new(self.screen.cols()));
        self.next += 1;
        Some(line)
    }
}

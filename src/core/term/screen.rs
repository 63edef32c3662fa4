//! Screen grid, cell attributes, and selection
//!
//! The screen is a fixed-size grid of lines with a cursor and the current
//! character attributes. When the primary screen scrolls, the retired top
//! line is handed to the history store owned by this screen.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

use crate::history::{HistoryStore, HistoryType};

/// Events raised by screen mutations, drained by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TermEvent {
    /// BEL received - the terminal requested attention
    Bell,
    /// OSC title change
    TitleChanged(String),
}

/// A single cell
#[derive(Clone, Serialize, Deserialize)]
pub struct Cell {
    pub grapheme: String,
    pub width: u8,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    pub fn clear(&mut self, attrs: &CellAttrs) {
        self.grapheme.clear();
        self.width = 1;
        self.attrs = attrs.clone();
    }

    /// Placeholder occupying the right half of a wide character.
    pub fn continuation(attrs: &CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
            attrs: attrs.clone(),
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    /// First character of the cell, or space if empty.
    pub fn c(&self) -> char {
        self.grapheme.chars().next().unwrap_or(' ')
    }

    /// Display string (space if empty).
    pub fn display_char(&self) -> &str {
        if self.grapheme.is_empty() {
            " "
        } else {
            &self.grapheme
        }
    }
}

/// An ordered run of cells plus the wrapped-continuation flag.
///
/// `wrapped` marks a line that is the visual overflow of the previous line
/// rather than the result of a newline from the child.
#[derive(Clone, Serialize, Deserialize)]
pub struct Line {
    pub cells: Vec<Cell>,
    pub wrapped: bool,
}

impl Line {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            wrapped: false,
        }
    }

    pub fn resize(&mut self, new_cols: u16) {
        self.cells.resize(new_cols as usize, Cell::default());
    }

    pub fn clear(&mut self, attrs: &CellAttrs) {
        for cell in &mut self.cells {
            cell.clear(attrs);
        }
        self.wrapped = false;
    }

    /// Text content with continuation cells skipped and trailing blanks
    /// trimmed, for search and hotspot scanning.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for cell in &self.cells {
            if !cell.is_continuation() {
                out.push_str(cell.display_char());
            }
        }
        while out.ends_with(' ') {
            out.pop();
        }
        out
    }

    /// Starting column of each character produced by [`Line::text`], plus
    /// one final entry holding the column just past the last character.
    pub fn char_columns(&self) -> Vec<u16> {
        let mut cols = Vec::new();
        let mut col: u16 = 0;
        for cell in &self.cells {
            if cell.is_continuation() {
                continue;
            }
            cols.push(col);
            col += cell.width.max(1) as u16;
        }
        cols.push(col);
        // drop entries for the trailing blanks that text() trimmed
        let kept = self.text().chars().count();
        cols.truncate(kept + 1);
        cols
    }
}

/// Cell attributes
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Color definition
#[derive(Clone, Copy, PartialEq, Default, Debug, Serialize, Deserialize)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    /// Convert to crossterm color for the embedding renderer.
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        match self {
            Color::Default => crossterm::style::Color::Reset,
            Color::Indexed(n) => crossterm::style::Color::AnsiValue(*n),
            Color::Rgb(r, g, b) => crossterm::style::Color::Rgb {
                r: *r,
                g: *g,
                b: *b,
            },
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}

/// Cursor shape set via DECSCUSR
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CursorShape {
    #[default]
    Default,
    BlinkingBlock,
    SteadyBlock,
    BlinkingUnderline,
    SteadyUnderline,
    BlinkingBar,
    SteadyBar,
}

impl CursorShape {
    pub fn from_decscusr(n: u8) -> Self {
        match n {
            1 => CursorShape::BlinkingBlock,
            2 => CursorShape::SteadyBlock,
            3 => CursorShape::BlinkingUnderline,
            4 => CursorShape::SteadyUnderline,
            5 => CursorShape::BlinkingBar,
            6 => CursorShape::SteadyBar,
            _ => CursorShape::Default,
        }
    }
}

/// Cursor state
#[derive(Clone)]
pub struct CursorState {
    /// May equal the column count while a wrap is pending.
    pub col: u16,
    pub row: u16,
    pub visible: bool,
    pub shape: CursorShape,
    pub saved: Option<SavedCursor>,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            col: 0,
            row: 0,
            visible: true,
            shape: CursorShape::Default,
            saved: None,
        }
    }
}

/// Saved cursor state (DECSC)
#[derive(Clone)]
pub struct SavedCursor {
    pub col: u16,
    pub row: u16,
    pub attrs: CellAttrs,
    pub charsets: [Charset; 2],
}

/// Terminal modes
#[derive(Clone)]
pub struct TerminalModes {
    pub application_cursor: bool,
    pub auto_wrap: bool,
    pub origin_mode: bool,
    pub insert_mode: bool,
    pub linefeed_newline: bool,
    pub bracketed_paste: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            auto_wrap: true,
            origin_mode: false,
            insert_mode: false,
            linefeed_newline: false,
            bracketed_paste: false,
        }
    }
}

/// Designated character set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Ascii,
    DecGraphics,
}

impl Charset {
    fn map(self, ch: char) -> char {
        if self == Charset::Ascii {
            return ch;
        }
        match ch {
            '`' => '◆',
            'a' => '▒',
            'f' => '°',
            'g' => '±',
            'j' => '┘',
            'k' => '┐',
            'l' => '┌',
            'm' => '└',
            'n' => '┼',
            'o' => '⎺',
            'q' => '─',
            's' => '⎽',
            't' => '├',
            'u' => '┤',
            'v' => '┴',
            'w' => '┬',
            'x' => '│',
            '~' => '·',
            _ => ch,
        }
    }
}

/// Text selection in history-relative absolute coordinates.
#[derive(Clone, Debug)]
pub struct Selection {
    /// (column, absolute line)
    pub start: (u16, usize),
    pub end: (u16, usize),
    /// Snap both endpoints to line boundaries.
    pub whole_line: bool,
}

/// Character grid plus cursor, attributes, selection, and the history store
/// that receives lines scrolled off the primary screen.
pub struct Screen {
    cols: u16,
    rows: u16,
    primary: Vec<Line>,
    alternate: Vec<Line>,
    using_alternate: bool,
    primary_cursor: CursorState,
    alternate_cursor: CursorState,
    pub current_attrs: CellAttrs,
    pub modes: TerminalModes,
    title: String,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    scroll_region: (u16, u16),
    charsets: [Charset; 2],
    active_charset: usize,
    selection: Option<Selection>,
    /// Linefeed at the bottom of the region is deferred until content needs
    /// the room, so a trailing newline does not scroll the grid early.
    pending_scroll: bool,
    history: Box<dyn HistoryStore>,
    events: Vec<TermEvent>,
}

impl Screen {
    pub fn new(cols: u16, rows: u16, history: HistoryType) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            primary: (0..rows).map(|_| Line::new(cols)).collect(),
            alternate: (0..rows).map(|_| Line::new(cols)).collect(),
            using_alternate: false,
            primary_cursor: CursorState::default(),
            alternate_cursor: CursorState::default(),
            current_attrs: CellAttrs::default(),
            modes: TerminalModes::default(),
            title: String::new(),
            scroll_region: (0, rows - 1),
            charsets: [Charset::Ascii; 2],
            active_charset: 0,
            selection: None,
            pending_scroll: false,
            history: history.create(),
            events: Vec::new(),
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: String) {
        if self.title != title {
            self.title = title.clone();
            self.events.push(TermEvent::TitleChanged(title));
        }
    }

    pub fn bell(&mut self) {
        self.events.push(TermEvent::Bell);
    }

    /// Drain pending screen events.
    pub fn take_events(&mut self) -> Vec<TermEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn using_alternate(&self) -> bool {
        self.using_alternate
    }

    fn grid(&self) -> &Vec<Line> {
        if self.using_alternate {
            &self.alternate
        } else {
            &self.primary
        }
    }

    fn grid_mut(&mut self) -> &mut Vec<Line> {
        if self.using_alternate {
            &mut self.alternate
        } else {
            &mut self.primary
        }
    }

    pub fn cursor(&self) -> &CursorState {
        if self.using_alternate {
            &self.alternate_cursor
        } else {
            &self.primary_cursor
        }
    }

    pub fn cursor_mut(&mut self) -> &mut CursorState {
        if self.using_alternate {
            &mut self.alternate_cursor
        } else {
            &mut self.primary_cursor
        }
    }

    /// Line of the live grid by screen row.
    pub fn line(&self, row: u16) -> Option<&Line> {
        self.grid().get(row as usize)
    }

    // ---- absolute coordinate space -------------------------------------

    /// Number of retired history lines.
    pub fn history_line_count(&self) -> usize {
        self.history.line_count()
    }

    /// History lines plus live grid lines.
    pub fn total_line_count(&self) -> usize {
        self.history.line_count() + self.grid().len()
    }

    /// Line at a history-relative absolute row (0 = oldest retained line).
    pub fn line_at_absolute(&self, abs_row: usize) -> Option<Line> {
        let hist = self.history.line_count();
        if abs_row < hist {
            self.history.line_at(abs_row)
        } else {
            self.grid().get(abs_row - hist).cloned()
        }
    }

    pub fn screen_row_to_absolute(&self, row: u16) -> usize {
        self.history.line_count() + row as usize
    }

    /// Replace the history backend, discarding prior scrollback.
    pub fn set_history_type(&mut self, history: HistoryType) {
        self.history = history.create();
        self.selection = None;
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.selection = None;
    }

    // ---- character output ----------------------------------------------

    /// Put a character at the cursor with the current attributes, wrapping
    /// when the column has run past the grid width.
    pub fn put_char(&mut self, ch: char) {
        let ch = self.charsets[self.active_charset].map(ch);
        let width = ch.width().unwrap_or(0) as u16;

        if width == 0 {
            self.append_to_previous_cell(ch);
            return;
        }

        self.commit_pending_scroll();

        let pending_wrap = self.cursor().col >= self.cols;
        if pending_wrap {
            if self.modes.auto_wrap {
                self.cursor_mut().col = 0;
                self.linefeed();
                self.commit_pending_scroll();
                let row = self.cursor().row as usize;
                self.grid_mut()[row].wrapped = true;
            } else {
                self.cursor_mut().col = self.cols - 1;
            }
        }

        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        if col >= self.cols as usize {
            return;
        }

        if self.modes.insert_mode {
            self.insert_blank_cells(row, col, width as usize);
        }
        self.handle_wide_char_overwrite(row, col);

        let attrs = self.current_attrs.clone();
        let cols = self.cols as usize;
        let grid = self.grid_mut();
        grid[row].cells[col] = Cell {
            grapheme: ch.to_string(),
            width: width as u8,
            attrs: attrs.clone(),
        };
        if width == 2 && col + 1 < cols {
            grid[row].cells[col + 1] = Cell::continuation(&attrs);
        }

        // col may reach cols (pending wrap) but never exceed it, even for
        // a wide character printed in the last column
        let max_col = self.cols;
        let cursor = self.cursor_mut();
        cursor.col = (cursor.col + width).min(max_col);
    }

    fn append_to_previous_cell(&mut self, ch: char) {
        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        if col > 0 {
            self.grid_mut()[row].cells[col - 1].grapheme.push(ch);
        }
    }

    fn insert_blank_cells(&mut self, row: usize, col: usize, n: usize) {
        let grid = self.grid_mut();
        for _ in 0..n {
            if col < grid[row].cells.len() {
                grid[row].cells.pop();
                grid[row].cells.insert(col, Cell::default());
            }
        }
    }

    fn handle_wide_char_overwrite(&mut self, row: usize, col: usize) {
        let attrs = self.current_attrs.clone();
        let cols = self.cols as usize;
        let grid = self.grid_mut();

        // overwriting the right half of a wide char
        if col > 0 && grid[row].cells[col].is_continuation() {
            grid[row].cells[col - 1] = Cell {
                grapheme: " ".to_string(),
                width: 1,
                attrs: attrs.clone(),
            };
        }

        // overwriting the left half of a wide char
        if grid[row].cells[col].width == 2 && col + 1 < cols {
            grid[row].cells[col + 1] = Cell {
                grapheme: " ".to_string(),
                width: 1,
                attrs,
            };
        }
    }

    // ---- cursor and scrolling ------------------------------------------

    pub fn carriage_return(&mut self) {
        self.cursor_mut().col = 0;
    }

    /// Move cursor down, scrolling the region when at its bottom. The scroll
    /// itself is deferred until the next character commits it.
    pub fn linefeed(&mut self) {
        let cursor_row = self.cursor().row;
        let scroll_bottom = self.scroll_region.1;

        if cursor_row == scroll_bottom {
            if self.pending_scroll {
                self.scroll_up(1);
            }
            self.pending_scroll = true;
        } else if cursor_row < self.rows - 1 {
            self.cursor_mut().row += 1;
        }
        if self.modes.linefeed_newline {
            self.cursor_mut().col = 0;
        }
    }

    fn commit_pending_scroll(&mut self) {
        if self.pending_scroll {
            self.pending_scroll = false;
            self.scroll_up(1);
        }
    }

    pub fn backspace(&mut self) {
        let cols = self.cols;
        let cursor = self.cursor_mut();
        if cursor.col > cols {
            cursor.col = cols;
        }
        if cursor.col > 0 {
            cursor.col -= 1;
        }
    }

    pub fn horizontal_tab(&mut self) {
        let cols = self.cols;
        let cursor = self.cursor_mut();
        cursor.col = ((cursor.col / 8) + 1) * 8;
        if cursor.col >= cols {
            cursor.col = cols - 1;
        }
    }

    /// Scroll the region up by n lines. A line retired from row 0 of the
    /// primary screen is pushed into history.
    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;
        let to_history = !self.using_alternate && top == 0;

        for _ in 0..n {
            let grid_len = self.grid().len();
            if (top as usize) < grid_len && (bottom as usize) < grid_len {
                let removed = self.grid_mut().remove(top as usize);
                if to_history {
                    self.history.append(removed);
                }
                self.grid_mut().insert(bottom as usize, Line::new(cols));
            }
        }
    }

    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;

        for _ in 0..n {
            let grid_len = self.grid().len();
            if (bottom as usize) < grid_len && (top as usize) <= grid_len {
                self.grid_mut().remove(bottom as usize);
                self.grid_mut().insert(top as usize, Line::new(cols));
            }
        }
    }

    pub fn cursor_up(&mut self, n: u16) {
        self.pending_scroll = false;
        let cursor = self.cursor_mut();
        cursor.row = cursor.row.saturating_sub(n);
    }

    pub fn cursor_down(&mut self, n: u16) {
        self.pending_scroll = false;
        let rows = self.rows;
        let cursor = self.cursor_mut();
        cursor.row = (cursor.row + n).min(rows - 1);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        let cols = self.cols;
        let cursor = self.cursor_mut();
        cursor.col = (cursor.col + n).min(cols - 1);
    }

    pub fn cursor_backward(&mut self, n: u16) {
        let cols = self.cols;
        let cursor = self.cursor_mut();
        if cursor.col > cols {
            cursor.col = cols;
        }
        cursor.col = cursor.col.saturating_sub(n);
    }

    pub fn set_cursor_column(&mut self, col: u16) {
        let cols = self.cols;
        self.cursor_mut().col = col.saturating_sub(1).min(cols - 1);
    }

    pub fn set_cursor_row(&mut self, row: u16) {
        self.pending_scroll = false;
        let rows = self.rows;
        self.cursor_mut().row = row.saturating_sub(1).min(rows - 1);
    }

    /// Set cursor position (1-indexed parameters, origin-mode aware).
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        let (top, bottom) = if self.modes.origin_mode {
            self.scroll_region
        } else {
            (0, self.rows - 1)
        };
        let cols = self.cols;
        let target_row = (top + row.saturating_sub(1)).min(bottom);
        self.pending_scroll = false;
        let cursor = self.cursor_mut();
        cursor.row = target_row;
        cursor.col = col.saturating_sub(1).min(cols - 1);
    }

    /// Index - cursor down, scroll if at bottom of region.
    pub fn index(&mut self) {
        let col = self.cursor().col;
        self.linefeed();
        self.cursor_mut().col = col;
    }

    /// Reverse index - cursor up, scroll if at top of region.
    pub fn reverse_index(&mut self) {
        if self.pending_scroll {
            self.pending_scroll = false;
            return;
        }
        let cursor_row = self.cursor().row;
        if cursor_row == self.scroll_region.0 {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    // ---- erase and edit ------------------------------------------------

    pub fn erase_in_display(&mut self, mode: u16) {
        match mode {
            0 => {
                self.erase_in_line(0);
                let cursor_row = self.cursor().row as usize;
                let attrs = self.current_attrs.clone();
                let grid = self.grid_mut();
                for r in (cursor_row + 1)..grid.len() {
                    grid[r].clear(&attrs);
                }
            }
            1 => {
                let cursor_row = self.cursor().row as usize;
                let attrs = self.current_attrs.clone();
                {
                    let grid = self.grid_mut();
                    for r in 0..cursor_row.min(grid.len()) {
                        grid[r].clear(&attrs);
                    }
                }
                self.erase_in_line(1);
            }
            2 | 3 => {
                let attrs = self.current_attrs.clone();
                let grid = self.grid_mut();
                for line in grid.iter_mut() {
                    line.clear(&attrs);
                }
            }
            _ => {}
        }
    }

    pub fn erase_in_line(&mut self, mode: u16) {
        let (cursor_row, cursor_col) = {
            let cursor = self.cursor();
            (cursor.row as usize, (cursor.col as usize).min(self.cols as usize - 1))
        };
        let cols = self.cols as usize;
        let attrs = self.current_attrs.clone();
        let grid = self.grid_mut();
        let Some(line) = grid.get_mut(cursor_row) else {
            return;
        };

        match mode {
            0 => {
                for c in cursor_col..cols {
                    if let Some(cell) = line.cells.get_mut(c) {
                        cell.clear(&attrs);
                    }
                }
            }
            1 => {
                for c in 0..=cursor_col {
                    if let Some(cell) = line.cells.get_mut(c) {
                        cell.clear(&attrs);
                    }
                }
            }
            2 => line.clear(&attrs),
            _ => {}
        }
    }

    pub fn insert_lines(&mut self, n: u16) {
        let cursor_row = self.cursor().row;
        let (top, bottom) = self.scroll_region;
        if cursor_row < top || cursor_row > bottom {
            return;
        }
        let cols = self.cols;
        let grid = self.grid_mut();
        for _ in 0..n {
            if (bottom as usize) < grid.len() {
                grid.remove(bottom as usize);
                grid.insert(cursor_row as usize, Line::new(cols));
            }
        }
    }

    pub fn delete_lines(&mut self, n: u16) {
        let cursor_row = self.cursor().row;
        let (top, bottom) = self.scroll_region;
        if cursor_row < top || cursor_row > bottom {
            return;
        }
        let cols = self.cols;
        let grid = self.grid_mut();
        for _ in 0..n {
            if (cursor_row as usize) < grid.len() && (bottom as usize) < grid.len() {
                grid.remove(cursor_row as usize);
                grid.insert(bottom as usize, Line::new(cols));
            }
        }
    }

    pub fn insert_characters(&mut self, n: u16) {
        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        self.insert_blank_cells(row, col, n as usize);
    }

    pub fn delete_characters(&mut self, n: u16) {
        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let grid = self.grid_mut();
        for _ in 0..n {
            if col < grid[row].cells.len() {
                grid[row].cells.remove(col);
                grid[row].cells.push(Cell::default());
            }
        }
    }

    pub fn erase_characters(&mut self, n: u16) {
        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let attrs = self.current_attrs.clone();
        let grid = self.grid_mut();
        for i in 0..n as usize {
            if let Some(cell) = grid[row].cells.get_mut(col + i) {
                cell.clear(&attrs);
            }
        }
    }

    // ---- modes, regions, charsets --------------------------------------

    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let top = top.saturating_sub(1).min(self.rows - 1);
        let bottom = bottom.saturating_sub(1).min(self.rows - 1);
        if top < bottom {
            self.scroll_region = (top, bottom);
        }
    }

    pub fn scroll_region(&self) -> (u16, u16) {
        self.scroll_region
    }

    pub fn designate_charset(&mut self, slot: usize, charset: Charset) {
        if slot < self.charsets.len() {
            self.charsets[slot] = charset;
        }
    }

    pub fn select_charset(&mut self, slot: usize) {
        if slot < self.charsets.len() {
            self.active_charset = slot;
        }
    }

    pub fn save_cursor(&mut self) {
        let (col, row) = {
            let cursor = self.cursor();
            (cursor.col, cursor.row)
        };
        let saved = SavedCursor {
            col,
            row,
            attrs: self.current_attrs.clone(),
            charsets: self.charsets,
        };
        self.cursor_mut().saved = Some(saved);
    }

    pub fn restore_cursor(&mut self) {
        let saved = self.cursor().saved.clone();
        if let Some(saved) = saved {
            self.charsets = saved.charsets;
            self.current_attrs = saved.attrs.clone();
            let cursor = self.cursor_mut();
            cursor.col = saved.col;
            cursor.row = saved.row;
        }
    }

    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.modes.application_cursor = enable,
            6 => {
                self.modes.origin_mode = enable;
                self.cursor_position(1, 1);
            }
            7 => self.modes.auto_wrap = enable,
            25 => self.cursor_mut().visible = enable,
            47 | 1047 => {
                if enable {
                    self.enter_alternate_screen(false);
                } else {
                    self.leave_alternate_screen(false);
                }
            }
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    self.enter_alternate_screen(true);
                } else {
                    self.leave_alternate_screen(true);
                }
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => {
                tracing::debug!(mode, enable, "ignoring unknown private mode");
            }
        }
    }

    fn enter_alternate_screen(&mut self, save_cursor: bool) {
        if self.using_alternate {
            return;
        }
        if save_cursor {
            self.save_cursor();
        }
        self.using_alternate = true;
        self.pending_scroll = false;
        self.alternate = (0..self.rows).map(|_| Line::new(self.cols)).collect();
        self.alternate_cursor = CursorState::default();
    }

    fn leave_alternate_screen(&mut self, restore_cursor: bool) {
        if !self.using_alternate {
            return;
        }
        self.using_alternate = false;
        self.pending_scroll = false;
        if restore_cursor {
            self.restore_cursor();
        }
    }

    /// Full reset (RIS). History is kept; the grid, cursor, modes, and
    /// attributes return to their initial state.
    pub fn reset(&mut self) {
        self.primary = (0..self.rows).map(|_| Line::new(self.cols)).collect();
        self.alternate = (0..self.rows).map(|_| Line::new(self.cols)).collect();
        self.using_alternate = false;
        self.primary_cursor = CursorState::default();
        self.alternate_cursor = CursorState::default();
        self.current_attrs = CellAttrs::default();
        self.modes = TerminalModes::default();
        self.scroll_region = (0, self.rows - 1);
        self.charsets = [Charset::Ascii; 2];
        self.active_charset = 0;
        self.selection = None;
        self.pending_scroll = false;
    }

    // ---- resize --------------------------------------------------------

    /// Resize the grid. Shrinking rows retires lines above the cursor into
    /// history; retired history lines themselves are never dropped or
    /// rewritten.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);

        while self.primary.len() > rows as usize {
            if self.primary_cursor.row > 0 {
                let line = self.primary.remove(0);
                self.history.append(line);
                self.primary_cursor.row -= 1;
            } else {
                self.primary.pop();
            }
        }
        while self.primary.len() < rows as usize {
            self.primary.push(Line::new(cols));
        }
        self.alternate.resize_with(rows as usize, || Line::new(cols));

        for line in self.primary.iter_mut().chain(self.alternate.iter_mut()) {
            line.resize(cols);
        }

        self.cols = cols;
        self.rows = rows;
        self.scroll_region = (0, rows - 1);
        self.pending_scroll = false;

        let max_row = rows - 1;
        self.primary_cursor.col = self.primary_cursor.col.min(cols);
        self.primary_cursor.row = self.primary_cursor.row.min(max_row);
        self.alternate_cursor.col = self.alternate_cursor.col.min(cols);
        self.alternate_cursor.row = self.alternate_cursor.row.min(max_row);
    }

    // ---- selection -----------------------------------------------------

    /// Set the selection start at an absolute coordinate. `whole_line`
    /// selects by full lines.
    pub fn set_selection_start(&mut self, col: u16, abs_line: usize, whole_line: bool) {
        let start = if whole_line { (0, abs_line) } else { (col, abs_line) };
        self.selection = Some(Selection {
            start,
            end: start,
            whole_line,
        });
    }

    pub fn set_selection_end(&mut self, col: u16, abs_line: usize) {
        let cols = self.cols;
        if let Some(sel) = &mut self.selection {
            sel.end = if sel.whole_line {
                (cols - 1, abs_line)
            } else {
                (col, abs_line)
            };
            if sel.whole_line {
                // re-snap the start in case the drag direction flipped
                sel.start.0 = if sel.start.1 <= sel.end.1 { 0 } else { cols - 1 };
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn has_selection(&self) -> bool {
        self.selection.is_some()
    }

    /// Selection endpoints normalized into document order.
    pub fn selection_bounds(&self) -> Option<((u16, usize), (u16, usize))> {
        let sel = self.selection.as_ref()?;
        let (start, end) = (sel.start, sel.end);
        if start.1 < end.1 || (start.1 == end.1 && start.0 <= end.0) {
            Some((start, end))
        } else {
            Some((end, start))
        }
    }

    /// Whether an absolute coordinate falls inside the selection.
    pub fn is_selected(&self, col: u16, abs_line: usize) -> bool {
        let Some((start, end)) = self.selection_bounds() else {
            return false;
        };
        if abs_line < start.1 || abs_line > end.1 {
            return false;
        }
        if self.selection.as_ref().is_some_and(|s| s.whole_line) {
            return true;
        }
        if start.1 == end.1 {
            col >= start.0 && col <= end.0
        } else if abs_line == start.1 {
            col >= start.0
        } else if abs_line == end.1 {
            col <= end.0
        } else {
            true
        }
    }

    /// Reconstruct the selected run of cells in document order, crossing the
    /// history/screen boundary. With `preserve_line_breaks`, a separator is
    /// inserted between lines except before a wrapped continuation.
    pub fn selected_text(&self, preserve_line_breaks: bool) -> Option<String> {
        let (start, end) = self.selection_bounds()?;
        let whole_line = self.selection.as_ref().is_some_and(|s| s.whole_line);
        let mut result = String::new();

        for abs_row in start.1..=end.1 {
            let Some(line) = self.line_at_absolute(abs_row) else {
                continue;
            };

            if abs_row > start.1 {
                if preserve_line_breaks && !line.wrapped {
                    while result.ends_with(' ') {
                        result.pop();
                    }
                    result.push('\n');
                } else if !preserve_line_breaks {
                    result.push(' ');
                }
            }

            let col_start = if abs_row == start.1 && !whole_line {
                start.0 as usize
            } else {
                0
            };
            let col_end = if abs_row == end.1 && !whole_line {
                (end.0 as usize + 1).min(line.cells.len())
            } else {
                line.cells.len()
            };

            let mut piece = String::new();
            for cell in line.cells.iter().take(col_end).skip(col_start) {
                if !cell.is_continuation() {
                    piece.push_str(cell.display_char());
                }
            }
            if abs_row != end.1 || whole_line {
                while piece.ends_with(' ') {
                    piece.pop();
                }
            }
            result.push_str(&piece);
        }

        while result.ends_with(' ') {
            result.pop();
        }
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }
}

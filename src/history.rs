//! Scrollback history storage.
//!
//! Lines scrolled off the top of the primary screen are retained by a
//! [`HistoryStore`]. Two backends are provided: a bounded in-memory ring
//! that evicts oldest-first, and an unbounded store that spills encoded
//! lines to an anonymous temporary file. The backend is chosen through
//! [`HistoryType`] and can be swapped at runtime, which discards any
//! previously retained lines.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use crate::core::term::screen::Line;

/// Storage backend for lines retired from the top of the screen.
///
/// Indices are stable between mutations: index 0 is always the oldest
/// retained line. A bounded store shifts its window on eviction, so a
/// given index may refer to a newer line after an `append` that evicts.
pub trait HistoryStore: Send {
    fn append(&mut self, line: Line);
    fn line_count(&self) -> usize;
    fn line_at(&self, index: usize) -> Option<Line>;
    fn clear(&mut self);
}

/// History retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryType {
    /// Keep at most this many lines; oldest are evicted first.
    /// `Bounded(0)` retains nothing.
    Bounded(usize),
    /// Keep everything, spilling to a temporary file on disk.
    Unbounded,
}

impl HistoryType {
    pub fn create(self) -> Box<dyn HistoryStore> {
        match self {
            HistoryType::Bounded(n) => Box::new(BoundedHistory::new(n)),
            HistoryType::Unbounded => Box::new(FileHistory::new()),
        }
    }
}

/// Fixed-capacity in-memory ring.
pub struct BoundedHistory {
    lines: VecDeque<Line>,
    capacity: usize,
}

impl BoundedHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }
}

impl HistoryStore for BoundedHistory {
    fn append(&mut self, line: Line) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line_at(&self, index: usize) -> Option<Line> {
        self.lines.get(index).cloned()
    }

    fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Unbounded store backed by an anonymous temporary file.
///
/// Each appended line is bincode-encoded and written at the end of the
/// file; an in-memory index records `(offset, len)` per line for random
/// access. I/O failures are logged and degrade to dropped or missing
/// lines rather than failing the session.
pub struct FileHistory {
    file: Option<Mutex<File>>,
    index: Vec<(u64, u32)>,
    write_offset: u64,
}

impl FileHistory {
    pub fn new() -> Self {
        let file = match tempfile::tempfile() {
            Ok(f) => Some(Mutex::new(f)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to create history spill file");
                None
            }
        };
        Self {
            file,
            index: Vec::new(),
            write_offset: 0,
        }
    }
}

impl Default for FileHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore for FileHistory {
    fn append(&mut self, line: Line) {
        let Some(file) = &self.file else {
            return;
        };
        let encoded = match bincode::serialize(&line) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode history line");
                return;
            }
        };
        let mut f = match file.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = f
            .seek(SeekFrom::Start(self.write_offset))
            .and_then(|_| f.write_all(&encoded))
        {
            tracing::warn!(error = %e, "failed to write history line");
            return;
        }
        self.index.push((self.write_offset, encoded.len() as u32));
        self.write_offset += encoded.len() as u64;
    }

    fn line_count(&self) -> usize {
        self.index.len()
    }

    fn line_at(&self, index: usize) -> Option<Line> {
        let &(offset, len) = self.index.get(index)?;
        let file = self.file.as_ref()?;
        let mut f = match file.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut buf = vec![0u8; len as usize];
        if let Err(e) = f
            .seek(SeekFrom::Start(offset))
            .and_then(|_| f.read_exact(&mut buf))
        {
            tracing::warn!(error = %e, index, "failed to read history line");
            return None;
        }
        drop(f);
        match bincode::deserialize(&buf) {
            Ok(line) => Some(line),
            Err(e) => {
                tracing::warn!(error = %e, index, "failed to decode history line");
                None
            }
        }
    }

    fn clear(&mut self) {
        self.index.clear();
        self.write_offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::screen::{Cell, CellAttrs};

    fn make_line(text: &str) -> Line {
        let mut line = Line::new(text.len() as u16);
        let attrs = CellAttrs::default();
        for (i, ch) in text.chars().enumerate() {
            line.cells[i] = Cell {
                grapheme: ch.to_string(),
                width: 1,
                attrs: attrs.clone(),
            };
        }
        line
    }

    #[test]
    fn bounded_evicts_oldest_first() {
        let mut history = BoundedHistory::new(100);
        for i in 0..250 {
            history.append(make_line(&format!("line {i}")));
        }
        assert_eq!(history.line_count(), 100);
        assert_eq!(history.line_at(0).unwrap().text(), "line 150");
        assert_eq!(history.line_at(99).unwrap().text(), "line 249");
        assert!(history.line_at(100).is_none());
    }

    #[test]
    fn bounded_zero_capacity_retains_nothing() {
        let mut history = BoundedHistory::new(0);
        history.append(make_line("dropped"));
        assert_eq!(history.line_count(), 0);
        assert!(history.line_at(0).is_none());
    }

    #[test]
    fn file_backend_reads_back_appended_lines() {
        let mut history = FileHistory::new();
        for i in 0..50 {
            history.append(make_line(&format!("spilled {i}")));
        }
        assert_eq!(history.line_count(), 50);
        assert_eq!(history.line_at(0).unwrap().text(), "spilled 0");
        assert_eq!(history.line_at(49).unwrap().text(), "spilled 49");
        assert!(history.line_at(50).is_none());
    }

    #[test]
    fn file_backend_preserves_attributes_and_wrap_flag() {
        let mut history = FileHistory::new();
        let mut line = make_line("styled");
        line.wrapped = true;
        history.append(line);
        let back = history.line_at(0).unwrap();
        assert!(back.wrapped);
        assert_eq!(back.text(), "styled");
    }

    #[test]
    fn clear_resets_both_backends() {
        let mut bounded = BoundedHistory::new(10);
        bounded.append(make_line("a"));
        bounded.clear();
        assert_eq!(bounded.line_count(), 0);

        let mut file = FileHistory::new();
        file.append(make_line("b"));
        file.clear();
        assert_eq!(file.line_count(), 0);
        file.append(make_line("c"));
        assert_eq!(file.line_at(0).unwrap().text(), "c");
    }
}

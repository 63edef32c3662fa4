//! VT100/VT220 terminal emulation: screen grid and escape sequence parser.

pub mod parser;
pub mod screen;

use std::sync::Arc;

use crossterm::event::KeyEvent;

use crate::keymap::KeyTable;
pub use parser::{Response, VtParser};
pub use screen::{Screen, TermEvent};

/// Parser plus the active key table: decoded characters in, key bytes out.
///
/// The emulation does not own the screen; the session passes it in per
/// call so resize and snapshot logic stay in one place.
pub struct Emulation {
    parser: VtParser,
    key_table: Arc<KeyTable>,
}

impl Emulation {
    pub fn new(key_table: Arc<KeyTable>) -> Self {
        Self {
            parser: VtParser::new(),
            key_table,
        }
    }

    /// Interpret one decoded character from the child process.
    pub fn receive_char(&mut self, ch: char, screen: &mut Screen) -> Option<Response> {
        self.parser.feed(ch, screen)
    }

    /// Translate a key event into the byte sequence to send to the child.
    /// Returns `None` for keys the active table does not map.
    pub fn encode_key(&self, event: &KeyEvent, screen: &Screen) -> Option<Vec<u8>> {
        self.key_table.encode(event, &screen.modes)
    }

    pub fn set_key_table(&mut self, table: Arc<KeyTable>) {
        self.key_table = table;
    }

    pub fn key_table(&self) -> &Arc<KeyTable> {
        &self.key_table
    }

    /// Drop any partially parsed sequence, as on a full terminal reset.
    pub fn reset(&mut self) {
        self.parser.reset();
    }
}

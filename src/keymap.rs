//! Keyboard translation tables
//!
//! Converts logical key events to the VT byte sequences the child process
//! expects. Tables are named so a session profile can select one; the
//! registry of available tables is passed in explicitly rather than kept
//! in a global.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::core::term::screen::TerminalModes;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// A named key translation table.
///
/// The builtin tables differ only in the bytes produced for Backspace and
/// Delete; everything else follows the common xterm conventions.
pub struct KeyTable {
    name: String,
    /// Byte sent for plain Backspace (0x7F for xterm, 0x08 for linux consoles)
    backspace: u8,
}

impl KeyTable {
    pub fn new(name: impl Into<String>, backspace: u8) -> Self {
        Self {
            name: name.into(),
            backspace,
        }
    }

    /// The xterm-style table most shells expect.
    pub fn default_table() -> Self {
        Self::new("default", 0x7F)
    }

    /// Linux console style with BS for Backspace.
    pub fn linux_table() -> Self {
        Self::new("linux", 0x08)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Translate a key event to bytes. Returns `None` for keys this table
    /// does not map; the caller decides what to do with those.
    pub fn encode(&self, event: &KeyEvent, modes: &TerminalModes) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(self.encode_char(ch, mods)),

            KeyCode::Enter => {
                if modes.linefeed_newline {
                    Some(vec![0x0D, 0x0A])
                } else {
                    Some(vec![0x0D])
                }
            }

            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some(vec![0x1B, self.backspace])
                } else {
                    Some(vec![self.backspace])
                }
            }

            KeyCode::Tab => {
                if mods.contains(Modifiers::SHIFT) {
                    Some(b"\x1b[Z".to_vec())
                } else {
                    Some(vec![0x09])
                }
            }

            KeyCode::Esc => Some(vec![0x1B]),

            KeyCode::Up => Some(Self::arrow_key(b'A', mods, modes)),
            KeyCode::Down => Some(Self::arrow_key(b'B', mods, modes)),
            KeyCode::Right => Some(Self::arrow_key(b'C', mods, modes)),
            KeyCode::Left => Some(Self::arrow_key(b'D', mods, modes)),

            KeyCode::Home => Some(Self::special_key(b'H', mods)),
            KeyCode::End => Some(Self::special_key(b'F', mods)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            KeyCode::F(n) => Some(Self::function_key(n, mods)),

            _ => None,
        }
    }

    fn encode_char(&self, ch: char, mods: Modifiers) -> Vec<u8> {
        // Ctrl + letter = control character
        if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
            if ch.is_ascii_lowercase() {
                return vec![(ch as u8) - b'a' + 1];
            } else if ch.is_ascii_uppercase() {
                return vec![(ch as u8) - b'A' + 1];
            } else {
                match ch {
                    '@' | '`' | ' ' => return vec![0x00],
                    '[' => return vec![0x1B],
                    '\\' => return vec![0x1C],
                    ']' => return vec![0x1D],
                    '^' | '~' => return vec![0x1E],
                    '_' | '?' => return vec![0x1F],
                    _ => {}
                }
            }
        }

        // Ctrl + Alt + letter
        if mods.contains(Modifiers::CTRL) && mods.contains(Modifiers::ALT) {
            if ch.is_ascii_alphabetic() {
                let ctrl_code = (ch.to_ascii_lowercase() as u8) - b'a' + 1;
                return vec![0x1B, ctrl_code];
            }
        }

        // Alt + key = ESC prefix
        if mods.contains(Modifiers::ALT) && !mods.contains(Modifiers::CTRL) {
            let mut bytes = vec![0x1B];
            bytes.extend(ch.to_string().as_bytes());
            return bytes;
        }

        ch.to_string().into_bytes()
    }

    fn arrow_key(key: u8, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
        if !mods.is_empty() {
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
        } else if modes.application_cursor {
            vec![0x1B, b'O', key]
        } else {
            vec![0x1B, b'[', key]
        }
    }

    fn special_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
        }
    }

    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[{};{}~", code, mod_code).into_bytes()
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Vec<u8> {
        let base = match n {
            1 => b"\x1bOP".to_vec(),
            2 => b"\x1bOQ".to_vec(),
            3 => b"\x1bOR".to_vec(),
            4 => b"\x1bOS".to_vec(),
            5 => b"\x1b[15~".to_vec(),
            6 => b"\x1b[17~".to_vec(),
            7 => b"\x1b[18~".to_vec(),
            8 => b"\x1b[19~".to_vec(),
            9 => b"\x1b[20~".to_vec(),
            10 => b"\x1b[21~".to_vec(),
            11 => b"\x1b[23~".to_vec(),
            12 => b"\x1b[24~".to_vec(),
            _ => return vec![],
        };

        if mods.is_empty() {
            base
        } else {
            let mod_code = Self::modifier_code(mods);
            match n {
                1..=4 => {
                    // ESC O X -> ESC [ 1 ; mod X
                    let key = base[2];
                    format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
                }
                _ => {
                    // ESC [ n ~ -> ESC [ n ; mod ~
                    let code_str = String::from_utf8_lossy(&base[2..base.len() - 1]);
                    format!("\x1b[{};{}~", code_str, mod_code).into_bytes()
                }
            }
        }
    }

    /// xterm modifier parameter
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

/// Explicit collection of the key tables available to sessions.
pub struct KeyTableRegistry {
    tables: HashMap<String, Arc<KeyTable>>,
}

impl KeyTableRegistry {
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Registry with the builtin "default" and "linux" tables.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(KeyTable::default_table());
        registry.register(KeyTable::linux_table());
        registry
    }

    pub fn register(&mut self, table: KeyTable) {
        self.tables.insert(table.name().to_string(), Arc::new(table));
    }

    pub fn get(&self, name: &str) -> Option<Arc<KeyTable>> {
        self.tables.get(name).cloned()
    }

    /// Lookup with fallback to the "default" table.
    pub fn get_or_default(&self, name: &str) -> Arc<KeyTable> {
        self.get(name)
            .or_else(|| self.get("default"))
            .unwrap_or_else(|| Arc::new(KeyTable::default_table()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for KeyTableRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn char_keys() {
        let table = KeyTable::default_table();
        let modes = TerminalModes::default();

        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(table.encode(&event, &modes), Some(b"a".to_vec()));

        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(table.encode(&event, &modes), Some(vec![0x03]));

        let event = key_event(KeyCode::Char('x'), KeyModifiers::ALT);
        assert_eq!(table.encode(&event, &modes), Some(vec![0x1B, b'x']));
    }

    #[test]
    fn arrow_keys_respect_application_mode() {
        let table = KeyTable::default_table();
        let mut modes = TerminalModes::default();

        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(table.encode(&event, &modes), Some(b"\x1b[A".to_vec()));

        modes.application_cursor = true;
        assert_eq!(table.encode(&event, &modes), Some(b"\x1bOA".to_vec()));

        let event = key_event(KeyCode::Up, KeyModifiers::CONTROL);
        assert_eq!(table.encode(&event, &modes), Some(b"\x1b[1;5A".to_vec()));
    }

    #[test]
    fn function_keys() {
        let table = KeyTable::default_table();
        let modes = TerminalModes::default();

        let event = key_event(KeyCode::F(1), KeyModifiers::NONE);
        assert_eq!(table.encode(&event, &modes), Some(b"\x1bOP".to_vec()));

        let event = key_event(KeyCode::F(5), KeyModifiers::NONE);
        assert_eq!(table.encode(&event, &modes), Some(b"\x1b[15~".to_vec()));

        let event = key_event(KeyCode::F(5), KeyModifiers::SHIFT);
        assert_eq!(table.encode(&event, &modes), Some(b"\x1b[15;2~".to_vec()));
    }

    #[test]
    fn tables_differ_in_backspace() {
        let modes = TerminalModes::default();
        let event = key_event(KeyCode::Backspace, KeyModifiers::NONE);

        let xterm = KeyTable::default_table();
        assert_eq!(xterm.encode(&event, &modes), Some(vec![0x7F]));

        let linux = KeyTable::linux_table();
        assert_eq!(linux.encode(&event, &modes), Some(vec![0x08]));
    }

    #[test]
    fn enter_follows_linefeed_newline_mode() {
        let table = KeyTable::default_table();
        let mut modes = TerminalModes::default();
        let event = key_event(KeyCode::Enter, KeyModifiers::NONE);

        assert_eq!(table.encode(&event, &modes), Some(vec![0x0D]));
        modes.linefeed_newline = true;
        assert_eq!(table.encode(&event, &modes), Some(vec![0x0D, 0x0A]));
    }

    #[test]
    fn registry_lookup_and_fallback() {
        let registry = KeyTableRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["default", "linux"]);
        assert_eq!(registry.get("linux").unwrap().name(), "linux");
        assert!(registry.get("vt52").is_none());
        assert_eq!(registry.get_or_default("vt52").name(), "default");
    }
}

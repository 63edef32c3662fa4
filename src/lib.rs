//! Process-backed terminal session engine.
//!
//! `ptyterm` runs a child process on a pseudo-terminal, interprets its
//! VT100/VT220 output into a cell grid with scrollback, and translates
//! key events back into the byte sequences the child expects. It is the
//! engine a terminal widget sits on top of; it draws nothing itself.
//!
//! # Overview
//!
//! ```text
//! Session
//! ├── Pty (child process on a portable-pty pair)
//! ├── Emulation (VT parser + key table)
//! └── Screen (cell grid + cursor + selection)
//!     └── HistoryStore (bounded ring or file spill)
//!
//! ScreenWindow ──views──> Screen + history
//! HistorySearch ──scans──> Snapshot (copied line space)
//! FilterChain ──scans──> visible window text
//! ```
//!
//! The typical driving loop: call [`Session::process_output`] when the
//! embedder is ready to refresh, drain [`Session::next_event`], and
//! render through a [`ScreenWindow`].
//!
//! ```no_run
//! use ptyterm::{Profile, Session, ScreenWindow, KeyTableRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let profile = Profile::default();
//! let tables = KeyTableRegistry::with_builtins();
//! let table = tables.get_or_default(&profile.key_table);
//! let mut session = Session::new(profile, 80, 24, table);
//! session.start()?;
//!
//! let mut window = ScreenWindow::new();
//! loop {
//!     if session.process_output() {
//!         window.notify_output_changed(&session.screen);
//!     }
//!     session.poll_monitor();
//!     while let Some(event) = session.next_event() {
//!         // react to bells, title changes, exit...
//!         let _ = event;
//!     }
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod filter;
pub mod history;
pub mod keymap;
pub mod search;
pub mod window;

pub use crate::core::pty::{Pty, PtyError};
pub use crate::core::session::{Session, SessionError, SessionEvent};
pub use crate::core::term::screen::{
    AttrFlags, Cell, CellAttrs, Color, CursorShape, CursorState, Line, Screen, TerminalModes,
};
pub use crate::core::term::{Emulation, Response, VtParser};
pub use config::{ConfigError, HistoryConfig, HistoryKind, Profile};
pub use filter::{Filter, FilterChain, Hotspot, HotspotKind, UrlFilter};
pub use history::{BoundedHistory, FileHistory, HistoryStore, HistoryType};
pub use keymap::{KeyTable, KeyTableRegistry, Modifiers};
pub use search::{
    HistorySearch, SearchDirection, SearchError, SearchMatch, SearchOutcome, SearchPattern,
    SearchSpec, Snapshot,
};
pub use window::{ScreenWindow, VisibleLines};

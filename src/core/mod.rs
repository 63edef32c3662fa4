//! Core terminal emulation components.
//!
//! - **pty**: pseudo-terminal wrapper over portable-pty
//! - **term**: VT100/VT220 screen state and escape sequence parser
//! - **session**: child process + decoder + flow control on top of both
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Pty (child process I/O)
//! └── Emulation
//!     ├── VtParser (escape sequences)
//!     └── KeyTable (key event encoding)
//! Screen
//! ├── cell grid + attributes + cursor
//! └── HistoryStore (scrollback)
//! ```

pub mod pty;
pub mod session;
pub mod term;

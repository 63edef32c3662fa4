//! Pseudo-terminal wrapper
//!
//! Thin layer over `portable-pty`: opens a PTY pair, spawns the child
//! process on the slave side, and exposes the master side as a cloneable
//! reader plus a one-shot writer. Dropping the writer hangs up the
//! child's input.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open pseudo-terminal: {0}")]
    Open(#[source] anyhow::Error),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to resize pseudo-terminal: {0}")]
    Resize(#[source] anyhow::Error),

    #[error("failed to obtain pty reader: {0}")]
    Reader(#[source] anyhow::Error),

    #[error("failed to obtain pty writer: {0}")]
    Writer(#[source] anyhow::Error),
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// An open PTY with a running child process.
pub struct Pty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl Pty {
    /// Open a PTY of the given size and spawn the child on its slave side.
    ///
    /// The child inherits this process's environment, with `env` entries
    /// layered on top and TERM forced to xterm-256color.
    pub fn spawn(
        program: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        working_directory: Option<&Path>,
        cols: u16,
        rows: u16,
    ) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(pty_size(cols, rows))
            .map_err(PtyError::Open)?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        for (key, value) in std::env::vars() {
            cmd.env(key, value);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.env("TERM", "xterm-256color");
        if let Some(dir) = working_directory {
            cmd.cwd(dir);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| PtyError::Spawn {
            program: program.to_string(),
            source: e,
        })?;
        // the slave handle is no longer needed once the child holds it
        drop(pair.slave);

        tracing::info!(program, cols, rows, "spawned child process");

        Ok(Self {
            master: pair.master,
            child,
        })
    }

    pub fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.master.try_clone_reader().map_err(PtyError::Reader)
    }

    /// The writer can only be taken once.
    pub fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, PtyError> {
        self.master.take_writer().map_err(PtyError::Writer)
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master
            .resize(pty_size(cols, rows))
            .map_err(PtyError::Resize)
    }

    /// Non-blocking exit poll. Returns the exit code once the child has
    /// terminated.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to poll child status");
                None
            }
        }
    }

    pub fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "kill failed (child may have exited)");
        }
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }
}

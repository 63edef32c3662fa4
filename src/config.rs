//! Session profiles
//!
//! A [`Profile`] describes everything needed to start a session: the
//! program and how to launch it, scrollback policy, flow control, and
//! the activity/silence monitor settings. Profiles deserialize from TOML
//! with every field optional.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::HistoryType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Scrollback retention, as written in a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// "bounded", "unbounded", or "none"
    pub kind: HistoryKind,
    /// Line limit for the bounded kind
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Bounded,
    Unbounded,
    None,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            kind: HistoryKind::Bounded,
            limit: 1000,
        }
    }
}

impl HistoryConfig {
    pub fn history_type(&self) -> HistoryType {
        match self.kind {
            HistoryKind::Bounded => HistoryType::Bounded(self.limit),
            HistoryKind::Unbounded => HistoryType::Unbounded,
            HistoryKind::None => HistoryType::Bounded(0),
        }
    }
}

/// Everything needed to start and drive one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Program to run; defaults to $SHELL at spawn time
    pub program: Option<String>,
    /// Arguments passed to the program
    pub arguments: Vec<String>,
    /// Environment overrides layered on the inherited environment
    pub environment: BTreeMap<String, String>,
    /// Initial working directory of the child
    pub working_directory: Option<PathBuf>,
    /// Scrollback retention policy
    pub history: HistoryConfig,
    /// Honor XON/XOFF from the child
    pub flow_control: bool,
    /// Whether the embedder should dispose the session when the child exits
    pub auto_close: bool,
    /// Emit Activity events when output arrives
    pub monitor_activity: bool,
    /// Emit a Silence event when output stops
    pub monitor_silence: bool,
    /// Seconds of quiet before a Silence event fires
    pub silence_timeout_secs: u64,
    /// Minimum milliseconds between Activity events
    pub activity_debounce_ms: u64,
    /// Name of the keyboard translation table
    pub key_table: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            program: None,
            arguments: Vec::new(),
            environment: BTreeMap::new(),
            working_directory: None,
            history: HistoryConfig::default(),
            flow_control: true,
            auto_close: true,
            monitor_activity: false,
            monitor_silence: false,
            silence_timeout_secs: 10,
            activity_debounce_ms: 250,
            key_table: "default".to_string(),
        }
    }
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let profile = toml::from_str(&content)?;
        Ok(profile)
    }

    /// The program to actually spawn: the configured one, else $SHELL,
    /// else /bin/sh.
    pub fn resolve_program(&self) -> String {
        if let Some(program) = &self.program {
            return program.clone();
        }
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_secs)
    }

    pub fn activity_debounce(&self) -> Duration {
        Duration::from_millis(self.activity_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let profile = Profile::default();
        assert!(profile.flow_control);
        assert!(profile.auto_close);
        assert_eq!(profile.key_table, "default");
        assert_eq!(profile.history.history_type(), HistoryType::Bounded(1000));
    }

    #[test]
    fn parses_partial_toml() {
        let profile: Profile = toml::from_str(
            r#"
            program = "/bin/bash"
            arguments = ["-l"]

            [history]
            kind = "unbounded"

            [environment]
            FOO = "bar"
            "#,
        )
        .unwrap();

        assert_eq!(profile.program.as_deref(), Some("/bin/bash"));
        assert_eq!(profile.arguments, vec!["-l".to_string()]);
        assert_eq!(profile.history.history_type(), HistoryType::Unbounded);
        assert_eq!(profile.environment.get("FOO").map(String::as_str), Some("bar"));
        assert!(profile.flow_control);
    }

    #[test]
    fn history_none_retains_nothing() {
        let config = HistoryConfig {
            kind: HistoryKind::None,
            limit: 1000,
        };
        assert_eq!(config.history_type(), HistoryType::Bounded(0));
    }
}

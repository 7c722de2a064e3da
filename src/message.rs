//! # Messages
//!
//! Entries of the Shell's visible message list. Errors from any layer end up here as the last
//! line of reporting, so building a [`Message`] can never fail.

use std::fmt;
use chrono::{DateTime, Local};

const UNKNOWN_ERROR: &str = "unknown error";

/// Severity of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageLevel::Info => "info",
            MessageLevel::Success => "success",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
        };
        f.write_str(label)
    }
}

/// A timestamped, leveled entry in the Shell's message list.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub timestamp: DateTime<Local>,
    pub level: MessageLevel,
    pub text: String,
}

impl Message {
    pub fn new(level: MessageLevel, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Info, text)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Success, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Error, text)
    }

    /// Builds an error message from anything displayable (clap errors, `anyhow` chains, ...).
    ///
    /// Multi-line renderings (usage blocks, hints) are reduced to their first non-empty line,
    /// and a leading `error: ` tag is dropped since the level already says so. An empty
    /// rendering, or a `Display` impl that reports a formatting error, yields a generic text.
    pub fn from_error(err: &dyn fmt::Display) -> Self {
        // `to_string` panics on a failing `Display`; `fmt::write` reports it instead.
        let mut rendered = String::new();
        if fmt::write(&mut rendered, format_args!("{}", err)).is_err() {
            return Self::error(UNKNOWN_ERROR);
        }
        let line = rendered
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("");
        let line = line.strip_prefix("error:").map(str::trim_start).unwrap_or(line);
        if line.is_empty() {
            Self::error(UNKNOWN_ERROR)
        } else {
            Self::error(line)
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == MessageLevel::Error
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:>7}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.text
        )
    }
}

//! Pipeline sections and diagnostic step naming.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three ordered sections of a pipeline.
///
/// Pre and post run every step on every run. Main is subject to
/// short-circuiting and jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Steps that run before main, unconditionally.
    Pre,
    /// The jump/short-circuit controlled body.
    Main,
    /// Steps that run after main, unconditionally.
    Post,
}

impl Section {
    /// All sections in execution order.
    pub const ALL: [Self; 3] = [Self::Pre, Self::Main, Self::Post];

    /// The prefix used when naming steps of this section.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Main => "s",
            Self::Post => "post",
        }
    }

    /// Builds the default diagnostic name for a step.
    ///
    /// `"{prefix}{index}"`, or `"{prefix}{index}:{label}"` when labeled.
    #[must_use]
    pub fn step_name(self, index: usize, label: Option<&str>) -> String {
        match label {
            Some(label) => format!("{}{index}:{label}", self.prefix()),
            None => format!("{}{index}", self.prefix()),
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Main => write!(f, "main"),
            Self::Post => write!(f, "post"),
        }
    }
}

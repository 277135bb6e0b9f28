//! Command Completion Detection
//!
//! Decides whether a line of shell output is the prompt the shell prints
//! when it is ready for the next command. Patterns are evaluated in order
//! against whole lines; the first match wins.

use regex::Regex;

use crate::error::{Error, Result};

/// Default prompt endings: a line ending in `"$ "` (regular user) or
/// `"]# "` (bracketed root prompt such as `[root@host ~]# `).
pub const DEFAULT_PATTERNS: [&str; 2] = [r"^(.*)(\$ )$", r"^(.*)(\]# )$"];

/// A compiled prompt pattern together with its source text
#[derive(Debug, Clone)]
struct CompletionPattern {
    source: String,
    regex: Regex,
}

/// Ordered set of line-anchored prompt patterns
#[derive(Debug, Clone)]
pub struct CompletionPatterns {
    patterns: Vec<CompletionPattern>,
}

impl Default for CompletionPatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionPatterns {
    /// Create the default pattern set
    pub fn new() -> Self {
        // The defaults are constant and known to compile
        Self::from_patterns(&DEFAULT_PATTERNS).unwrap_or_else(|_| Self::empty())
    }

    /// Create an empty set; only the timeout fallback will end commands
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Compile patterns in order
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut set = Self::empty();
        for pattern in patterns {
            set.push(pattern.as_ref())?;
        }
        Ok(set)
    }

    /// Append a pattern with the lowest priority.
    ///
    /// The pattern must match the entire line, so it is wrapped in `^(?:…)$`.
    pub fn push(&mut self, pattern: &str) -> Result<()> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.patterns.push(CompletionPattern {
            source: pattern.to_string(),
            regex,
        });
        Ok(())
    }

    /// Index of the first pattern matching the whole line
    pub fn find_match(&self, line: &str) -> Option<usize> {
        self.patterns.iter().position(|p| p.regex.is_match(line))
    }

    /// Whether the line is a prompt
    pub fn is_completion(&self, line: &str) -> bool {
        self.find_match(line).is_some()
    }

    /// Source text of each pattern, in evaluation order
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.source.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

//! Regular expression filters.

use super::lines::{filter, replace};
use crate::errors::Result;
use crate::stages::StageRef;
use regex::bytes::Regex;

/// A compiled pattern that builds line stages.
///
/// Patterns match bytes, so input that is not valid UTF-8 passes through
/// unharmed.
#[derive(Debug, Clone)]
pub struct Regexp {
    regex: Regex,
}

impl Regexp {
    /// Compiles `pattern`.
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    /// Returns the compiled expression.
    #[must_use]
    pub fn as_regex(&self) -> &Regex {
        &self.regex
    }

    /// Returns a stage emitting the lines the pattern matches.
    #[must_use]
    pub fn matches(&self) -> StageRef {
        let regex = self.regex.clone();
        filter(move |line| regex.is_match(line))
    }

    /// Returns a stage replacing every match in each line with `repl`.
    ///
    /// `repl` may refer to capture groups as `$1` or `${name}`.
    #[must_use]
    pub fn replace_all(&self, repl: impl AsRef<[u8]>) -> StageRef {
        let regex = self.regex.clone();
        let repl = repl.as_ref().to_vec();
        replace(move |line| regex.replace_all(line, repl.as_slice()).into_owned())
    }

    /// Returns a stage replacing the first match in each line with `repl`.
    #[must_use]
    pub fn replace_first(&self, repl: impl AsRef<[u8]>) -> StageRef {
        let regex = self.regex.clone();
        let repl = repl.as_ref().to_vec();
        replace(move |line| regex.replace(line, repl.as_slice()).into_owned())
    }
}

impl From<Regex> for Regexp {
    fn from(regex: Regex) -> Self {
        Self { regex }
    }
}

//! Substring matching and rewriting.

use super::lines::{filter, replace};
use crate::context::Session;
use crate::errors::Result;
use crate::stages::{fail, Stage, StageRef};
use async_trait::async_trait;
use regex::bytes::{NoExpand, Regex};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};

/// A byte string compiled for repeated searching.
#[derive(Debug, Clone)]
pub struct Literal {
    regex: Regex,
    len: usize,
}

impl Literal {
    /// Compiles `needle`, which need not be valid UTF-8.
    ///
    /// Fails only for needles too large for the regex size limit.
    pub fn new(needle: impl AsRef<[u8]>) -> Result<Self> {
        let needle = needle.as_ref();
        let mut pattern = String::with_capacity(5 + needle.len() * 4);
        pattern.push_str("(?-u)");
        for byte in needle {
            let _ = write!(pattern, "\\x{byte:02X}");
        }
        Ok(Self {
            regex: Regex::new(&pattern)?,
            len: needle.len(),
        })
    }

    /// Returns true if `haystack` contains the literal. The empty literal is
    /// found everywhere.
    #[must_use]
    pub fn is_in(&self, haystack: &[u8]) -> bool {
        self.regex.is_match(haystack)
    }

    /// Replaces every non-overlapping occurrence in `haystack` with `to`.
    /// The empty literal leaves the input unchanged.
    #[must_use]
    pub fn replace_all(&self, haystack: &[u8], to: &[u8]) -> Vec<u8> {
        if self.len == 0 {
            return haystack.to_vec();
        }
        self.regex.replace_all(haystack, NoExpand(to)).into_owned()
    }
}

/// Returns a stage emitting the lines that contain `needle`.
pub fn contains(needle: impl AsRef<[u8]>) -> StageRef {
    match Literal::new(needle) {
        Ok(literal) => filter(move |line| literal.is_in(line)),
        Err(err) => fail(Arc::new(err)),
    }
}

/// Returns a stage emitting the lines that start with `prefix`.
pub fn has_prefix(prefix: impl AsRef<[u8]>) -> StageRef {
    let prefix = prefix.as_ref().to_vec();
    filter(move |line| line.starts_with(&prefix))
}

/// Returns a stage emitting the lines that end with `suffix`.
pub fn has_suffix(suffix: impl AsRef<[u8]>) -> StageRef {
    let suffix = suffix.as_ref().to_vec();
    filter(move |line| line.ends_with(&suffix))
}

/// Returns a stage removing `prefix` from the start of every line that has it.
pub fn trim_prefix(prefix: impl AsRef<[u8]>) -> StageRef {
    let prefix = prefix.as_ref().to_vec();
    replace(move |line| line.strip_prefix(prefix.as_slice()).unwrap_or(line).to_vec())
}

/// Returns a stage removing `suffix` from the end of every line that has it.
pub fn trim_suffix(suffix: impl AsRef<[u8]>) -> StageRef {
    let suffix = suffix.as_ref().to_vec();
    replace(move |line| line.strip_suffix(suffix.as_slice()).unwrap_or(line).to_vec())
}

/// Returns a stage replacing every occurrence of `from` with `to` in each line.
pub fn replace_all(from: impl AsRef<[u8]>, to: impl AsRef<[u8]>) -> StageRef {
    let to = to.as_ref().to_vec();
    match Literal::new(from) {
        Ok(literal) => replace(move |line| literal.replace_all(line, &to)),
        Err(err) => fail(Arc::new(err)),
    }
}

/// Writes fixed bytes a number of times, ignoring input.
#[derive(Debug, Clone)]
pub struct Repeat {
    bytes: Vec<u8>,
    count: usize,
}

#[async_trait]
impl Stage for Repeat {
    fn name(&self) -> &str {
        "repeat"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut writer = BufWriter::new(session.output());
        for _ in 0..self.count {
            writer.write_all(&self.bytes).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

/// Returns a stage writing `bytes` to its output `count` times.
pub fn repeat(bytes: impl AsRef<[u8]>, count: usize) -> StageRef {
    Arc::new(Repeat {
        bytes: bytes.as_ref().to_vec(),
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_filter;
    use pretty_assertions::assert_eq;

    const INPUT: &str = "apple pie\nbanana split\napple tart\ncherry\n";

    fn replace_bytes(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
        Literal::new(from).unwrap().replace_all(haystack, to)
    }

    #[test]
    fn test_literal_replace_all() {
        assert_eq!(replace_bytes(b"a-b-c", b"-", b"+"), b"a+b+c");
        assert_eq!(replace_bytes(b"aaaa", b"aa", b"b"), b"bb");
        assert_eq!(replace_bytes(b"abc", b"", b"x"), b"abc");
        assert_eq!(replace_bytes(b"abc", b"zz", b"x"), b"abc");
        assert_eq!(replace_bytes(b"1.5", b".", b"$1"), b"1$15");
    }

    #[test]
    fn test_literal_matches_bytes_exactly() {
        let dot = Literal::new(".*").unwrap();
        assert!(dot.is_in(b"a.*b"));
        assert!(!dot.is_in(b"anything"));

        let raw = Literal::new([0xff, b'\n', 0x00]).unwrap();
        assert!(raw.is_in(b"x\xff\n\x00y"));
        assert!(!raw.is_in(b"\xff\n"));

        assert!(Literal::new("").unwrap().is_in(b""));
    }

    #[tokio::test]
    async fn test_contains() {
        let out = run_filter(contains("apple"), INPUT).await.unwrap();
        assert_eq!(out, "apple pie\napple tart\n");
    }

    #[tokio::test]
    async fn test_prefix_and_suffix_filters() {
        assert_eq!(
            run_filter(has_prefix("ban"), INPUT).await.unwrap(),
            "banana split\n"
        );
        assert_eq!(
            run_filter(has_suffix("rt"), INPUT).await.unwrap(),
            "apple tart\n"
        );
        assert_eq!(run_filter(has_suffix(b"pie"), INPUT).await.unwrap(), "apple pie\n");
    }

    #[tokio::test]
    async fn test_trim_prefix_and_suffix() {
        assert_eq!(
            run_filter(trim_prefix("apple "), INPUT).await.unwrap(),
            "pie\nbanana split\ntart\ncherry\n"
        );
        assert_eq!(
            run_filter(trim_suffix("y"), "cherry\nberry\nfig").await.unwrap(),
            "cherr\nberr\nfig"
        );
    }

    #[tokio::test]
    async fn test_replace_all_in_lines() {
        let out = run_filter(replace_all("a", "A"), "banana\nkiwi\n").await.unwrap();
        assert_eq!(out, "bAnAnA\nkiwi\n");
    }

    #[tokio::test]
    async fn test_repeat_ignores_input() {
        let out = run_filter(repeat("ab", 3), "ignored").await.unwrap();
        assert_eq!(out, "ababab");
    }
}

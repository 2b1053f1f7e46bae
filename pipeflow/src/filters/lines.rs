//! Line-oriented stages.
//!
//! Lines are separated by `\n`. Predicates and replacements see a line
//! without its terminator; the terminator is written back only when the
//! input line had one.

use super::next_line;
use crate::context::Session;
use crate::errors::Result;
use crate::stages::{Stage, StageRef};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

/// Emits the input lines for which a predicate holds.
pub struct Filter<P> {
    pred: P,
}

impl<P> fmt::Debug for Filter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").finish_non_exhaustive()
    }
}

#[async_trait]
impl<P> Stage for Filter<P>
where
    P: Fn(&[u8]) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        "filter"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut reader = BufReader::new(session.input());
        let mut writer = BufWriter::new(session.output());
        let mut line = Vec::new();

        while let Some(terminated) = next_line(&mut reader, &mut line).await? {
            if (self.pred)(&line) {
                writer.write_all(&line).await?;
                if terminated {
                    writer.write_all(b"\n").await?;
                }
            }
        }
        writer.flush().await?;
        Ok(())
    }
}

/// Returns a stage emitting the input lines for which `pred` returns true.
pub fn filter<P>(pred: P) -> StageRef
where
    P: Fn(&[u8]) -> bool + Send + Sync + 'static,
{
    Arc::new(Filter { pred })
}

/// Rewrites every input line.
pub struct Replace<F> {
    func: F,
}

impl<F> fmt::Debug for Replace<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replace").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Stage for Replace<F>
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync,
{
    fn name(&self) -> &str {
        "replace"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut reader = BufReader::new(session.input());
        let mut writer = BufWriter::new(session.output());
        let mut line = Vec::new();

        while let Some(terminated) = next_line(&mut reader, &mut line).await? {
            writer.write_all(&(self.func)(&line)).await?;
            if terminated {
                writer.write_all(b"\n").await?;
            }
        }
        writer.flush().await?;
        Ok(())
    }
}

/// Returns a stage writing `func(line)` for every input line.
pub fn replace<F>(func: F) -> StageRef
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    Arc::new(Replace { func })
}

/// Line window selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// The first `n` lines.
    First(usize),
    /// All lines after the first `n`.
    TrimFirst(usize),
    /// The last `n` lines.
    Last(usize),
    /// All lines except the last `n`.
    TrimLast(usize),
}

/// Selects a window of input lines.
#[derive(Debug, Clone, Copy)]
pub struct Lines {
    window: Window,
}

impl Lines {
    /// Creates a window selection stage.
    #[must_use]
    pub fn new(window: Window) -> Self {
        Self { window }
    }
}

#[async_trait]
impl Stage for Lines {
    fn name(&self) -> &str {
        "lines"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut reader = BufReader::new(session.input());
        let mut writer = BufWriter::new(session.output());

        match self.window {
            Window::First(n) => {
                let mut line = Vec::new();
                for _ in 0..n {
                    match next_line(&mut reader, &mut line).await? {
                        Some(terminated) => write_line(&mut writer, &line, terminated).await?,
                        None => break,
                    }
                }
            }
            Window::TrimFirst(n) => {
                let mut line = Vec::new();
                let mut skipped = 0;
                while skipped < n && next_line(&mut reader, &mut line).await?.is_some() {
                    skipped += 1;
                }
                tokio::io::copy(&mut reader, &mut writer).await?;
            }
            Window::Last(n) => {
                let mut kept: VecDeque<(Vec<u8>, bool)> = VecDeque::with_capacity(n);
                let mut line = Vec::new();
                while let Some(terminated) = next_line(&mut reader, &mut line).await? {
                    if n == 0 {
                        continue;
                    }
                    if kept.len() == n {
                        kept.pop_front();
                    }
                    kept.push_back((std::mem::take(&mut line), terminated));
                }
                for (line, terminated) in &kept {
                    write_line(&mut writer, line, *terminated).await?;
                }
            }
            Window::TrimLast(n) => {
                let mut held: VecDeque<(Vec<u8>, bool)> = VecDeque::with_capacity(n + 1);
                let mut line = Vec::new();
                while let Some(terminated) = next_line(&mut reader, &mut line).await? {
                    held.push_back((std::mem::take(&mut line), terminated));
                    if held.len() > n {
                        if let Some((line, terminated)) = held.pop_front() {
                            write_line(&mut writer, &line, terminated).await?;
                        }
                    }
                }
            }
        }

        writer.flush().await?;
        Ok(())
    }
}

async fn write_line<W>(writer: &mut W, line: &[u8], terminated: bool) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer.write_all(line).await?;
    if terminated {
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

/// Returns a stage emitting the first `n` input lines.
pub fn first(n: usize) -> StageRef {
    Arc::new(Lines::new(Window::First(n)))
}

/// Returns a stage emitting everything after the first `n` input lines.
pub fn trim_first(n: usize) -> StageRef {
    Arc::new(Lines::new(Window::TrimFirst(n)))
}

/// Returns a stage emitting the last `n` input lines.
pub fn last(n: usize) -> StageRef {
    Arc::new(Lines::new(Window::Last(n)))
}

/// Returns a stage emitting all but the last `n` input lines.
pub fn trim_last(n: usize) -> StageRef {
    Arc::new(Lines::new(Window::TrimLast(n)))
}

/// Emits the first `n` bytes of input.
#[derive(Debug, Clone, Copy)]
pub struct FirstBytes {
    n: u64,
}

#[async_trait]
impl Stage for FirstBytes {
    fn name(&self) -> &str {
        "first_bytes"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut input = session.input().take(self.n);
        let mut output = session.output();
        tokio::io::copy(&mut input, &mut output).await?;
        output.flush().await?;
        Ok(())
    }
}

/// Returns a stage emitting the first `n` bytes of input.
pub fn first_bytes(n: u64) -> StageRef {
    Arc::new(FirstBytes { n })
}

/// Reads whitespace-separated words from input and runs the stage built
/// from them.
pub struct Varargs<F> {
    build: F,
}

impl<F> fmt::Debug for Varargs<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Varargs").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Stage for Varargs<F>
where
    F: Fn(Vec<String>) -> StageRef + Send + Sync,
{
    fn name(&self) -> &str {
        "varargs"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut raw = Vec::new();
        session.input().read_to_end(&mut raw).await?;
        let words = String::from_utf8_lossy(&raw)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let stage = (self.build)(words);
        stage.run(session).await
    }
}

/// Returns a stage that collects the input's words and runs `build(words)`.
pub fn varargs<F>(build: F) -> StageRef
where
    F: Fn(Vec<String>) -> StageRef + Send + Sync + 'static,
{
    Arc::new(Varargs { build })
}

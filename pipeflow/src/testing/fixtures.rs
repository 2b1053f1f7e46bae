//! Fixtures for driving stages over in-memory data.

use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

use crate::context::{InputStream, OutputStream, Session, SharedBuffer};
use crate::errors::Result;
use crate::stages::StageRef;

/// Runs `stage` with `input` as its input and returns its output as text.
///
/// Invalid UTF-8 in the output is replaced with `U+FFFD`.
pub async fn run_filter(stage: StageRef, input: impl Into<Vec<u8>>) -> Result<String> {
    let buffer = SharedBuffer::new();
    let mut session = Session::new()
        .with_stdin(InputStream::from_bytes(input))
        .with_stdout(buffer.output());
    stage.run(&mut session).await?;
    Ok(String::from_utf8_lossy(&buffer.take()).into_owned())
}

/// The byte expected at `offset` in a pattern stream.
fn pattern_byte(offset: u64) -> u8 {
    b'a' + (offset % 26) as u8
}

/// Returns `len` bytes of the repeating pattern `abc..z`.
#[must_use]
pub fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len as u64).map(pattern_byte).collect()
}

#[derive(Debug, Default)]
struct CheckState {
    seen: u64,
    mismatch: Option<u64>,
}

/// A sink that verifies written bytes against the [`pattern_bytes`] pattern
/// without keeping them.
#[derive(Debug, Clone, Default)]
pub struct PatternCheck {
    state: Arc<Mutex<CheckState>>,
}

impl PatternCheck {
    /// Creates an empty checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a stream handle writing into this checker.
    #[must_use]
    pub fn output(&self) -> OutputStream {
        OutputStream::new(self.clone())
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub fn seen(&self) -> u64 {
        self.state.lock().seen
    }

    /// Returns the offset of the first byte that broke the pattern.
    #[must_use]
    pub fn first_mismatch(&self) -> Option<u64> {
        self.state.lock().mismatch
    }
}

impl AsyncWrite for PatternCheck {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock();
        if state.mismatch.is_none() {
            let start = state.seen;
            state.mismatch = buf
                .iter()
                .zip(start..)
                .find(|(byte, offset)| **byte != pattern_byte(*offset))
                .map(|(_, offset)| offset);
        }
        state.seen += buf.len() as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A sink whose every write fails with the same error.
#[derive(Debug, Clone)]
pub struct BrokenSink {
    message: &'static str,
}

impl BrokenSink {
    /// Creates a sink failing with `message`.
    #[must_use]
    pub fn new(message: &'static str) -> Self {
        Self { message }
    }

    /// Returns a stream handle writing into this sink.
    #[must_use]
    pub fn output(&self) -> OutputStream {
        OutputStream::new(self.clone())
    }

    fn error(&self) -> io::Error {
        io::Error::new(io::ErrorKind::Other, self.message)
    }
}

impl AsyncWrite for BrokenSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(self.error()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(self.error()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_pattern_bytes() {
        let bytes = pattern_bytes(28);
        assert_eq!(&bytes[..3], b"abc");
        assert_eq!(&bytes[25..], b"zab");
    }

    #[tokio::test]
    async fn test_pattern_check() {
        let check = PatternCheck::new();
        let mut out = check.output();
        out.write_all(&pattern_bytes(100)).await.unwrap();
        assert_eq!(check.seen(), 100);
        assert_eq!(check.first_mismatch(), None);

        out.write_all(b"!").await.unwrap();
        assert_eq!(check.first_mismatch(), Some(100));
    }

    #[tokio::test]
    async fn test_broken_sink_rejects_writes() {
        let err = BrokenSink::new("sink broke")
            .output()
            .write_all(b"x")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "sink broke");
    }
}

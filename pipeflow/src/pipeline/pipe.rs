//! Bounded in-memory pipe connecting adjacent stages of a line.
//!
//! ```text
//!   PipeWriter ──▶ [VecDeque<u8>] ──▶ PipeReader
//!                  ├── writer waits when full
//!                  ├── reader waits when empty
//!                  ├── writer closed → EOF once drained
//!                  └── reader closed → writer gets BrokenPipe
//! ```
//!
//! Both ends are clonable because a session handed to a stage shares them.
//! Closing is explicit and idempotent; any clone may close its end.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Default pipe capacity, matching the Linux kernel pipe buffer.
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

struct PipeState {
    buffer: VecDeque<u8>,
    capacity: usize,
    writer_closed: bool,
    reader_closed: bool,
    read_wakers: Vec<Waker>,
    write_wakers: Vec<Waker>,
}

fn register(wakers: &mut Vec<Waker>, waker: &Waker) {
    if !wakers.iter().any(|w| w.will_wake(waker)) {
        wakers.push(waker.clone());
    }
}

fn wake_all(wakers: &mut Vec<Waker>) {
    for waker in wakers.drain(..) {
        waker.wake();
    }
}

/// Reading end of a pipe.
#[derive(Clone)]
pub struct PipeReader {
    state: Arc<Mutex<PipeState>>,
}

/// Writing end of a pipe.
#[derive(Clone)]
pub struct PipeWriter {
    state: Arc<Mutex<PipeState>>,
}

/// Creates a pipe with the default capacity.
#[must_use]
pub fn pipe() -> (PipeReader, PipeWriter) {
    pipe_with_capacity(PIPE_BUFFER_SIZE)
}

/// Creates a pipe that buffers at most `capacity` bytes.
#[must_use]
pub fn pipe_with_capacity(capacity: usize) -> (PipeReader, PipeWriter) {
    let capacity = capacity.max(1);
    let state = Arc::new(Mutex::new(PipeState {
        buffer: VecDeque::with_capacity(capacity.min(8192)),
        capacity,
        writer_closed: false,
        reader_closed: false,
        read_wakers: Vec::new(),
        write_wakers: Vec::new(),
    }));
    (
        PipeReader {
            state: Arc::clone(&state),
        },
        PipeWriter { state },
    )
}

impl PipeReader {
    /// Closes the reading end. Pending and future writes fail with
    /// `BrokenPipe`; buffered bytes are dropped.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.reader_closed = true;
        state.buffer.clear();
        wake_all(&mut state.write_wakers);
        wake_all(&mut state.read_wakers);
    }

    /// Returns true once the reading end has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().reader_closed
    }
}

impl PipeWriter {
    /// Closes the writing end. The reader sees EOF after draining what was
    /// already written.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.writer_closed = true;
        wake_all(&mut state.read_wakers);
        wake_all(&mut state.write_wakers);
    }

    /// Returns true once the writing end has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().writer_closed
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.state.lock();

        if state.reader_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "read on closed pipe",
            )));
        }

        if !state.buffer.is_empty() {
            let to_read = buf.remaining().min(state.buffer.len());
            let (front, back) = state.buffer.as_slices();
            if to_read <= front.len() {
                buf.put_slice(&front[..to_read]);
            } else {
                buf.put_slice(front);
                buf.put_slice(&back[..to_read - front.len()]);
            }
            state.buffer.drain(..to_read);
            wake_all(&mut state.write_wakers);
            Poll::Ready(Ok(()))
        } else if state.writer_closed {
            Poll::Ready(Ok(()))
        } else {
            register(&mut state.read_wakers, cx.waker());
            Poll::Pending
        }
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock();

        if state.reader_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipe reader closed",
            )));
        }
        if state.writer_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write on closed pipe",
            )));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let available = state.capacity.saturating_sub(state.buffer.len());
        if available > 0 {
            let to_write = buf.len().min(available);
            state.buffer.extend(&buf[..to_write]);
            wake_all(&mut state.read_wakers);
            Poll::Ready(Ok(to_write))
        } else {
            register(&mut state.write_wakers, cx.waker());
            Poll::Pending
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.close();
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes the pipe ends a line worker owns when dropped, whatever path the
/// worker exits through.
#[derive(Debug, Default)]
pub(crate) struct CloseOnExit {
    pub(crate) reader: Option<PipeReader>,
    pub(crate) writer: Option<PipeWriter>,
}

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.close();
        }
        if let Some(reader) = self.reader.take() {
            reader.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_basic_write_read() {
        let (mut reader, mut writer) = pipe_with_capacity(1024);

        writer.write_all(b"hello").await.unwrap();
        writer.close();

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn test_backpressure_preserves_order() {
        let (mut reader, mut writer) = pipe_with_capacity(16);

        let data: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();

        let write_task = tokio::spawn(async move {
            writer.write_all(&data).await.unwrap();
            writer.close();
        });

        let mut output = Vec::new();
        reader.read_to_end(&mut output).await.unwrap();
        write_task.await.unwrap();

        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn test_close_writer_unblocks_reader() {
        let (mut reader, writer) = pipe_with_capacity(1024);

        let read_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.unwrap();
            buf
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.close();

        let result = tokio::time::timeout(Duration::from_secs(2), read_task).await;
        assert!(result.is_ok(), "reader hung after writer closed");
        assert!(result.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_reader_unblocks_writer() {
        let (reader, mut writer) = pipe_with_capacity(8);

        let write_task = tokio::spawn(async move {
            let data = vec![0u8; 1024];
            writer.write_all(&data).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        reader.close();

        let result = tokio::time::timeout(Duration::from_secs(2), write_task)
            .await
            .expect("writer hung after reader closed")
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (_reader, mut writer) = pipe();
        writer.close();

        let err = writer.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_clones_share_ends() {
        let (reader, writer) = pipe();
        let mut writer_clone = writer.clone();
        let mut reader_clone = reader.clone();

        writer_clone.write_all(b"shared").await.unwrap();
        writer.close();
        assert!(writer_clone.is_closed());

        let mut buf = Vec::new();
        reader_clone.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"shared");
    }

    #[tokio::test]
    async fn test_guard_closes_both_ends() {
        let (upstream_reader, _upstream_writer) = pipe();
        let (_downstream_reader, downstream_writer) = pipe();

        {
            let _guard = CloseOnExit {
                reader: Some(upstream_reader.clone()),
                writer: Some(downstream_writer.clone()),
            };
        }

        assert!(upstream_reader.is_closed());
        assert!(downstream_writer.is_closed());
    }
}

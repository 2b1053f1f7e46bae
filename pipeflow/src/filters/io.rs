//! Stages that move bytes between the session and other streams.

use super::CHUNK_SIZE;
use crate::context::{InputStream, OutputStream, Session};
use crate::errors::Result;
use crate::stages::{Stage, StageRef};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Copies input to both the session output and another stream.
#[derive(Debug, Clone)]
pub struct Tee {
    copy: OutputStream,
}

#[async_trait]
impl Stage for Tee {
    fn name(&self) -> &str {
        "tee"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut input = session.input();
        let mut output = session.output();
        let mut copy = self.copy.clone();
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n]).await?;
            copy.write_all(&buf[..n]).await?;
        }
        output.flush().await?;
        copy.flush().await?;
        Ok(())
    }
}

/// Returns a stage passing its input through while also writing it to `copy`.
pub fn tee(copy: OutputStream) -> StageRef {
    Arc::new(Tee { copy })
}

/// Writes input to a stream instead of the session output.
#[derive(Debug, Clone)]
pub struct WriteTo {
    target: OutputStream,
}

#[async_trait]
impl Stage for WriteTo {
    fn name(&self) -> &str {
        "write_to"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut input = session.input();
        let mut target = self.target.clone();
        tokio::io::copy(&mut input, &mut target).await?;
        target.flush().await?;
        Ok(())
    }
}

/// Returns a stage copying its input to `target`.
pub fn write_to(target: OutputStream) -> StageRef {
    Arc::new(WriteTo { target })
}

/// Writes another stream's bytes to the session output.
#[derive(Debug, Clone)]
pub struct ReadFrom {
    source: InputStream,
}

#[async_trait]
impl Stage for ReadFrom {
    fn name(&self) -> &str {
        "read_from"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut source = self.source.clone();
        let mut output = session.output();
        tokio::io::copy(&mut source, &mut output).await?;
        output.flush().await?;
        Ok(())
    }
}

/// Returns a stage copying `source` to its output, ignoring its own input.
pub fn read_from(source: InputStream) -> StageRef {
    Arc::new(ReadFrom { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SharedBuffer;
    use crate::errors::PipeError;
    use crate::testing::run_filter;
    use std::io;

    #[tokio::test]
    async fn test_tee_duplicates_input() {
        let copy = SharedBuffer::new();
        let out = run_filter(tee(copy.output()), "both ways").await.unwrap();
        assert_eq!(out, "both ways");
        assert_eq!(copy.contents(), b"both ways");
    }

    #[tokio::test]
    async fn test_write_to_diverts_input() {
        let target = SharedBuffer::new();
        let out = run_filter(write_to(target.output()), "diverted").await.unwrap();
        assert!(out.is_empty());
        assert_eq!(target.contents(), b"diverted");
    }

    #[tokio::test]
    async fn test_read_from_ignores_session_input() {
        let out = run_filter(read_from(InputStream::from_bytes("elsewhere")), "here")
            .await
            .unwrap();
        assert_eq!(out, "elsewhere");
    }

    #[tokio::test]
    async fn test_read_error_propagates() {
        let failing = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "gone"))
            .build();
        let buffer = SharedBuffer::new();
        let mut session = Session::new().with_stdout(buffer.output());

        let err = read_from(InputStream::new(failing))
            .run(&mut session)
            .await
            .unwrap_err();

        assert!(matches!(&err, PipeError::Io(e) if e.kind() == io::ErrorKind::ConnectionReset));
    }
}

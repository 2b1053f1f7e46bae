//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::context::Session;
use crate::errors::{Message, PipeError, Result};
use crate::stages::Stage;

/// What a [`RecordingStage`] saw on one run.
#[derive(Debug, Clone, Default)]
pub struct RecordedRun {
    /// Working directory of the session.
    pub dir: Option<PathBuf>,
    /// Environment of the session.
    pub env: Vec<String>,
    /// Whether the session carried an input stream.
    pub has_stdin: bool,
    /// Whether the session carried an output stream.
    pub has_stdout: bool,
}

/// A stage that records the session it was run with.
#[derive(Debug, Default)]
pub struct RecordingStage {
    name: String,
    runs: Mutex<Vec<RecordedRun>>,
}

impl RecordingStage {
    /// Creates a new recording stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Returns all recorded runs.
    #[must_use]
    pub fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().clone()
    }

    /// Returns the number of runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }

    /// Clears recorded runs.
    pub fn clear(&self) {
        self.runs.lock().clear();
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        self.runs.lock().push(RecordedRun {
            dir: session.dir.clone(),
            env: session.env.clone(),
            has_stdin: session.stdin.is_some(),
            has_stdout: session.stdout.is_some(),
        });
        Ok(())
    }
}

/// A stage that always fails with the same error value.
#[derive(Debug, Clone)]
pub struct FailingStage {
    name: String,
    error: Arc<dyn std::error::Error + Send + Sync>,
}

impl FailingStage {
    /// Creates a failing stage with a message error.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: Arc::new(Message(error.into())),
        }
    }

    /// Returns the error value every run fails with.
    #[must_use]
    pub fn error(&self) -> Arc<dyn std::error::Error + Send + Sync> {
        Arc::clone(&self.error)
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _session: &mut Session) -> Result<()> {
        Err(PipeError::Custom(Arc::clone(&self.error)))
    }
}

/// A stage that takes time to execute and gives up when its scope fires.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }

    /// Creates a slow stage with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(self.delay) => Ok(()),
            cause = session.scope().done() => Err(cause.into()),
        }
    }
}

/// A stage that ignores its streams and waits for its scope to fire.
#[derive(Debug, Default)]
pub struct BlockingStage;

#[async_trait]
impl Stage for BlockingStage {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        Err(session.scope().done().await.into())
    }
}

/// A stage that writes fixed bytes and ignores its input.
#[derive(Debug, Clone)]
pub struct EmitStage {
    bytes: Vec<u8>,
}

impl EmitStage {
    /// Creates a stage writing `bytes`.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
impl Stage for EmitStage {
    fn name(&self) -> &str {
        "emit"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut output = session.output();
        output.write_all(&self.bytes).await?;
        output.flush().await?;
        Ok(())
    }
}

/// A stage that copies input to output, upper-casing ASCII letters.
#[derive(Debug, Default)]
pub struct UppercaseStage;

#[async_trait]
impl Stage for UppercaseStage {
    fn name(&self) -> &str {
        "uppercase"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut input = session.input();
        let mut output = session.output();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            buf[..n].make_ascii_uppercase();
            output.write_all(&buf[..n]).await?;
        }
        output.flush().await?;
        Ok(())
    }
}

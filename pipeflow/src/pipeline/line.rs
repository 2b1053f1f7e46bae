//! Concurrent connected composition.

use super::pipe::{pipe_with_capacity, CloseOnExit, PipeReader, PipeWriter, PIPE_BUFFER_SIZE};
use crate::context::{InputStream, OutputStream, Session};
use crate::errors::{PipeError, Result};
use crate::stages::{Stage, StageRef};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Runs stages concurrently, each reading what the previous one writes.
///
/// The first stage reads the session's input and the last stage writes the
/// session's output; adjacent stages are joined by in-memory pipes. Every
/// stage runs on its own fork of the session.
///
/// Only the last stage's error is returned. An earlier stage that fails
/// closes its pipe, which the stages after it observe as an early end of
/// input or a broken pipe; the failure itself is only logged.
#[derive(Debug, Clone)]
pub struct Line {
    stages: Vec<StageRef>,
    buffer_size: usize,
}

impl Line {
    /// Creates a connected composition.
    pub fn new(stages: impl IntoIterator<Item = StageRef>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
            buffer_size: PIPE_BUFFER_SIZE,
        }
    }

    /// Sets the capacity of each inter-stage pipe.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait]
impl Stage for Line {
    fn name(&self) -> &str {
        "line"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let Some(last) = self.stages.len().checked_sub(1) else {
            return Ok(());
        };
        debug!(stages = self.stages.len(), "starting line");

        let mut readers: Vec<PipeReader> = Vec::with_capacity(last);
        let mut writers: Vec<PipeWriter> = Vec::with_capacity(last);
        let mut handles: Vec<JoinHandle<Result<()>>> = Vec::with_capacity(self.stages.len());
        let mut stdin = session.stdin.clone();
        let mut upstream: Option<PipeReader> = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let (mut child, _release) = session.fork(None);
            let mut guard = CloseOnExit {
                reader: upstream.take(),
                writer: None,
            };
            child.stdin = stdin.take();

            if index == last {
                child.stdout = session.stdout.clone();
            } else {
                let (reader, writer) = pipe_with_capacity(self.buffer_size);
                child.stdout = Some(OutputStream::new(writer.clone()));
                guard.writer = Some(writer.clone());
                stdin = Some(InputStream::new(reader.clone()));
                upstream = Some(reader.clone());
                readers.push(reader);
                writers.push(writer);
            }

            let stage = Arc::clone(stage);
            handles.push(tokio::spawn(async move {
                let result = stage.run(&mut child).await;
                drop(guard);
                if let Err(err) = &result {
                    if index != last {
                        debug!(index, stage = stage.name(), error = %err, "line stage failed");
                    }
                }
                result
            }));
        }

        let scope = session.scope();
        let finished = tokio::select! {
            biased;
            joined = &mut handles[last] => Ok(joined),
            cause = scope.done() => Err(cause),
        };

        match finished {
            Ok(joined) => {
                // Upstream stages keep running after a normal finish, as in a
                // shell; once the scope has fired none of them may touch a
                // stream again.
                if scope.is_cancelled() {
                    abort_all(&handles);
                }
                match joined {
                    Ok(result) => result,
                    Err(err) => Err(PipeError::Panicked(err.to_string())),
                }
            }
            Err(cause) => {
                debug!(%cause, "line cancelled");
                for writer in &writers {
                    writer.close();
                }
                for reader in &readers {
                    reader.close();
                }
                abort_all(&handles);
                Err(PipeError::Cancelled(cause))
            }
        }
    }
}

fn abort_all(handles: &[JoinHandle<Result<()>>]) {
    for handle in handles {
        handle.abort();
    }
}

/// Returns a stage running `stages` concurrently, connected output to input.
pub fn line(stages: impl IntoIterator<Item = StageRef>) -> StageRef {
    Arc::new(Line::new(stages))
}

//! Entry points that supply a root session.

use crate::context::{Session, SharedBuffer};
use crate::errors::{OutputError, Result};
use crate::stages::Stage;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

/// Runs `stage` with a fresh session.
pub async fn run(stage: &dyn Stage) -> Result<()> {
    run_with(stage, Session::new()).await
}

/// Runs `stage` with the given session.
pub async fn run_with(stage: &dyn Stage, mut session: Session) -> Result<()> {
    let run_id = Uuid::new_v4();
    let span = info_span!("pipeline_run", %run_id, stage = stage.name());
    async move {
        let result = stage.run(&mut session).await;
        match &result {
            Ok(()) => debug!("pipeline finished"),
            Err(err) => debug!(error = %err, "pipeline failed"),
        }
        result
    }
    .instrument(span)
    .await
}

/// Runs `stage` with a fresh session and returns what it wrote to its output.
pub async fn output(stage: &dyn Stage) -> std::result::Result<Vec<u8>, OutputError> {
    let buffer = SharedBuffer::new();
    let session = Session::new().with_stdout(buffer.output());
    capture(stage, session, &buffer).await
}

/// Like [`output`], with output and error output interleaved in one buffer.
pub async fn combined_output(stage: &dyn Stage) -> std::result::Result<Vec<u8>, OutputError> {
    let buffer = SharedBuffer::new();
    let session = Session::new()
        .with_stdout(buffer.output())
        .with_stderr(buffer.output());
    capture(stage, session, &buffer).await
}

async fn capture(
    stage: &dyn Stage,
    session: Session,
    buffer: &SharedBuffer,
) -> std::result::Result<Vec<u8>, OutputError> {
    let result = run_with(stage, session).await;
    let output = buffer.take();
    match result {
        Ok(()) => Ok(output),
        Err(error) => Err(OutputError { output, error }),
    }
}

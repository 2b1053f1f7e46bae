//! Stages that run another stage under a narrowed cancellation scope.

use crate::cancellation::ScopeFork;
use crate::context::Session;
use crate::errors::Result;
use crate::stages::{Stage, StageRef};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Runs a stage with a scope derived from the session's own.
///
/// The session's original scope is put back once the stage returns, and the
/// derived scope is released.
#[derive(Debug, Clone)]
pub struct WithScope {
    fork: ScopeFork,
    stage: StageRef,
}

impl WithScope {
    /// Creates a stage running `stage` under the scope produced by `fork`.
    pub fn new(fork: ScopeFork, stage: StageRef) -> Self {
        Self { fork, stage }
    }
}

#[async_trait]
impl Stage for WithScope {
    fn name(&self) -> &str {
        self.stage.name()
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let (scope, release) = self.fork.apply(session.scope());
        let original = session.set_scope(scope);
        let result = self.stage.run(session).await;
        session.set_scope(original);
        release.release();
        result
    }
}

/// Returns a stage running `stage` under the scope produced by `fork`.
pub fn with_scope(fork: ScopeFork, stage: StageRef) -> StageRef {
    Arc::new(WithScope::new(fork, stage))
}

/// Returns a stage running `stage` with a `timeout` measured from when it starts.
pub fn with_timeout(timeout: Duration, stage: StageRef) -> StageRef {
    with_scope(ScopeFork::timeout(timeout), stage)
}

/// Returns a stage running `stage` with a fixed `deadline`.
pub fn with_deadline(deadline: Instant, stage: StageRef) -> StageRef {
    with_scope(ScopeFork::deadline(deadline), stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Cause;
    use crate::stages::func;

    fn wait_for_scope() -> StageRef {
        func(|s| {
            Box::pin(async move {
                let cause = s.scope().done().await;
                Err(cause.into())
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires() {
        let mut session = Session::new();
        let err = with_timeout(Duration::from_millis(50), wait_for_scope())
            .run(&mut session)
            .await
            .unwrap_err();

        assert_eq!(err.cancel_cause(), Some(Cause::DeadlineExceeded));
        assert!(!session.scope().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let mut session = Session::new();
        let deadline = Instant::now() + Duration::from_millis(10);
        let err = with_deadline(deadline, wait_for_scope())
            .run(&mut session)
            .await
            .unwrap_err();

        assert_eq!(err.cancel_cause(), Some(Cause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_original_scope_restored() {
        let mut session = Session::new();
        let original = session.scope().clone();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let record = {
            let seen = Arc::clone(&seen);
            func(move |s| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    *seen.lock() = s.scope().deadline();
                    Ok(())
                })
            })
        };

        with_timeout(Duration::from_secs(30), record)
            .run(&mut session)
            .await
            .unwrap();

        assert!(seen.lock().is_some());
        assert!(session.scope().deadline().is_none());
        original.cancel();
        assert!(session.scope().is_cancelled());
    }

    #[tokio::test]
    async fn test_fast_stage_beats_timeout() {
        let ok = func(|_s| Box::pin(async { Ok(()) }));
        with_timeout(Duration::from_secs(5), ok)
            .run(&mut Session::new())
            .await
            .unwrap();
    }
}

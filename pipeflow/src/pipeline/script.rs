//! Sequential composition.

use crate::context::Session;
use crate::errors::{PipeError, Result};
use crate::stages::{Stage, StageRef};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Runs stages one after another against the session it is given.
///
/// Changes a stage makes to the session are visible to the stages after it
/// and to the caller. The sequence stops at the first error, which is
/// returned unchanged, or as soon as the session's scope has fired after a
/// stage returns.
#[derive(Debug, Clone)]
pub struct Source {
    stages: Vec<StageRef>,
}

impl Source {
    /// Creates a sequential composition.
    pub fn new(stages: impl IntoIterator<Item = StageRef>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
        }
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
impl Stage for Source {
    fn name(&self) -> &str {
        "source"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        for (index, stage) in self.stages.iter().enumerate() {
            stage.run(session).await?;
            if let Some(cause) = session.scope().check() {
                debug!(index, stage = stage.name(), %cause, "sequence stopped by cancellation");
                return Err(PipeError::Cancelled(cause));
            }
        }
        Ok(())
    }
}

/// Runs stages one after another against a fork of the session.
///
/// Working directory and environment changes made by the stages stay inside
/// the fork. Streams and the cancellation scope are shared with the caller.
#[derive(Debug, Clone)]
pub struct Script {
    source: Source,
}

impl Script {
    /// Creates a forked sequential composition.
    pub fn new(stages: impl IntoIterator<Item = StageRef>) -> Self {
        Self {
            source: Source::new(stages),
        }
    }
}

#[async_trait]
impl Stage for Script {
    fn name(&self) -> &str {
        "script"
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let (mut child, _release) = session.fork(None);
        self.source.run(&mut child).await
    }
}

/// Returns a stage running `stages` in sequence on a forked session.
pub fn script(stages: impl IntoIterator<Item = StageRef>) -> StageRef {
    Arc::new(Script::new(stages))
}

/// Returns a stage running `stages` in sequence on the session itself.
pub fn source(stages: impl IntoIterator<Item = StageRef>) -> StageRef {
    Arc::new(Source::new(stages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{fail_msg, func};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> StageRef {
        let counter = Arc::clone(counter);
        func(move |_s| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_source_runs_all_stages() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stage = source(vec![counting(&counter), counting(&counter), counting(&counter)]);

        stage.run(&mut Session::new()).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_source_stops_at_first_error() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stage = source(vec![
            counting(&counter),
            fail_msg("second failed"),
            counting(&counter),
        ]);

        let err = stage.run(&mut Session::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "second failed");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_source_mutations_are_visible() {
        let set_dir = func(|s| {
            Box::pin(async move {
                s.dir = Some("/var".into());
                s.set_env("STEP", "one");
                Ok(())
            })
        });
        let mut session = Session::new().with_env(["BASE=1"]);
        source(vec![set_dir]).run(&mut session).await.unwrap();

        assert_eq!(session.dir().and_then(|d| d.to_str()), Some("/var"));
        assert_eq!(session.lookup_env("STEP").as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn test_source_stops_after_cancellation() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cancel = func(|s| {
            Box::pin(async move {
                s.scope().cancel();
                Ok(())
            })
        });
        let stage = source(vec![cancel, counting(&counter)]);

        let err = stage.run(&mut Session::new()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_script_mutations_stay_in_fork() {
        let mutate = func(|s| {
            Box::pin(async move {
                s.dir = Some("/opt".into());
                s.set_env("LEAK", "yes");
                Ok(())
            })
        });
        let mut session = Session::new().with_env(["BASE=1"]);
        script(vec![mutate]).run(&mut session).await.unwrap();

        assert!(session.dir().is_none());
        assert_eq!(session.env, vec!["BASE=1".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_source_succeeds() {
        assert!(Source::new(Vec::new()).is_empty());
        source(Vec::new()).run(&mut Session::new()).await.unwrap();
    }
}

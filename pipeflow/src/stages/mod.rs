//! Stage trait and function-backed stages.
//!
//! Stages are the units of work composed into pipelines. Compositions,
//! process adapters and stream filters all implement the same trait.

use crate::context::Session;
use crate::errors::{Message, PipeError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt::Debug;
use std::sync::Arc;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns a short name used in logs.
    fn name(&self) -> &str {
        "stage"
    }

    /// Runs the stage against `session`.
    ///
    /// The stage reads `session.stdin`, writes `session.stdout` and
    /// `session.stderr`, and may modify the session. Errors are returned to
    /// the caller unchanged by every composition.
    async fn run(&self, session: &mut Session) -> Result<()>;
}

/// A stage shared between compositions.
pub type StageRef = Arc<dyn Stage>;

/// A stage backed by an async closure.
///
/// The closure borrows the session for the duration of the returned future.
pub struct Func<F> {
    name: String,
    func: F,
}

impl<F> Func<F>
where
    F: for<'a> Fn(&'a mut Session) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    /// Creates a new function-backed stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for Func<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Func").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for Func<F>
where
    F: for<'a> Fn(&'a mut Session) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        (self.func)(session).await
    }
}

/// Wraps an async closure as a stage.
///
/// ```rust,ignore
/// let upper = func(|s| Box::pin(async move {
///     let mut text = String::new();
///     s.input().read_to_string(&mut text).await?;
///     s.output().write_all(text.to_uppercase().as_bytes()).await?;
///     Ok(())
/// }));
/// ```
pub fn func<F>(func: F) -> StageRef
where
    F: for<'a> Fn(&'a mut Session) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(Func::new("func", func))
}

/// Like [`func`], with a name for logs.
pub fn named<F>(name: impl Into<String>, func: F) -> StageRef
where
    F: for<'a> Fn(&'a mut Session) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(Func::new(name, func))
}

/// A stage that always fails with the same error.
#[derive(Debug, Clone)]
pub struct Fail {
    error: Arc<dyn std::error::Error + Send + Sync>,
}

#[async_trait]
impl Stage for Fail {
    fn name(&self) -> &str {
        "fail"
    }

    async fn run(&self, _session: &mut Session) -> Result<()> {
        Err(PipeError::Custom(Arc::clone(&self.error)))
    }
}

/// Returns a stage that fails with `error` every time it runs.
///
/// The same error instance is returned on every run, so callers can compare
/// it by identity.
pub fn fail(error: Arc<dyn std::error::Error + Send + Sync>) -> StageRef {
    Arc::new(Fail { error })
}

/// Returns a stage that fails with a formatted message.
pub fn fail_msg(message: impl Into<String>) -> StageRef {
    fail(Arc::new(Message(message.into())))
}

//! External process stage.

use crate::context::{InputStream, OutputStream, Session};
use crate::errors::{PipeError, Result, StreamKind};
use crate::stages::{Stage, StageRef};
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Runs an external program with the session's directory, environment and
/// streams.
///
/// Each stream the session provides is copied to or from the process by its
/// own worker while the process runs; streams the session lacks are connected
/// to the null device. A copy failure or the session's scope firing kills the
/// process and takes precedence over its exit status. That includes a broken
/// pipe on stdin from a process that exits without reading all of its input,
/// unless [`Exec::with_ignore_stdin_broken_pipe`] is set.
#[derive(Debug, Clone)]
pub struct Exec {
    program: String,
    args: Vec<String>,
    ignore_stdin_broken_pipe: bool,
}

impl Exec {
    /// Creates a process stage for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            ignore_stdin_broken_pipe: false,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Treats a broken pipe while feeding stdin as success, leaving the
    /// outcome to the exit status.
    #[must_use]
    pub fn with_ignore_stdin_broken_pipe(mut self, ignore: bool) -> Self {
        self.ignore_stdin_broken_pipe = ignore;
        self
    }

    /// Returns the program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn command(&self, session: &Session) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);

        if let Some(dir) = session.dir() {
            cmd.current_dir(dir);
        }
        if !session.env.is_empty() {
            cmd.env_clear();
            for entry in &session.env {
                match entry.split_once('=') {
                    Some((key, value)) => cmd.env(key, value),
                    None => cmd.env(entry, ""),
                };
            }
        }

        cmd.stdin(piped_if(session.stdin.is_some()));
        cmd.stdout(piped_if(session.stdout.is_some()));
        cmd.stderr(piped_if(session.stderr.is_some()));
        cmd
    }

    async fn kill(&self, child: &mut Child) {
        if let Err(err) = child.kill().await {
            warn!(program = %self.program, error = %err, "failed to kill process");
        }
    }
}

fn piped_if(wired: bool) -> Stdio {
    if wired {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

/// Copy workers for one process, reporting the first failure.
struct Workers {
    errors: mpsc::Receiver<PipeError>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    fn start(session: &Session, child: &mut Child, ignore_broken_stdin: bool) -> Self {
        let wired = [
            session.stdin.is_some(),
            session.stdout.is_some(),
            session.stderr.is_some(),
        ];
        let capacity = wired.iter().filter(|w| **w).count().max(1);
        let (tx, errors) = mpsc::channel(capacity);
        let mut handles = Vec::with_capacity(capacity);

        if let (Some(input), Some(pipe)) = (session.stdin.clone(), child.stdin.take()) {
            handles.push(tokio::spawn(feed_stdin(
                input,
                pipe,
                ignore_broken_stdin,
                tx.clone(),
            )));
        }
        if let (Some(output), Some(pipe)) = (session.stdout.clone(), child.stdout.take()) {
            handles.push(tokio::spawn(drain(StreamKind::Stdout, pipe, output, tx.clone())));
        }
        if let (Some(output), Some(pipe)) = (session.stderr.clone(), child.stderr.take()) {
            handles.push(tokio::spawn(drain(StreamKind::Stderr, pipe, output, tx.clone())));
        }

        Self { errors, handles }
    }

    /// Waits for the first copy error, or `None` once every worker finished
    /// cleanly.
    async fn first_error(&mut self) -> Option<PipeError> {
        self.errors.recv().await
    }

    fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn feed_stdin<W>(
    mut input: InputStream,
    mut pipe: W,
    ignore_broken: bool,
    errors: mpsc::Sender<PipeError>,
) where
    W: AsyncWrite + Unpin,
{
    let result = async {
        tokio::io::copy(&mut input, &mut pipe).await?;
        pipe.shutdown().await
    }
    .await;
    drop(pipe);

    match result {
        Err(err) if ignore_broken && err.kind() == io::ErrorKind::BrokenPipe => {}
        Err(err) => {
            let _ = errors.try_send(PipeError::stream(StreamKind::Stdin, err));
        }
        Ok(()) => {}
    }
}

async fn drain<R>(
    stream: StreamKind,
    mut pipe: R,
    mut output: OutputStream,
    errors: mpsc::Sender<PipeError>,
) where
    R: AsyncRead + Unpin,
{
    let result = async {
        tokio::io::copy(&mut pipe, &mut output).await?;
        output.flush().await
    }
    .await;

    if let Err(err) = result {
        let _ = errors.try_send(PipeError::stream(stream, err));
    }
}

#[async_trait]
impl Stage for Exec {
    fn name(&self) -> &str {
        &self.program
    }

    async fn run(&self, session: &mut Session) -> Result<()> {
        let mut child = self.command(session).spawn().map_err(|source| PipeError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        debug!(program = %self.program, args = ?self.args, pid = child.id(), "process started");

        let scope = session.scope().clone();
        let mut workers = Workers::start(session, &mut child, self.ignore_stdin_broken_pipe);

        tokio::select! {
            first = workers.first_error() => {
                if let Some(err) = first {
                    debug!(program = %self.program, error = %err, "stream copy failed");
                    workers.abort();
                    self.kill(&mut child).await;
                    return Err(err);
                }
            }
            cause = scope.done() => {
                debug!(program = %self.program, %cause, "killing cancelled process");
                workers.abort();
                self.kill(&mut child).await;
                return Err(PipeError::Cancelled(cause));
            }
        }

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                debug!(program = %self.program, %status, "process exited");
                if status.success() {
                    Ok(())
                } else {
                    Err(PipeError::Exit {
                        program: self.program.clone(),
                        status,
                    })
                }
            }
            cause = scope.done() => {
                debug!(program = %self.program, %cause, "killing cancelled process");
                self.kill(&mut child).await;
                Err(PipeError::Cancelled(cause))
            }
        }
    }
}

/// Returns a stage that runs `program` with `args`.
pub fn exec<I, S>(program: impl Into<String>, args: I) -> StageRef
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Arc::new(Exec::new(program).with_args(args))
}

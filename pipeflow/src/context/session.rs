//! The execution context handed to every stage.

use super::{InputStream, OutputStream};
use crate::cancellation::{Release, Scope, ScopeFork};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The state a stage runs against.
///
/// A stage may modify the session it is given; sequential compositions rely
/// on this so later stages observe earlier stages' changes. Stages should
/// respect the session's cancellation scope.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Input stream, if one exists. A missing input reads as empty.
    pub stdin: Option<InputStream>,
    /// Output stream. A missing output discards.
    pub stdout: Option<OutputStream>,
    /// Error output stream. A missing error output discards.
    pub stderr: Option<OutputStream>,
    /// Working directory. `None` means the process's current directory.
    pub dir: Option<PathBuf>,
    /// Environment as `KEY=VALUE` entries. An empty list means the process
    /// environment is inherited.
    pub env: Vec<String>,
    scope: Scope,
    values: HashMap<String, serde_json::Value>,
}

impl Session {
    /// Creates a session with no streams, an inherited environment, the
    /// current directory and a fresh root scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the input stream.
    #[must_use]
    pub fn with_stdin(mut self, stdin: InputStream) -> Self {
        self.stdin = Some(stdin);
        self
    }

    /// Sets the output stream.
    #[must_use]
    pub fn with_stdout(mut self, stdout: OutputStream) -> Self {
        self.stdout = Some(stdout);
        self
    }

    /// Sets the error output stream.
    #[must_use]
    pub fn with_stderr(mut self, stderr: OutputStream) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Replaces the environment.
    #[must_use]
    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the cancellation scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Attaches a caller value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Returns the cancellation scope.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Replaces the cancellation scope, returning the previous one.
    pub fn set_scope(&mut self, scope: Scope) -> Scope {
        std::mem::replace(&mut self.scope, scope)
    }

    /// Returns the working directory, if one is set.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Returns the input stream, or an empty one.
    #[must_use]
    pub fn input(&self) -> InputStream {
        self.stdin.clone().unwrap_or_else(InputStream::empty)
    }

    /// Returns the output stream, or a discarding one.
    #[must_use]
    pub fn output(&self) -> OutputStream {
        self.stdout.clone().unwrap_or_else(OutputStream::sink)
    }

    /// Returns the error output stream, or a discarding one.
    #[must_use]
    pub fn error_output(&self) -> OutputStream {
        self.stderr.clone().unwrap_or_else(OutputStream::sink)
    }

    /// Looks up an environment variable.
    ///
    /// The process environment is only consulted when the session
    /// environment is empty.
    #[must_use]
    pub fn lookup_env(&self, key: &str) -> Option<String> {
        if self.env.is_empty() {
            return std::env::var(key).ok();
        }
        self.env.iter().rev().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
    }

    /// Sets an environment variable.
    ///
    /// An empty environment is first seeded from the process environment so
    /// that setting one variable does not drop the inherited ones.
    pub fn set_env(&mut self, key: &str, value: &str) {
        let mut env = self.seeded_env();
        env.retain(|entry| entry_key(entry) != key);
        env.push(format!("{key}={value}"));
        self.env = env;
    }

    /// Removes an environment variable.
    pub fn remove_env(&mut self, key: &str) {
        let mut env = self.seeded_env();
        env.retain(|entry| entry_key(entry) != key);
        self.env = env;
    }

    fn seeded_env(&self) -> Vec<String> {
        if self.env.is_empty() {
            std::env::vars().map(|(k, v)| format!("{k}={v}")).collect()
        } else {
            self.env.clone()
        }
    }

    /// Returns a caller value.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Attaches a caller value, returning the previous one.
    pub fn insert_value(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.values.insert(key.into(), value)
    }

    /// Forks the session.
    ///
    /// The fork shares stream handles with the receiver and owns a copy of
    /// the environment and values. With a transform, the fork gets a scope
    /// derived from the receiver's and a [`Release`] that cancels it;
    /// otherwise it shares the receiver's scope and the release is a no-op.
    #[must_use]
    pub fn fork(&self, fork: Option<&ScopeFork>) -> (Self, Release) {
        let mut child = self.clone();
        match fork {
            Some(fork) => {
                let (scope, release) = fork.apply(&self.scope);
                child.scope = scope;
                (child, release)
            }
            None => (child, Release::noop()),
        }
    }
}

fn entry_key(entry: &str) -> &str {
    entry.split_once('=').map_or(entry, |(k, _)| k)
}

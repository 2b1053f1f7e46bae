//! Tests for session construction and forking.

use super::*;
use crate::cancellation::ScopeFork;
use crate::errors::Cause;
use pretty_assertions::assert_eq;
use std::time::Duration;

#[test]
fn test_new_session_is_empty() {
    let session = Session::new();
    assert!(session.stdin.is_none());
    assert!(session.stdout.is_none());
    assert!(session.stderr.is_none());
    assert!(session.dir().is_none());
    assert!(session.env.is_empty());
    assert!(!session.scope().is_cancelled());
}

#[test]
fn test_fork_without_transform_shares_scope_and_streams() {
    let buffer = SharedBuffer::new();
    let parent = Session::new()
        .with_stdout(buffer.output())
        .with_env(["A=1"]);

    let (child, release) = parent.fork(None);
    assert!(release.is_noop());
    assert!(child.stdout.as_ref().unwrap().same_sink(parent.stdout.as_ref().unwrap()));

    child.scope().cancel();
    assert!(parent.scope().is_cancelled());
}

#[test]
fn test_fork_copies_environment() {
    let parent = Session::new().with_env(["A=1", "B=2"]);
    let (mut child, _release) = parent.fork(None);

    child.set_env("A", "changed");
    child.set_env("C", "3");
    child.dir = Some("/tmp".into());

    assert_eq!(parent.env, vec!["A=1".to_string(), "B=2".to_string()]);
    assert!(parent.dir().is_none());
    assert_eq!(child.lookup_env("A").as_deref(), Some("changed"));
    assert_eq!(child.lookup_env("C").as_deref(), Some("3"));
}

#[test]
fn test_fork_with_transform_narrows_scope() {
    let parent = Session::new();
    let (child, release) = parent.fork(Some(&ScopeFork::cancelable()));
    assert!(!release.is_noop());

    release.release();
    assert_eq!(child.scope().check(), Some(Cause::Canceled));
    assert!(!parent.scope().is_cancelled());
}

#[test]
fn test_parent_cancel_reaches_forked_scope() {
    let parent = Session::new();
    let (child, _release) = parent.fork(Some(&ScopeFork::timeout(Duration::from_secs(60))));

    parent.scope().cancel();
    assert_eq!(child.scope().check(), Some(Cause::Canceled));
}

#[test]
fn test_lookup_env_prefers_session_environment() {
    let session = Session::new().with_env(["PATH=/session/bin"]);
    assert_eq!(session.lookup_env("PATH").as_deref(), Some("/session/bin"));
    // Not in the session list: the process environment is not consulted.
    assert_eq!(session.lookup_env("HOME"), None);
}

#[test]
fn test_set_env_on_empty_environment_keeps_inherited_values() {
    let mut session = Session::new();
    session.set_env("PIPEFLOW_TEST_VAR", "x");

    assert_eq!(session.lookup_env("PIPEFLOW_TEST_VAR").as_deref(), Some("x"));
    let inherited = std::env::vars().count();
    assert!(session.env.len() >= inherited);
}

#[test]
fn test_remove_env() {
    let mut session = Session::new().with_env(["A=1", "B=2"]);
    session.remove_env("A");
    assert_eq!(session.env, vec!["B=2".to_string()]);
}

#[test]
fn test_values_are_copied_on_fork() {
    let parent = Session::new().with_value("user", serde_json::json!("alice"));
    let (mut child, _release) = parent.fork(None);

    child.insert_value("user", serde_json::json!("bob"));
    assert_eq!(parent.value("user"), Some(&serde_json::json!("alice")));
    assert_eq!(child.value("user"), Some(&serde_json::json!("bob")));
}

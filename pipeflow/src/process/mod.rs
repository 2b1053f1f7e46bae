//! External process adapter.

mod exec;

pub use exec::{exec, Exec};

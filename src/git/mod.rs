//! Git operations module
//!
//! Holds the cloned repository session and the branch/commit/push
//! workflow performed on it.

mod session;

#[cfg(test)]
pub(crate) use session::testutil;
pub use session::*;

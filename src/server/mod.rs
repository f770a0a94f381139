//! Request handling
//!
//! Decodes the JSON command envelope arriving on the framed channel and
//! routes it to the repository session.

mod dispatch;
mod protocol;

pub use dispatch::*;
pub use protocol::*;

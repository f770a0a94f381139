//! Framed message channel
//!
//! Length-prefixed binary frames over arbitrary byte streams, as used by
//! the browser's native messaging transport on stdin/stdout.

mod framing;

pub use framing::*;

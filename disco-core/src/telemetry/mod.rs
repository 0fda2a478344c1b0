//! Tracing conventions shared by the request and stream layers.
//! Nothing here installs a subscriber; binaries decide where spans go.

pub mod keys;
#[cfg(test)]
pub mod test_span;

pub use keys::*;

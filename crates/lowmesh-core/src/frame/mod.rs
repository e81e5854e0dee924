//! Network frame wire formats.
//!
//! A frame is a header (see [`header`]) followed by either an opaque data
//! payload or a command payload (see [`command`]).

pub mod command;
pub mod control;
pub mod header;
pub mod wire;

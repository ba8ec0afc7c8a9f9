//! Process management for the analysis server.
//!
//! This module handles spawning the server and framing the JSON lines
//! exchanged with it.
//!
//! # Architecture
//!
//! ```text
//! libbinja                            analysis server
//! ┌──────────────┐                   ┌─────────────┐
//! │ FrameWriter  │───stdin (JSON)───▶│             │
//! │ FrameReader  │◀──stdout (JSON)───│             │
//! │ forward_stderr◀──stderr (logs)───│             │
//! └──────────────┘                   └─────────────┘
//! ```
//!
//! # Wire Format
//!
//! Each message, in either direction, is exactly one line of UTF-8 text
//! holding one JSON value, terminated by `\n`.

mod io;
mod spawn;

pub use io::{forward_stderr, Frame, FrameReader, FrameStream, FrameWriter};
pub use spawn::{ServerCommand, ServerProcess};

/// Longest line accepted from the server, in bytes.
///
/// Longer lines are discarded and reported as malformed.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

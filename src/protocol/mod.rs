//! JSON protocol types for talking to the analysis server.
//!
//! Every message, in either direction, is one line of UTF-8 JSON terminated
//! by `\n`.
//!
//! # Frames
//!
//! - [`OutgoingMessage`]: `{"id": 1, "method": "list_functions", "params": {...}}`
//! - [`IncomingMessage`]: `{"id": 1, "result": [...]}` on success, or
//!   `{"id": 1, "error": "...", "traceback": "..."}` on failure
//!
//! # Example
//!
//! ```
//! use libbinja::protocol::IncomingMessage;
//!
//! let json = r#"{"id": 1, "result": "pong"}"#;
//! let msg: IncomingMessage = serde_json::from_str(json).unwrap();
//! assert_eq!(msg.into_outcome().unwrap(), "pong");
//! ```

mod messages;
pub mod methods;

pub use messages::{IncomingMessage, OutgoingMessage, RequestId};

//! # libbinja
//!
//! Async Rust client for a Binary Ninja analysis server spoken to over stdio.
//!
//! The server is a long-lived subprocess that reads one JSON request per line
//! on stdin and writes one JSON response per line on stdout. This library
//! provides:
//! - Many concurrent requests over the one pair of pipes, matched by id
//! - Per-attempt deadlines with bounded, delayed retries
//! - A start/stop lifecycle that fails every pending request on teardown
//! - Typed methods for the server's analysis capabilities
//!
//! ## Quick Start
//!
//! ```no_run
//! use libbinja::{BinjaClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = BinjaClient::builder().interpreter("python3").build()?;
//!     client.start("binaryninja_server.py").await?;
//!
//!     let functions = client.list_functions("/bin/ls").await?;
//!     println!("{functions}");
//!
//!     client.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! ```no_run
//! # async fn run(client: libbinja::BinjaClient) -> libbinja::Result<()> {
//! let (main, init) = tokio::join!(
//!     client.decompile_function("/bin/ls", "main"),
//!     client.decompile_function("/bin/ls", "_init"),
//! );
//! println!("{}\n{}", main?, init?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Raw Connections
//!
//! [`Connection`] is the layer underneath the client. It works over any pair
//! of async byte streams, which makes it usable with servers that are not
//! child processes.
//!
//! ## Logging
//!
//! The library logs through `tracing`. The server's stderr is forwarded at
//! `debug` level under the `libbinja::server` target.

mod client;
pub mod config;
mod connection;
mod error;
pub mod process;
pub mod protocol;
mod retry;
pub mod rpc;

pub use error::{Error, Result};

// Re-export the main client types at crate root
pub use client::{BinjaClient, ClientBuilder};
pub use connection::{Connection, ConnectionState};

// Re-export commonly used config types at crate root
pub use config::{ClientConfig, ClientConfigBuilder, RetryPolicy};

// Re-export commonly used protocol types at crate root
pub use protocol::{IncomingMessage, OutgoingMessage, RequestId};

// Re-export commonly used process types at crate root
pub use process::{ServerCommand, ServerProcess};

pub use retry::{with_retry, with_timeout, RetryContext};

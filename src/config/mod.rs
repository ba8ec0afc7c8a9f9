//! Configuration for the analysis server client.
//!
//! This module provides:
//!
//! - [`ClientConfig`] and [`ClientConfigBuilder`] for configuring the client
//! - [`RetryPolicy`] for per-call deadlines and retries
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use libbinja::config::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .interpreter("python3")
//!     .timeout(Duration::from_secs(60))
//!     .max_retries(2)
//!     .build()?;
//! ```
//!
//! # Environment
//!
//! [`ClientConfigBuilder::from_env`] starts from the defaults and applies:
//!
//! - `BINJA_MCP_PYTHON`: interpreter used to launch the server script
//! - `BINJA_MCP_TIMEOUT_SECS`: per-attempt timeout
//! - `BINJA_MCP_MAX_RETRIES`: retries after the first attempt

pub mod builder;
pub mod retry;

pub use builder::{
    ClientConfig, ClientConfigBuilder, ENV_MAX_RETRIES, ENV_PYTHON, ENV_TIMEOUT_SECS,
};
pub use retry::RetryPolicy;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_exports_accessible() {
        let _: RetryPolicy = RetryPolicy::default();
        let _: &str = ENV_PYTHON;
        let _: &str = ENV_TIMEOUT_SECS;
        let _: &str = ENV_MAX_RETRIES;
    }

    #[test]
    fn builder_accessible() {
        let _ = ClientConfig::builder();
    }
}

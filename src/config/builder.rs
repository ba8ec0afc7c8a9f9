//! Client configuration and builder.
//!
//! This module provides the builder pattern for configuring how the analysis
//! server is launched and how requests to it are bounded.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use libbinja::config::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .interpreter("python3")
//!     .env("BINJA_LOG", "debug")
//!     .timeout(Duration::from_secs(60))
//!     .retry_delay(Duration::from_millis(500))
//!     .build()?;
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::retry::RetryPolicy;
use crate::{Error, Result};

/// Environment variable naming the interpreter for the server script.
pub const ENV_PYTHON: &str = "BINJA_MCP_PYTHON";

/// Environment variable overriding the per-attempt timeout, in seconds.
pub const ENV_TIMEOUT_SECS: &str = "BINJA_MCP_TIMEOUT_SECS";

/// Environment variable overriding the number of retries.
pub const ENV_MAX_RETRIES: &str = "BINJA_MCP_MAX_RETRIES";

/// Default deadline for the liveness probe sent after spawning.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the analysis server client.
///
/// Use [`ClientConfig::builder()`] to create a new configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // Process options
    pub(crate) interpreter: Option<PathBuf>,
    pub(crate) args: Vec<String>,
    pub(crate) working_directory: Option<PathBuf>,
    pub(crate) env_vars: HashMap<String, String>,
    pub(crate) inherit_env: bool,

    // Request policy
    pub(crate) retry: RetryPolicy,
    pub(crate) startup_timeout: Duration,
}

impl ClientConfig {
    /// Create a new builder for ClientConfig.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Get the interpreter if set.
    pub fn interpreter(&self) -> Option<&PathBuf> {
        self.interpreter.as_ref()
    }

    /// Extra arguments passed to the server after its path.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the working directory if set.
    pub fn working_directory(&self) -> Option<&PathBuf> {
        self.working_directory.as_ref()
    }

    /// Get the retry policy applied to each call.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Get the deadline for the liveness probe.
    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            args: Vec::new(),
            working_directory: None,
            env_vars: HashMap::new(),
            inherit_env: true,
            retry: RetryPolicy::default(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

/// Builder for [`ClientConfig`].
///
/// Values are validated when [`build()`](ClientConfigBuilder::build) is called.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    // Process options
    interpreter: Option<PathBuf>,
    args: Vec<String>,
    working_directory: Option<PathBuf>,
    env_vars: HashMap<String, String>,
    inherit_env: bool,

    // Request policy
    retry: RetryPolicy,
    startup_timeout: Duration,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            interpreter: None,
            args: Vec::new(),
            working_directory: None,
            env_vars: HashMap::new(),
            inherit_env: true, // Default: inherit parent environment
            retry: RetryPolicy::default(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl ClientConfigBuilder {
    /// Start from the defaults and apply `BINJA_MCP_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(python) = lookup(ENV_PYTHON).filter(|v| !v.is_empty()) {
            self.interpreter = Some(PathBuf::from(python));
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("{ENV_TIMEOUT_SECS} is not a number: {raw}"))
            })?;
            self.retry.timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            self.retry.max_retries = raw.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("{ENV_MAX_RETRIES} is not a number: {raw}"))
            })?;
        }

        Ok(self)
    }

    // -------------------------------------------------------------------------
    // Process options
    // -------------------------------------------------------------------------

    /// Launch the server path through this interpreter (e.g. `python3`).
    ///
    /// Without an interpreter the server path is executed directly.
    pub fn interpreter(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(path.into());
        self
    }

    /// Append one argument passed to the server after its path.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments passed to the server after its path.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory for the server process.
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }

    /// Add/override environment variable for subprocess.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Don't inherit parent environment (default: inherit).
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    // -------------------------------------------------------------------------
    // Request policy
    // -------------------------------------------------------------------------

    /// Deadline for a single attempt.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.retry.timeout = duration;
        self
    }

    /// Retries after the first attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.retry.max_retries = retries;
        self
    }

    /// Pause before each retry.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry.retry_delay = delay;
        self
    }

    /// Whether errors reported by the server are retried (default: true).
    pub fn retry_remote_errors(mut self, retry: bool) -> Self {
        self.retry.retry_remote_errors = retry;
        self
    }

    /// Replace the whole retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Deadline for the liveness probe sent after spawning.
    pub fn startup_timeout(mut self, duration: Duration) -> Self {
        self.startup_timeout = duration;
        self
    }

    // -------------------------------------------------------------------------
    // Build
    // -------------------------------------------------------------------------

    /// Build the configuration.
    ///
    /// This validates:
    /// - Timeouts are non-zero
    /// - The working directory exists if set
    ///
    /// Note: the server path is checked at spawn time.
    pub fn build(self) -> Result<ClientConfig> {
        if self.retry.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must be non-zero".into()));
        }

        if self.startup_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "startup_timeout must be non-zero".into(),
            ));
        }

        if let Some(ref dir) = self.working_directory {
            if !dir.exists() {
                return Err(Error::InvalidConfig(format!(
                    "working directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        Ok(ClientConfig {
            interpreter: self.interpreter,
            args: self.args,
            working_directory: self.working_directory,
            env_vars: self.env_vars,
            inherit_env: self.inherit_env,
            retry: self.retry,
            startup_timeout: self.startup_timeout,
        })
    }
}

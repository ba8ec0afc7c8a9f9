//! High-level client for the analysis server.
//!
//! This module provides [`BinjaClient`], the main entry point. It owns the
//! server's lifecycle and exposes one method per server capability.
//!
//! # Example
//!
//! ```no_run
//! use libbinja::{BinjaClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = BinjaClient::builder().interpreter("python3").build()?;
//!     client.start("binaryninja_server.py").await?;
//!
//!     let info = client.get_binary_info("/bin/ls").await?;
//!     println!("{info:#}");
//!
//!     let code = client.decompile_function("/bin/ls", "main").await?;
//!     println!("{code}");
//!
//!     client.stop().await;
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::config::{ClientConfig, ClientConfigBuilder, RetryPolicy};
use crate::connection::{Connection, ConnectionState};
use crate::process::ServerCommand;
use crate::protocol::methods;
use crate::{Error, Result};

#[derive(Debug)]
enum Lifecycle {
    Unstarted,
    /// Holds the connection once spawned so `stop()` can end the liveness check.
    Starting(Option<Arc<Connection>>),
    Ready(Arc<Connection>),
    Closed,
}

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    lifecycle: Mutex<Lifecycle>,
}

/// A client for one analysis server process.
///
/// `BinjaClient` starts the server, confirms it answers a liveness probe and
/// then multiplexes any number of concurrent requests over its stdio.
///
/// # Thread Safety
///
/// `BinjaClient` is `Send + Sync` and cheap to clone. Clones share the same
/// server, so requests from many tasks run concurrently over one process.
///
/// # Retries
///
/// [`call`](Self::call) and the read-only capability methods apply the
/// configured [`RetryPolicy`]. Methods that write files on the server
/// ([`generate_header`](Self::generate_header),
/// [`generate_source`](Self::generate_source),
/// [`rebuild_driver`](Self::rebuild_driver)) are attempted once, still under
/// the configured deadline. Use [`call_with_policy`](Self::call_with_policy)
/// to choose explicitly.
///
/// # Lifecycle
///
/// A client is started once. After [`stop`](Self::stop), or after the server
/// exits, every call fails with [`Error::ConnectionClosed`]; build a new
/// client to reconnect.
#[derive(Debug, Clone)]
pub struct BinjaClient {
    inner: Arc<ClientInner>,
}

impl BinjaClient {
    /// Create a client with default configuration and `BINJA_MCP_*`
    /// environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if an environment variable holds an
    /// unusable value.
    pub fn new() -> Result<Self> {
        let config = ClientConfigBuilder::from_env()?.build()?;
        Ok(Self::with_config(config))
    }

    /// Create a client with the given configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                lifecycle: Mutex::new(Lifecycle::Unstarted),
            }),
        }
    }

    /// Create a builder for configuring a new client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Get a reference to the client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the server at `server_path` and wait for it to answer the
    /// liveness probe.
    ///
    /// With an interpreter configured, `server_path` is the script handed to
    /// it; otherwise it is executed directly.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] if the client is starting or ready
    /// - [`Error::ConnectionClosed`] if the client was stopped, or was
    ///   stopped while the probe was in flight
    /// - [`Error::ServerNotFound`] / [`Error::ProcessSpawn`] if the server
    ///   could not be launched
    /// - the probe's error ([`Error::Timeout`], [`Error::Remote`], ...)
    ///   if the server did not answer it
    ///
    /// Any failure after the process is spawned leaves the client closed.
    pub async fn start(&self, server_path: impl AsRef<Path>) -> Result<()> {
        let server_path = server_path.as_ref();
        let config = &self.inner.config;

        if config.interpreter().is_some() && !server_path.exists() {
            return Err(Error::ServerNotFound {
                program: server_path.display().to_string(),
            });
        }

        {
            let mut lifecycle = self.lifecycle();
            match *lifecycle {
                Lifecycle::Unstarted => *lifecycle = Lifecycle::Starting(None),
                Lifecycle::Starting(_) | Lifecycle::Ready(_) => {
                    return Err(Error::AlreadyStarted)
                }
                Lifecycle::Closed => return Err(Error::ConnectionClosed),
            }
        }

        let command = ServerCommand::from_config(config, server_path);
        let connection = match Connection::spawn(&command) {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                *self.lifecycle() = Lifecycle::Closed;
                return Err(e);
            }
        };

        let reserved = {
            let mut lifecycle = self.lifecycle();
            if matches!(*lifecycle, Lifecycle::Starting(None)) {
                *lifecycle = Lifecycle::Starting(Some(Arc::clone(&connection)));
                true
            } else {
                false
            }
        };

        if !reserved {
            connection.shutdown().await;
            return Err(Error::ConnectionClosed);
        }

        if let Err(e) = connection.probe(config.startup_timeout()).await {
            tracing::error!("analysis server failed its liveness probe: {}", e);
            *self.lifecycle() = Lifecycle::Closed;
            connection.shutdown().await;
            return Err(e);
        }

        let promoted = {
            let mut lifecycle = self.lifecycle();
            if matches!(*lifecycle, Lifecycle::Starting(Some(_))) {
                *lifecycle = Lifecycle::Ready(Arc::clone(&connection));
                true
            } else {
                false
            }
        };

        if !promoted {
            connection.shutdown().await;
            return Err(Error::ConnectionClosed);
        }

        tracing::info!(pid = connection.pid().unwrap_or_default(), "analysis server ready");
        Ok(())
    }

    /// Stop the server.
    ///
    /// Every pending request fails with [`Error::ConnectionClosed`] and the
    /// process is killed. A `start()` still waiting on its liveness check
    /// returns [`Error::ConnectionClosed`]. Stopping twice, or stopping a
    /// client that never started, is a no-op apart from the client becoming
    /// closed.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::Closed);
        match previous {
            Lifecycle::Starting(Some(connection)) | Lifecycle::Ready(connection) => {
                connection.shutdown().await;
            }
            Lifecycle::Unstarted | Lifecycle::Starting(None) | Lifecycle::Closed => {}
        }
    }

    /// Current lifecycle state.
    ///
    /// A ready client whose server has exited reports
    /// [`ConnectionState::Closed`].
    pub fn state(&self) -> ConnectionState {
        match &*self.lifecycle() {
            Lifecycle::Unstarted => ConnectionState::Unstarted,
            Lifecycle::Starting(_) => ConnectionState::Starting,
            Lifecycle::Ready(connection) if connection.is_closed() => ConnectionState::Closed,
            Lifecycle::Ready(_) => ConnectionState::Ready,
            Lifecycle::Closed => ConnectionState::Closed,
        }
    }

    /// Whether requests are currently accepted.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// OS process ID of the server while it is running.
    pub fn pid(&self) -> Option<u32> {
        match &*self.lifecycle() {
            Lifecycle::Starting(Some(connection)) | Lifecycle::Ready(connection)
                if !connection.is_closed() =>
            {
                connection.pid()
            }
            _ => None,
        }
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        match &*self.lifecycle() {
            Lifecycle::Ready(connection) => connection.pending_count(),
            _ => 0,
        }
    }

    fn connection(&self) -> Result<Arc<Connection>> {
        let mut lifecycle = self.lifecycle();
        if matches!(&*lifecycle, Lifecycle::Ready(connection) if connection.is_closed()) {
            *lifecycle = Lifecycle::Closed;
        }
        match &*lifecycle {
            Lifecycle::Ready(connection) => Ok(Arc::clone(connection)),
            Lifecycle::Unstarted | Lifecycle::Starting(_) => Err(Error::NotStarted),
            Lifecycle::Closed => Err(Error::ConnectionClosed),
        }
    }

    /// Call `method` with `params` under the configured retry policy.
    ///
    /// Methods that write files on the server get a single attempt.
    pub async fn call(&self, method: &str, params: Option<Map<String, Value>>) -> Result<Value> {
        let mut policy = self.inner.config.retry_policy();
        if !methods::is_idempotent(method) {
            policy = policy.single_attempt();
        }
        self.call_with_policy(method, params, &policy).await
    }

    /// Call `method` once, under the configured deadline.
    pub async fn call_once(
        &self,
        method: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<Value> {
        let policy = self.inner.config.retry_policy().single_attempt();
        self.call_with_policy(method, params, &policy).await
    }

    /// Call `method` under an explicit policy.
    pub async fn call_with_policy(
        &self,
        method: &str,
        params: Option<Map<String, Value>>,
        policy: &RetryPolicy,
    ) -> Result<Value> {
        let connection = self.connection()?;
        connection.call_with_policy(method, params, policy).await
    }

    // -------------------------------------------------------------------------
    // Server capabilities
    // -------------------------------------------------------------------------

    /// Liveness probe. A healthy server answers `"pong"`.
    pub async fn ping(&self) -> Result<Value> {
        self.call(methods::PING, None).await
    }

    /// Architecture, platform, entry point and size of a binary.
    pub async fn get_binary_info(&self, path: impl AsRef<Path>) -> Result<Value> {
        self.call(methods::GET_BINARY_INFO, with_path(path, json!({})))
            .await
    }

    /// All functions in a binary.
    pub async fn list_functions(&self, path: impl AsRef<Path>) -> Result<Value> {
        self.call(methods::LIST_FUNCTIONS, with_path(path, json!({})))
            .await
    }

    /// Disassembly of `function`.
    pub async fn disassemble_function(
        &self,
        path: impl AsRef<Path>,
        function: &str,
    ) -> Result<Value> {
        let params = with_path(path, json!({ "function": function }));
        self.call(methods::DISASSEMBLE_FUNCTION, params).await
    }

    /// Decompiled C for `function`.
    pub async fn decompile_function(&self, path: impl AsRef<Path>, function: &str) -> Result<Value> {
        let params = with_path(path, json!({ "function": function }));
        self.call(methods::DECOMPILE_FUNCTION, params).await
    }

    /// Sections of a binary.
    pub async fn list_sections(&self, path: impl AsRef<Path>) -> Result<Value> {
        self.call(methods::LIST_SECTIONS, with_path(path, json!({})))
            .await
    }

    /// Cross references to `function`.
    pub async fn get_xrefs(&self, path: impl AsRef<Path>, function: &str) -> Result<Value> {
        let params = with_path(path, json!({ "function": function }));
        self.call(methods::GET_XREFS, params).await
    }

    /// Strings of at least `min_length` characters.
    pub async fn get_strings(&self, path: impl AsRef<Path>, min_length: u32) -> Result<Value> {
        let params = with_path(path, json!({ "min_length": min_length }));
        self.call(methods::GET_STRINGS, params).await
    }

    /// User-defined types in a binary.
    pub async fn get_types(&self, path: impl AsRef<Path>) -> Result<Value> {
        self.call(methods::GET_TYPES, with_path(path, json!({})))
            .await
    }

    /// Generate a C header. Written to `output_path` when given, otherwise
    /// returned.
    pub async fn generate_header(
        &self,
        path: impl AsRef<Path>,
        output_path: Option<&Path>,
        include_functions: bool,
        include_types: bool,
    ) -> Result<Value> {
        let mut params = json!({
            "include_functions": include_functions,
            "include_types": include_types,
        });
        if let Some(output_path) = output_path {
            params["output_path"] = json!(path_string(output_path));
        }
        self.call(methods::GENERATE_HEADER, with_path(path, params))
            .await
    }

    /// Generate C source including `header_path`. Written to `output_path`
    /// when given, otherwise returned.
    pub async fn generate_source(
        &self,
        path: impl AsRef<Path>,
        output_path: Option<&Path>,
        header_path: impl AsRef<Path>,
    ) -> Result<Value> {
        let mut params = json!({ "header_path": path_string(header_path.as_ref()) });
        if let Some(output_path) = output_path {
            params["output_path"] = json!(path_string(output_path));
        }
        self.call(methods::GENERATE_SOURCE, with_path(path, params))
            .await
    }

    /// Write a header, source and build files for a driver into `output_dir`.
    pub async fn rebuild_driver(
        &self,
        path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<Value> {
        let params = json!({ "output_dir": path_string(output_dir.as_ref()) });
        self.call(methods::REBUILD_DRIVER, with_path(path, params))
            .await
    }

    /// Tool catalog advertised by the server.
    pub async fn list_tools(&self) -> Result<Value> {
        self.call(methods::LIST_TOOLS, None).await
    }

    /// Static resources advertised by the server.
    pub async fn list_resources(&self) -> Result<Value> {
        self.call(methods::LIST_RESOURCES, None).await
    }

    /// Resource URI templates advertised by the server.
    pub async fn list_resource_templates(&self) -> Result<Value> {
        self.call(methods::LIST_RESOURCE_TEMPLATES, None).await
    }

    /// Read a resource such as `binary://info`.
    pub async fn read_resource(&self, uri: &str) -> Result<Value> {
        self.call(methods::READ_RESOURCE, object(json!({ "uri": uri })))
            .await
    }

    /// Invoke a server tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        let params = object(json!({ "name": name, "arguments": arguments }));
        self.call(methods::CALL_TOOL, params).await
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn with_path(path: impl AsRef<Path>, mut params: Value) -> Option<Map<String, Value>> {
    params["path"] = json!(path_string(path.as_ref()));
    object(params)
}

/// Builder for [`BinjaClient`].
///
/// This wraps [`ClientConfigBuilder`] and builds directly into a
/// [`BinjaClient`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use libbinja::BinjaClient;
///
/// let client = BinjaClient::builder()
///     .interpreter("python3")
///     .timeout(Duration::from_secs(60))
///     .max_retries(1)
///     .build()?;
/// assert_eq!(client.config().retry_policy().max_retries, 1);
/// # Ok::<(), libbinja::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    inner: ClientConfigBuilder,
}

impl ClientBuilder {
    /// Create a new client builder with default settings.
    pub fn new() -> Self {
        Self {
            inner: ClientConfigBuilder::default(),
        }
    }

    /// Create a builder seeded from `BINJA_MCP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            inner: ClientConfigBuilder::from_env()?,
        })
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a timeout is zero or the working
    /// directory does not exist.
    pub fn build(self) -> Result<BinjaClient> {
        let config = self.inner.build()?;
        Ok(BinjaClient::with_config(config))
    }

    // -------------------------------------------------------------------------
    // Process options
    // -------------------------------------------------------------------------

    /// Interpreter that runs the server script, e.g. `python3`.
    pub fn interpreter(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.inner = self.inner.interpreter(path);
        self
    }

    /// Append an argument passed after the server path.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.inner = self.inner.arg(arg);
        self
    }

    /// Append arguments passed after the server path.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner = self.inner.args(args);
        self
    }

    /// Working directory for the server process.
    pub fn working_directory(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.inner = self.inner.working_directory(path);
        self
    }

    /// Add/override environment variable for the server process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner = self.inner.env(key, value);
        self
    }

    /// Don't inherit parent environment.
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inner = self.inner.inherit_env(inherit);
        self
    }

    // -------------------------------------------------------------------------
    // Request policy
    // -------------------------------------------------------------------------

    /// Deadline for each attempt of a request.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.inner = self.inner.timeout(duration);
        self
    }

    /// Additional attempts after the first.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.inner = self.inner.max_retries(retries);
        self
    }

    /// Pause between attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.inner = self.inner.retry_delay(delay);
        self
    }

    /// Whether errors reported by the server are retried.
    pub fn retry_remote_errors(mut self, retry: bool) -> Self {
        self.inner = self.inner.retry_remote_errors(retry);
        self
    }

    /// Replace the whole retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.inner = self.inner.retry_policy(policy);
        self
    }

    /// Deadline for the liveness probe during [`BinjaClient::start`].
    pub fn startup_timeout(mut self, duration: Duration) -> Self {
        self.inner = self.inner.startup_timeout(duration);
        self
    }
}

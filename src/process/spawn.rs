//! Process spawning and lifecycle management.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::config::ClientConfig;
use crate::{Error, Result};

/// Everything needed to launch the analysis server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    working_directory: Option<PathBuf>,
    env_vars: HashMap<String, String>,
    inherit_env: bool,
}

impl ServerCommand {
    /// Run `program` directly with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: None,
            env_vars: HashMap::new(),
            inherit_env: true,
        }
    }

    /// Build the command for `server_path` from a client configuration.
    ///
    /// With an interpreter configured the command is
    /// `<interpreter> <server_path> <args...>`, otherwise
    /// `<server_path> <args...>`.
    pub fn from_config(config: &ClientConfig, server_path: &Path) -> Self {
        let mut command = match config.interpreter() {
            Some(interpreter) => Self::new(interpreter).arg(server_path),
            None => Self::new(server_path),
        };
        command.args.extend(config.args().iter().map(OsString::from));
        command.working_directory = config.working_directory().cloned();
        command.env_vars = config.env_vars.clone();
        command.inherit_env = config.inherit_env;
        command
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add/override an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// The executable that will be spawned.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the executable.
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref dir) = self.working_directory {
            cmd.current_dir(dir);
        }

        if !self.inherit_env {
            cmd.env_clear();
        }
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

/// A running analysis server process.
///
/// The three standard streams are piped and can each be taken once.
///
/// # Cancellation
///
/// Dropping a `ServerProcess` kills the subprocess if it's still running.
pub struct ServerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ServerProcess {
    /// Spawn the server.
    ///
    /// # Errors
    ///
    /// - [`Error::ServerNotFound`] if the executable cannot be located
    /// - [`Error::ProcessSpawn`] for any other spawn failure
    pub fn spawn(command: &ServerCommand) -> Result<Self> {
        let mut child = command.to_command().spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ServerNotFound {
                    program: command.program().display().to_string(),
                }
            } else {
                Error::ProcessSpawn(e)
            }
        })?;

        tracing::debug!(
            program = %command.program().display(),
            pid = ?child.id(),
            "spawned analysis server"
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Take the server's stdin.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Take the server's stdout.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take the server's stderr.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Get the process ID of the running server.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit and return its exit status.
    ///
    /// Cancel safe; the status is still available to a later call.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.map_err(Error::io)
    }

    /// Kill the process and wait for it to exit.
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.map_err(Error::io)
    }

    /// Try to kill the process without waiting.
    pub fn start_kill(&mut self) -> Result<()> {
        self.child.start_kill().map_err(Error::io)
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        // Try to kill the process if it's still running
        let _ = self.start_kill();
    }
}

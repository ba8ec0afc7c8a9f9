//! One live connection to an analysis server.
//!
//! A [`Connection`] wires a spawned [`ServerProcess`] (or any pair of byte
//! streams) to a [`Correlator`]. A background task reads frames from the
//! server and routes them; when the server's output ends, or on
//! [`shutdown`](Connection::shutdown), the connection tears itself down and
//! every pending request fails with [`Error::ConnectionClosed`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RetryPolicy;
use crate::process::{forward_stderr, FrameReader, FrameWriter, ServerCommand, ServerProcess};
use crate::protocol::{methods, RequestId};
use crate::retry::{with_retry, with_timeout};
use crate::rpc::Correlator;
use crate::{Error, Result};

/// Lifecycle of a client's connection.
///
/// Moves forward only: `Unstarted → Starting → Ready → Closed`.
/// `Closed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// `start()` has not been called.
    Unstarted,
    /// The server is spawned and the liveness probe is in flight.
    Starting,
    /// The probe succeeded; requests are accepted.
    Ready,
    /// Stopped, or the server went away. Pending requests have failed.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unstarted => "unstarted",
            ConnectionState::Starting => "starting",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct Shared {
    correlator: Correlator,
    closed: watch::Sender<bool>,
    /// `true` once there is no server process left to reap.
    exited: watch::Sender<bool>,
}

impl Shared {
    /// Runs at most once, whichever of shutdown, EOF and process exit gets
    /// here first.
    async fn teardown(&self, reason: &str) {
        if self.closed.send_replace(true) {
            return;
        }

        let failed = self.correlator.close();
        self.correlator.close_writer().await;

        if failed > 0 {
            tracing::warn!(reason, failed, "connection closed with requests in flight");
        } else {
            tracing::info!(reason, "connection closed");
        }
    }
}

/// A multiplexed request channel to one analysis server.
///
/// `Connection` is `Send + Sync`; share it behind an [`Arc`] to issue
/// requests from many tasks at once.
pub struct Connection {
    shared: Arc<Shared>,
    pid: Option<u32>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Spawn the server described by `command` and start reading from it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerNotFound`] or [`Error::ProcessSpawn`] if the
    /// process could not be started.
    pub fn spawn(command: &ServerCommand) -> Result<Self> {
        let mut process = ServerProcess::spawn(command)?;
        let pid = process.pid();

        let stdin = process.take_stdin().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = process.take_stdout().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = process.take_stderr();

        let mut connection = Self::assemble(stdout, stdin, true);
        connection.pid = pid;
        connection
            .tasks
            .push(tokio::spawn(supervise(connection.shared.clone(), process)));
        if let Some(stderr) = stderr {
            connection.tasks.push(forward_stderr(stderr));
        }

        tracing::info!(
            program = %command.program().display(),
            pid = pid.unwrap_or_default(),
            "spawned analysis server"
        );
        Ok(connection)
    }

    /// Build a connection over an existing pair of streams.
    ///
    /// `reader` carries the server's responses and `writer` its requests.
    /// There is no process to kill on teardown.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::assemble(reader, writer, false)
    }

    fn assemble<R, W>(reader: R, writer: W, has_process: bool) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        let (exited, _) = watch::channel(!has_process);
        let shared = Arc::new(Shared {
            correlator: Correlator::new(FrameWriter::new(writer)),
            closed,
            exited,
        });

        let reader_task = tokio::spawn(read_loop(shared.clone(), FrameReader::new(reader)));

        Self {
            shared,
            pid: None,
            tasks: vec![reader_task],
        }
    }

    /// Send one request and wait for its response, with no deadline.
    pub async fn call(&self, method: &str, params: Option<Map<String, Value>>) -> Result<Value> {
        self.shared.correlator.call(method, params).await
    }

    /// Send a request under `policy`: each attempt gets the policy's
    /// deadline and retryable failures are attempted again.
    ///
    /// A timed-out attempt's identifier is abandoned; a late response to it
    /// is discarded. Retries use fresh identifiers.
    pub async fn call_with_policy(
        &self,
        method: &str,
        params: Option<Map<String, Value>>,
        policy: &RetryPolicy,
    ) -> Result<Value> {
        with_retry(policy, |_| self.shared.correlator.call(method, params.clone())).await
    }

    /// Issue the liveness probe and wait up to `timeout` for any
    /// non-error answer.
    pub async fn probe(&self, timeout: Duration) -> Result<()> {
        let answer = with_timeout(timeout, self.call(methods::PING, None)).await?;
        tracing::debug!(%answer, "liveness probe answered");
        Ok(())
    }

    /// Tear the connection down.
    ///
    /// Pending requests fail with [`Error::ConnectionClosed`], the server's
    /// stdin is closed and the process is killed and reaped before this
    /// returns. Calling this again is a no-op.
    pub async fn shutdown(&self) {
        self.shared.teardown("shutdown requested").await;

        let mut exited = self.shared.exited.subscribe();
        let _ = exited.wait_for(|exited| *exited).await;
    }

    /// Whether the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Wait until the connection has been torn down.
    pub async fn closed(&self) {
        let mut closed = self.shared.closed.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// OS process ID of the server, if this connection spawned one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    /// Identifiers of requests awaiting a response, ascending.
    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.shared.correlator.pending_ids()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("pid", &self.pid)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut reader: FrameReader<R>)
where
    R: AsyncRead + Unpin,
{
    let mut closed = shared.closed.subscribe();
    let shutdown = async move {
        let _ = closed.wait_for(|closed| *closed).await;
    };
    tokio::pin!(shutdown);

    let reason = loop {
        let frame = tokio::select! {
            frame = reader.read_frame() => frame,
            () = &mut shutdown => return,
        };

        match frame {
            Ok(Some(frame)) => {
                shared.correlator.handle_frame(frame);
            }
            Ok(None) => break "server closed its output",
            Err(e) => {
                tracing::warn!("failed to read from analysis server: {}", e);
                break "read from server failed";
            }
        }
    };

    shared.teardown(reason).await;
}

/// Owns the server process: tears the connection down when it exits, and
/// kills it when the connection is torn down first.
///
/// Exit is watched directly because a descendant of the server can keep its
/// stdout open after the server itself is gone.
async fn supervise(shared: Arc<Shared>, mut process: ServerProcess) {
    let mut closed = shared.closed.subscribe();
    let shutdown = async move {
        let _ = closed.wait_for(|closed| *closed).await;
    };

    let exit = tokio::select! {
        status = process.wait() => Some(status),
        () = shutdown => None,
    };

    match exit {
        Some(status) => {
            match status {
                Ok(status) => tracing::info!(%status, "analysis server exited"),
                Err(e) => tracing::warn!("failed to wait for analysis server: {}", e),
            }
            shared.teardown("server exited").await;
        }
        None => {
            if let Err(e) = process.kill().await {
                tracing::debug!("failed to kill analysis server: {}", e);
            }
        }
    }

    shared.exited.send_replace(true);
}

fn missing_pipe(name: &str) -> Error {
    Error::ProcessSpawn(std::io::Error::other(format!("server {name} was not piped")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

    struct Peer {
        requests: Lines<BufReader<DuplexStream>>,
        responses: DuplexStream,
    }

    impl Peer {
        async fn next_request(&mut self) -> Value {
            let line = self.requests.next_line().await.unwrap().expect("request");
            serde_json::from_str(&line).unwrap()
        }

        async fn respond(&mut self, line: &str) {
            self.responses.write_all(line.as_bytes()).await.unwrap();
            self.responses.write_all(b"\n").await.unwrap();
        }
    }

    fn connection() -> (Arc<Connection>, Peer) {
        let (client_out, server_in) = duplex(64 * 1024);
        let (server_out, client_in) = duplex(64 * 1024);
        let connection = Arc::new(Connection::from_streams(client_in, client_out));
        let peer = Peer {
            requests: BufReader::new(server_in).lines(),
            responses: server_out,
        };
        (connection, peer)
    }

    #[test]
    fn connection_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Connection>();
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Unstarted.to_string(), "unstarted");
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }

    #[tokio::test]
    async fn probe_succeeds_on_pong() {
        let (connection, mut peer) = connection();

        let probe = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.probe(Duration::from_secs(5)).await })
        };

        assert_eq!(peer.next_request().await, json!({"id": 1, "method": "ping"}));
        peer.respond(r#"{"id":1,"result":"pong"}"#).await;
        probe.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn garbage_between_responses_is_tolerated() {
        let (connection, mut peer) = connection();

        let call = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.call("list_sections", None).await })
        };
        peer.next_request().await;

        peer.respond("not json at all").await;
        peer.respond(r#"{"id":99,"result":"stray"}"#).await;
        peer.respond(r#"{"id":1,"result":[".text"]}"#).await;

        assert_eq!(call.await.unwrap().unwrap(), json!([".text"]));
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn eof_fails_pending_requests() {
        let (connection, mut peer) = connection();

        let calls: Vec<_> = (0..2)
            .map(|_| {
                let connection = connection.clone();
                tokio::spawn(async move { connection.call("get_types", None).await })
            })
            .collect();
        peer.next_request().await;
        peer.next_request().await;

        drop(peer);
        connection.closed().await;

        for call in calls {
            assert!(matches!(call.await.unwrap(), Err(Error::ConnectionClosed)));
        }
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (connection, _peer) = connection();

        connection.shutdown().await;
        connection.shutdown().await;

        assert!(connection.is_closed());
        assert!(matches!(
            connection.call("ping", None).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_after_timeout_is_discarded() {
        let (connection, mut peer) = connection();
        let policy = RetryPolicy::new(1, Duration::from_millis(50), Duration::from_millis(10));

        let call = {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection
                    .call_with_policy("get_strings", None, &policy)
                    .await
            })
        };

        // First attempt times out; the answer arrives for the retry only.
        assert_eq!(peer.next_request().await["id"], json!(1));
        assert_eq!(peer.next_request().await["id"], json!(2));
        peer.respond(r#"{"id":1,"result":"stale"}"#).await;
        peer.respond(r#"{"id":2,"result":"fresh"}"#).await;

        assert_eq!(call.await.unwrap().unwrap(), json!("fresh"));
    }
}

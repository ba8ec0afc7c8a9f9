//! Test utilities for libbinja integration tests.

#![allow(dead_code)]

use std::io::Write;

use serde_json::{json, Value};
use tempfile::TempPath;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

use libbinja::Connection;

/// The other end of a [`Connection`] built over in-memory pipes.
///
/// Tests read the requests the connection wrote and answer them in any
/// order they like.
pub struct MockServer {
    requests: Lines<BufReader<DuplexStream>>,
    responses: DuplexStream,
}

/// Create a connection wired to a fresh [`MockServer`].
pub fn connect() -> (Connection, MockServer) {
    let (client_out, server_in) = duplex(64 * 1024);
    let (server_out, client_in) = duplex(64 * 1024);
    let server = MockServer {
        requests: BufReader::new(server_in).lines(),
        responses: server_out,
    };
    (Connection::from_streams(client_in, client_out), server)
}

impl MockServer {
    /// Read the next request frame.
    pub async fn next_request(&mut self) -> Value {
        let line = self
            .requests
            .next_line()
            .await
            .expect("read request")
            .expect("connection closed its output");
        serde_json::from_str(&line).expect("request is JSON")
    }

    /// Read the next request and return its id, checking the method.
    pub async fn expect_request(&mut self, method: &str) -> u64 {
        let request = self.next_request().await;
        assert_eq!(request["method"], json!(method), "unexpected request {request}");
        request["id"].as_u64().expect("integer id")
    }

    /// Write one raw line.
    pub async fn send_line(&mut self, line: &str) {
        self.responses
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write response");
    }

    /// Answer `id` with `result`.
    pub async fn reply(&mut self, id: u64, result: Value) {
        self.send_line(&json!({ "id": id, "result": result }).to_string())
            .await;
    }

    /// Answer `id` with an error.
    pub async fn reply_error(&mut self, id: u64, error: &str, traceback: Option<&str>) {
        let mut response = json!({ "id": id, "error": error });
        if let Some(traceback) = traceback {
            response["traceback"] = json!(traceback);
        }
        self.send_line(&response.to_string()).await;
    }

    /// Close both pipes, as a crashing server would.
    pub fn hang_up(self) {}
}

/// Answers `ping` with `"pong"`, `fail` with an error carrying a traceback,
/// and every other method with its own name.
pub const ECHO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/')
  method=$(printf '%s\n' "$line" | sed 's/.*"method":"\([^"]*\)".*/\1/')
  case "$method" in
    ping) printf '{"id":%s,"result":"pong"}\n' "$id" ;;
    fail) printf '{"id":%s,"error":"boom","traceback":"Traceback (most recent call last)"}\n' "$id" ;;
    *) printf '{"id":%s,"result":"%s"}\n' "$id" "$method" ;;
  esac
done
"#;

/// Answers `ping` and nothing else.
pub const PING_ONLY_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/')
  case "$line" in
    *'"method":"ping"'*) printf '{"id":%s,"result":"pong"}\n' "$id" ;;
  esac
done
"#;

/// Answers the probe with an error.
pub const BROKEN_SERVER: &str = r#"
echo "Binary Ninja license not found" >&2
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/')
  printf '{"id":%s,"error":"no license"}\n' "$id"
done
"#;

/// Reads requests and never answers.
pub const SILENT_SERVER: &str = r#"
while IFS= read -r line; do :; done
"#;

/// Answers `ping` and nothing else, with a background child that keeps the
/// server's stdout open after the server itself dies.
pub const ORPHAN_HOLDING_SERVER: &str = r#"
sleep 30 &
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/')
  case "$line" in
    *'"method":"ping"'*) printf '{"id":%s,"result":"pong"}\n' "$id" ;;
  esac
done
"#;

/// Write `script` to a temporary file that is removed when the returned path
/// is dropped.
///
/// Run it with `sh` as the interpreter.
pub fn write_script(name: &str, script: &str) -> TempPath {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("libbinja-{name}-"))
        .suffix(".sh")
        .tempfile()
        .expect("create server script");
    file.write_all(script.as_bytes())
        .expect("write server script");
    file.into_temp_path()
}

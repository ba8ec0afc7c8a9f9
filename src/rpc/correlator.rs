//! Request multiplexing over one shared pair of streams.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use super::pending::PendingTable;
use crate::process::{Frame, FrameWriter};
use crate::protocol::{IncomingMessage, OutgoingMessage, RequestId};
use crate::{Error, Result};

/// Assigns identifiers to requests and routes responses back to callers.
///
/// Any number of [`call`](Self::call)s may be in flight at once. Frames go
/// out in the order callers reach the writer; responses are matched by
/// identifier, never by arrival order.
pub struct Correlator {
    next_id: AtomicU64,
    pending: PendingTable,
    writer: FrameWriter,
}

impl Correlator {
    /// Create a correlator that writes frames to `writer`.
    ///
    /// Identifiers start at 1.
    pub fn new(writer: FrameWriter) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: PendingTable::new(),
            writer,
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Send `method` with `params` and wait for the matching response.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future before it completes removes the pending
    /// entry, so a response that arrives later is discarded instead of being
    /// delivered to a caller that has gone away.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is, or becomes, closed
    /// - [`Error::Io`] if the frame could not be written
    /// - [`Error::Remote`] if the server reported a failure
    pub async fn call(&self, method: &str, params: Option<Map<String, Value>>) -> Result<Value> {
        let message = OutgoingMessage::new(self.next_id(), method, params);
        let line = message.to_line()?;
        let id = message.id();

        let waiter = self.pending.register(id, method)?;
        let guard = AbandonOnDrop {
            pending: &self.pending,
            id,
            armed: true,
        };

        tracing::debug!(%id, method, "sending request");
        if let Err(e) = self.writer.send_line(&line).await {
            // Teardown closes stdin under an in-flight write.
            if self.pending.is_closed() {
                return Err(Error::ConnectionClosed);
            }
            return Err(e);
        }

        let outcome = waiter.await;
        guard.disarm();
        // A sender dropped without a value means the table itself is gone.
        outcome.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Route one decoded response to its waiter.
    ///
    /// Returns `false` if no request was waiting for its identifier. That is
    /// expected after a timeout or teardown and only logged.
    pub fn dispatch(&self, message: IncomingMessage) -> bool {
        let Some(id) = message.id else {
            tracing::warn!(
                error = message.error.as_deref().unwrap_or(""),
                "discarding response without an id"
            );
            return false;
        };

        let delivered = self.pending.settle(id, message.into_outcome());
        if !delivered {
            tracing::debug!(%id, "discarding response for unknown or abandoned request");
        }
        delivered
    }

    /// Handle one frame from the reader.
    ///
    /// Malformed frames and frames that are not responses are logged and
    /// dropped; they never affect other requests.
    pub fn handle_frame(&self, frame: Frame) -> bool {
        match frame {
            Frame::Message(value) => match IncomingMessage::from_value(value) {
                Ok(message) => self.dispatch(message),
                Err(e) => {
                    tracing::warn!("ignoring frame that is not a response: {}", e);
                    false
                }
            },
            Frame::Malformed(e) => {
                tracing::warn!("ignoring malformed frame from server: {}", e);
                false
            }
        }
    }

    /// Fail every pending request with [`Error::ConnectionClosed`] and refuse
    /// new ones. Returns how many requests were failed.
    pub fn close(&self) -> usize {
        self.pending.close()
    }

    /// Close the write side of the channel.
    pub async fn close_writer(&self) {
        self.writer.close().await;
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Identifiers of requests awaiting a response, ascending.
    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.pending.ids()
    }
}

/// Removes a pending entry when a call is abandoned mid-flight.
struct AbandonOnDrop<'a> {
    pending: &'a PendingTable,
    id: RequestId,
    armed: bool,
}

impl AbandonOnDrop<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(elapsed) = self.pending.remove(self.id) {
            tracing::debug!(id = %self.id, ?elapsed, "abandoned pending request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream, Lines};

    fn correlator() -> (Arc<Correlator>, Lines<BufReader<DuplexStream>>) {
        let (client, server) = duplex(64 * 1024);
        let correlator = Arc::new(Correlator::new(FrameWriter::new(client)));
        (correlator, BufReader::new(server).lines())
    }

    async fn next_request(lines: &mut Lines<BufReader<DuplexStream>>) -> Value {
        let line = lines.next_line().await.unwrap().expect("request line");
        serde_json::from_str(&line).unwrap()
    }

    async fn wait_for_pending(correlator: &Correlator, count: usize) {
        while correlator.pending_count() < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn call_writes_frame_and_returns_result() {
        let (correlator, mut lines) = correlator();

        let task = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.call("list_functions", None).await })
        };

        let request = next_request(&mut lines).await;
        assert_eq!(request, json!({"id": 1, "method": "list_functions"}));

        assert!(correlator.dispatch(IncomingMessage::success(RequestId(1), json!(["main"]))));
        assert_eq!(task.await.unwrap().unwrap(), json!(["main"]));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn remote_error_is_delivered() {
        let (correlator, mut lines) = correlator();
        let task = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.call("decompile_function", None).await })
        };
        next_request(&mut lines).await;

        correlator.dispatch(IncomingMessage::failure(RequestId(1), "Function 'x' not found"));
        match task.await.unwrap() {
            Err(Error::Remote { message, .. }) => assert_eq!(message, "Function 'x' not found"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let (correlator, mut lines) = correlator();
        for expected in 1..=3u64 {
            let correlator2 = correlator.clone();
            let task = tokio::spawn(async move { correlator2.call("ping", None).await });
            let request = next_request(&mut lines).await;
            assert_eq!(request["id"], json!(expected));
            correlator.dispatch(IncomingMessage::success(RequestId(expected), json!("pong")));
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn unknown_id_is_discarded() {
        let (correlator, mut lines) = correlator();
        let task = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.call("ping", None).await })
        };
        next_request(&mut lines).await;

        assert!(!correlator.dispatch(IncomingMessage::success(RequestId(42), json!("stray"))));
        assert_eq!(correlator.pending_ids(), vec![RequestId(1)]);

        correlator.dispatch(IncomingMessage::success(RequestId(1), json!("pong")));
        assert_eq!(task.await.unwrap().unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn dropping_call_abandons_entry() {
        let (correlator, mut lines) = correlator();

        let result = tokio::time::timeout(Duration::from_millis(20), correlator.call("slow", None)).await;
        assert!(result.is_err());
        assert_eq!(correlator.pending_count(), 0);

        // The late response finds nobody waiting.
        next_request(&mut lines).await;
        assert!(!correlator.dispatch(IncomingMessage::success(RequestId(1), json!("late"))));
    }

    #[tokio::test]
    async fn close_fails_pending_calls() {
        let (correlator, _lines) = correlator();
        let task = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.call("ping", None).await })
        };
        wait_for_pending(&correlator, 1).await;

        assert_eq!(correlator.close(), 1);
        assert!(matches!(task.await.unwrap(), Err(Error::ConnectionClosed)));
        assert!(matches!(
            correlator.call("ping", None).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn write_failure_removes_entry() {
        let (correlator, _lines) = correlator();
        correlator.close_writer().await;

        assert!(matches!(correlator.call("ping", None).await, Err(Error::Io(_))));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn write_interrupted_by_teardown_reports_closed() {
        // A one-byte pipe with nobody reading keeps the write in flight.
        let (client, server) = duplex(1);
        let correlator = Arc::new(Correlator::new(FrameWriter::new(client)));

        let task = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.call("list_functions", None).await })
        };
        wait_for_pending(&correlator, 1).await;

        assert_eq!(correlator.close(), 1);
        drop(server);

        assert!(matches!(task.await.unwrap(), Err(Error::ConnectionClosed)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn malformed_frames_are_ignored() {
        let (correlator, _lines) = correlator();
        let err = serde_json::from_str::<Value>("{").unwrap_err();
        assert!(!correlator.handle_frame(Frame::Malformed(Error::json_parse(err, "{"))));
        assert!(!correlator.handle_frame(Frame::Message(json!("just a string"))));
        assert!(!correlator.handle_frame(Frame::Message(json!({"id": null, "error": "bad"}))));
    }
}

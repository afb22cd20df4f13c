//! Correlation of asynchronous responses with the requests that caused them.
//!
//! Each in-flight request owns one slot: a oneshot sender keyed by its id.
//! Whoever reads the wire calls [`PendingRequests::complete`]; the caller holds
//! a [`PendingSlot`] and waits on it. Dropping the slot releases the id, so a
//! caller that gives up early never leaves an entry behind.

use crate::error::McpError;
use crate::jsonrpc::{IncomingMessage, JsonRpcResponse};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

type Slots = HashMap<u64, oneshot::Sender<JsonRpcResponse>>;

/// Table of requests waiting for a response, shared with background readers.
#[derive(Clone, Default)]
pub(crate) struct PendingRequests {
    inner: Arc<Mutex<Slots>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for `id`. Must happen before the request hits the wire.
    pub(crate) fn register(&self, id: u64) -> PendingSlot {
        let (tx, rx) = oneshot::channel();
        if self.slots().insert(id, tx).is_some() {
            tracing::warn!("Replaced pending MCP request with duplicate id {id}");
        }
        PendingSlot {
            id,
            rx,
            table: self.clone(),
        }
    }

    /// Deliver a response to its waiter. Returns `false` if nobody is waiting.
    pub(crate) fn complete(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id else {
            tracing::debug!("Dropping MCP response without id");
            return false;
        };
        let tx = self.slots().remove(&id);
        match tx {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                tracing::debug!("No pending MCP request for response id {id}");
                false
            }
        }
    }

    /// Route one wire frame (a single message or a batch) to its waiters.
    ///
    /// Returns the ids of the responses that were delivered. Frames that do
    /// not parse are logged and ignored.
    pub(crate) fn dispatch_frame(&self, server: &str, data: &str) -> Vec<u64> {
        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to parse MCP message from '{server}': {e}: {data}");
                return Vec::new();
            }
        };

        let messages = match value {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        };

        let mut delivered = Vec::new();
        for message in messages {
            match IncomingMessage::from_value(message) {
                Ok(IncomingMessage::Response(resp)) => {
                    let id = resp.id;
                    if self.complete(resp) {
                        delivered.extend(id);
                    }
                }
                Ok(IncomingMessage::ServerNotification { method }) => {
                    tracing::debug!("Notification from '{server}': {method}");
                }
                Ok(IncomingMessage::ServerRequest { method, .. }) => {
                    tracing::debug!("Ignoring server request '{method}' from '{server}'");
                }
                Err(e) => {
                    tracing::warn!("Unrecognised MCP message from '{server}': {e}");
                }
            }
        }
        delivered
    }

    /// Drop every slot; all current waiters observe a closed transport.
    pub(crate) fn fail_all(&self) {
        let mut slots = self.slots();
        if !slots.is_empty() {
            tracing::debug!("Failing {} pending MCP request(s)", slots.len());
        }
        slots.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }
}

/// One registered request. The id is released when this is dropped.
pub(crate) struct PendingSlot {
    id: u64,
    rx: oneshot::Receiver<JsonRpcResponse>,
    table: PendingRequests,
}

impl PendingSlot {
    /// Wait for the response, bounded by `timeout` and `cancel`.
    pub(crate) async fn wait(
        mut self,
        server: &str,
        method: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, McpError> {
        tokio::select! {
            result = tokio::time::timeout(timeout, &mut self.rx) => match result {
                Ok(Ok(resp)) => Ok(resp),
                Ok(Err(_)) => Err(McpError::TransportClosed { name: server.to_string() }),
                Err(_) => Err(McpError::Timeout {
                    name: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
            _ = cancel.cancelled() => Err(McpError::TransportClosed { name: server.to_string() }),
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.table.slots().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_out_of_order() {
        let pending = PendingRequests::new();
        let slot1 = pending.register(1);
        let slot2 = pending.register(2);
        let cancel = CancellationToken::new();
        let timeout = Duration::from_secs(5);

        assert!(pending.complete(JsonRpcResponse::success(2, serde_json::json!("two"))));
        assert!(pending.complete(JsonRpcResponse::success(1, serde_json::json!("one"))));

        let one = slot1.wait("srv", "a", timeout, &cancel).await.unwrap();
        let two = slot2.wait("srv", "b", timeout, &cancel).await.unwrap();
        assert_eq!(one.result.unwrap(), "one");
        assert_eq!(two.result.unwrap(), "two");
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn dispatch_handles_batches_and_garbage() {
        let pending = PendingRequests::new();
        let _slot1 = pending.register(1);
        let slot2 = pending.register(2);

        let delivered = pending.dispatch_frame(
            "srv",
            concat!(
                r#"[{"jsonrpc":"2.0","id":2,"result":{}},"#,
                r#"{"jsonrpc":"2.0","method":"notifications/progress"}]"#
            ),
        );
        assert_eq!(delivered, vec![2]);
        let cancel = CancellationToken::new();
        assert!(slot2.wait("srv", "b", Duration::from_secs(1), &cancel).await.is_ok());

        assert!(pending.dispatch_frame("srv", "{not json").is_empty());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn unknown_id_is_not_delivered() {
        let pending = PendingRequests::new();
        assert!(!pending.complete(JsonRpcResponse::success(9, serde_json::json!(null))));
    }

    #[tokio::test]
    async fn timeout_frees_the_slot() {
        let pending = PendingRequests::new();
        let cancel = CancellationToken::new();
        let slot = pending.register(5);
        let err = slot
            .wait("srv", "tools/call", Duration::from_millis(20), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn cancel_fails_waiter_immediately() {
        let pending = PendingRequests::new();
        let cancel = CancellationToken::new();
        let slot = pending.register(1);
        cancel.cancel();
        let err = slot
            .wait("srv", "tools/list", Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::TransportClosed { .. }));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn abandoned_waiter_frees_the_slot() {
        let pending = PendingRequests::new();
        let cancel = CancellationToken::new();
        let slot = pending.register(7);
        let outer = tokio::time::timeout(
            Duration::from_millis(20),
            slot.wait("srv", "tools/call", Duration::from_secs(30), &cancel),
        )
        .await;
        assert!(outer.is_err());
        assert_eq!(pending.len(), 0);

        // A late reply finds nobody waiting
        assert!(!pending.complete(JsonRpcResponse::success(7, serde_json::json!({}))));
    }

    #[test]
    fn dropping_an_unawaited_slot_frees_it() {
        let pending = PendingRequests::new();
        let slot = pending.register(8);
        assert_eq!(pending.len(), 1);
        drop(slot);
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn fail_all_wakes_waiters() {
        let pending = PendingRequests::new();
        let cancel = CancellationToken::new();
        let slot = pending.register(3);
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                slot.wait("srv", "tools/list", Duration::from_secs(30), &cancel)
                    .await
            })
        };
        tokio::task::yield_now().await;
        pending.fail_all();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_fatal());
    }
}

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::utils::errors::CoreResult;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Transport for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for response
    async fn send_request(&self, request: JsonRpcRequest) -> CoreResult<JsonRpcResponse>;

    /// Send a notification (no response expected)
    async fn send_notification(&self, request: JsonRpcRequest) -> CoreResult<()>;

    /// Check if transport is connected
    async fn is_connected(&self) -> bool;

    /// Close the transport
    async fn close(&self) -> CoreResult<()>;
}

/// Transport factory trait
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn Transport>;
}

/// Shared reader-task helper: a raw line is either a `JsonRpcResponse`
/// (carries `id`, routed to its pending oneshot) or a server-initiated
/// notification (carries `method`, no `id`, forwarded to `notification_tx`
/// for the Notification Forwarder to relay downstream). Anything else is
/// logged and dropped, matching C6's "non-notification and exceptions are
/// logged and dropped" contract.
pub fn dispatch_line(
    line: &str,
    pending: &DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>,
    notification_tx: Option<&mpsc::UnboundedSender<JsonRpcRequest>>,
) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        warn!("failed to parse message as JSON: {}", line);
        return;
    };

    let has_method = value.get("method").is_some();
    let has_id = value.get("id").is_some();

    if has_method && !has_id {
        if let Some(tx) = notification_tx {
            match serde_json::from_value::<JsonRpcRequest>(value) {
                Ok(notification) => {
                    let _ = tx.send(notification);
                }
                Err(e) => warn!("failed to parse notification: {}", e),
            }
        } else {
            debug!("dropping notification, no forwarder registered");
        }
        return;
    }

    match serde_json::from_value::<JsonRpcResponse>(value) {
        Ok(response) => {
            if let Some(id) = response.id.clone() {
                if let Some((_, tx)) = pending.remove(&id) {
                    let _ = tx.send(response);
                } else {
                    warn!("received response with unknown id: {:?}", id);
                }
            } else {
                debug!("received response without id, ignoring");
            }
        }
        Err(e) => {
            warn!("failed to parse response: {}", e);
        }
    }
}

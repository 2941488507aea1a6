//! Notification Forwarder (§4.6): maps an upstream server's notifications
//! onto the matching downstream send, preserving arrival order. Anything
//! that isn't a recognized notification shape is logged and dropped — it
//! never reaches the downstream transport.

use crate::core::protocol::JsonRpcRequest;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What the downstream transport needs to actually deliver a forwarded
/// notification. One implementation per downstream transport kind.
#[async_trait]
pub trait DownstreamSink: Send + Sync {
    async fn send_tool_list_changed(&self);
    async fn send_resource_list_changed(&self);
    async fn send_prompt_list_changed(&self);
    async fn send_resource_updated(&self, uri: String);
    async fn send_log_message(&self, level: String, data: Value, logger: String);
    async fn send_progress_notification(&self, token: Value, progress: f64, total: Option<f64>, message: Option<String>);
}

pub struct NotificationForwarder<D> {
    upstream_server_name: String,
    sink: D,
}

impl<D: DownstreamSink> NotificationForwarder<D> {
    pub fn new(upstream_server_name: impl Into<String>, sink: D) -> Self {
        Self { upstream_server_name: upstream_server_name.into(), sink }
    }

    /// Drains `rx` until the channel closes, dispatching each notification.
    /// Runs as a detached task for the lifetime of the owning session.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<JsonRpcRequest>) {
        while let Some(notification) = rx.recv().await {
            self.dispatch(notification).await;
        }
    }

    async fn dispatch(&self, notification: JsonRpcRequest) {
        let params = notification.params.unwrap_or(Value::Null);
        match notification.method.as_str() {
            "notifications/tools/list_changed" => self.sink.send_tool_list_changed().await,
            "notifications/resources/list_changed" => self.sink.send_resource_list_changed().await,
            "notifications/prompts/list_changed" => self.sink.send_prompt_list_changed().await,
            "notifications/resources/updated" => {
                match params.get("uri").and_then(|u| u.as_str()) {
                    Some(uri) => self.sink.send_resource_updated(uri.to_string()).await,
                    None => warn!("resources/updated notification missing uri"),
                }
            }
            "notifications/message" => {
                let level = params.get("level").and_then(|l| l.as_str()).unwrap_or("info").to_string();
                let data = params.get("data").cloned().unwrap_or(Value::Null);
                let logger = params
                    .get("logger")
                    .and_then(|l| l.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| self.upstream_server_name.clone());
                self.sink.send_log_message(level, data, logger).await;
            }
            "notifications/progress" => {
                let Some(token) = params.get("progressToken").cloned() else {
                    warn!("progress notification missing progressToken");
                    return;
                };
                let progress = params.get("progress").and_then(|p| p.as_f64()).unwrap_or(0.0);
                let total = params.get("total").and_then(|t| t.as_f64());
                let message = params.get("message").and_then(|m| m.as_str()).map(String::from);
                self.sink.send_progress_notification(token, progress, total, message).await;
            }
            other => {
                debug!("dropping unhandled notification '{}' from {}", other, self.upstream_server_name);
            }
        }
    }

    /// Builds a progress-reporting closure that rewrites a downstream
    /// progress token into whatever shape the upstream call expects, so a
    /// long-running upstream tool call's progress still reaches the
    /// original caller under its own token.
    pub fn progress_callback_for(
        &self,
        downstream_token: Value,
    ) -> impl Fn(f64, Option<f64>, Option<String>) -> Value + '_ {
        move |progress, total, message| {
            let mut obj = serde_json::json!({
                "progressToken": downstream_token.clone(),
                "progress": progress,
            });
            if let Some(total) = total {
                obj["total"] = serde_json::json!(total);
            }
            if let Some(message) = message {
                obj["message"] = serde_json::json!(message);
            }
            obj
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn notification(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest { jsonrpc: "2.0".to_string(), id: None, method: method.to_string(), params }
    }

    struct CountingSink {
        tool_list_changed: Arc<AtomicUsize>,
        progress: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DownstreamSink for CountingSink {
        async fn send_tool_list_changed(&self) {
            self.tool_list_changed.fetch_add(1, Ordering::SeqCst);
        }
        async fn send_resource_list_changed(&self) {}
        async fn send_prompt_list_changed(&self) {}
        async fn send_resource_updated(&self, _uri: String) {}
        async fn send_log_message(&self, _level: String, _data: Value, _logger: String) {}
        async fn send_progress_notification(&self, _token: Value, _progress: f64, _total: Option<f64>, _message: Option<String>) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn forwards_tool_list_changed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink { tool_list_changed: counter.clone(), progress: Arc::new(AtomicUsize::new(0)) };
        let forwarder = NotificationForwarder::new("srv", sink);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(notification("notifications/tools/list_changed", None)).unwrap();
        drop(tx);
        forwarder.run(rx).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drops_unknown_notification_without_panicking() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink { tool_list_changed: counter.clone(), progress: Arc::new(AtomicUsize::new(0)) };
        let forwarder = NotificationForwarder::new("srv", sink);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(notification("notifications/unknown_thing", None)).unwrap();
        drop(tx);
        forwarder.run(rx).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}

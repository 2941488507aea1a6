//! Streamable HTTP transport for MCP communication.
//!
//! POSTs a JSON body per request; the server assigns `mcp-session-id` on
//! `initialize` and the client echoes it on every subsequent request. A 400
//! response carrying that header back is treated as a stale session.

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::core::SharedRequestIdGenerator;
use crate::transport::traits::Transport;
use crate::utils::errors::{CoreError, CoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use url::Url;

const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable HTTP transport for MCP servers
pub struct StreamableHttpTransport {
    endpoint: Url,
    client: reqwest::Client,
    auth_bearer_token: Option<String>,
    session_id: Arc<RwLock<Option<String>>>,
    pending: Arc<DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    notification_tx: Option<mpsc::UnboundedSender<JsonRpcRequest>>,
    is_connected: Arc<RwLock<bool>>,
    request_id_gen: SharedRequestIdGenerator,
}

impl StreamableHttpTransport {
    pub async fn new(endpoint: impl Into<String>) -> CoreResult<Self> {
        Self::with_auth(endpoint, None).await
    }

    pub async fn with_auth(endpoint: impl Into<String>, auth_bearer_token: Option<String>) -> CoreResult<Self> {
        Self::with_auth_and_notifications(endpoint, auth_bearer_token, None).await
    }

    pub async fn with_auth_and_notifications(
        endpoint: impl Into<String>,
        auth_bearer_token: Option<String>,
        notification_tx: Option<mpsc::UnboundedSender<JsonRpcRequest>>,
    ) -> CoreResult<Self> {
        let endpoint = endpoint
            .into()
            .parse::<Url>()
            .map_err(|e| CoreError::TransportError(format!("Invalid URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| CoreError::TransportError(e.to_string()))?;

        let transport = Self {
            endpoint,
            client,
            auth_bearer_token,
            session_id: Arc::new(RwLock::new(None)),
            pending: Arc::new(DashMap::new()),
            notification_tx,
            is_connected: Arc::new(RwLock::new(false)),
            request_id_gen: SharedRequestIdGenerator::new(),
        };

        transport.initialize().await?;

        Ok(transport)
    }

    /// The session id assigned by the upstream server, if any — the Session
    /// Runner persists this back to the storage collaborator on connect.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn request_builder(&self, accept: &'static str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept)
            .header("mcp-protocol-version", MCP_PROTOCOL_VERSION);
        if let Some(token) = &self.auth_bearer_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        req
    }

    async fn initialize(&self) -> CoreResult<()> {
        info!("Initializing Streamable HTTP transport: {}", self.endpoint);

        let mut init_request = JsonRpcRequest::new(
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "vmcp-gateway",
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        );

        if init_request.id.is_none() {
            init_request.id = Some(self.request_id_gen.next_id());
        }
        let request_id = init_request.id.clone().expect("id set above");

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let json = serde_json::to_string(&init_request)?;

        let response = self
            .request_builder("application/x-ndjson")
            .body(json)
            .send()
            .await
            .map_err(|e| CoreError::TransportError(format!("Initialize failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.pending.remove(&request_id);
            return Err(CoreError::HttpError { status: 401, body: "unauthorized".to_string() });
        }
        if !status.is_success() {
            self.pending.remove(&request_id);
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::HttpError { status: status.as_u16(), body });
        }

        if let Some(session_id) = response.headers().get(SESSION_HEADER) {
            if let Ok(id) = session_id.to_str() {
                *self.session_id.write().await = Some(id.to_string());
                info!("Streamable HTTP session established: {}", id);
            }
        }

        self.start_reader(response).await;
        *self.is_connected.write().await = true;

        match tokio::time::timeout(std::time::Duration::from_secs(30), rx).await {
            Ok(Ok(_response)) => Ok(()),
            Ok(Err(_)) => Err(CoreError::TransportError("Initialize response channel closed".to_string())),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(CoreError::OperationTimedOut)
            }
        }
    }

    async fn start_reader(&self, response: reqwest::Response) {
        let pending = self.pending.clone();
        let notification_tx = self.notification_tx.clone();

        tokio::spawn(async move {
            let stream = response.bytes_stream();
            let reader = tokio_util::io::StreamReader::new(
                stream.map(|result| result.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
            );
            let buf_reader = BufReader::new(reader);
            let mut lines = buf_reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }

                debug!("Received streamable line: {}", line);
                crate::transport::traits::dispatch_line(&line, &pending, notification_tx.as_ref());
            }

            info!("Streamable HTTP reader task ended");
        });
    }

    async fn attach_session(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.session_id.read().await.clone() {
            Some(id) => req.header(SESSION_HEADER, id),
            None => req,
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> CoreResult<JsonRpcResponse> {
        if !self.is_connected().await {
            return Err(CoreError::TransportError("Transport not connected".to_string()));
        }

        let mut request = request;
        if request.id.is_none() {
            request.id = Some(self.request_id_gen.next_id());
        }
        let request_id = request.id.clone().expect("id set above");

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let json = serde_json::to_string(&request)?;
        debug!("Sending streamable request: {}", json);

        let req = self.attach_session(self.request_builder("application/x-ndjson")).await;
        let response = req
            .body(json)
            .send()
            .await
            .map_err(|e| CoreError::TransportError(format!("Request failed: {}", e)))?;

        let status = response.status();
        let had_session_header = response.headers().contains_key(SESSION_HEADER);
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.pending.remove(&request_id);
            return Err(CoreError::HttpError { status: 401, body: "unauthorized".to_string() });
        }
        if status == reqwest::StatusCode::BAD_REQUEST && had_session_header {
            self.pending.remove(&request_id);
            *self.session_id.write().await = None;
            return Err(CoreError::InvalidSessionId);
        }
        if !status.is_success() {
            self.pending.remove(&request_id);
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::HttpError { status: status.as_u16(), body });
        }

        self.start_reader(response).await;

        match tokio::time::timeout(std::time::Duration::from_secs(30), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CoreError::TransportError("Response channel closed".to_string())),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(CoreError::OperationTimedOut)
            }
        }
    }

    async fn send_notification(&self, request: JsonRpcRequest) -> CoreResult<()> {
        if !self.is_connected().await {
            return Err(CoreError::TransportError("Transport not connected".to_string()));
        }

        let mut request = request;
        request.id = None;

        let json = serde_json::to_string(&request)?;
        debug!("Sending streamable notification: {}", json);

        let req = self.attach_session(self.request_builder("application/x-ndjson")).await;
        let response = req
            .body(json)
            .send()
            .await
            .map_err(|e| CoreError::TransportError(format!("Notification failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::HttpError { status: status.as_u16(), body });
        }

        self.start_reader(response).await;

        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }

    async fn close(&self) -> CoreResult<()> {
        info!("Closing Streamable HTTP transport");

        let session_id = self.session_id.read().await.clone();
        if let Some(id) = session_id {
            let _ = self
                .client
                .delete(self.endpoint.clone())
                .header(SESSION_HEADER, id)
                .send()
                .await;
        }

        *self.is_connected.write().await = false;
        self.pending.clear();
        Ok(())
    }
}

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::core::SharedRequestIdGenerator;
use crate::sandbox::{CompiledPolicy, ProcessSpec, Sandbox};
use crate::transport::traits::Transport;
use crate::utils::errors::{CoreError, CoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Stdio transport: launches the upstream server as a sandboxed child
/// process and exchanges newline-delimited JSON-RPC messages over its
/// stdin/stdout.
pub struct StdioTransport {
    child: Arc<Mutex<Child>>,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Arc<DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    is_connected: Arc<RwLock<bool>>,
    request_id_gen: SharedRequestIdGenerator,
}

impl StdioTransport {
    pub async fn new(
        command: impl Into<String>,
        args: Vec<String>,
        env: std::collections::HashMap<String, String>,
        sandbox: Arc<dyn Sandbox>,
        policy: CompiledPolicy,
    ) -> CoreResult<Self> {
        Self::with_notifications(command, args, env, sandbox, policy, None).await
    }

    /// `notification_tx`, when set, receives every server-to-client message
    /// carrying a `method` but no `id` (the Notification Forwarder's feed).
    pub async fn with_notifications(
        command: impl Into<String>,
        args: Vec<String>,
        env: std::collections::HashMap<String, String>,
        sandbox: Arc<dyn Sandbox>,
        policy: CompiledPolicy,
        notification_tx: Option<mpsc::UnboundedSender<JsonRpcRequest>>,
    ) -> CoreResult<Self> {
        let spec = ProcessSpec {
            command: command.into(),
            args,
            env,
            cwd: None,
            env_inherit: false,
        };

        let mut child = sandbox.spawn(&spec, &policy).await?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::TransportError("failed to open stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::TransportError("failed to open stdout".to_string()))?;

        let transport = Self {
            child: Arc::new(Mutex::new(child)),
            stdin: Arc::new(Mutex::new(stdin)),
            pending: Arc::new(DashMap::new()),
            is_connected: Arc::new(RwLock::new(true)),
            request_id_gen: SharedRequestIdGenerator::new(),
        };

        transport.start_reader(stdout, notification_tx).await;

        Ok(transport)
    }

    async fn start_reader(
        &self,
        stdout: ChildStdout,
        notification_tx: Option<mpsc::UnboundedSender<JsonRpcRequest>>,
    ) {
        let pending = self.pending.clone();
        let is_connected = self.is_connected.clone();

        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                debug!("received: {}", line);
                crate::transport::traits::dispatch_line(&line, &pending, notification_tx.as_ref());
            }

            info!("stdio reader task ended");
            *is_connected.write().await = false;
            pending.clear();
        });
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> CoreResult<JsonRpcResponse> {
        if !self.is_connected().await {
            return Err(CoreError::TransportError("transport not connected".to_string()));
        }

        let mut request = request;
        if request.id.is_none() {
            request.id = Some(self.request_id_gen.next_id());
        }
        let request_id = request.id.clone().expect("id set above");

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let json = serde_json::to_string(&request)?;
        debug!("sending: {}", json);

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(json.as_bytes()).await {
                self.pending.remove(&request_id);
                return Err(CoreError::Io(e));
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                self.pending.remove(&request_id);
                return Err(CoreError::Io(e));
            }
            if let Err(e) = stdin.flush().await {
                self.pending.remove(&request_id);
                return Err(CoreError::Io(e));
            }
        }

        match tokio::time::timeout(std::time::Duration::from_secs(30), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CoreError::TransportError("response channel closed".to_string())),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(CoreError::OperationTimedOut)
            }
        }
    }

    async fn send_notification(&self, request: JsonRpcRequest) -> CoreResult<()> {
        if !self.is_connected().await {
            return Err(CoreError::TransportError("transport not connected".to_string()));
        }

        let mut request = request;
        request.id = None;

        let json = serde_json::to_string(&request)?;
        debug!("sending notification: {}", json);

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }

    async fn close(&self) -> CoreResult<()> {
        let mut child = self.child.lock().await;

        if let Err(e) = child.start_kill() {
            warn!("failed to kill child process: {}", e);
        }

        match tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => info!("child process exited with: {:?}", status),
            Ok(Err(e)) => error!("failed to wait for child: {}", e),
            Err(_) => warn!("timeout waiting for child process"),
        }

        *self.is_connected.write().await = false;
        self.pending.clear();
        Ok(())
    }
}

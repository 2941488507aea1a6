//! Upstream Session Runner (C4): one detached task per connected upstream
//! server, owning the transport for its whole lifetime. Mirrors the nested
//! scope teardown of a transport-then-session context manager: cancelling
//! the task tears the transport down; this is the only sanctioned shutdown
//! path.

use crate::config::types::{UpstreamServerConfig, UpstreamTransportConfig};
use crate::core::protocol::JsonRpcRequest;
use crate::sandbox::{CompiledPolicy, Sandbox};
use crate::transport::{SseTransport, StdioTransport, StreamableHttpTransport, Transport};
use crate::utils::errors::{CoreError, CoreResult};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const DISCONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// A live connection to one upstream server plus the handle needed to tear
/// it down. Owned exclusively by the Client Manager's `server_id` map.
pub struct RunnerHandle {
    pub transport: Arc<dyn Transport>,
    cancel_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RunnerHandle {
    /// Cancels the runner task and waits up to 5s for its transport to
    /// close. A timeout here is logged, not propagated — the task is
    /// abandoned and the OS reclaims its resources independently.
    pub async fn disconnect(mut self) -> CoreResult<()> {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(DISCONNECT_TIMEOUT, &mut self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("session runner task panicked: {e}");
                Ok(())
            }
            Err(_) => {
                warn!("disconnect exceeded 5s, abandoning runner task");
                self.task.abort();
                Ok(())
            }
        }
    }
}

async fn build_transport(
    upstream: &UpstreamServerConfig,
    sandbox: Arc<dyn Sandbox>,
    policy: CompiledPolicy,
    notification_tx: Option<mpsc::UnboundedSender<JsonRpcRequest>>,
) -> CoreResult<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match &upstream.transport {
        UpstreamTransportConfig::Stdio { command, args, env } => Arc::new(
            StdioTransport::with_notifications(
                command.clone(),
                args.clone(),
                env.clone(),
                sandbox,
                policy,
                notification_tx,
            )
            .await?,
        ),
        UpstreamTransportConfig::Sse { url, .. } => Arc::new(
            SseTransport::with_auth_and_notifications(
                url.clone(),
                upstream.auth_bearer_token.clone(),
                notification_tx,
            )
            .await?,
        ),
        UpstreamTransportConfig::Http { url, .. } => Arc::new(
            StreamableHttpTransport::with_auth_and_notifications(
                url.clone(),
                upstream.auth_bearer_token.clone(),
                notification_tx,
            )
            .await?,
        ),
    };
    Ok(transport)
}

/// Spawns the runner task, awaits its readiness with a 30s timeout, and
/// returns a handle on success. On timeout the runner is cancelled and
/// `ConnectionTimeout` is raised; on an initialization failure the typed
/// error is re-raised as-is.
pub async fn connect(
    upstream: UpstreamServerConfig,
    sandbox: Arc<dyn Sandbox>,
    policy: CompiledPolicy,
    notification_tx: Option<mpsc::UnboundedSender<JsonRpcRequest>>,
) -> CoreResult<RunnerHandle> {
    let (ready_tx, ready_rx) = oneshot::channel::<CoreResult<Arc<dyn Transport>>>();
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

    let server_name = upstream.name.clone();
    let task = tokio::spawn(async move {
        match build_transport(&upstream, sandbox, policy, notification_tx).await {
            Ok(transport) => {
                if ready_tx.send(Ok(transport.clone())).is_err() {
                    let _ = transport.close().await;
                    return;
                }
                // Wait-forever until cancelled: the only sanctioned teardown.
                let _ = cancel_rx.await;
                if let Err(e) = transport.close().await {
                    warn!("error closing transport for {}: {e}", upstream.name);
                }
                info!("session runner for {} stopped", upstream.name);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    });

    match tokio::time::timeout(CONNECT_TIMEOUT, ready_rx).await {
        Ok(Ok(Ok(transport))) => Ok(RunnerHandle {
            transport,
            cancel_tx: Some(cancel_tx),
            task,
        }),
        Ok(Ok(Err(e))) => {
            let _ = task.await;
            Err(e)
        }
        Ok(Err(_)) => {
            // ready_tx dropped without sending: the spawn itself panicked.
            let _ = task.await;
            Err(CoreError::ConnectionTimeout)
        }
        Err(_) => {
            warn!("connect to {} exceeded 30s, cancelling", server_name);
            let _ = cancel_tx.send(());
            task.abort();
            Err(CoreError::ConnectionTimeout)
        }
    }
}

//! Client Manager (C5): maps `server_id → session`, owns `connect`/
//! `disconnect`/`stop`, and wraps every upstream call with the 401→OAuth
//! handoff, 400-stale-session retry, and HTTP error mapping of §4.5.

use crate::auth::upstream_oauth::UpstreamOAuth;
use crate::config::types::UpstreamServerConfig;
use crate::core::circuit_breaker::CircuitBreakerManager;
use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::core::session_runner::{self, RunnerHandle};
use crate::sandbox::{CompiledPolicy, PolicyCompiler, Sandbox};
use crate::utils::errors::{CoreError, CoreResult};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

const GLOBAL_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Result shape the operation wrapper returns in place of raising on a 401:
/// a synthetic, user-visible "please authenticate" body. The caller (the
/// Execution Router) renders it the same way it would a real tool/resource/
/// prompt result.
pub struct AuthRequiredResult {
    pub message: String,
}

pub enum CallOutcome {
    Ok(serde_json::Value),
    AuthRequired(AuthRequiredResult),
}

pub struct ClientManager<S> {
    store: Arc<S>,
    sandbox: Arc<dyn Sandbox>,
    mandatory_deny: Vec<String>,
    oauth: Arc<UpstreamOAuth>,
    runners: DashMap<String, RunnerHandle>,
    /// When false, each successful call disconnects the session afterward
    /// (stateless); when true, the session is kept for the downstream
    /// session's lifetime.
    keep_alive: bool,
    notification_tx: Option<mpsc::UnboundedSender<JsonRpcRequest>>,
    breakers: CircuitBreakerManager,
}

impl<S> ClientManager<S> {
    pub fn new(
        store: Arc<S>,
        sandbox: Arc<dyn Sandbox>,
        mandatory_deny: Vec<String>,
        oauth: Arc<UpstreamOAuth>,
        keep_alive: bool,
        notification_tx: Option<mpsc::UnboundedSender<JsonRpcRequest>>,
    ) -> Self {
        Self {
            store,
            sandbox,
            mandatory_deny,
            oauth,
            runners: DashMap::new(),
            keep_alive,
            notification_tx,
            breakers: CircuitBreakerManager::default(),
        }
    }

    fn compile_policy(&self, upstream: &UpstreamServerConfig) -> CoreResult<CompiledPolicy> {
        // Only stdio transports run as sandboxed subprocesses; network
        // transports get a pass-through policy (egress control is enforced
        // by the remote server itself, not by this process).
        match &upstream.transport {
            crate::config::types::UpstreamTransportConfig::Stdio { .. } => {
                PolicyCompiler::compile(&Default::default(), &self.mandatory_deny)
            }
            _ => Ok(CompiledPolicy::PassThrough),
        }
    }

    /// Fast-path returns if already connected; otherwise spawns a Session
    /// Runner per §4.4 and awaits readiness.
    pub async fn connect_server(&self, upstream: &UpstreamServerConfig) -> CoreResult<()> {
        if self.runners.contains_key(&upstream.server_id) {
            return Ok(());
        }

        let policy = self.compile_policy(upstream)?;
        let handle = session_runner::connect(
            upstream.clone(),
            self.sandbox.clone(),
            policy,
            self.notification_tx.clone(),
        )
        .await?;

        self.runners.insert(upstream.server_id.clone(), handle);
        Ok(())
    }

    pub async fn disconnect_server(&self, server_id: &str) -> CoreResult<()> {
        if let Some((_, handle)) = self.runners.remove(server_id) {
            handle.disconnect().await?;
        }
        Ok(())
    }

    /// Cancels every runner concurrently, bounded by a 10s global timeout.
    pub async fn stop(&self) {
        let ids: Vec<String> = self.runners.iter().map(|e| e.key().clone()).collect();
        let handles: Vec<RunnerHandle> = ids
            .into_iter()
            .filter_map(|id| self.runners.remove(&id).map(|(_, h)| h))
            .collect();

        let shutdown = async {
            for handle in handles {
                if let Err(e) = handle.disconnect().await {
                    error!("error disconnecting upstream session: {e}");
                }
            }
        };

        if tokio::time::timeout(GLOBAL_STOP_TIMEOUT, shutdown).await.is_err() {
            warn!("client manager stop exceeded 10s global timeout");
        }
        self.runners.clear();
    }

    /// Runs `method`/`params` against `upstream`, connecting first if
    /// needed, retrying at most once on a stale session, and mapping a 401
    /// into a synthetic auth-required result rather than an error.
    pub async fn call(
        &self,
        upstream: &UpstreamServerConfig,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> CoreResult<CallOutcome> {
        self.connect_server(upstream).await?;
        self.call_with_retry(upstream, method, params, 0).await
    }

    async fn call_with_retry(
        &self,
        upstream: &UpstreamServerConfig,
        method: &str,
        params: Option<serde_json::Value>,
        attempt: u32,
    ) -> CoreResult<CallOutcome> {
        match self.do_call(upstream, method, params.clone()).await {
            Err(CoreError::InvalidSessionId) if attempt == 0 => {
                tokio::time::sleep(RETRY_BACKOFF_BASE * (attempt + 1)).await;
                let _ = self.disconnect_server(&upstream.server_id).await;
                self.connect_server(upstream).await?;
                Box::pin(self.call_with_retry(upstream, method, params, attempt + 1)).await
            }
            other => other,
        }
    }

    async fn do_call(
        &self,
        upstream: &UpstreamServerConfig,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> CoreResult<CallOutcome> {
        let transport = {
            let handle = self
                .runners
                .get(&upstream.server_id)
                .ok_or_else(|| CoreError::ServerNotFound(upstream.server_id.clone()))?;
            handle.transport.clone()
        };

        let breaker = self.breakers.get_breaker(&upstream.server_id).await;
        if !breaker.allow_request().await {
            return Err(CoreError::UpstreamFailure(format!(
                "circuit breaker open for {}",
                upstream.server_id
            )));
        }

        let request = JsonRpcRequest::new(method, params);
        let result = transport.send_request(request).await;
        match &result {
            Ok(_) => breaker.record_success().await,
            Err(_) => breaker.record_failure().await,
        }

        let outcome = match result {
            Ok(response) => self.unwrap_response(response),
            Err(CoreError::HttpError { status: 401, .. }) => {
                let auth_url = self.oauth.start_flow(upstream).await?;
                Ok(CallOutcome::AuthRequired(AuthRequiredResult {
                    message: format!(
                        "Server {} is unauthenticated. Please authenticate using: {auth_url}",
                        upstream.name
                    ),
                }))
            }
            Err(e) => Err(e),
        };

        if outcome.is_ok() && !self.keep_alive {
            let _ = self.disconnect_server(&upstream.server_id).await;
        }

        outcome
    }

    fn unwrap_response(&self, response: JsonRpcResponse) -> CoreResult<CallOutcome> {
        if let Some(err) = response.error {
            return Err(CoreError::UpstreamFailure(err.message));
        }
        Ok(CallOutcome::Ok(response.result.unwrap_or(serde_json::Value::Null)))
    }
}

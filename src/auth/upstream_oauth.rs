//! Upstream OAuth (§4.5 401 recovery): a PKCE authorization-code flow run
//! against an *upstream* MCP server's own OAuth endpoints, distinct from
//! whatever scheme protects the gateway's downstream listener.

use crate::config::types::{OAuthState, UpstreamServerConfig};
use crate::utils::errors::{CoreError, CoreResult};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use oauth2::{
    basic::BasicClient, reqwest::async_http_client, AuthUrl, AuthorizationCode, ClientId,
    CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, TokenResponse, TokenUrl,
};
use tracing::info;

const STATE_TTL: ChronoDuration = ChronoDuration::minutes(10);

/// Tracks in-flight PKCE handshakes keyed by `server_id`. One handshake per
/// upstream at a time; starting a new one supersedes a stale, unfinished
/// one.
pub struct UpstreamOAuth {
    callback_base_url: String,
    pending: DashMap<String, OAuthState>,
}

impl UpstreamOAuth {
    pub fn new(callback_base_url: impl Into<String>) -> Self {
        Self {
            callback_base_url: callback_base_url.into(),
            pending: DashMap::new(),
        }
    }

    fn client_for(&self, upstream: &UpstreamServerConfig) -> CoreResult<(BasicClient, String)> {
        let authorize_url = upstream.oauth_authorize_url.as_ref().ok_or_else(|| {
            CoreError::ConfigError(format!("upstream {} has no oauth_authorize_url configured", upstream.server_id))
        })?;
        let token_url = upstream.oauth_token_url.as_ref().ok_or_else(|| {
            CoreError::ConfigError(format!("upstream {} has no oauth_token_url configured", upstream.server_id))
        })?;
        let client_id = upstream.oauth_client_id.clone().unwrap_or_default();
        let callback_url = format!("{}/oauth/callback/{}", self.callback_base_url.trim_end_matches('/'), upstream.server_id);

        let client = BasicClient::new(
            ClientId::new(client_id),
            None,
            AuthUrl::new(authorize_url.clone()).map_err(|e| CoreError::ConfigError(e.to_string()))?,
            Some(TokenUrl::new(token_url.clone()).map_err(|e| CoreError::ConfigError(e.to_string()))?),
        )
        .set_redirect_uri(RedirectUrl::new(callback_url.clone()).map_err(|e| CoreError::ConfigError(e.to_string()))?);

        Ok((client, callback_url))
    }

    /// Begins a PKCE flow for `upstream` and returns the authorization URL
    /// the caller should surface to the user.
    pub async fn start_flow(&self, upstream: &UpstreamServerConfig) -> CoreResult<String> {
        let (client, callback_url) = self.client_for(upstream)?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (authorize_url, csrf_token) = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge.clone())
            .url();

        let state = OAuthState {
            state_token: csrf_token.secret().clone(),
            code_verifier: pkce_verifier.secret().clone(),
            code_challenge: pkce_challenge.as_str().to_string(),
            server_name: upstream.name.clone(),
            user_id: upstream.server_id.clone(),
            callback_url,
            expires_at: Utc::now() + STATE_TTL,
        };

        self.pending.insert(upstream.server_id.clone(), state);
        info!("started upstream OAuth flow for {}", upstream.server_id);

        Ok(authorize_url.to_string())
    }

    /// Completes a pending flow: validates the CSRF state token, exchanges
    /// the authorization code for a bearer token via PKCE, and returns it
    /// for the caller to persist onto `UpstreamServerConfig::auth_bearer_token`.
    pub async fn complete_flow(
        &self,
        upstream: &UpstreamServerConfig,
        state_token: &str,
        code: &str,
    ) -> CoreResult<String> {
        let (_, state) = self
            .pending
            .remove(&upstream.server_id)
            .ok_or_else(|| CoreError::ConfigError("no pending OAuth flow for this upstream".to_string()))?;

        if state.state_token != state_token {
            return Err(CoreError::SecurityError("OAuth state token mismatch".to_string()));
        }
        if state.expires_at < Utc::now() {
            return Err(CoreError::ConfigError("OAuth flow expired".to_string()));
        }

        let (client, _) = self.client_for(upstream)?;

        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(state.code_verifier))
            .request_async(async_http_client)
            .await
            .map_err(|e| CoreError::AuthenticationRequired { auth_url: format!("token exchange failed: {e}") })?;

        Ok(token.access_token().secret().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> UpstreamServerConfig {
        UpstreamServerConfig {
            server_id: "srv1".to_string(),
            name: "srv1".to_string(),
            transport: crate::config::types::UpstreamTransportConfig::Http {
                url: "https://example.test/mcp".to_string(),
                headers: Default::default(),
            },
            auth_bearer_token: None,
            session_id: None,
            status: Default::default(),
            oauth_authorize_url: Some("https://example.test/authorize".to_string()),
            oauth_token_url: Some("https://example.test/token".to_string()),
            oauth_client_id: Some("client-123".to_string()),
        }
    }

    #[tokio::test]
    async fn start_flow_records_pending_state() {
        let oauth = UpstreamOAuth::new("https://gateway.local");
        let url = oauth.start_flow(&upstream()).await.unwrap();
        assert!(url.starts_with("https://example.test/authorize"));
        assert!(oauth.pending.contains_key("srv1"));
    }

    #[tokio::test]
    async fn start_flow_requires_oauth_endpoints() {
        let oauth = UpstreamOAuth::new("https://gateway.local");
        let mut cfg = upstream();
        cfg.oauth_authorize_url = None;
        assert!(oauth.start_flow(&cfg).await.is_err());
    }

    #[tokio::test]
    async fn complete_flow_rejects_unknown_state_token() {
        let oauth = UpstreamOAuth::new("https://gateway.local");
        oauth.start_flow(&upstream()).await.unwrap();
        let result = oauth.complete_flow(&upstream(), "wrong-token", "code").await;
        assert!(result.is_err());
    }
}

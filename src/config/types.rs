use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

/// Top-level gateway configuration (the process's own runtime settings).
///
/// This is distinct from [`VMCPConfig`]: the gateway config governs the
/// process itself (where the sandbox home lives, default policy, log
/// level); `VMCPConfig` governs one virtual MCP composition and is owned by
/// the storage collaborator (see `config::manager::VMCPConfigStore`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GatewayConfig {
    pub log_level: String,
    /// Root directory for per-vMCP sandbox homes, defaults to `~/.vmcp`.
    pub vmcp_home: String,
    #[serde(default)]
    pub default_policy: PolicyInput,
    /// Deny rules every sandbox gets regardless of per-vMCP policy.
    #[serde(default)]
    pub mandatory_deny: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            vmcp_home: "~/.vmcp".to_string(),
            default_policy: PolicyInput::default(),
            mandatory_deny: Vec::new(),
        }
    }
}

/// Input to the Policy Compiler (C1). One of these per sandboxed vMCP.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(default)]
pub struct PolicyInput {
    pub read_deny: Vec<String>,
    pub write_allow: Vec<String>,
    pub write_deny_within_allow: Vec<String>,
    pub allow_network: bool,
    pub allow_unix_sockets: Vec<String>,
    pub allow_local_binding: bool,
    pub http_proxy_port: Option<u16>,
    pub socks_proxy_port: Option<u16>,
}

/// A named composition of upstream servers plus custom tools/prompts/
/// resources, exposed to one or more downstream MCP sessions.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct VMCPConfig {
    pub id: String,
    pub owner_user_id: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub selected_servers: Vec<String>,
    #[serde(default)]
    pub selected_tools: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub selected_prompts: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub selected_resources: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub selected_resource_templates: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub tool_overrides: HashMap<String, ToolOverride>,
    #[serde(default)]
    pub custom_tools: Vec<CustomTool>,
    #[serde(default)]
    pub custom_prompts: Vec<CustomPrompt>,
    #[serde(default)]
    pub custom_resources: Vec<CustomResource>,
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
    #[serde(default)]
    pub metadata: VMCPMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(default)]
pub struct VMCPMetadata {
    pub sandbox_enabled: bool,
    /// `true` for shared/global-registry entries whose custom resources
    /// are readable by any user, per §4.8 `read_resource`'s `custom:` scheme.
    pub shared: bool,
}

/// A rename/redescribe/widget override applied to one upstream or custom
/// tool name during composition (§4.7 step 2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(default)]
pub struct ToolOverride {
    pub name: Option<String>,
    pub description: Option<String>,
    pub widget: Option<serde_json::Value>,
}

/// The three custom-tool kinds handled by the Custom Tool Engines (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustomToolKind {
    Prompt { text: String },
    Http {
        method: String,
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<String>,
    },
    Python { source: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CustomTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Declared argument names, used to derive a JSON schema when the
    /// Python source's signature cannot be introspected (§4.7 step 4).
    #[serde(default)]
    pub variables: Vec<ToolVariable>,
    #[serde(flatten)]
    pub kind: CustomToolKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolVariable {
    pub name: String,
    #[serde(rename = "type", default = "default_variable_type")]
    pub ty: String,
    #[serde(default)]
    pub required: bool,
}

fn default_variable_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CustomPrompt {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub text: String,
    #[serde(default)]
    pub arguments: Vec<ToolVariable>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CustomResource {
    pub uri: String,
    #[serde(default)]
    pub description: Option<String>,
    pub mime_type: String,
    pub content: String,
}

/// One upstream MCP server, as referenced by `VMCPConfig::selected_servers`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct UpstreamServerConfig {
    pub server_id: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub transport: UpstreamTransportConfig,
    #[serde(default)]
    pub auth_bearer_token: Option<String>,
    /// Persisted `mcp-session-id` for the streamable-HTTP transport's
    /// resumability (§4.4 "best-effort" persistence).
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub status: UpstreamServerStatus,
    /// OAuth 2.1 endpoints for this upstream, used by the 401 recovery
    /// handshake (§4.5). `None` when the upstream has no OAuth-protected
    /// surface; a 401 from such an upstream surfaces as a plain `HttpError`.
    #[serde(default)]
    pub oauth_authorize_url: Option<String>,
    #[serde(default)]
    pub oauth_token_url: Option<String>,
    #[serde(default)]
    pub oauth_client_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamServerStatus {
    #[default]
    Unknown,
    Connected,
    Disconnected,
    Unauthenticated,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum UpstreamTransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// OAuth 2.1 PKCE handshake state for an in-flight upstream re-auth (§6
/// persisted state, §4.5 401 recovery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    pub state_token: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub server_name: String,
    pub user_id: String,
    pub callback_url: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

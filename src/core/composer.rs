//! vMCP Composer (§4.7): assembles the tool/prompt/resource surface a single
//! `VMCPConfig` exposes downstream, by calling each selected upstream live
//! for its `tools/prompts/resources` list and combining that with the
//! vMCP's selection lists, tool overrides, custom tools/prompts/resources,
//! and optional sandbox tooling. Name collisions resolve first-wins in the
//! order: upstream, custom, sandbox, defaults.
//!
//! There's no capability cache: a CLI invocation is one-shot, so a cache
//! keyed for this process's lifetime would never outlive the call it was
//! built for.

use crate::config::types::{CustomToolKind, ToolOverride, UpstreamServerConfig, VMCPConfig};
use crate::core::client_manager::ClientManager;
use crate::core::filter::CapabilityFilter;
use crate::utils::errors::CoreResult;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A raw tool entry as returned by an upstream's `tools/list`, before
/// composition (renaming, filtering, override application) is applied.
struct RawTool {
    name: String,
    description: Option<String>,
    input_schema: Option<Value>,
}

struct RawPrompt {
    name: String,
    description: Option<String>,
}

struct RawResource {
    uri: String,
    name: Option<String>,
    mime_type: Option<String>,
}

/// One composed tool, carrying enough to both list it and dispatch a call.
#[derive(Debug, Clone)]
pub struct ComposedTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub widget: Option<Value>,
    pub origin: ToolOrigin,
}

#[derive(Debug, Clone)]
pub enum ToolOrigin {
    Upstream { server_id: String, upstream_name: String },
    Custom(Box<crate::config::types::CustomTool>),
    Sandbox,
}

#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub name: String,
    pub description: Option<String>,
    pub origin: PromptOrigin,
}

#[derive(Debug, Clone)]
pub enum PromptOrigin {
    Upstream { server_id: String, upstream_name: String },
    Custom(Box<crate::config::types::CustomPrompt>),
}

#[derive(Debug, Clone)]
pub struct ComposedResource {
    pub uri: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub origin: ResourceOrigin,
}

#[derive(Debug, Clone)]
pub enum ResourceOrigin {
    Upstream { server_id: String, upstream_uri: String },
    Custom(Box<crate::config::types::CustomResource>),
}

const EXECUTE_BASH_TOOL: &str = "execute_bash";

/// Server-name prefixing convention (§4.7 step 3): underscores stripped from
/// the upstream's name so the composed tool name stays a single token.
fn server_prefix(upstream_name: &str) -> String {
    upstream_name.replace('_', "")
}

pub struct VmcpComposer<S> {
    pub config: VMCPConfig,
    upstreams: HashMap<String, UpstreamServerConfig>,
    client_manager: Arc<ClientManager<S>>,
}

impl<S> VmcpComposer<S> {
    pub fn new(
        config: VMCPConfig,
        upstreams: HashMap<String, UpstreamServerConfig>,
        client_manager: Arc<ClientManager<S>>,
    ) -> Self {
        Self { config, upstreams, client_manager }
    }

    fn tool_override(&self, composed_name: &str) -> Option<&ToolOverride> {
        self.config.tool_overrides.get(composed_name)
    }

    fn apply_tool_override(&self, mut tool: ComposedTool) -> ComposedTool {
        if let Some(over) = self.tool_override(&tool.name) {
            if let Some(name) = &over.name {
                tool.name = name.clone();
            }
            if let Some(desc) = &over.description {
                tool.description = Some(desc.clone());
            }
            if over.widget.is_some() {
                tool.widget = over.widget.clone();
            }
        }
        tool
    }

    /// Fetches and composes every tool the vMCP exposes: upstream tools
    /// (filtered by selection, renamed with the server prefix), custom
    /// tools, and the sandbox's `execute_bash` when enabled.
    pub async fn list_tools(&self) -> CoreResult<Vec<ComposedTool>> {
        let mut seen = std::collections::HashSet::new();
        let mut tools = Vec::new();

        for server_id in &self.config.selected_servers {
            let Some(upstream) = self.upstreams.get(server_id) else {
                continue;
            };
            let raw_tools = self.fetch_upstream_tools(upstream).await?;
            let selection = self
                .config
                .selected_tools
                .get(server_id)
                .cloned()
                .unwrap_or_default();
            let filter = CapabilityFilter::from_selection(&selection);
            let prefix = server_prefix(&upstream.name);

            for raw in raw_tools {
                if !filter.is_selected(&raw.name) {
                    continue;
                }
                let composed_name = format!("{prefix}_{}", raw.name);
                if !seen.insert(composed_name.clone()) {
                    continue;
                }
                let tool = self.apply_tool_override(ComposedTool {
                    name: composed_name,
                    description: raw.description,
                    input_schema: raw.input_schema.unwrap_or(json!({"type": "object"})),
                    widget: None,
                    origin: ToolOrigin::Upstream {
                        server_id: server_id.clone(),
                        upstream_name: raw.name,
                    },
                });
                tools.push(tool);
            }
        }

        for custom in &self.config.custom_tools {
            if !seen.insert(custom.name.clone()) {
                continue;
            }
            let schema = custom_tool_schema(custom);
            let tool = self.apply_tool_override(ComposedTool {
                name: custom.name.clone(),
                description: custom.description.clone(),
                input_schema: schema,
                widget: None,
                origin: ToolOrigin::Custom(Box::new(custom.clone())),
            });
            tools.push(tool);
        }

        if self.config.metadata.sandbox_enabled && seen.insert(EXECUTE_BASH_TOOL.to_string()) {
            tools.push(ComposedTool {
                name: EXECUTE_BASH_TOOL.to_string(),
                description: Some("Run a shell command inside this vMCP's sandbox.".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": { "command": { "type": "string" } },
                    "required": ["command"]
                }),
                widget: None,
                origin: ToolOrigin::Sandbox,
            });
        }

        Ok(tools)
    }

    pub async fn list_prompts(&self) -> CoreResult<Vec<ComposedPrompt>> {
        let mut seen = std::collections::HashSet::new();
        let mut prompts = Vec::new();

        for server_id in &self.config.selected_servers {
            let Some(upstream) = self.upstreams.get(server_id) else { continue };
            let raw_prompts = self.fetch_upstream_prompts(upstream).await?;
            let selection = self
                .config
                .selected_prompts
                .get(server_id)
                .cloned()
                .unwrap_or_default();
            let filter = CapabilityFilter::from_selection(&selection);
            let prefix = server_prefix(&upstream.name);

            for raw in raw_prompts {
                if !filter.is_selected(&raw.name) {
                    continue;
                }
                let composed_name = format!("{prefix}_{}", raw.name);
                if !seen.insert(composed_name.clone()) {
                    continue;
                }
                prompts.push(ComposedPrompt {
                    name: composed_name,
                    description: raw.description,
                    origin: PromptOrigin::Upstream {
                        server_id: server_id.clone(),
                        upstream_name: raw.name,
                    },
                });
            }
        }

        for custom in &self.config.custom_prompts {
            if !seen.insert(custom.name.clone()) {
                continue;
            }
            prompts.push(ComposedPrompt {
                name: custom.name.clone(),
                description: custom.description.clone(),
                origin: PromptOrigin::Custom(Box::new(custom.clone())),
            });
        }

        Ok(prompts)
    }

    pub async fn list_resources(&self) -> CoreResult<Vec<ComposedResource>> {
        let mut seen = std::collections::HashSet::new();
        let mut resources = Vec::new();

        for server_id in &self.config.selected_servers {
            let Some(upstream) = self.upstreams.get(server_id) else { continue };
            let raw_resources = self.fetch_upstream_resources(upstream).await?;
            let selection = self
                .config
                .selected_resources
                .get(server_id)
                .cloned()
                .unwrap_or_default();
            let filter = CapabilityFilter::from_selection(&selection);
            let prefix = server_prefix(&upstream.name);

            for raw in raw_resources {
                if !filter.is_selected(&raw.uri) {
                    continue;
                }
                let composed_uri = format!("{prefix}:{}", raw.uri);
                if !seen.insert(composed_uri.clone()) {
                    continue;
                }
                resources.push(ComposedResource {
                    uri: composed_uri,
                    description: raw.name,
                    mime_type: raw.mime_type,
                    origin: ResourceOrigin::Upstream {
                        server_id: server_id.clone(),
                        upstream_uri: raw.uri,
                    },
                });
            }
        }

        for custom in &self.config.custom_resources {
            if !seen.insert(custom.uri.clone()) {
                continue;
            }
            resources.push(ComposedResource {
                uri: custom.uri.clone(),
                description: custom.description.clone(),
                mime_type: Some(custom.mime_type.clone()),
                origin: ResourceOrigin::Custom(Box::new(custom.clone())),
            });
        }

        Ok(resources)
    }

    async fn fetch_upstream_tools(&self, upstream: &UpstreamServerConfig) -> CoreResult<Vec<RawTool>> {
        let outcome = self
            .client_manager
            .call(upstream, "tools/list", None)
            .await?;
        match outcome {
            crate::core::client_manager::CallOutcome::Ok(value) => Ok(parse_tool_list(&value)),
            crate::core::client_manager::CallOutcome::AuthRequired(_) => Ok(Vec::new()),
        }
    }

    async fn fetch_upstream_prompts(&self, upstream: &UpstreamServerConfig) -> CoreResult<Vec<RawPrompt>> {
        let outcome = self
            .client_manager
            .call(upstream, "prompts/list", None)
            .await?;
        match outcome {
            crate::core::client_manager::CallOutcome::Ok(value) => Ok(parse_prompt_list(&value)),
            crate::core::client_manager::CallOutcome::AuthRequired(_) => Ok(Vec::new()),
        }
    }

    async fn fetch_upstream_resources(&self, upstream: &UpstreamServerConfig) -> CoreResult<Vec<RawResource>> {
        let outcome = self
            .client_manager
            .call(upstream, "resources/list", None)
            .await?;
        match outcome {
            crate::core::client_manager::CallOutcome::Ok(value) => Ok(parse_resource_list(&value)),
            crate::core::client_manager::CallOutcome::AuthRequired(_) => Ok(Vec::new()),
        }
    }

    /// Resolves a composed tool name back to its call target.
    pub async fn find_tool(&self, composed_name: &str) -> CoreResult<Option<ComposedTool>> {
        Ok(self
            .list_tools()
            .await?
            .into_iter()
            .find(|t| t.name == composed_name))
    }

    pub fn client_manager(&self) -> &Arc<ClientManager<S>> {
        &self.client_manager
    }

    pub fn upstreams(&self) -> &HashMap<String, UpstreamServerConfig> {
        &self.upstreams
    }
}

fn custom_tool_schema(tool: &crate::config::types::CustomTool) -> Value {
    match &tool.kind {
        CustomToolKind::Python { .. } | CustomToolKind::Http { .. } | CustomToolKind::Prompt { .. } => {
            let mut properties = serde_json::Map::new();
            let mut required = Vec::new();
            for var in &tool.variables {
                properties.insert(var.name.clone(), json!({"type": var.ty}));
                if var.required {
                    required.push(var.name.clone());
                }
            }
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
            })
        }
    }
}

fn parse_tool_list(value: &Value) -> Vec<RawTool> {
    value
        .get("tools")
        .and_then(|t| t.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| {
                    Some(RawTool {
                        name: t.get("name")?.as_str()?.to_string(),
                        description: t.get("description").and_then(|d| d.as_str()).map(String::from),
                        input_schema: t.get("inputSchema").cloned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_prompt_list(value: &Value) -> Vec<RawPrompt> {
    value
        .get("prompts")
        .and_then(|p| p.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|p| {
                    Some(RawPrompt {
                        name: p.get("name")?.as_str()?.to_string(),
                        description: p.get("description").and_then(|d| d.as_str()).map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_resource_list(value: &Value) -> Vec<RawResource> {
    value
        .get("resources")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|r| {
                    Some(RawResource {
                        uri: r.get("uri")?.as_str()?.to_string(),
                        name: r.get("name").and_then(|n| n.as_str()).map(String::from),
                        mime_type: r.get("mimeType").and_then(|m| m.as_str()).map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_prefix_strips_underscores() {
        assert_eq!(server_prefix("my_server"), "myserver");
        assert_eq!(server_prefix("plain"), "plain");
    }

    #[test]
    fn custom_tool_schema_includes_required_variables() {
        let tool = crate::config::types::CustomTool {
            name: "greet".to_string(),
            description: None,
            variables: vec![crate::config::types::ToolVariable {
                name: "who".to_string(),
                ty: "string".to_string(),
                required: true,
            }],
            kind: CustomToolKind::Prompt { text: "hello {{who}}".to_string() },
        };
        let schema = custom_tool_schema(&tool);
        assert_eq!(schema["required"], json!(["who"]));
    }
}

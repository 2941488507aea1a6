//! Execution Router (§4.8): dispatches a downstream `tools/call`,
//! `prompts/get`, or `resources/read` to its composed target — a custom
//! tool/prompt/resource, the sandbox, or an upstream server reached through
//! the Client Manager.

use crate::audit::{OperationKind, OperationRecord, OperationsLogger};
use crate::core::client_manager::CallOutcome;
use crate::core::composer::{ComposedResource, PromptOrigin, ResourceOrigin, ToolOrigin, VmcpComposer};
use crate::core::template::TemplateParser;
use crate::core::tool_engines::{HttpToolEngine, PromptToolEngine, PythonSandboxEngine};
use crate::utils::errors::{CoreError, CoreResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;

/// The result of one dispatched operation, already shaped for the
/// downstream MCP response envelope.
pub enum ExecutionResult {
    CallTool(Value),
    GetPrompt(Value),
    ReadResource(Value),
}

pub struct ExecutionRouter<S> {
    composer: VmcpComposer<S>,
    template: TemplateParser,
    operations_log: Option<OperationsLogger>,
}

impl<S> ExecutionRouter<S> {
    pub fn new(composer: VmcpComposer<S>) -> Self {
        Self { composer, template: TemplateParser::new(), operations_log: None }
    }

    pub fn with_operations_log(mut self, logger: OperationsLogger) -> Self {
        self.operations_log = Some(logger);
        self
    }

    pub fn composer(&self) -> &VmcpComposer<S> {
        &self.composer
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        progress_token: Option<Value>,
    ) -> CoreResult<ExecutionResult> {
        let started = Instant::now();
        let outcome = self.call_tool_inner(name, arguments, progress_token).await;
        self.log_call_tool(name, started, &outcome);
        outcome
    }

    async fn call_tool_inner(
        &self,
        name: &str,
        arguments: Value,
        progress_token: Option<Value>,
    ) -> CoreResult<ExecutionResult> {
        let Some(tool) = self.composer.find_tool(name).await? else {
            return Err(CoreError::ServerNotFound(format!("no such tool '{name}'")));
        };

        match tool.origin {
            ToolOrigin::Custom(custom) => {
                let result = self.run_custom_tool(&custom, &arguments).await?;
                Ok(ExecutionResult::CallTool(result))
            }
            ToolOrigin::Sandbox => {
                let engine = PythonSandboxEngine::for_execute_bash();
                let result = engine.run(&arguments, &self.composer.config.environment_variables).await?;
                Ok(ExecutionResult::CallTool(result))
            }
            ToolOrigin::Upstream { server_id, upstream_name } => {
                let upstream = self.upstream(&server_id)?;
                let mut params = json!({ "name": upstream_name, "arguments": arguments });
                if let Some(token) = progress_token {
                    params["_meta"] = json!({ "progressToken": token });
                }
                let outcome = self
                    .composer
                    .client_manager()
                    .call(upstream, "tools/call", Some(params))
                    .await?;
                Ok(ExecutionResult::CallTool(self.render_outcome(outcome)))
            }
        }
    }

    fn log_call_tool(&self, name: &str, started: Instant, outcome: &CoreResult<ExecutionResult>) {
        let Some(logger) = &self.operations_log else { return };
        let mut record = OperationRecord::new(&self.composer.config.id, OperationKind::CallTool, name)
            .with_duration(started.elapsed());
        if let Err(e) = outcome {
            record = record.with_error(e.to_string());
        }
        logger.record(record);
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> CoreResult<ExecutionResult> {
        let prompts = self.composer.list_prompts().await?;
        let Some(prompt) = prompts.into_iter().find(|p| p.name == name) else {
            return Err(CoreError::ServerNotFound(format!("no such prompt '{name}'")));
        };

        match prompt.origin {
            PromptOrigin::Custom(custom) => {
                let args_map = arguments.as_object().cloned().unwrap_or_default();
                let context: HashMap<String, Value> = args_map.into_iter().collect();
                let required: Vec<String> = custom
                    .arguments
                    .iter()
                    .filter(|v| v.required)
                    .map(|v| v.name.clone())
                    .collect();
                let rendered =
                    self.template
                        .render(&custom.text, &context, &self.composer.config.environment_variables, &required)?;
                Ok(ExecutionResult::GetPrompt(json!({
                    "description": custom.description,
                    "messages": [{ "role": "user", "content": { "type": "text", "text": rendered } }],
                })))
            }
            PromptOrigin::Upstream { server_id, upstream_name } => {
                let upstream = self.upstream(&server_id)?;
                let params = json!({ "name": upstream_name, "arguments": arguments });
                let outcome = self
                    .composer
                    .client_manager()
                    .call(upstream, "prompts/get", Some(params))
                    .await?;
                Ok(ExecutionResult::GetPrompt(self.render_outcome(outcome)))
            }
        }
    }

    pub async fn read_resource(&self, uri: &str) -> CoreResult<ExecutionResult> {
        let resources = self.composer.list_resources().await?;
        let Some(resource) = resources.into_iter().find(|r| r.uri == uri) else {
            return Err(CoreError::ServerNotFound(format!("no such resource '{uri}'")));
        };
        self.read_composed_resource(resource).await
    }

    async fn read_composed_resource(&self, resource: ComposedResource) -> CoreResult<ExecutionResult> {
        match resource.origin {
            ResourceOrigin::Custom(custom) => Ok(ExecutionResult::ReadResource(json!({
                "contents": [{
                    "uri": custom.uri,
                    "mimeType": custom.mime_type,
                    "text": custom.content,
                }]
            }))),
            ResourceOrigin::Upstream { server_id, upstream_uri } => {
                let upstream = self.upstream(&server_id)?;
                let params = json!({ "uri": upstream_uri });
                let outcome = self
                    .composer
                    .client_manager()
                    .call(upstream, "resources/read", Some(params))
                    .await?;
                Ok(ExecutionResult::ReadResource(self.render_outcome(outcome)))
            }
        }
    }

    fn upstream(&self, server_id: &str) -> CoreResult<&crate::config::types::UpstreamServerConfig> {
        self.composer
            .upstreams()
            .get(server_id)
            .ok_or_else(|| CoreError::ServerNotFound(server_id.to_string()))
    }

    fn render_outcome(&self, outcome: CallOutcome) -> Value {
        match outcome {
            CallOutcome::Ok(value) => value,
            CallOutcome::AuthRequired(auth) => json!({
                "content": [{ "type": "text", "text": auth.message }],
                "isError": true,
            }),
        }
    }

    async fn run_custom_tool(
        &self,
        custom: &crate::config::types::CustomTool,
        arguments: &Value,
    ) -> CoreResult<Value> {
        let required: Vec<String> =
            custom.variables.iter().filter(|v| v.required).map(|v| v.name.clone()).collect();

        match &custom.kind {
            crate::config::types::CustomToolKind::Prompt { text } => {
                let engine = PromptToolEngine::new(self.template.clone());
                engine.run(text, arguments, &self.composer.config.environment_variables, &required).await
            }
            crate::config::types::CustomToolKind::Http { method, url, headers, body } => {
                let engine = HttpToolEngine::new(self.template.clone());
                engine
                    .run(
                        method,
                        url,
                        headers,
                        body.as_deref(),
                        arguments,
                        &self.composer.config.environment_variables,
                        &required,
                    )
                    .await
            }
            crate::config::types::CustomToolKind::Python { source } => {
                let engine = PythonSandboxEngine::for_custom_tool(source.clone(), custom.variables.clone());
                engine.run(arguments, &self.composer.config.environment_variables).await
            }
        }
    }
}

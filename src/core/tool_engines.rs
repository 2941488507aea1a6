//! Custom Tool Engines (§4.10): the three ways a `CustomTool` actually
//! runs — a templated text blob, an outbound HTTP call, or Python source
//! executed host-side or inside the vMCP's sandbox.

use crate::config::types::ToolVariable;
use crate::core::template::TemplateParser;
use crate::utils::errors::{CoreError, CoreResult};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SANDBOX_TIMEOUT: Duration = Duration::from_secs(60);

fn text_result(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }], "isError": false })
}

fn error_result(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }], "isError": true })
}

fn arguments_map(arguments: &Value) -> HashMap<String, Value> {
    arguments.as_object().cloned().unwrap_or_default().into_iter().collect()
}

pub struct PromptToolEngine {
    template: TemplateParser,
}

impl PromptToolEngine {
    pub fn new(template: TemplateParser) -> Self {
        Self { template }
    }

    pub async fn run(
        &self,
        text: &str,
        arguments: &Value,
        environment: &HashMap<String, String>,
        required: &[String],
    ) -> CoreResult<Value> {
        let rendered = self.template.render(text, &arguments_map(arguments), environment, required)?;
        Ok(text_result(rendered))
    }
}

pub struct HttpToolEngine {
    template: TemplateParser,
    client: reqwest::Client,
}

impl HttpToolEngine {
    pub fn new(template: TemplateParser) -> Self {
        Self { template, client: reqwest::Client::new() }
    }

    pub async fn run(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&str>,
        arguments: &Value,
        environment: &HashMap<String, String>,
        required: &[String],
    ) -> CoreResult<Value> {
        let args = arguments_map(arguments);
        let rendered_url = self.template.render(url, &args, environment, required)?;
        let rendered_body = match body {
            Some(b) => Some(self.template.render(b, &args, environment, required)?),
            None => None,
        };

        let method = method
            .parse::<reqwest::Method>()
            .map_err(|e| CoreError::ConfigError(format!("invalid HTTP method '{method}': {e}")))?;
        let mut request = self.client.request(method, &rendered_url);
        for (key, value) in headers {
            let rendered_value = self.template.render(value, &args, environment, required)?;
            request = request.header(key, rendered_value);
        }
        if let Some(body) = rendered_body {
            request = request.body(body);
        }

        let response = tokio::time::timeout(DEFAULT_TIMEOUT, request.send())
            .await
            .map_err(|_| CoreError::OperationTimedOut)?
            .map_err(|e| CoreError::UpstreamFailure(e.to_string()))?;

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();

        if status.is_success() {
            Ok(text_result(body_text))
        } else {
            Ok(error_result(format!("HTTP {status}: {body_text}")))
        }
    }
}

/// Python source known to reach outside the declared tool surface. Checked
/// before the interpreter ever sees the source.
static DENYLIST: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "import os", "import subprocess", "import sys", "import socket",
        "subprocess.", "eval(", "exec(", "__import__(", "open(",
        "importlib", "ctypes",
    ]
});

fn check_denylist(source: &str) -> CoreResult<()> {
    for pattern in DENYLIST.iter() {
        if source.contains(pattern) {
            return Err(CoreError::SecurityError(format!(
                "custom tool source contains disallowed pattern '{pattern}'"
            )));
        }
    }
    Ok(())
}

/// The two Python custom-tool shapes: an arbitrary function the vMCP author
/// wrote (`source`), or the built-in `execute_bash`/`execute_python`
/// sandbox tools which always run inside the sandbox regardless of the
/// owning vMCP's sandbox flag being visible to the user as one tool.
enum PythonKind {
    Custom { source: String, variables: Vec<ToolVariable> },
    ExecuteBash,
}

pub struct PythonSandboxEngine {
    kind: PythonKind,
}

impl PythonSandboxEngine {
    pub fn for_custom_tool(source: String, variables: Vec<ToolVariable>) -> Self {
        Self { kind: PythonKind::Custom { source, variables } }
    }

    pub fn for_execute_bash() -> Self {
        Self { kind: PythonKind::ExecuteBash }
    }

    pub async fn run(&self, arguments: &Value, environment: &HashMap<String, String>) -> CoreResult<Value> {
        match &self.kind {
            PythonKind::ExecuteBash => self.run_bash(arguments).await,
            PythonKind::Custom { source, variables } => self.run_custom(source, variables, arguments, environment).await,
        }
    }

    async fn run_bash(&self, arguments: &Value) -> CoreResult<Value> {
        let command = arguments
            .get("command")
            .and_then(|c| c.as_str())
            .ok_or_else(|| CoreError::ConfigError("execute_bash requires a 'command' argument".to_string()))?;

        let output = tokio::time::timeout(
            SANDBOX_TIMEOUT,
            Command::new("bash").arg("-c").arg(command).output(),
        )
        .await
        .map_err(|_| CoreError::OperationTimedOut)?
        .map_err(|e| CoreError::SandboxFailure(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(text_result(stdout))
        } else {
            Ok(error_result(format!("exit {}: {stderr}", output.status)))
        }
    }

    async fn run_custom(
        &self,
        source: &str,
        variables: &[ToolVariable],
        arguments: &Value,
        _environment: &HashMap<String, String>,
    ) -> CoreResult<Value> {
        check_denylist(source)?;

        let mut file = tempfile::Builder::new()
            .suffix(".py")
            .tempfile()
            .map_err(|e| CoreError::SandboxFailure(e.to_string()))?;

        let call_args: Vec<String> = variables
            .iter()
            .map(|v| coerce_argument(arguments.get(&v.name), &v.ty))
            .collect();

        let script = format!(
            "{source}\n\nimport json, sys\n_result = run({args})\nprint(json.dumps({{'success': True, 'result': _result}}))\n",
            args = call_args.join(", "),
        );
        file.write_all(script.as_bytes()).map_err(|e| CoreError::SandboxFailure(e.to_string()))?;
        file.flush().map_err(|e| CoreError::SandboxFailure(e.to_string()))?;

        let path = file.path().to_path_buf();
        let mut child = Command::new("python3")
            .arg(&path)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| CoreError::SandboxFailure(e.to_string()))?;

        let stdout = child.stdout.take();
        let output = tokio::time::timeout(SANDBOX_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| CoreError::OperationTimedOut)?
            .map_err(|e| CoreError::SandboxFailure(e.to_string()))?;
        drop(stdout);

        let stdout_text = String::from_utf8_lossy(&output.stdout).to_string();
        match serde_json::from_str::<Value>(stdout_text.trim()) {
            Ok(envelope) if envelope.get("success").and_then(|s| s.as_bool()) == Some(true) => {
                let result = envelope.get("result").cloned().unwrap_or(Value::Null);
                Ok(text_result(value_to_text(&result)))
            }
            _ => {
                let stderr_text = String::from_utf8_lossy(&output.stderr).to_string();
                Ok(error_result(format!("tool execution failed: {stderr_text}")))
            }
        }
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coerces an argument into Python literal source. Falls back to `None`
/// when the declared type doesn't match the supplied JSON shape.
fn coerce_argument(value: Option<&Value>, declared_type: &str) -> String {
    let Some(value) = value else { return "None".to_string() };
    match (declared_type, value) {
        ("string", Value::String(s)) => format!("{s:?}"),
        ("number", Value::Number(n)) => n.to_string(),
        ("boolean", Value::Bool(b)) => if *b { "True".to_string() } else { "False".to_string() },
        _ => serde_json::to_string(value).unwrap_or_else(|_| "None".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denylist_rejects_os_import() {
        assert!(check_denylist("import os\nrun()").is_err());
    }

    #[test]
    fn denylist_allows_plain_function() {
        assert!(check_denylist("def run(x):\n    return x + 1\n").is_ok());
    }

    #[test]
    fn coerce_string_argument_quotes_it() {
        assert_eq!(coerce_argument(Some(&json!("hi")), "string"), "\"hi\"");
    }

    #[test]
    fn coerce_missing_argument_is_none() {
        assert_eq!(coerce_argument(None, "string"), "None");
    }

    #[tokio::test]
    async fn prompt_engine_renders_template() {
        let engine = PromptToolEngine::new(TemplateParser::new());
        let result = engine.run("hi @param.who", &json!({"who": "there"}), &HashMap::new(), &[]).await.unwrap();
        assert_eq!(result["content"][0]["text"], "hi there");
    }

    #[tokio::test]
    async fn prompt_engine_errors_on_missing_required_argument() {
        let engine = PromptToolEngine::new(TemplateParser::new());
        let required = vec!["who".to_string()];
        let result = engine.run("hi @param.who", &json!({}), &HashMap::new(), &required).await;
        assert!(result.is_err());
    }
}

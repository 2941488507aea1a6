//! Template Parser (§4.9): two-phase substitution for custom tool/prompt
//! bodies. Phase one resolves the gateway's own directives
//! (`@param.NAME`, `@config.NAME`, `@resource.SERVER.NAME`,
//! `@tool.SERVER.TOOL(JSON_ARGS)`, `@prompt.SERVER.PROMPT(JSON_ARGS)`);
//! phase two runs the result through Jinja only if it actually looks like a
//! template (contains `{{`, `{%`, or `{#`), and falls back silently to the
//! post-directive text if the Jinja parse fails.

use crate::utils::errors::{CoreError, CoreResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

static DIRECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"@(?P<kind>param|config|resource|tool|prompt)\.(?P<path>[A-Za-z0-9_.]+)(?:\((?P<args>[^)]*)\))?",
    )
    .expect("static directive regex is valid")
});

#[derive(Clone, Default)]
pub struct TemplateParser;

impl TemplateParser {
    pub fn new() -> Self {
        Self
    }

    /// Renders `text` against `arguments` (the tool/prompt call's own
    /// parameters) and `environment` (the vMCP's configured environment
    /// variables, exposed to `@config.*`). `required` names the declared
    /// variables that must be present in `arguments`; a `@param.NAME`
    /// directive for a name in `required` errors instead of substituting
    /// an empty string when the argument is missing.
    pub fn render(
        &self,
        text: &str,
        arguments: &HashMap<String, Value>,
        environment: &HashMap<String, String>,
        required: &[String],
    ) -> CoreResult<String> {
        let after_directives = self.resolve_directives(text, arguments, environment, required)?;

        if !looks_like_jinja(&after_directives) {
            return Ok(after_directives);
        }

        let mut env = minijinja::Environment::new();
        if env.add_template("tool", &after_directives).is_err() {
            return Ok(after_directives);
        }
        let Ok(tmpl) = env.get_template("tool") else {
            return Ok(after_directives);
        };

        let mut context: HashMap<String, Value> = arguments.clone();
        for (k, v) in environment {
            context.entry(k.clone()).or_insert_with(|| Value::String(v.clone()));
        }
        context.insert("param".to_string(), serde_json::to_value(arguments).unwrap_or(Value::Null));
        context.insert("config".to_string(), serde_json::to_value(environment).unwrap_or(Value::Null));

        match tmpl.render(minijinja::Value::from_serialize(&context)) {
            Ok(rendered) => Ok(rendered),
            Err(_) => Ok(after_directives),
        }
    }

    fn resolve_directives(
        &self,
        text: &str,
        arguments: &HashMap<String, Value>,
        environment: &HashMap<String, String>,
        required: &[String],
    ) -> CoreResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for cap in DIRECTIVE_RE.captures_iter(text) {
            let whole = cap.get(0).unwrap();
            out.push_str(&text[last..whole.start()]);
            last = whole.end();

            let kind = &cap["kind"];
            let path = &cap["path"];
            let args = cap.name("args").map(|m| m.as_str());

            let resolved = match kind {
                "param" => match arguments.get(path) {
                    Some(value) => value_to_text(value),
                    None if required.iter().any(|name| name == path) => {
                        return Err(CoreError::ConfigError(format!(
                            "missing required argument '{path}'"
                        )));
                    }
                    None => String::new(),
                },
                "config" => environment.get(path).cloned().unwrap_or_default(),
                "resource" | "tool" | "prompt" => {
                    return Err(CoreError::ConfigError(format!(
                        "@{kind}.{path} directive requires a live upstream call, not supported in this render context"
                    )));
                }
                other => {
                    return Err(CoreError::ConfigError(format!("unknown template directive '@{other}'")));
                }
            };
            let _ = args;
            out.push_str(&resolved);
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn looks_like_jinja(text: &str) -> bool {
    text.contains("{{") || text.contains("{%") || text.contains("{#")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_param_directive() {
        let parser = TemplateParser::new();
        let mut args = HashMap::new();
        args.insert("who".to_string(), Value::String("world".to_string()));
        let rendered = parser.render("hello @param.who", &args, &HashMap::new(), &[]).unwrap();
        assert_eq!(rendered, "hello world");
    }

    #[test]
    fn resolves_config_directive() {
        let parser = TemplateParser::new();
        let mut env = HashMap::new();
        env.insert("API_BASE".to_string(), "https://api.test".to_string());
        let rendered = parser.render("@config.API_BASE/v1", &HashMap::new(), &env, &[]).unwrap();
        assert_eq!(rendered, "https://api.test/v1");
    }

    #[test]
    fn missing_optional_param_substitutes_empty_string() {
        let parser = TemplateParser::new();
        let rendered = parser.render("hello @param.who", &HashMap::new(), &HashMap::new(), &[]).unwrap();
        assert_eq!(rendered, "hello ");
    }

    #[test]
    fn missing_required_param_errors() {
        let parser = TemplateParser::new();
        let required = vec!["who".to_string()];
        let err = parser.render("hello @param.who", &HashMap::new(), &HashMap::new(), &required).unwrap_err();
        assert!(err.to_string().contains("who"));
    }

    #[test]
    fn falls_back_silently_on_invalid_jinja() {
        let parser = TemplateParser::new();
        let rendered = parser.render("plain {{ unterminated", &HashMap::new(), &HashMap::new(), &[]).unwrap();
        assert_eq!(rendered, "plain {{ unterminated");
    }

    #[test]
    fn renders_jinja_when_no_directives_present() {
        let parser = TemplateParser::new();
        let mut args = HashMap::new();
        args.insert("name".to_string(), Value::String("Ada".to_string()));
        let rendered = parser.render("hi {{ name }}", &args, &HashMap::new(), &[]).unwrap();
        assert_eq!(rendered, "hi Ada");
    }
}

//! Configuration validation for `VMCPConfig` and `UpstreamServerConfig`.

use crate::config::types::VMCPConfig;
use schemars::schema_for;
use serde_json::Value;
use std::collections::HashSet;
use validator::Validate;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub struct ConfigValidator {
    schema: Value,
}

impl ConfigValidator {
    pub fn new() -> Self {
        let schema = schema_for!(VMCPConfig);
        Self {
            schema: serde_json::to_value(&schema).unwrap_or_default(),
        }
    }

    pub fn get_schema(&self) -> &Value {
        &self.schema
    }

    pub fn export_schema(&self) -> String {
        serde_json::to_string_pretty(&self.schema).unwrap_or_default()
    }

    /// Validate a `VMCPConfig` against the invariants in spec §3: `name` is
    /// non-empty, `custom_tools`/`custom_prompts`/`custom_resources` names
    /// are unique within their own category, and `selected_servers` has no
    /// duplicates. Membership of `selected_*` in a server's last-known
    /// capabilities is NOT checked here — that's enforced lazily at
    /// composition time (§3 invariant, §4.7).
    pub fn validate(&self, config: &VMCPConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(validation_errors) = config.validate() {
            for error in validation_errors.field_errors() {
                errors.push(ValidationError {
                    path: error.0.to_string(),
                    message: format!("{:?}", error.1),
                });
            }
        }

        let mut seen_servers = HashSet::new();
        for (idx, server_id) in config.selected_servers.iter().enumerate() {
            if !seen_servers.insert(server_id) {
                errors.push(ValidationError {
                    path: format!("selected_servers[{idx}]"),
                    message: format!("duplicate server reference: {server_id}"),
                });
            }
        }

        check_unique_names(&config.custom_tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), "custom_tools", &mut errors);
        check_unique_names(&config.custom_prompts.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), "custom_prompts", &mut errors);
        check_unique_names(&config.custom_resources.iter().map(|r| r.uri.as_str()).collect::<Vec<_>>(), "custom_resources", &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_unique_names(names: &[&str], category: &str, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(*name) {
            errors.push(ValidationError {
                path: category.to_string(),
                message: format!("duplicate name within {category}: {name}"),
            });
        }
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::VMCPMetadata;
    use std::collections::HashMap;

    fn base_config() -> VMCPConfig {
        VMCPConfig {
            id: "v1".to_string(),
            owner_user_id: "u1".to_string(),
            name: "test".to_string(),
            selected_servers: vec![],
            selected_tools: HashMap::new(),
            selected_prompts: HashMap::new(),
            selected_resources: HashMap::new(),
            selected_resource_templates: HashMap::new(),
            tool_overrides: HashMap::new(),
            custom_tools: vec![],
            custom_prompts: vec![],
            custom_resources: vec![],
            environment_variables: HashMap::new(),
            metadata: VMCPMetadata::default(),
        }
    }

    #[test]
    fn test_validate_minimal_config() {
        let validator = ConfigValidator::new();
        assert!(validator.validate(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_duplicate_selected_servers() {
        let validator = ConfigValidator::new();
        let mut config = base_config();
        config.selected_servers = vec!["gh".to_string(), "gh".to_string()];
        let result = validator.validate(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().iter().any(|e| e.message.contains("duplicate")));
    }

    #[test]
    fn test_validate_empty_name() {
        let validator = ConfigValidator::new();
        let mut config = base_config();
        config.name = String::new();
        assert!(validator.validate(&config).is_err());
    }

    #[test]
    fn test_schema_generation() {
        let validator = ConfigValidator::new();
        let schema = validator.export_schema();
        assert!(!schema.is_empty());
        assert!(schema.contains("$schema"));
    }
}

//! Implementations behind each [`crate::cli::args::Command`] variant.

use crate::cli::gateway::Gateway;
use crate::config::manager::{FileConfigStore, VMCPConfigStore};
use crate::core::router::ExecutionResult;
use crate::utils::errors::{CoreError, CoreResult};
use serde_json::Value;
use std::path::PathBuf;

pub async fn list_vmcps(vmcp_home: &PathBuf, owner_user_id: &str) -> CoreResult<()> {
    let store = FileConfigStore::new(vmcp_home.as_path());
    let configs = store.list_vmcps(owner_user_id).await?;

    if configs.is_empty() {
        println!("No vMCPs configured for user '{owner_user_id}'.");
        return Ok(());
    }

    println!("{:<24} {:<30} {:<10}", "ID", "NAME", "SERVERS");
    println!("{}", "-".repeat(66));
    for config in &configs {
        println!("{:<24} {:<30} {:<10}", config.id, config.name, config.selected_servers.len());
    }
    Ok(())
}

pub async fn list_mcps(vmcp_home: &PathBuf, vmcp_id: &str) -> CoreResult<()> {
    let config = Gateway::load_config(vmcp_home, vmcp_id).await?;
    let store = FileConfigStore::new(vmcp_home.as_path());

    if config.selected_servers.is_empty() {
        println!("vMCP '{vmcp_id}' has no upstream servers configured.");
        return Ok(());
    }

    println!("{:<20} {:<20} {:<12}", "SERVER_ID", "NAME", "TRANSPORT");
    println!("{}", "-".repeat(54));
    for server_id in &config.selected_servers {
        match store.get_upstream(server_id).await {
            Ok(upstream) => {
                let transport = match &upstream.transport {
                    crate::config::types::UpstreamTransportConfig::Stdio { .. } => "stdio",
                    crate::config::types::UpstreamTransportConfig::Sse { .. } => "sse",
                    crate::config::types::UpstreamTransportConfig::Http { .. } => "http",
                };
                println!("{:<20} {:<20} {:<12}", upstream.server_id, upstream.name, transport);
            }
            Err(_) => println!("{:<20} {:<20} {:<12}", server_id, "<unconfigured>", "-"),
        }
    }
    Ok(())
}

pub async fn list_tools(vmcp_home: &PathBuf, vmcp_id: &str) -> CoreResult<()> {
    let gateway = Gateway::load(vmcp_home, vmcp_id).await?;
    let tools = gateway.router.composer().list_tools().await?;

    if tools.is_empty() {
        println!("vMCP '{vmcp_id}' composes no tools.");
        return Ok(());
    }
    println!("{:<36} {}", "NAME", "DESCRIPTION");
    println!("{}", "-".repeat(80));
    for tool in tools {
        println!("{:<36} {}", tool.name, tool.description.unwrap_or_default());
    }
    Ok(())
}

pub async fn list_prompts(vmcp_home: &PathBuf, vmcp_id: &str) -> CoreResult<()> {
    let gateway = Gateway::load(vmcp_home, vmcp_id).await?;
    let prompts = gateway.router.composer().list_prompts().await?;

    if prompts.is_empty() {
        println!("vMCP '{vmcp_id}' composes no prompts.");
        return Ok(());
    }
    println!("{:<36} {}", "NAME", "DESCRIPTION");
    println!("{}", "-".repeat(80));
    for prompt in prompts {
        println!("{:<36} {}", prompt.name, prompt.description.unwrap_or_default());
    }
    Ok(())
}

pub async fn list_resources(vmcp_home: &PathBuf, vmcp_id: &str) -> CoreResult<()> {
    let gateway = Gateway::load(vmcp_home, vmcp_id).await?;
    let resources = gateway.router.composer().list_resources().await?;

    if resources.is_empty() {
        println!("vMCP '{vmcp_id}' composes no resources.");
        return Ok(());
    }
    println!("{:<40} {}", "URI", "MIME TYPE");
    println!("{}", "-".repeat(80));
    for resource in resources {
        println!("{:<40} {}", resource.uri, resource.mime_type.unwrap_or_default());
    }
    Ok(())
}

/// Returns `Ok(true)` when the call's result reports `isError: true`, so the
/// caller can translate that into a non-zero process exit code.
pub async fn call_tool(vmcp_home: &PathBuf, vmcp_id: &str, tool: &str, payload: &str) -> CoreResult<bool> {
    let arguments: Value = serde_json::from_str(payload)
        .map_err(|e| CoreError::ConfigError(format!("--payload is not valid JSON: {e}")))?;

    let gateway = Gateway::load(vmcp_home, vmcp_id).await?;
    let result = gateway.router.call_tool(tool, arguments, None).await?;

    let ExecutionResult::CallTool(value) = result else {
        unreachable!("call_tool always returns ExecutionResult::CallTool")
    };

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(value.get("isError").and_then(Value::as_bool).unwrap_or(false))
}

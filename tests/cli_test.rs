//! CLI command tests against a `FileConfigStore`-backed fixture directory,
//! exercising everything the CLI surface (§6) can do without a live
//! upstream connection.

use std::collections::HashMap;
use tempfile::TempDir;
use vmcp_gateway::cli::{active, commands};
use vmcp_gateway::config::manager::{FileConfigStore, VMCPConfigStore};
use vmcp_gateway::config::types::{UpstreamServerConfig, UpstreamTransportConfig, VMCPConfig, VMCPMetadata};

fn sample_vmcp(id: &str, owner: &str, servers: Vec<String>) -> VMCPConfig {
    VMCPConfig {
        id: id.to_string(),
        owner_user_id: owner.to_string(),
        name: format!("vMCP {id}"),
        selected_servers: servers,
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

fn sample_upstream(server_id: &str) -> UpstreamServerConfig {
    UpstreamServerConfig {
        server_id: server_id.to_string(),
        name: format!("server-{server_id}"),
        transport: UpstreamTransportConfig::Stdio {
            command: "true".to_string(),
            args: vec![],
            env: HashMap::new(),
        },
        auth_bearer_token: None,
        session_id: None,
        status: Default::default(),
        oauth_authorize_url: None,
        oauth_token_url: None,
        oauth_client_id: None,
    }
}

#[tokio::test]
async fn list_vmcps_filters_by_owner() {
    let dir = TempDir::new().unwrap();
    let home = dir.path().to_path_buf();
    let store = FileConfigStore::new(home.as_path());

    store.put_vmcp(&sample_vmcp("v1", "alice", vec![])).await.unwrap();
    store.put_vmcp(&sample_vmcp("v2", "bob", vec![])).await.unwrap();

    // Indirect assertion via the store itself: commands::list_vmcps only
    // prints, so we check the underlying filter it relies on directly.
    let alice_configs = store.list_vmcps("alice").await.unwrap();
    assert_eq!(alice_configs.len(), 1);
    assert_eq!(alice_configs[0].id, "v1");

    // Smoke-test the command path doesn't error for either owner.
    commands::list_vmcps(&home, "alice").await.unwrap();
    commands::list_vmcps(&home, "carol").await.unwrap();
}

#[tokio::test]
async fn list_mcps_reports_unconfigured_servers_without_failing() {
    let dir = TempDir::new().unwrap();
    let home = dir.path().to_path_buf();
    let store = FileConfigStore::new(home.as_path());

    store.put_upstream(&sample_upstream("github")).await.unwrap();
    store
        .put_vmcp(&sample_vmcp("v1", "alice", vec!["github".to_string(), "missing".to_string()]))
        .await
        .unwrap();

    // One configured server and one dangling reference; the command must
    // still succeed (§6 doesn't specify this as a hard error).
    commands::list_mcps(&home, "v1").await.unwrap();
}

// Both tests below set VMCP_ACTIVE to the same value rather than clearing
// it afterward, since cargo runs tests in this file concurrently within one
// process and an unset in one test could race a read in the other.

#[tokio::test]
async fn active_resolution_prefers_explicit_arg_over_env() {
    std::env::set_var("VMCP_ACTIVE", "env-vmcp");
    let home = std::path::PathBuf::from("/tmp/unused-for-this-test");
    let resolved = active::resolve(Some("explicit-vmcp".to_string()), &home).unwrap();
    assert_eq!(resolved, "explicit-vmcp");
}

#[tokio::test]
async fn active_resolution_falls_back_to_env_var() {
    std::env::set_var("VMCP_ACTIVE", "env-vmcp");
    let home = std::path::PathBuf::from("/tmp/unused-for-this-test");
    let resolved = active::resolve(None, &home).unwrap();
    assert_eq!(resolved, "env-vmcp");
}

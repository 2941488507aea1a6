use crate::config::types::{GatewayConfig, UpstreamServerConfig, VMCPConfig};
use crate::utils::errors::{CoreError, CoreResult};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub enum ConfigEvent {
    Reloaded,
    Error(String),
}

/// Loads and hot-reloads the gateway's own [`GatewayConfig`] (policy
/// defaults, sandbox home, log level). Per-vMCP state lives in
/// [`VMCPConfigStore`], which is a separate collaborator.
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<GatewayConfig>>,
    event_tx: broadcast::Sender<ConfigEvent>,
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigManager {
    pub async fn new(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let config = Self::load(&path)?;
        let config = Arc::new(RwLock::new(config));

        let (event_tx, _) = broadcast::channel(16);
        let event_tx_clone = event_tx.clone();
        let config_clone = config.clone();
        let path_clone = path.clone();

        let rt_handle = tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::ConfigError(format!("no tokio runtime available: {e}")))?;

        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let Ok(event) = res else {
                error!("config watcher error");
                return;
            };
            if !event.kind.is_modify() {
                return;
            }
            info!("gateway config changed, reloading");
            let config_clone = config_clone.clone();
            let event_tx_clone = event_tx_clone.clone();
            let path_clone = path_clone.clone();
            rt_handle.spawn(async move {
                match Self::load(&path_clone) {
                    Ok(new_config) => {
                        *config_clone.write() = new_config;
                        let _ = event_tx_clone.send(ConfigEvent::Reloaded);
                    }
                    Err(e) => {
                        error!("failed to reload config: {e}");
                        let _ = event_tx_clone.send(ConfigEvent::Error(e.to_string()));
                    }
                }
            });
        })
        .ok();

        if let Some(mut watcher) = watcher {
            if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                debug!("config file watch unavailable: {e}");
            }
            return Ok(Self {
                path,
                config,
                event_tx,
                _watcher: Some(watcher),
            });
        }

        Ok(Self {
            path,
            config,
            event_tx,
            _watcher: None,
        })
    }

    fn load(path: &Path) -> CoreResult<GatewayConfig> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("VMCP_"))
            .extract()
            .map_err(|e| CoreError::ConfigError(format!("failed to load {}: {e}", path.display())))
    }

    pub fn get(&self) -> GatewayConfig {
        self.config.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.event_tx.subscribe()
    }

    pub async fn reload(&self) -> CoreResult<()> {
        let new_config = Self::load(&self.path)?;
        *self.config.write() = new_config;
        let _ = self.event_tx.send(ConfigEvent::Reloaded);
        Ok(())
    }
}

/// Storage collaborator contract for `VMCPConfig` and `UpstreamServerConfig`
/// (spec §6: "exact store is a collaborator"). `FileConfigStore` is a
/// file-backed reference implementation adequate for a single-node gateway
/// and for tests; production deployments swap in a database-backed impl.
#[async_trait::async_trait]
pub trait VMCPConfigStore: Send + Sync {
    async fn get_vmcp(&self, id: &str) -> CoreResult<VMCPConfig>;
    async fn put_vmcp(&self, config: &VMCPConfig) -> CoreResult<()>;
    async fn list_vmcps(&self, owner_user_id: &str) -> CoreResult<Vec<VMCPConfig>>;
    async fn get_upstream(&self, server_id: &str) -> CoreResult<UpstreamServerConfig>;
    async fn put_upstream(&self, config: &UpstreamServerConfig) -> CoreResult<()>;
    async fn list_upstreams(&self) -> CoreResult<Vec<UpstreamServerConfig>>;
}

pub struct FileConfigStore {
    root: PathBuf,
}

impl FileConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn vmcp_path(&self, id: &str) -> PathBuf {
        self.root.join("vmcps").join(format!("{id}.json"))
    }

    fn upstream_path(&self, server_id: &str) -> PathBuf {
        self.root.join("upstreams").join(format!("{server_id}.json"))
    }
}

#[async_trait::async_trait]
impl VMCPConfigStore for FileConfigStore {
    async fn get_vmcp(&self, id: &str) -> CoreResult<VMCPConfig> {
        let path = self.vmcp_path(id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::ConfigError(format!("vmcp {id} not found: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::ConfigError(format!("malformed vmcp config {id}: {e}")))
    }

    async fn put_vmcp(&self, config: &VMCPConfig) -> CoreResult<()> {
        let path = self.vmcp_path(&config.id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(config)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    async fn list_vmcps(&self, owner_user_id: &str) -> CoreResult<Vec<VMCPConfig>> {
        let dir = self.root.join("vmcps");
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => return Ok(out),
        };
        while let Some(entry) = entries.next_entry().await? {
            let content = tokio::fs::read_to_string(entry.path()).await?;
            if let Ok(cfg) = serde_json::from_str::<VMCPConfig>(&content) {
                if cfg.owner_user_id == owner_user_id {
                    out.push(cfg);
                }
            }
        }
        Ok(out)
    }

    async fn get_upstream(&self, server_id: &str) -> CoreResult<UpstreamServerConfig> {
        let path = self.upstream_path(server_id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::ConfigError(format!("server {server_id} not found: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::ConfigError(format!("malformed server config {server_id}: {e}")))
    }

    async fn put_upstream(&self, config: &UpstreamServerConfig) -> CoreResult<()> {
        let path = self.upstream_path(&config.server_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(config)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    async fn list_upstreams(&self) -> CoreResult<Vec<UpstreamServerConfig>> {
        let dir = self.root.join("upstreams");
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => return Ok(out),
        };
        while let Some(entry) = entries.next_entry().await? {
            let content = tokio::fs::read_to_string(entry.path()).await?;
            if let Ok(cfg) = serde_json::from_str::<UpstreamServerConfig>(&content) {
                out.push(cfg);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{UpstreamTransportConfig, VMCPMetadata};
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_gateway_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "log_level = \"debug\"\nvmcp_home = \"/tmp/vmcp\"\n")
            .await
            .unwrap();
        let manager = ConfigManager::new(&path).await.unwrap();
        let config = manager.get();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.vmcp_home, "/tmp/vmcp");
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path());

        let vmcp = VMCPConfig {
            id: "vmcp-1".to_string(),
            owner_user_id: "user-1".to_string(),
            name: "My vMCP".to_string(),
            selected_servers: vec!["gh".to_string()],
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
        };
        store.put_vmcp(&vmcp).await.unwrap();
        let loaded = store.get_vmcp("vmcp-1").await.unwrap();
        assert_eq!(loaded.name, "My vMCP");

        let listed = store.list_vmcps("user-1").await.unwrap();
        assert_eq!(listed.len(), 1);

        let upstream = UpstreamServerConfig {
            server_id: "gh".to_string(),
            name: "github".to_string(),
            transport: UpstreamTransportConfig::Stdio {
                command: "gh-mcp".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
            auth_bearer_token: None,
            session_id: None,
            status: Default::default(),
            oauth_authorize_url: None,
            oauth_token_url: None,
            oauth_client_id: None,
        };
        store.put_upstream(&upstream).await.unwrap();
        let loaded_upstream = store.get_upstream("gh").await.unwrap();
        assert_eq!(loaded_upstream.name, "github");
    }
}

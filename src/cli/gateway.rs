//! Wires a `VMCPConfig` into a runnable [`ExecutionRouter`]: loads its
//! upstream configs from the [`FileConfigStore`], builds the platform
//! sandbox, and attaches the operations log (§4.12).

use crate::audit::{OperationsLogger, OperationsLoggerConfig};
use crate::auth::UpstreamOAuth;
use crate::config::manager::{FileConfigStore, VMCPConfigStore};
use crate::config::types::{UpstreamServerConfig, VMCPConfig};
use crate::core::client_manager::ClientManager;
use crate::core::composer::VmcpComposer;
use crate::core::router::ExecutionRouter;
use crate::utils::errors::CoreResult;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a single CLI invocation needs: the loaded vMCP config and a
/// router ready to dispatch `call_tool`/`get_prompt`/`read_resource`.
pub struct Gateway {
    pub store: Arc<FileConfigStore>,
    pub router: ExecutionRouter<FileConfigStore>,
}

impl Gateway {
    pub async fn load(vmcp_home: &PathBuf, vmcp_id: &str) -> CoreResult<Self> {
        let store = Arc::new(FileConfigStore::new(vmcp_home.as_path()));
        let config = store.get_vmcp(vmcp_id).await?;

        let mut upstreams: HashMap<String, UpstreamServerConfig> = HashMap::new();
        for server_id in &config.selected_servers {
            let upstream = store.get_upstream(server_id).await?;
            upstreams.insert(server_id.clone(), upstream);
        }

        let sandbox = crate::sandbox::create_sandbox().into();
        // A CLI invocation has no HTTP listener of its own to receive the
        // OAuth redirect; callers complete the browser step against this
        // placeholder and paste the resulting code back via `complete_flow`.
        let oauth = Arc::new(UpstreamOAuth::new("http://localhost:8089/callback"));
        let client_manager = Arc::new(ClientManager::new(
            store.clone(),
            sandbox,
            Vec::new(),
            oauth,
            false,
            None,
        ));

        let composer = VmcpComposer::new(config, upstreams, client_manager);

        let mut router = ExecutionRouter::new(composer);
        if let Ok(logger) = OperationsLogger::new(OperationsLoggerConfig {
            path: vmcp_home.join("operations.log"),
            ..Default::default()
        })
        .await
        {
            router = router.with_operations_log(logger);
        }

        Ok(Self { store, router })
    }

    pub async fn load_config(vmcp_home: &PathBuf, vmcp_id: &str) -> CoreResult<VMCPConfig> {
        FileConfigStore::new(vmcp_home.as_path()).get_vmcp(vmcp_id).await
    }
}

use clap::Parser;
use vmcp_gateway::cli::args::{Cli, Command};
use vmcp_gateway::cli::{active, commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let vmcp_home = cli
        .vmcp_home
        .map(std::path::PathBuf::from)
        .unwrap_or_else(active::default_vmcp_home);
    let user = cli.user.or_else(|| std::env::var("VMCP_USER").ok()).unwrap_or_else(|| "default".to_string());

    vmcp_gateway::utils::init_tracing("info");

    match cli.command {
        Command::ListVmcps => commands::list_vmcps(&vmcp_home, &user).await?,
        Command::ListMcps { vmcp } => {
            let vmcp_id = active::resolve(vmcp, &vmcp_home)?;
            commands::list_mcps(&vmcp_home, &vmcp_id).await?;
        }
        Command::ListTools { vmcp } => {
            let vmcp_id = active::resolve(vmcp, &vmcp_home)?;
            commands::list_tools(&vmcp_home, &vmcp_id).await?;
        }
        Command::ListPrompts { vmcp } => {
            let vmcp_id = active::resolve(vmcp, &vmcp_home)?;
            commands::list_prompts(&vmcp_home, &vmcp_id).await?;
        }
        Command::ListResources { vmcp } => {
            let vmcp_id = active::resolve(vmcp, &vmcp_home)?;
            commands::list_resources(&vmcp_home, &vmcp_id).await?;
        }
        Command::CallTool { vmcp, tool, payload } => {
            let vmcp_id = active::resolve(vmcp, &vmcp_home)?;
            let is_error = commands::call_tool(&vmcp_home, &vmcp_id, &tool, &payload).await?;
            if is_error {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

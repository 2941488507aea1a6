//! Command-line surface (spec §6): `vmcp list-vmcps`, `vmcp list-mcps`, and
//! the per-vMCP `list-tools|list-prompts|list-resources|call-tool` group.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vmcp")]
#[command(about = "Virtual MCP gateway CLI")]
#[command(version)]
pub struct Cli {
    /// vMCP home directory (defaults to $VMCP_HOME or ~/.vmcp).
    #[arg(long, global = true)]
    pub vmcp_home: Option<String>,

    /// Owning user id, used to scope `list-vmcps` and load the active
    /// vMCP's config. Defaults to $VMCP_USER or "default".
    #[arg(long, global = true)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List vMCP ids/names visible to the caller.
    ListVmcps,
    /// List configured upstream servers for the active vMCP.
    ListMcps {
        /// vMCP id; falls back to active-vMCP resolution (§6) when omitted.
        vmcp: Option<String>,
    },
    /// List the tools a vMCP composes from its upstream servers.
    ListTools {
        vmcp: Option<String>,
    },
    /// List the prompts a vMCP composes from its upstream servers.
    ListPrompts {
        vmcp: Option<String>,
    },
    /// List the resources a vMCP composes from its upstream servers.
    ListResources {
        vmcp: Option<String>,
    },
    /// Call a composed tool and print its result.
    CallTool {
        vmcp: Option<String>,
        /// Composed tool name, e.g. `github_read_file`.
        #[arg(long)]
        tool: String,
        /// JSON object of tool arguments.
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

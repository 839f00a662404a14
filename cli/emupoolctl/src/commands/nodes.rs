//! Node commands.

use anyhow::Result;
use colored::Colorize;
use emupool_control_plane::{Availability, NodeInfo, NodeRole};
use tabled::Tabled;

use crate::output::print_output;

use super::CommandContext;

#[derive(Debug, Tabled)]
struct NodeRow {
    #[tabled(rename = "ID")]
    id: u32,

    #[tabled(rename = "URL")]
    url: String,

    #[tabled(rename = "Role")]
    role: String,

    #[tabled(rename = "State")]
    state: String,
}

impl From<&NodeInfo> for NodeRow {
    fn from(node: &NodeInfo) -> Self {
        let role = match node.role {
            NodeRole::Master => "master",
            NodeRole::Slave => "slave",
        };
        let state = match node.state {
            Availability::Online => node.state.to_string().green().to_string(),
            Availability::Offline => node.state.to_string().red().to_string(),
        };
        Self {
            id: node.id.value(),
            url: node.url.clone(),
            role: role.to_string(),
            state,
        }
    }
}

/// List the nodes with their reachability.
pub async fn list(ctx: CommandContext) -> Result<()> {
    let nodes = ctx.pool.nodes_info().await;
    let rows: Vec<NodeRow> = nodes.iter().map(NodeRow::from).collect();
    print_output(&rows, &nodes, ctx.format);
    Ok(())
}

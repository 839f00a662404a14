//! Instance commands.

use anyhow::Result;
use clap::Args;
use emupool_id::PoolInstanceId;
use emupool_proto::{DeviceSpec, InstanceInfo};
use tabled::Tabled;

use crate::error::CliError;
use crate::output::{display_bool, print_json, print_output, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Image to start.
    image: String,

    /// Prefix of the instance's containers and network.
    #[arg(long, default_value = "anonymous_")]
    prefix: String,

    /// Host device to pass through, as VID:PID@PATH. Forces the master.
    #[arg(long = "device")]
    devices: Vec<String>,
}

#[derive(Debug, Args)]
pub struct StopArgs {
    /// Pool instance ID.
    id: PoolInstanceId,
}

#[derive(Debug, Tabled)]
struct InstanceRow {
    #[tabled(rename = "ID")]
    id: u32,

    #[tabled(rename = "Image")]
    image: String,

    #[tabled(rename = "Healthy", display = "display_bool")]
    healthy: bool,

    #[tabled(rename = "Link")]
    link: String,

    #[tabled(rename = "Shell")]
    shell: String,

    #[tabled(rename = "Devices")]
    devices: usize,
}

impl From<&InstanceInfo> for InstanceRow {
    fn from(info: &InstanceInfo) -> Self {
        Self {
            id: info.id,
            image: info.image_name.clone(),
            healthy: info.healthy,
            link: info.link.clone(),
            shell: info.shell.clone(),
            devices: info.devices.len(),
        }
    }
}

pub async fn ps(ctx: CommandContext) -> Result<()> {
    let instances = ctx.pool.list_containers().await;
    let rows: Vec<InstanceRow> = instances.values().map(InstanceRow::from).collect();
    print_output(&rows, &instances, ctx.format);
    Ok(())
}

pub async fn start(ctx: CommandContext, args: StartArgs) -> Result<()> {
    let devices = args
        .devices
        .iter()
        .map(|raw| parse_device(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let id = ctx
        .pool
        .start_image(&args.image, &devices, &args.prefix)
        .await
        .ok_or_else(|| CliError::NoCapacity {
            image: args.image.clone(),
        })?;

    match ctx.format {
        OutputFormat::Json => print_json(&serde_json::json!({ "id": id })),
        OutputFormat::Table => print_success(&format!(
            "Started {} as instance {} on node {}",
            args.image,
            id,
            id.node()
        )),
    }
    Ok(())
}

pub async fn stop(ctx: CommandContext, args: StopArgs) -> Result<()> {
    let node = args.id.node();
    if ctx.pool.node(node).is_none() {
        return Err(CliError::UnknownNode(node.value()).into());
    }
    ctx.pool.stop_container(args.id).await;
    print_success(&format!("Stopped instance {}", args.id));
    Ok(())
}

/// Parses `VID:PID@PATH`.
fn parse_device(raw: &str) -> Result<DeviceSpec, CliError> {
    let (vid_pid, path) = raw
        .split_once('@')
        .filter(|(vid_pid, path)| vid_pid.contains(':') && !path.is_empty())
        .ok_or_else(|| CliError::InvalidDevice(raw.to_string()))?;
    Ok(DeviceSpec {
        path: path.to_string(),
        vid_pid: vid_pid.to_string(),
    })
}

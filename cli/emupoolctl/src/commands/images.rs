//! Image commands.

use anyhow::Result;
use clap::Args;
use emupool_control_plane::pool::merge_image_views;
use emupool_proto::{ImageLocation, Progress};
use futures_util::StreamExt;
use serde::Serialize;
use tabled::Tabled;

use crate::error::CliError;
use crate::output::{print_json, print_output, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct LsArgs {
    /// Only images whose name contains this.
    #[arg(default_value = "")]
    pattern: String,

    /// Keep only the N youngest remote builds of each category.
    #[arg(long, env = "EMUPOOL_REMOTE_IMAGES_PER_CATEGORY")]
    per_category: Option<usize>,
}

#[derive(Debug, Args)]
pub struct PullArgs {
    /// Image to pull.
    image: String,

    /// Image family; derived from the image name when omitted.
    #[arg(long)]
    pattern: Option<String>,
}

#[derive(Debug, Args)]
pub struct DropArgs {
    /// Image to delete.
    image: String,
}

#[derive(Debug, Tabled)]
struct ImageRow {
    #[tabled(rename = "Image")]
    image: String,

    #[tabled(rename = "Location")]
    location: String,

    /// One marker per node, `+` where the image is local.
    #[tabled(rename = "Nodes")]
    nodes: String,
}

#[derive(Debug, Serialize)]
struct ImageJson {
    image: String,
    location: ImageLocation,
    local_on: Vec<usize>,
}

pub async fn ls(ctx: CommandContext, args: LsArgs) -> Result<()> {
    let views = ctx
        .pool
        .node_image_views(ctx.registry(), &args.pattern)
        .await;
    let mut merged = merge_image_views(&views);
    if let Some(per_category) = args.per_category {
        merged = ctx.catalog.filter_remote_by_youngest(&merged, per_category);
    }

    let local_on = |image: &str| -> Vec<usize> {
        views
            .iter()
            .enumerate()
            .filter(|(_, view)| view.get(image).is_some_and(|l| l.is_local()))
            .map(|(index, _)| index)
            .collect()
    };

    let rows: Vec<ImageRow> = merged
        .iter()
        .map(|(image, location)| {
            let on = local_on(image);
            ImageRow {
                image: image.clone(),
                location: if location.is_local() { "Local" } else { "Remote" }.to_string(),
                nodes: (0..views.len())
                    .map(|index| if on.contains(&index) { '+' } else { '-' })
                    .collect(),
            }
        })
        .collect();
    let json: Vec<ImageJson> = merged
        .iter()
        .map(|(image, location)| ImageJson {
            image: image.clone(),
            location: location.clone(),
            local_on: local_on(image),
        })
        .collect();

    print_output(&rows, &json, ctx.format);
    Ok(())
}

pub async fn pull(ctx: CommandContext, args: PullArgs) -> Result<()> {
    let pattern = args
        .pattern
        .clone()
        .or_else(|| ctx.catalog.pattern_for(&args.image).map(str::to_string))
        .unwrap_or_default();

    let mut progress = ctx.pool.pull(&args.image, ctx.registry(), &pattern);
    let mut last = Progress::FAILURE;
    while let Some(value) = progress.next().await {
        if ctx.format == OutputFormat::Table {
            println!("{}: {}", args.image, value);
        }
        last = value;
    }

    if last != Progress::COMPLETE {
        return Err(CliError::PullFailed {
            image: args.image,
            state: last.to_string(),
        }
        .into());
    }

    match ctx.format {
        OutputFormat::Json => {
            print_json(&serde_json::json!({ "image": args.image, "progress": last }))
        }
        OutputFormat::Table => print_success(&format!("Pulled {} on every node", args.image)),
    }
    Ok(())
}

pub async fn drop(ctx: CommandContext, args: DropArgs) -> Result<()> {
    if !ctx.pool.delete_image(&args.image).await {
        return Err(CliError::DeleteFailed { image: args.image }.into());
    }
    print_success(&format!("Deleted {} from every node", args.image));
    Ok(())
}

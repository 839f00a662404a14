//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("No node can start {image}")]
    NoCapacity { image: String },

    #[error("Pull of {image} ended in {state}")]
    PullFailed { image: String, state: String },

    #[error("{image} was not deleted on every node")]
    DeleteFailed { image: String },

    #[error("Sync finished with {failures} failed operation(s)")]
    SyncIncomplete { failures: usize },

    #[error("Invalid device {0:?}, expected VID:PID@PATH")]
    InvalidDevice(String),

    #[error("Unknown node {0}")]
    UnknownNode(u32),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::NoCapacity { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: every node is full or lacks the image. \
                     Check `emupoolctl ls` and `emupoolctl ps`."
                        .yellow()
                );
            }
            CliError::PullFailed { .. } | CliError::DeleteFailed { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: run `emupoolctl nodes` to see which nodes are offline.".yellow()
                );
            }
            _ => {}
        }
    }
}

//! Wire types for the emupool node control protocol.
//!
//! These types cross the boundary between the pool manager and each node,
//! whether the node lives in the same process or behind HTTP:
//!
//! - [`Progress`]: single-key `{state: percent}` unit of the pull protocol
//! - [`ImageMap`]: image name to digest or the `"Remote"` sentinel
//! - [`InstanceMap`]: local instance id to instance attributes
//! - [`node_api`]: paths and query structs of the node control surface

mod error;
mod image;
mod instance;
pub mod node_api;
mod progress;

pub use error::ProgressParseError;
pub use image::{local_image_names, ImageLocation, ImageMap, REMOTE_SENTINEL};
pub use instance::{DeviceSpec, InstanceInfo, InstanceMap};
pub use progress::{Progress, ProgressEvent, ProgressState, PullOutcome};

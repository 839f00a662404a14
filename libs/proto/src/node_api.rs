//! Node control surface: paths and query parameters.
//!
//! ```text
//! GET /images?pattern=                          -> ImageMap
//! GET /instances                                -> InstanceMap
//! GET /launch?image_name=&devices=&prefix=      -> local id | null
//! GET /stop?ident=                              -> {}
//! GET /delete?image=                            -> bool
//! GET /pull?image_name=&registry=&pattern=      -> PullOutcome (long-running)
//! GET /progress/{image_name}                    -> NDJSON stream of ProgressEvent
//! ```
//!
//! The progress stream is the push channel of a pull: one JSON object per
//! line, and the end of the stream is the disconnect signal.

use emupool_id::LocalInstanceId;
use serde::{Deserialize, Serialize};

use crate::DeviceSpec;

pub const IMAGES_PATH: &str = "/images";
pub const INSTANCES_PATH: &str = "/instances";
pub const LAUNCH_PATH: &str = "/launch";
pub const STOP_PATH: &str = "/stop";
pub const DELETE_PATH: &str = "/delete";
pub const PULL_PATH: &str = "/pull";
pub const PROGRESS_PATH: &str = "/progress";

/// Content type of the progress stream.
pub const PROGRESS_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagesQuery {
    #[serde(default)]
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchQuery {
    pub image_name: String,
    /// JSON-encoded `Vec<DeviceSpec>`; empty means no devices.
    #[serde(default)]
    pub devices: String,
    #[serde(default)]
    pub prefix: String,
}

impl LaunchQuery {
    pub fn new(image_name: &str, devices: &[DeviceSpec], prefix: &str) -> Self {
        let devices = if devices.is_empty() {
            String::new()
        } else {
            serde_json::to_string(devices).unwrap_or_default()
        };
        Self {
            image_name: image_name.to_string(),
            devices,
            prefix: prefix.to_string(),
        }
    }

    pub fn devices(&self) -> Result<Vec<DeviceSpec>, serde_json::Error> {
        if self.devices.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&self.devices)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopQuery {
    pub ident: LocalInstanceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteQuery {
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullQuery {
    pub image_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default)]
    pub pattern: String,
}

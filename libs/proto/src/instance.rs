//! Running instance attributes.

use std::collections::BTreeMap;

use emupool_id::LocalInstanceId;
use serde::{Deserialize, Serialize};

/// A running emulator (or emulator + companion pair) as reported by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Local id on the reporting node; the pool id once merged by the pool.
    pub id: u32,
    pub image_name: String,
    pub healthy: bool,
    /// Network the instance containers share.
    #[serde(default)]
    pub net_name: String,
    /// Graphics / web link.
    #[serde(default)]
    pub link: String,
    /// Shell connection command (adb or ssh).
    #[serde(default)]
    pub shell: String,
    #[serde(default)]
    pub telnet: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: u16,
    /// Passed-through devices, `vid:pid@remote/bus`.
    #[serde(default)]
    pub devices: Vec<String>,
    /// Names of the member containers.
    #[serde(default)]
    pub containers: Vec<String>,
}

/// Local instance id to instance attributes.
pub type InstanceMap = BTreeMap<LocalInstanceId, InstanceInfo>;

/// A host device to pass through to a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Device path on the host, e.g. `/dev/bus/usb/001/004`.
    pub path: String,
    /// `vid:pid` in hex.
    pub vid_pid: String,
}

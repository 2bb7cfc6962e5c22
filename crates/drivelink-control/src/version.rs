//! 固件版本检查

use crate::error::ControlError;
use drivelink_driver::NodeClient;
use drivelink_protocol::DeviceVersion;
use semver::{Version, VersionReq};
use tracing::{debug, warn};

/// 固件版本转为 semver（开发版固件标记为预发布）
pub fn firmware_version(version: &DeviceVersion) -> Version {
    let mut v = Version::new(
        version.fw_major as u64,
        version.fw_minor as u64,
        version.fw_revision as u64,
    );
    if version.fw_unreleased {
        // "dev" 是合法的预发布标识
        if let Ok(pre) = semver::Prerelease::new("dev") {
            v.pre = pre;
        }
    }
    v
}

/// 查询节点版本并检查固件是否满足要求
pub fn check_firmware<C: NodeClient + ?Sized>(
    client: &C,
    node_id: u8,
    required: &VersionReq,
) -> Result<DeviceVersion, ControlError> {
    let version = client.query_version(node_id)?;
    let found = firmware_version(&version);
    if !required.matches(&found) {
        warn!("node {}: {} does not satisfy {}", node_id, version, required);
        return Err(ControlError::FirmwareMismatch {
            node_id,
            found,
            required: required.clone(),
        });
    }
    debug!("node {}: {}", node_id, version);
    Ok(version)
}

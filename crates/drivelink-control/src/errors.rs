//! 错误巡检与批量清除

use drivelink_driver::{DriverError, NodeClient};
use drivelink_protocol::Value;
use tracing::{info, warn};

/// 轴错误位端点
pub const ACTIVE_ERRORS_ENDPOINT: &str = "axis0.active_errors";
/// 解除使能原因端点
pub const DISARM_REASON_ENDPOINT: &str = "axis0.disarm_reason";

/// 单个节点的错误状况
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorInspection {
    pub node_id: u8,
    /// 端点表中没有该端点时为 `None`
    pub active_errors: Option<u32>,
    pub disarm_reason: Option<u32>,
    /// 注册表中锁存的错误位
    pub latched: Option<u32>,
}

impl ErrorInspection {
    pub fn has_errors(&self) -> bool {
        self.active_errors.unwrap_or(0) != 0
            || self.disarm_reason.unwrap_or(0) != 0
            || self.latched.unwrap_or(0) != 0
    }
}

fn as_bits(value: Value) -> Option<u32> {
    value.as_i128().and_then(|v| u32::try_from(v).ok())
}

fn read_bits<C: NodeClient + ?Sized>(
    client: &C,
    node_id: u8,
    endpoint: &str,
) -> Result<Option<u32>, DriverError> {
    if !client.schema().contains(endpoint) {
        return Ok(None);
    }
    Ok(as_bits(client.read(node_id, endpoint)?))
}

/// 读取节点的错误端点（不清除）
pub fn inspect_errors<C: NodeClient + ?Sized>(
    client: &C,
    node_id: u8,
) -> Result<ErrorInspection, DriverError> {
    let inspection = ErrorInspection {
        node_id,
        active_errors: read_bits(client, node_id, ACTIVE_ERRORS_ENDPOINT)?,
        disarm_reason: read_bits(client, node_id, DISARM_REASON_ENDPOINT)?,
        latched: client.snapshot_nodes().get(&node_id).map(|n| n.axis_error),
    };
    if inspection.has_errors() {
        warn!(
            "node {}: active=0x{:08X} disarm=0x{:08X} latched=0x{:08X}",
            node_id,
            inspection.active_errors.unwrap_or(0),
            inspection.disarm_reason.unwrap_or(0),
            inspection.latched.unwrap_or(0)
        );
    }
    Ok(inspection)
}

/// 清除注册表中所有已知节点的错误
///
/// 某个节点失败不影响其他节点；返回每个节点的结果（成功时为确认后的锁存值）。
pub fn clear_all_errors<C: NodeClient + ?Sized>(client: &C) -> Vec<(u8, Result<u32, DriverError>)> {
    client
        .snapshot_nodes()
        .into_keys()
        .map(|node_id| {
            let result = client.clear_errors(node_id);
            match &result {
                Ok(remaining) => info!(
                    "node {}: errors cleared (remaining 0x{:08X})",
                    node_id, remaining
                ),
                Err(e) => warn!("node {}: clear_errors failed: {}", node_id, e),
            }
            (node_id, result)
        })
        .collect()
}

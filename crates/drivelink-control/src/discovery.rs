//! 节点发现
//!
//! 被动监听：在给定窗口内观察到任何帧（心跳、回复、错误上报）的节点即视为在线。

use drivelink_driver::NodeClient;
use std::time::{Duration, Instant};
use tracing::info;

/// 默认监听窗口
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(5);

/// 监听 `window` 后返回窗口内出现过的节点 ID（升序）
pub fn discover_nodes<C: NodeClient + ?Sized>(client: &C, window: Duration) -> Vec<u8> {
    let start = Instant::now();
    std::thread::sleep(window);

    let nodes: Vec<u8> = client
        .snapshot_nodes()
        .into_values()
        .filter(|n| n.last_seen >= start)
        .map(|n| n.node_id)
        .collect();
    info!("discovered {} node(s): {:?}", nodes.len(), nodes);
    nodes
}

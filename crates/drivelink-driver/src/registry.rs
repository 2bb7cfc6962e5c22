//! 节点注册表
//!
//! 记录总线上观察到的节点：最后活跃时间、锁存的错误位、轴状态。
//!
//! - 读：[`NodeRegistry::snapshot`] 通过 `ArcSwap` 无锁获取一致的时间点视图
//! - 写：[`NodeRegistry::on_event`] 在写锁内 clone-modify-store，写者串行
//!
//! 错误位只做按位或锁存，只有设备确认后的显式清除才会降低。

use arc_swap::ArcSwap;
use drivelink_protocol::{AxisState, HeartbeatEvent};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 节点状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub node_id: u8,
    pub last_seen: Instant,
    /// 锁存的轴错误位（心跳与错误上报按位或）
    pub axis_error: u32,
    pub axis_state: AxisState,
    /// 最近一次错误上报的解除使能原因
    pub disarm_reason: u32,
    pub procedure_result: u8,
    pub trajectory_done: bool,
    /// 快照中为"已观察且未过期"；内部存储为最近一次观察/失败的结论
    pub reachable: bool,
    /// 自上次成功以来连续失败的请求数
    pub consecutive_failures: u32,
}

impl Node {
    fn new(node_id: u8, now: Instant) -> Self {
        Self {
            node_id,
            last_seen: now,
            axis_error: 0,
            axis_state: AxisState::Undefined,
            disarm_reason: 0,
            procedure_result: 0,
            trajectory_done: false,
            reachable: true,
            consecutive_failures: 0,
        }
    }

    fn observed(&mut self, now: Instant) {
        self.last_seen = now;
        self.reachable = true;
        self.consecutive_failures = 0;
    }
}

/// 注册表事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    Heartbeat(HeartbeatEvent),
    ErrorReport {
        node_id: u8,
        active_errors: u32,
        disarm_reason: u32,
    },
    /// 匹配到挂起请求的回复
    Reply { node_id: u8 },
    /// 无人认领的端点帧（含迟到回复）
    Unsolicited { node_id: u8, endpoint_id: u16 },
    /// 请求耗尽重试
    RequestFailed { node_id: u8 },
}

/// 节点注册表
pub struct NodeRegistry {
    nodes: ArcSwap<BTreeMap<u8, Node>>,
    write_lock: Mutex<()>,
    stale_timeout: Duration,
}

impl NodeRegistry {
    pub fn new(stale_timeout: Duration) -> Self {
        Self {
            nodes: ArcSwap::from_pointee(BTreeMap::new()),
            write_lock: Mutex::new(()),
            stale_timeout,
        }
    }

    pub fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<u8, Node>)) {
        let _guard = self.write_lock.lock();
        let mut next = self.nodes.load().as_ref().clone();
        f(&mut next);
        self.nodes.store(Arc::new(next));
    }

    pub fn on_event(&self, event: NodeEvent) {
        let now = Instant::now();
        match event {
            NodeEvent::Heartbeat(hb) => self.update(|nodes| {
                let node = nodes.entry(hb.node_id).or_insert_with(|| {
                    info!("node {} discovered via heartbeat", hb.node_id);
                    Node::new(hb.node_id, now)
                });
                node.observed(now);
                if hb.axis_error & !node.axis_error != 0 {
                    warn!(
                        "node {}: new axis error bits 0x{:08X}",
                        hb.node_id, hb.axis_error
                    );
                }
                node.axis_error |= hb.axis_error;
                node.axis_state = hb.axis_state;
                node.procedure_result = hb.procedure_result;
                node.trajectory_done = hb.trajectory_done;
            }),
            NodeEvent::ErrorReport {
                node_id,
                active_errors,
                disarm_reason,
            } => self.update(|nodes| {
                let node = nodes
                    .entry(node_id)
                    .or_insert_with(|| Node::new(node_id, now));
                node.observed(now);
                if active_errors != 0 {
                    warn!(
                        "node {}: error report active=0x{:08X} disarm=0x{:08X}",
                        node_id, active_errors, disarm_reason
                    );
                }
                node.axis_error |= active_errors;
                node.disarm_reason = disarm_reason;
            }),
            NodeEvent::Reply { node_id } | NodeEvent::Unsolicited { node_id, .. } => {
                self.update(|nodes| {
                    nodes
                        .entry(node_id)
                        .or_insert_with(|| {
                            debug!("node {} discovered via endpoint frame", node_id);
                            Node::new(node_id, now)
                        })
                        .observed(now);
                })
            },
            NodeEvent::RequestFailed { node_id } => self.update(|nodes| {
                // 从未见过的节点不建档
                if let Some(node) = nodes.get_mut(&node_id) {
                    node.consecutive_failures += 1;
                    if node.consecutive_failures == 1 && node.reachable {
                        warn!("node {} marked unreachable after failed request", node_id);
                        node.reachable = false;
                    }
                }
            }),
        }
    }

    /// 设备确认清除后，把锁存值设为确认中携带的值
    pub fn set_latched_error(&self, node_id: u8, value: u32) {
        self.update(|nodes| {
            if let Some(node) = nodes.get_mut(&node_id) {
                node.axis_error = value;
            }
        });
    }

    /// 一致的时间点视图；`reachable` 已结合过期时间计算
    pub fn snapshot(&self) -> BTreeMap<u8, Node> {
        let now = Instant::now();
        self.nodes
            .load()
            .iter()
            .map(|(&id, node)| {
                let mut node = node.clone();
                node.reachable =
                    node.reachable && now.duration_since(node.last_seen) <= self.stale_timeout;
                (id, node)
            })
            .collect()
    }

    pub fn get(&self, node_id: u8) -> Option<Node> {
        self.snapshot().remove(&node_id)
    }

    /// 已知节点 ID（升序）
    pub fn node_ids(&self) -> Vec<u8> {
        self.nodes.load().keys().copied().collect()
    }
}

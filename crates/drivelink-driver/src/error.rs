//! 驱动层错误类型定义
//!
//! 面向调用者的错误都携带节点 ID 与端点名称（超时/取消还带尝试次数），
//! 无需查看内部状态即可定位问题。

use drivelink_can::CanError;
use drivelink_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 端点名称不存在（调用方错误，不重试）
    #[error("Node {node_id}: unknown endpoint '{endpoint}'")]
    UnknownEndpoint { node_id: u8, endpoint: String },

    /// 端点 ID 不存在（调用方错误，不重试）
    #[error("Node {node_id}: unknown endpoint id 0x{id:04X}")]
    UnknownEndpointId { node_id: u8, id: u16 },

    /// 值无法无损表示为端点类型（调用方错误，不重试）
    #[error("Node {node_id}, endpoint '{endpoint}': type mismatch ({reason})")]
    TypeMismatch {
        node_id: u8,
        endpoint: String,
        reason: String,
    },

    /// 写入只读端点
    #[error("Node {node_id}: endpoint '{endpoint}' is read-only")]
    ReadOnlyEndpoint { node_id: u8, endpoint: String },

    /// 编码值超出单帧容量（表/配置错误，不重试）
    #[error(
        "Node {node_id}, endpoint '{endpoint}': payload of {size} bytes exceeds frame capacity {capacity}"
    )]
    PayloadTooLarge {
        node_id: u8,
        endpoint: String,
        size: usize,
        capacity: usize,
    },

    /// 全部尝试均无回复
    #[error("Node {node_id}, endpoint '{endpoint}': no reply after {attempts} attempt(s)")]
    Timeout {
        node_id: u8,
        endpoint: String,
        attempts: u32,
    },

    /// 适配器发送失败（不在本地重试）
    #[error("Node {node_id}, endpoint '{endpoint}': transport error after {attempts} attempt(s): {source}")]
    Transport {
        node_id: u8,
        endpoint: String,
        attempts: u32,
        #[source]
        source: CanError,
    },

    /// 节点回复中带有设备侧故障标志
    #[error("Node {node_id}, endpoint '{endpoint}': device reported error bits 0x{error_bits:08X}")]
    DeviceReported {
        node_id: u8,
        endpoint: String,
        error_bits: u32,
    },

    /// 调用方取消
    #[error("Node {node_id}, endpoint '{endpoint}': cancelled after {attempts} attempt(s)")]
    Cancelled {
        node_id: u8,
        endpoint: String,
        attempts: u32,
    },

    /// 帧构建 / 回复解码错误
    #[error("Node {node_id}, endpoint '{endpoint}': {source}")]
    Protocol {
        node_id: u8,
        endpoint: String,
        #[source]
        source: ProtocolError,
    },

    /// 端点表加载失败
    #[error("Schema error: {0}")]
    Schema(#[source] ProtocolError),

    /// 链路配置无效
    #[error("Invalid link configuration: {0}")]
    InvalidConfig(String),

    /// CAN 适配器错误（打开 / 分离阶段）
    #[error("CAN driver error: {0}")]
    Can(#[from] CanError),

    /// 命令通道已关闭（IO 线程退出）
    #[error("Command channel closed")]
    ChannelClosed,

    /// IO 线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),
}

impl DriverError {
    /// 为协议层错误补充节点与端点上下文
    pub fn from_protocol(node_id: u8, endpoint: &str, err: ProtocolError) -> Self {
        let endpoint = endpoint.to_string();
        match err {
            ProtocolError::UnknownEndpoint { name } => DriverError::UnknownEndpoint {
                node_id,
                endpoint: name,
            },
            ProtocolError::UnknownEndpointId { id } => {
                DriverError::UnknownEndpointId { node_id, id }
            },
            ProtocolError::TypeMismatch { tag, value } => DriverError::TypeMismatch {
                node_id,
                endpoint,
                reason: format!("{} cannot be expressed as {}", value, tag),
            },
            ProtocolError::PayloadTooLarge { size, capacity } => DriverError::PayloadTooLarge {
                node_id,
                endpoint,
                size,
                capacity,
            },
            source => DriverError::Protocol {
                node_id,
                endpoint,
                source,
            },
        }
    }

    /// 调用方错误：重试没有意义
    pub fn is_caller_bug(&self) -> bool {
        match self {
            DriverError::UnknownEndpoint { .. }
            | DriverError::UnknownEndpointId { .. }
            | DriverError::TypeMismatch { .. }
            | DriverError::ReadOnlyEndpoint { .. }
            | DriverError::PayloadTooLarge { .. } => true,
            DriverError::Protocol { source, .. } => matches!(
                source,
                ProtocolError::InvalidNodeId { .. }
                    | ProtocolError::ReservedSelector { .. }
                    | ProtocolError::InvalidPayload { .. }
            ),
            _ => false,
        }
    }

    /// 上层是否可以重试（仅超时）
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }

    /// 错误所属节点（全局错误返回 `None`）
    pub fn node_id(&self) -> Option<u8> {
        match self {
            DriverError::UnknownEndpoint { node_id, .. }
            | DriverError::UnknownEndpointId { node_id, .. }
            | DriverError::TypeMismatch { node_id, .. }
            | DriverError::ReadOnlyEndpoint { node_id, .. }
            | DriverError::PayloadTooLarge { node_id, .. }
            | DriverError::Timeout { node_id, .. }
            | DriverError::Transport { node_id, .. }
            | DriverError::DeviceReported { node_id, .. }
            | DriverError::Cancelled { node_id, .. }
            | DriverError::Protocol { node_id, .. } => Some(*node_id),
            _ => None,
        }
    }
}

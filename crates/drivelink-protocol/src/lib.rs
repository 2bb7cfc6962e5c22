//! # DriveLink Protocol
//!
//! 电机控制器节点的 CAN 端点协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 仲裁 ID 布局与命令选择子常量
//! - `value`: 类型标签（`TypeTag`）与运行时值（`Value`）
//! - `codec`: 定宽小端编解码
//! - `frame`: 请求帧构建 / 入站帧解析（含心跳）
//! - `schema`: 端点表（名称 → ID、类型、访问模式）
//! - `version`: 固件/硬件版本记录
//!
//! ## 字节序
//!
//! 所有多字节数值均为 **小端**（little-endian），定宽、无填充。

pub mod codec;
pub mod frame;
pub mod ids;
pub mod schema;
pub mod value;
pub mod version;

// 重新导出常用类型
pub use codec::{Payload, decode, encode};
pub use frame::{
    AxisState, Direction, EndpointMessage, HeartbeatEvent, ParsedFrame, build_heartbeat,
    build_reply, build_request, parse,
};
pub use ids::*;
pub use schema::{Confirmation, EndpointDescriptor, EndpointTable};
pub use value::{TypeTag, Value};
pub use version::DeviceVersion;

/// CAN 2.0 帧的统一抽象
///
/// `DriveFrame` 是协议层和硬件层之间的中间抽象：
/// 协议层只产出/消费 `DriveFrame`，具体 CAN 后端（SocketCAN、Mock）负责与之互转。
///
/// ```text
/// Protocol Layer (drivelink-protocol)
///     ↓ build_request() 构建 / parse() 解析
/// DriveFrame (此类型)
///     ↓ 转换逻辑在 CAN 层实现
/// CAN Layer (drivelink-can)
/// ```
///
/// # 设计特性
///
/// - **Copy trait**：零成本复制
/// - **固定 8 字节**：避免堆分配
/// - **远程帧标志**：直连命令的读请求使用 RTR 帧
///
/// # 示例
///
/// ```rust
/// use drivelink_protocol::DriveFrame;
///
/// let frame = DriveFrame::new_standard(0x7B, &[0x00, 0x00, 0x90, 0x40]);
/// assert_eq!(frame.id(), 0x7B);
/// assert_eq!(frame.data_slice(), &[0x00, 0x00, 0x90, 0x40]);
///
/// let rtr = DriveFrame::new_remote(0x69);
/// assert!(rtr.is_remote);
/// assert!(rtr.data_slice().is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveFrame {
    /// CAN ID（标准帧或扩展帧）
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,

    /// 是否为扩展帧（29-bit ID）
    pub is_extended: bool,

    /// 是否为远程帧（RTR）
    pub is_remote: bool,

    /// 硬件时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl DriveFrame {
    /// 创建标准数据帧
    pub fn new_standard(id: u16, data: &[u8]) -> Self {
        Self::new(id as u32, data, false)
    }

    /// 创建扩展数据帧
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        Self::new(id, data, true)
    }

    /// 创建标准远程帧（RTR，无数据）
    pub fn new_remote(id: u16) -> Self {
        Self {
            is_remote: true,
            ..Self::new(id as u32, &[], false)
        }
    }

    fn new(id: u32, data: &[u8], is_extended: bool) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(8);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed_data,
            len: len as u8,
            is_extended,
            is_remote: false,
            timestamp_us: 0,
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u32 {
        self.id
    }
}

use thiserror::Error;

/// 协议层错误类型
///
/// 只描述"值/帧/表"本身的问题，不带节点上下文；
/// 驱动层在向调用者暴露时补充节点 ID 与端点名称。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Unknown endpoint '{name}'")]
    UnknownEndpoint { name: String },

    #[error("Unknown endpoint id 0x{id:04X}")]
    UnknownEndpointId { id: u16 },

    #[error("Type mismatch: {value} cannot be expressed as {tag}")]
    TypeMismatch { tag: TypeTag, value: String },

    #[error("Short buffer for {tag}: expected {expected} bytes, got {actual}")]
    ShortBuffer {
        tag: TypeTag,
        expected: usize,
        actual: usize,
    },

    #[error("Payload too large: {size} bytes exceeds frame capacity of {capacity}")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("Invalid payload for {direction:?} request: {len} bytes")]
    InvalidPayload { direction: Direction, len: usize },

    #[error("Invalid node id {node_id} (max {max})", max = ids::MAX_NODE_ID)]
    InvalidNodeId { node_id: u8 },

    #[error("Selector 0x{selector:02X} is reserved")]
    ReservedSelector { selector: u8 },

    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}

//! 仲裁 ID 布局与命令选择子常量
//!
//! 11 位标准帧 ID 的高 6 位为节点 ID，低 5 位为命令选择子：
//!
//! ```text
//!  10        5 4       0
//! +-----------+---------+
//! |  node_id  | selector|
//! +-----------+---------+
//! ```
//!
//! 端点 ID 空间统一编址：
//! - `0x00..=0x1F`：直连命令，选择子即端点 ID，数据区为裸值
//! - `0x20..`：SDO 端点，经选择子 `0x04`/`0x05` 隧道传输，数据区带 4 字节头

use bilge::prelude::*;

/// 节点 ID 最大值（6 位）
pub const MAX_NODE_ID: u8 = 0x3F;

/// 选择子最大值（5 位）
pub const MAX_SELECTOR: u8 = 0x1F;

/// 单帧数据容量
pub const FRAME_CAPACITY: usize = 8;

// ============================================================================
// 命令选择子
// ============================================================================

/// 版本查询（RTR 请求，8 字节回复）
pub const CMD_GET_VERSION: u8 = 0x00;
/// 心跳（节点周期发送）
pub const CMD_HEARTBEAT: u8 = 0x01;
/// 急停
pub const CMD_ESTOP: u8 = 0x02;
/// 错误上报 / 查询
pub const CMD_GET_ERROR: u8 = 0x03;
/// SDO 请求（主机 → 节点）
pub const CMD_RXSDO: u8 = 0x04;
/// SDO 回复（节点 → 主机）
pub const CMD_TXSDO: u8 = 0x05;
/// 设置轴状态
pub const CMD_SET_AXIS_STATE: u8 = 0x07;
/// 编码器估计值
pub const CMD_GET_ENCODER_ESTIMATES: u8 = 0x09;
/// 位置指令（`f32` 位置 + `i16` 速度前馈 + `i16` 力矩前馈）
pub const CMD_SET_INPUT_POS: u8 = 0x0C;
/// 重启
pub const CMD_REBOOT: u8 = 0x16;
/// 清除错误
pub const CMD_CLEAR_ERRORS: u8 = 0x18;

/// 不能作为端点使用的选择子
pub const RESERVED_SELECTORS: [u8; 3] = [CMD_HEARTBEAT, CMD_RXSDO, CMD_TXSDO];

// ============================================================================
// SDO
// ============================================================================

/// SDO 端点 ID 起始值（小于此值的端点为直连命令）
pub const SDO_ENDPOINT_BASE: u16 = 0x20;

/// SDO 头长度：`[opcode, id_lo, id_hi, reserved]`
pub const SDO_HEADER_LEN: usize = 4;

/// SDO 读操作码
pub const SDO_OPCODE_READ: u8 = 0x00;

/// SDO 写操作码（函数调用为不带值的写）
pub const SDO_OPCODE_WRITE: u8 = 0x01;

/// 11 位仲裁 ID
///
/// bilge 默认 LSB first：第一个字段占最低位。
#[bitsize(11)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq)]
pub struct ArbitrationId {
    pub selector: u5,
    pub node_id: u6,
}

impl ArbitrationId {
    /// 由节点 ID 与选择子构建（调用方需保证取值范围）
    pub fn compose(node_id: u8, selector: u8) -> Self {
        Self::new(u5::new(selector & MAX_SELECTOR), u6::new(node_id & MAX_NODE_ID))
    }

    /// 从原始 ID 解析（超出 11 位返回 `None`）
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw > 0x7FF {
            return None;
        }
        Some(Self::from(u11::new(raw as u16)))
    }

    /// 原始 11 位 ID
    pub fn raw(self) -> u16 {
        u11::from(self).value()
    }

    pub fn node(self) -> u8 {
        self.node_id().value()
    }

    pub fn command(self) -> u8 {
        self.selector().value()
    }
}

/// 端点 ID 是否为直连命令
pub fn is_direct_endpoint(endpoint_id: u16) -> bool {
    endpoint_id < SDO_ENDPOINT_BASE
}

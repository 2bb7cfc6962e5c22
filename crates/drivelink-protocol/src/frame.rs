//! 请求帧构建与入站帧解析
//!
//! 帧形状约定（标准 11 位 ID）：
//!
//! | 端点 | 读 | 写 | 调用 | 回复 |
//! |---|---|---|---|---|
//! | 直连 (`< 0x20`) | RTR 帧，无数据 | 数据帧，裸值 | 数据帧，无数据 | 同 ID 数据帧 |
//! | SDO (`>= 0x20`) | `0x04`: `[0, id, 0]` | `0x04`: `[1, id, 0, 值]` | `0x04`: `[1, id, 0]` | `0x05`: `[status, id, 0, 值]` |
//!
//! 心跳使用保留选择子 `0x01`，数据区携带轴错误位域与轴状态，不含端点 ID。

use crate::codec::Payload;
use crate::ids::*;
use crate::{DriveFrame, ProtocolError};

/// 帧方向 / 形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 读请求
    Read,
    /// 写请求（带值）
    Write,
    /// 函数调用（不带值）
    Call,
    /// SDO 回复（节点 → 主机）
    Reply,
}

/// 轴状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, num_enum::FromPrimitive)]
#[repr(u8)]
pub enum AxisState {
    #[default]
    Undefined = 0,
    Idle = 1,
    StartupSequence = 2,
    FullCalibrationSequence = 3,
    MotorCalibration = 4,
    EncoderIndexSearch = 6,
    EncoderOffsetCalibration = 7,
    ClosedLoopControl = 8,
    LockinSpin = 9,
    EncoderDirFind = 10,
    Homing = 11,
    EncoderHallPolarityCalibration = 12,
    EncoderHallPhaseCalibration = 13,
}

/// 端点消息（解析结果）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointMessage {
    pub node_id: u8,
    pub endpoint_id: u16,
    pub direction: Direction,
    pub payload: Payload,
    /// SDO 回复的状态字节，其他形状恒为 0
    pub status: u8,
}

/// 心跳事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatEvent {
    pub node_id: u8,
    pub axis_error: u32,
    pub axis_state: AxisState,
    pub procedure_result: u8,
    pub trajectory_done: bool,
}

/// 入站帧解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedFrame {
    Endpoint(EndpointMessage),
    Heartbeat(HeartbeatEvent),
    Unrecognized,
}

fn check_node(node_id: u8) -> Result<(), ProtocolError> {
    if node_id > MAX_NODE_ID {
        return Err(ProtocolError::InvalidNodeId { node_id });
    }
    Ok(())
}

fn check_payload_shape(direction: Direction, payload: &[u8]) -> Result<(), ProtocolError> {
    let ok = match direction {
        Direction::Read | Direction::Call => payload.is_empty(),
        Direction::Write => !payload.is_empty(),
        Direction::Reply => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidPayload {
            direction,
            len: payload.len(),
        })
    }
}

fn sdo_frame(
    node_id: u8,
    selector: u8,
    first: u8,
    endpoint_id: u16,
    payload: &[u8],
) -> Result<DriveFrame, ProtocolError> {
    let size = SDO_HEADER_LEN + payload.len();
    if size > FRAME_CAPACITY {
        return Err(ProtocolError::PayloadTooLarge {
            size,
            capacity: FRAME_CAPACITY,
        });
    }
    let id = endpoint_id.to_le_bytes();
    let mut data = [0u8; FRAME_CAPACITY];
    data[..SDO_HEADER_LEN].copy_from_slice(&[first, id[0], id[1], 0]);
    data[SDO_HEADER_LEN..size].copy_from_slice(payload);
    Ok(DriveFrame::new_standard(
        ArbitrationId::compose(node_id, selector).raw(),
        &data[..size],
    ))
}

/// 构建请求帧
///
/// 多帧分片不受支持：编码值加协议头超过 8 字节时立即失败，绝不截断。
///
/// # 示例
///
/// ```rust
/// use drivelink_protocol::{build_request, Direction};
///
/// let frame = build_request(3, 27, Direction::Write, &4.5f32.to_le_bytes()).unwrap();
/// assert_eq!(frame.id, (3 << 5) | 27);
/// assert_eq!(frame.data_slice(), &4.5f32.to_le_bytes());
/// ```
pub fn build_request(
    node_id: u8,
    endpoint_id: u16,
    direction: Direction,
    payload: &[u8],
) -> Result<DriveFrame, ProtocolError> {
    check_node(node_id)?;
    check_payload_shape(direction, payload)?;

    if is_direct_endpoint(endpoint_id) {
        let selector = endpoint_id as u8;
        if RESERVED_SELECTORS.contains(&selector) {
            return Err(ProtocolError::ReservedSelector { selector });
        }
        if payload.len() > FRAME_CAPACITY {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                capacity: FRAME_CAPACITY,
            });
        }
        let id = ArbitrationId::compose(node_id, selector).raw();
        return Ok(match direction {
            Direction::Read => DriveFrame::new_remote(id),
            _ => DriveFrame::new_standard(id, payload),
        });
    }

    let opcode = match direction {
        Direction::Read => SDO_OPCODE_READ,
        _ => SDO_OPCODE_WRITE,
    };
    sdo_frame(node_id, CMD_RXSDO, opcode, endpoint_id, payload)
}

/// 构建节点侧回复帧（模拟节点、测试使用）
///
/// 直连端点：同 ID 数据帧，`status` 被忽略；SDO 端点：`0x05` 回复帧。
pub fn build_reply(
    node_id: u8,
    endpoint_id: u16,
    status: u8,
    payload: &[u8],
) -> Result<DriveFrame, ProtocolError> {
    check_node(node_id)?;
    if is_direct_endpoint(endpoint_id) {
        if payload.len() > FRAME_CAPACITY {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                capacity: FRAME_CAPACITY,
            });
        }
        let id = ArbitrationId::compose(node_id, endpoint_id as u8).raw();
        return Ok(DriveFrame::new_standard(id, payload));
    }
    sdo_frame(node_id, CMD_TXSDO, status, endpoint_id, payload)
}

/// 构建心跳帧（模拟节点、测试使用）
pub fn build_heartbeat(event: &HeartbeatEvent) -> Result<DriveFrame, ProtocolError> {
    check_node(event.node_id)?;
    let err = event.axis_error.to_le_bytes();
    let data = [
        err[0],
        err[1],
        err[2],
        err[3],
        event.axis_state as u8,
        event.procedure_result,
        event.trajectory_done as u8,
        0,
    ];
    Ok(DriveFrame::new_standard(
        ArbitrationId::compose(event.node_id, CMD_HEARTBEAT).raw(),
        &data,
    ))
}

fn parse_sdo(node_id: u8, frame: &DriveFrame, reply: bool) -> ParsedFrame {
    let data = frame.data_slice();
    if frame.is_remote || data.len() < SDO_HEADER_LEN {
        return ParsedFrame::Unrecognized;
    }
    let endpoint_id = u16::from_le_bytes([data[1], data[2]]);
    if is_direct_endpoint(endpoint_id) {
        return ParsedFrame::Unrecognized;
    }
    let value = &data[SDO_HEADER_LEN..];
    // data 长度 <= 8，from_slice 不会失败
    let Ok(payload) = Payload::from_slice(value) else {
        return ParsedFrame::Unrecognized;
    };

    let (direction, status) = if reply {
        (Direction::Reply, data[0])
    } else {
        let direction = match (data[0], value.is_empty()) {
            (SDO_OPCODE_READ, true) => Direction::Read,
            (SDO_OPCODE_WRITE, true) => Direction::Call,
            (SDO_OPCODE_WRITE, false) => Direction::Write,
            _ => return ParsedFrame::Unrecognized,
        };
        (direction, 0)
    };

    ParsedFrame::Endpoint(EndpointMessage {
        node_id,
        endpoint_id,
        direction,
        payload,
        status,
    })
}

/// 解析入站帧
///
/// `build_request` 的结构逆运算：直连端点共用一个仲裁 ID 双向通信，
/// 因此这里的 `direction` 描述的是帧的形状（RTR → Read，空数据 → Call，带数据 → Write）。
pub fn parse(frame: &DriveFrame) -> ParsedFrame {
    if frame.is_extended {
        return ParsedFrame::Unrecognized;
    }
    let Some(arb) = ArbitrationId::from_raw(frame.id) else {
        return ParsedFrame::Unrecognized;
    };
    let node_id = arb.node();
    let selector = arb.command();

    match selector {
        CMD_HEARTBEAT => {
            let data = frame.data_slice();
            if frame.is_remote || data.len() < 7 {
                return ParsedFrame::Unrecognized;
            }
            ParsedFrame::Heartbeat(HeartbeatEvent {
                node_id,
                axis_error: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
                axis_state: AxisState::from(data[4]),
                procedure_result: data[5],
                trajectory_done: data[6] != 0,
            })
        },
        CMD_RXSDO => parse_sdo(node_id, frame, false),
        CMD_TXSDO => parse_sdo(node_id, frame, true),
        _ => {
            let direction = if frame.is_remote {
                Direction::Read
            } else if frame.len == 0 {
                Direction::Call
            } else {
                Direction::Write
            };
            let payload = if frame.is_remote {
                Payload::EMPTY
            } else {
                match Payload::from_slice(frame.data_slice()) {
                    Ok(p) => p,
                    Err(_) => return ParsedFrame::Unrecognized,
                }
            };
            ParsedFrame::Endpoint(EndpointMessage {
                node_id,
                endpoint_id: selector as u16,
                direction,
                payload,
                status: 0,
            })
        },
    }
}

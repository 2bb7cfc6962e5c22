//! 测试基础设施：挂在 Mock 总线上的模拟节点

#![allow(dead_code)]

use drivelink_can::{DriveFrame, MockBus, MockCanAdapter, MockDevice};
use drivelink_protocol::{
    CMD_CLEAR_ERRORS, CMD_ESTOP, CMD_REBOOT, CMD_SET_AXIS_STATE, CMD_SET_INPUT_POS, Confirmation,
    Direction, EndpointDescriptor, EndpointTable, HeartbeatEvent, ParsedFrame,
    TypeTag, build_heartbeat, build_reply, parse,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

pub const VEL_LIMIT: u16 = 27;
pub const VBUS_VOLTAGE: u16 = 0x40;
pub const CONTROL_MODE: u16 = 0x41;
pub const CLEAR_ERRORS: u16 = CMD_CLEAR_ERRORS as u16;
pub const ESTOP: u16 = CMD_ESTOP as u16;
pub const REQUESTED_STATE: u16 = CMD_SET_AXIS_STATE as u16;
pub const REBOOT: u16 = CMD_REBOOT as u16;
pub const SET_INPUT_POS: u16 = CMD_SET_INPUT_POS as u16;
pub const SAVE_CONFIGURATION: u16 = 0x43;
pub const POS_GAIN: u16 = 0x44;

fn desc(name: &str, id: u16, type_tag: TypeTag, access: &str, confirm: Confirmation) -> EndpointDescriptor {
    EndpointDescriptor {
        name: name.to_string(),
        id,
        type_tag,
        readable: access.contains('r'),
        writable: access.contains('w'),
        confirm,
    }
}

pub fn test_schema() -> EndpointTable {
    EndpointTable::from_descriptors(
        Some("0.6.9".to_string()),
        [
            desc("vel_limit", VEL_LIMIT, TypeTag::Float32, "rw", Confirmation::None),
            desc("vbus_voltage", VBUS_VOLTAGE, TypeTag::Float32, "r", Confirmation::None),
            desc("control_mode", CONTROL_MODE, TypeTag::Uint8, "rw", Confirmation::Echo),
            desc("clear_errors", CLEAR_ERRORS, TypeTag::Function, "rw", Confirmation::None),
            desc("save_configuration", SAVE_CONFIGURATION, TypeTag::Function, "rw", Confirmation::Echo),
            desc("pos_gain", POS_GAIN, TypeTag::Float32, "rw", Confirmation::Echo),
            desc("estop", ESTOP, TypeTag::Function, "rw", Confirmation::None),
            desc("axis0.requested_state", REQUESTED_STATE, TypeTag::Uint32, "w", Confirmation::None),
            desc("reboot", REBOOT, TypeTag::Function, "rw", Confirmation::None),
            desc("set_input_pos", SET_INPUT_POS, TypeTag::Function, "rw", Confirmation::Echo),
        ],
    )
    .unwrap()
}

/// 模拟节点的可调行为
#[derive(Default)]
pub struct SimState {
    /// 应答的节点
    pub nodes: HashSet<u8>,
    /// 端点存储值
    pub values: HashMap<(u8, u16), Vec<u8>>,
    /// 需要回显的端点（写 / 调用）
    pub echo: HashSet<u16>,
    /// 丢弃接下来的 N 个请求（模拟丢帧）
    pub drop_next: u32,
    /// 回复前等待
    pub reply_delay: Duration,
    /// 回复的状态字节
    pub status: HashMap<u16, u8>,
    /// 清除错误后仍残留的错误位
    pub clear_remaining: u32,
    /// 收到的全部请求帧
    pub received: Vec<DriveFrame>,
}

pub struct SimNode {
    pub state: Arc<Mutex<SimState>>,
    pub device: MockDevice,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimNode {
    /// 启动模拟节点，返回主机侧适配器
    pub fn start(nodes: &[u8]) -> (MockCanAdapter, SimNode) {
        let (can, device) = MockBus::new();
        let mut state = SimState {
            nodes: nodes.iter().copied().collect(),
            ..SimState::default()
        };
        state.echo.extend([
            CONTROL_MODE,
            SAVE_CONFIGURATION,
            POS_GAIN,
            CLEAR_ERRORS,
            SET_INPUT_POS,
        ]);
        for &node in nodes {
            state
                .values
                .insert((node, VBUS_VOLTAGE), 24.0f32.to_le_bytes().to_vec());
            state.values.insert((node, 0), vec![2, 4, 4, 0, 0, 6, 9, 0]);
        }
        let state = Arc::new(Mutex::new(state));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            let device = device.clone();
            std::thread::spawn(move || serve(device, state, stop))
        };

        (
            can,
            SimNode {
                state,
                device,
                stop,
                handle: Some(handle),
            },
        )
    }

    pub fn heartbeat(&self, node_id: u8, axis_error: u32) {
        let frame = build_heartbeat(&HeartbeatEvent {
            node_id,
            axis_error,
            axis_state: drivelink_protocol::AxisState::Idle,
            procedure_result: 0,
            trajectory_done: false,
        })
        .unwrap();
        self.device.send(frame);
    }

    pub fn send_raw(&self, frame: DriveFrame) {
        self.device.send(frame);
    }

    pub fn received(&self) -> Vec<DriveFrame> {
        self.state.lock().received.clone()
    }

    pub fn received_for(&self, node_id: u8) -> usize {
        self.state
            .lock()
            .received
            .iter()
            .filter(|f| (f.id >> 5) as u8 == node_id)
            .count()
    }
}

impl Drop for SimNode {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(device: MockDevice, state: Arc<Mutex<SimState>>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        let Some(frame) = device.recv_timeout(Duration::from_millis(5)) else {
            continue;
        };

        let reply = {
            let mut s = state.lock();
            s.received.push(frame);
            let ParsedFrame::Endpoint(msg) = parse(&frame) else {
                continue;
            };
            if !s.nodes.contains(&msg.node_id) {
                continue;
            }
            if s.drop_next > 0 {
                s.drop_next -= 1;
                continue;
            }
            let key = (msg.node_id, msg.endpoint_id);
            let status = s.status.get(&msg.endpoint_id).copied().unwrap_or(0);
            let payload: Option<Vec<u8>> = match msg.direction {
                Direction::Read => s.values.get(&key).cloned(),
                Direction::Write => {
                    s.values.insert(key, msg.payload.as_slice().to_vec());
                    s.echo
                        .contains(&msg.endpoint_id)
                        .then(|| msg.payload.as_slice().to_vec())
                },
                Direction::Call if msg.endpoint_id == CLEAR_ERRORS => {
                    Some(s.clear_remaining.to_le_bytes().to_vec())
                },
                Direction::Call => s.echo.contains(&msg.endpoint_id).then(Vec::new),
                Direction::Reply => None,
            };
            let delay = s.reply_delay;
            payload.map(|p| (build_reply(msg.node_id, msg.endpoint_id, status, &p), delay))
        };

        if let Some((Ok(frame), delay)) = reply {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            device.send(frame);
        }
    }
}

pub fn fast_config() -> drivelink_driver::LinkConfig {
    drivelink_driver::LinkConfig {
        request_timeout_ms: 30,
        ..drivelink_driver::LinkConfig::default()
    }
}

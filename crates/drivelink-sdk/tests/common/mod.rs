//! 集成测试基础设施：按端点表行为应答的模拟节点

#![allow(dead_code)]

use drivelink_sdk::can::{MockBus, MockCanAdapter, MockDevice};
use drivelink_sdk::protocol::{
    AxisState, CMD_GET_ERROR, CMD_GET_VERSION, Confirmation, Direction, DriveFrame,
    EndpointTable, HeartbeatEvent, ParsedFrame, build_heartbeat, build_reply, parse,
};
use drivelink_sdk::{DriveLink, DriveLinkBuilder, LinkConfig};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const SCHEMA_JSON: &str = r#"{
    "version": "0.6.9",
    "endpoints": {
        "vel_limit": {"id": 27, "type": "float", "access": "rw"},
        "vbus_voltage": {"id": 32, "type": "float", "access": "r"},
        "ibus": {"id": 33, "type": "float", "access": "r"},
        "axis0.active_errors": {"id": 34, "type": "uint32", "access": "r"},
        "axis0.disarm_reason": {"id": 35, "type": "uint32", "access": "r"},
        "axis0.config.motor.pole_pairs": {"id": 48, "type": "uint32", "access": "rw", "confirm": "echo"},
        "axis0.config.motor.torque_constant": {"id": 49, "type": "float", "access": "rw", "confirm": "echo"},
        "axis0.controller.config.control_mode": {"id": 50, "type": "uint8", "access": "rw", "confirm": "echo"},
        "clear_errors": {"id": 64, "type": "function", "access": "rw"},
        "save_configuration": {"id": 65, "type": "function", "access": "rw"}
    }
}"#;

pub const CLEAR_ERRORS_ID: u16 = 64;

pub fn schema() -> EndpointTable {
    EndpointTable::from_json_str(SCHEMA_JSON).unwrap()
}

pub fn fast_config() -> LinkConfig {
    LinkConfig {
        request_timeout_ms: 30,
        ..LinkConfig::default()
    }
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[derive(Default)]
pub struct SimState {
    pub nodes: HashSet<u8>,
    pub values: HashMap<(u8, u16), Vec<u8>>,
    /// 清除错误后残留的错误位
    pub clear_remaining: u32,
    pub received: Vec<DriveFrame>,
}

impl SimState {
    /// 收到的写 / 调用请求（按到达顺序）
    pub fn writes_for(&self, node_id: u8) -> Vec<u16> {
        self.received
            .iter()
            .filter_map(|f| match parse(f) {
                ParsedFrame::Endpoint(msg)
                    if msg.node_id == node_id
                        && matches!(msg.direction, Direction::Write | Direction::Call) =>
                {
                    Some(msg.endpoint_id)
                },
                _ => None,
            })
            .collect()
    }
}

pub struct SimNode {
    pub state: Arc<Mutex<SimState>>,
    pub device: MockDevice,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimNode {
    pub fn start(nodes: &[u8]) -> (MockCanAdapter, SimNode) {
        let (can, device) = MockBus::new();
        let table = schema();

        let mut state = SimState {
            nodes: nodes.iter().copied().collect(),
            ..SimState::default()
        };
        for &node in nodes {
            for desc in table.iter().filter(|d| d.readable) {
                state
                    .values
                    .insert((node, desc.id), vec![0; desc.type_tag.width()]);
            }
            state.values.insert(
                (node, 32),
                24.0f32.to_le_bytes().to_vec(),
            );
            state
                .values
                .insert((node, CMD_GET_VERSION as u16), vec![2, 4, 4, 0, 0, 6, 9, 0]);
        }

        let state = Arc::new(Mutex::new(state));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            let device = device.clone();
            std::thread::spawn(move || serve(device, table, state, stop))
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

    /// 启动模拟节点并在其上构建双线程链路
    pub fn link(nodes: &[u8]) -> (DriveLink, SimNode) {
        let (can, sim) = Self::start(nodes);
        let link = DriveLinkBuilder::new()
            .interface("mock0")
            .schema(schema())
            .config(fast_config())
            .build_with_adapter(can)
            .unwrap();
        (link, sim)
    }

    pub fn heartbeat(&self, node_id: u8, axis_error: u32) {
        let frame = build_heartbeat(&HeartbeatEvent {
            node_id,
            axis_error,
            axis_state: AxisState::ClosedLoopControl,
            procedure_result: 0,
            trajectory_done: true,
        })
        .unwrap();
        self.device.send(frame);
    }

    pub fn error_report(&self, node_id: u8, active_errors: u32, disarm_reason: u32) {
        let mut report = [0u8; 8];
        report[..4].copy_from_slice(&active_errors.to_le_bytes());
        report[4..].copy_from_slice(&disarm_reason.to_le_bytes());
        self.device
            .send(build_reply(node_id, CMD_GET_ERROR as u16, 0, &report).unwrap());
    }

    pub fn received(&self) -> Vec<DriveFrame> {
        self.state.lock().received.clone()
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

fn serve(device: MockDevice, table: EndpointTable, state: Arc<Mutex<SimState>>, stop: Arc<AtomicBool>) {
    let echo: HashSet<u16> = table
        .iter()
        .filter(|d| d.confirm == Confirmation::Echo)
        .map(|d| d.id)
        .collect();

    while !stop.load(Ordering::Acquire) {
        let Some(frame) = device.recv_timeout(Duration::from_millis(5)) else {
            continue;
        };

        let mut s = state.lock();
        s.received.push(frame);
        let ParsedFrame::Endpoint(msg) = parse(&frame) else {
            continue;
        };
        if !s.nodes.contains(&msg.node_id) {
            continue;
        }

        let key = (msg.node_id, msg.endpoint_id);
        let payload = match msg.direction {
            Direction::Read => s.values.get(&key).cloned(),
            Direction::Write => {
                s.values.insert(key, msg.payload.as_slice().to_vec());
                echo.contains(&msg.endpoint_id)
                    .then(|| msg.payload.as_slice().to_vec())
            },
            Direction::Call if msg.endpoint_id == CLEAR_ERRORS_ID => {
                Some(s.clear_remaining.to_le_bytes().to_vec())
            },
            Direction::Call => echo.contains(&msg.endpoint_id).then(Vec::new),
            Direction::Reply => None,
        };
        drop(s);

        if let Some(payload) = payload
            && let Ok(reply) = build_reply(msg.node_id, msg.endpoint_id, 0, &payload)
        {
            device.send(reply);
        }
    }
}

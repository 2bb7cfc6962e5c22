//! 内存中的 `NodeClient`（单元测试用）

use drivelink_driver::{DriverError, Node, NodeClient};
use drivelink_protocol::{
    AxisState, Confirmation, DeviceVersion, EndpointDescriptor, EndpointTable, TypeTag, Value,
    decode, encode,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

fn desc(name: &str, id: u16, type_tag: TypeTag, writable: bool) -> EndpointDescriptor {
    EndpointDescriptor {
        name: name.to_string(),
        id,
        type_tag,
        writable,
        readable: !type_tag.is_function(),
        confirm: if type_tag.is_function() {
            Confirmation::Echo
        } else {
            Confirmation::None
        },
    }
}

pub(crate) fn schema() -> EndpointTable {
    EndpointTable::from_descriptors(
        Some("0.6.9".to_string()),
        [
            desc("vbus_voltage", 0x20, TypeTag::Float32, false),
            desc("ibus", 0x21, TypeTag::Float32, false),
            desc("axis0.active_errors", 0x22, TypeTag::Uint32, false),
            desc("axis0.disarm_reason", 0x23, TypeTag::Uint32, false),
            desc("axis0.config.motor.pole_pairs", 0x30, TypeTag::Uint32, true),
            desc("axis0.config.motor.torque_constant", 0x31, TypeTag::Float32, true),
            desc("axis0.controller.config.control_mode", 0x32, TypeTag::Uint8, true),
            desc("axis0.controller.config.vel_limit", 0x33, TypeTag::Float32, true),
            desc("config.brake_resistor0.enable", 0x34, TypeTag::Bool, true),
            desc("clear_errors", 0x40, TypeTag::Function, true),
            desc("save_configuration", 0x41, TypeTag::Function, true),
        ],
    )
    .unwrap()
}

pub(crate) fn node(node_id: u8, axis_error: u32) -> Node {
    Node {
        node_id,
        last_seen: Instant::now(),
        axis_error,
        axis_state: AxisState::Idle,
        disarm_reason: 0,
        procedure_result: 0,
        trajectory_done: false,
        reachable: true,
        consecutive_failures: 0,
    }
}

fn timeout(node_id: u8, endpoint: &str) -> DriverError {
    DriverError::Timeout {
        node_id,
        endpoint: endpoint.to_string(),
        attempts: 3,
    }
}

#[derive(Default)]
pub(crate) struct FakeClient {
    schema: EndpointTable,
    pub values: Mutex<HashMap<(u8, String), Value>>,
    pub nodes: Mutex<BTreeMap<u8, Node>>,
    /// 不应答的节点
    pub silent: Mutex<HashSet<u8>>,
    /// 回读时返回的篡改值
    pub tampered: Mutex<HashMap<String, Value>>,
    pub writes: Mutex<Vec<(u8, String, Value)>>,
    pub reads: Mutex<Vec<(u8, String)>>,
    pub calls: Mutex<Vec<(u8, String)>>,
    pub version: Option<DeviceVersion>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            schema: schema(),
            ..Self::default()
        }
    }

    pub fn with_value(self, node_id: u8, endpoint: &str, value: impl Into<Value>) -> Self {
        self.values
            .lock()
            .insert((node_id, endpoint.to_string()), value.into());
        self
    }

    pub fn with_version(mut self, version: DeviceVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_node(self, node: Node) -> Self {
        self.nodes.lock().insert(node.node_id, node);
        self
    }

    fn check_alive(&self, node_id: u8, endpoint: &str) -> Result<(), DriverError> {
        if self.silent.lock().contains(&node_id) {
            return Err(timeout(node_id, endpoint));
        }
        Ok(())
    }
}

impl NodeClient for FakeClient {
    fn read(&self, node_id: u8, endpoint: &str) -> Result<Value, DriverError> {
        let desc = self
            .schema
            .resolve(endpoint)
            .map_err(|e| DriverError::from_protocol(node_id, endpoint, e))?;
        self.check_alive(node_id, endpoint)?;
        self.reads.lock().push((node_id, endpoint.to_string()));
        if let Some(v) = self.tampered.lock().get(endpoint) {
            return Ok(*v);
        }
        self.values
            .lock()
            .get(&(node_id, desc.name.clone()))
            .copied()
            .ok_or_else(|| timeout(node_id, endpoint))
    }

    fn write(&self, node_id: u8, endpoint: &str, value: Value) -> Result<(), DriverError> {
        let desc = self
            .schema
            .resolve(endpoint)
            .map_err(|e| DriverError::from_protocol(node_id, endpoint, e))?;
        let payload = encode(desc.type_tag, &value)
            .map_err(|e| DriverError::from_protocol(node_id, endpoint, e))?;
        self.check_alive(node_id, endpoint)?;
        self.writes
            .lock()
            .push((node_id, endpoint.to_string(), value));
        let stored = decode(desc.type_tag, payload.as_slice())
            .map_err(|e| DriverError::from_protocol(node_id, endpoint, e))?;
        self.values
            .lock()
            .insert((node_id, endpoint.to_string()), stored);
        Ok(())
    }

    fn call(&self, node_id: u8, endpoint: &str) -> Result<(), DriverError> {
        self.schema
            .resolve(endpoint)
            .map_err(|e| DriverError::from_protocol(node_id, endpoint, e))?;
        self.check_alive(node_id, endpoint)?;
        self.calls.lock().push((node_id, endpoint.to_string()));
        Ok(())
    }

    fn clear_errors(&self, node_id: u8) -> Result<u32, DriverError> {
        self.check_alive(node_id, "clear_errors")?;
        self.calls.lock().push((node_id, "clear_errors".to_string()));
        if let Some(node) = self.nodes.lock().get_mut(&node_id) {
            node.axis_error = 0;
        }
        Ok(0)
    }

    fn snapshot_nodes(&self) -> BTreeMap<u8, Node> {
        self.nodes.lock().clone()
    }

    fn query_version(&self, node_id: u8) -> Result<DeviceVersion, DriverError> {
        self.check_alive(node_id, "version")?;
        self.version.ok_or_else(|| timeout(node_id, "version"))
    }

    fn schema(&self) -> &EndpointTable {
        &self.schema
    }
}

//! 节点访问 trait
//!
//! 批量操作（配置下发、指标轮询等）只依赖 [`NodeClient`]，
//! 既可以跑在真实链路上，也可以在测试中替换为内存实现。

use crate::error::DriverError;
use crate::link::DriveLink;
use crate::registry::Node;
use drivelink_protocol::{DeviceVersion, EndpointTable, Value};
use std::collections::BTreeMap;

/// 面向调用者的端点操作
pub trait NodeClient: Send + Sync {
    fn read(&self, node_id: u8, endpoint: &str) -> Result<Value, DriverError>;

    fn write(&self, node_id: u8, endpoint: &str, value: Value) -> Result<(), DriverError>;

    fn call(&self, node_id: u8, endpoint: &str) -> Result<(), DriverError>;

    /// 返回确认后的锁存错误值
    fn clear_errors(&self, node_id: u8) -> Result<u32, DriverError>;

    fn snapshot_nodes(&self) -> BTreeMap<u8, Node>;

    fn query_version(&self, node_id: u8) -> Result<DeviceVersion, DriverError>;

    fn schema(&self) -> &EndpointTable;
}

impl NodeClient for DriveLink {
    fn read(&self, node_id: u8, endpoint: &str) -> Result<Value, DriverError> {
        DriveLink::read(self, node_id, endpoint)
    }

    fn write(&self, node_id: u8, endpoint: &str, value: Value) -> Result<(), DriverError> {
        DriveLink::write(self, node_id, endpoint, value)
    }

    fn call(&self, node_id: u8, endpoint: &str) -> Result<(), DriverError> {
        DriveLink::call(self, node_id, endpoint)
    }

    fn clear_errors(&self, node_id: u8) -> Result<u32, DriverError> {
        DriveLink::clear_errors(self, node_id)
    }

    fn snapshot_nodes(&self) -> BTreeMap<u8, Node> {
        DriveLink::snapshot_nodes(self)
    }

    fn query_version(&self, node_id: u8) -> Result<DeviceVersion, DriverError> {
        DriveLink::query_version(self, node_id)
    }

    fn schema(&self) -> &EndpointTable {
        DriveLink::schema(self)
    }
}

impl<T: NodeClient + ?Sized> NodeClient for std::sync::Arc<T> {
    fn read(&self, node_id: u8, endpoint: &str) -> Result<Value, DriverError> {
        (**self).read(node_id, endpoint)
    }

    fn write(&self, node_id: u8, endpoint: &str, value: Value) -> Result<(), DriverError> {
        (**self).write(node_id, endpoint, value)
    }

    fn call(&self, node_id: u8, endpoint: &str) -> Result<(), DriverError> {
        (**self).call(node_id, endpoint)
    }

    fn clear_errors(&self, node_id: u8) -> Result<u32, DriverError> {
        (**self).clear_errors(node_id)
    }

    fn snapshot_nodes(&self) -> BTreeMap<u8, Node> {
        (**self).snapshot_nodes()
    }

    fn query_version(&self, node_id: u8) -> Result<DeviceVersion, DriverError> {
        (**self).query_version(node_id)
    }

    fn schema(&self) -> &EndpointTable {
        (**self).schema()
    }
}

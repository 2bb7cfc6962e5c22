//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use drivelink_sdk::prelude::*;
//! ```

// 驱动层
pub use crate::driver::{
    CancelToken, DriveLink, DriveLinkBuilder, LinkConfig, MetricsSnapshot, Node, NodeClient,
};

// 批量操作
pub use crate::control::{
    ApplyOptions, ConfigFile, Setting, apply_configuration, apply_configuration_with,
    check_firmware, clear_all_errors, discover_nodes, inspect_errors, poll_metrics_once,
};

// 协议层
pub use crate::protocol::{AxisState, DeviceVersion, EndpointTable, TypeTag, Value};

// CAN 层（常用 Trait）
pub use crate::can::CanAdapter;

// 错误类型
pub use crate::can::CanError;
pub use crate::control::ControlError;
pub use crate::driver::DriverError;
pub use crate::protocol::ProtocolError;

//! 批量操作
//!
//! 建立在 [`NodeClient`](drivelink_driver::NodeClient) 之上的多端点工作流：
//!
//! - 配置下发：按顺序写入，首个失败即中止
//! - 指标轮询：周期读取，容忍部分失败
//! - 错误巡检与批量清除
//! - 节点发现与固件版本检查
//!
//! 所有函数只依赖 `NodeClient` trait，可以用真实链路或测试替身驱动。

pub mod apply;
pub mod config;
pub mod discovery;
mod error;
pub mod errors;
pub mod poll;
pub mod version;

#[cfg(test)]
mod fake;

pub use apply::{
    ApplyOptions, ApplyReport, SAVE_CONFIGURATION_ENDPOINT, apply_configuration,
    apply_configuration_with, apply_profile,
};
pub use config::{ConfigFile, ConfigProfile, Setting, SettingValue};
pub use discovery::{DEFAULT_DISCOVERY_WINDOW, discover_nodes};
pub use error::ControlError;
pub use errors::{ErrorInspection, clear_all_errors, inspect_errors};
pub use poll::{DEFAULT_METRIC_ENDPOINTS, MetricSample, MetricsPoller, PollCycle, poll_metrics_once};
pub use version::{check_firmware, firmware_version};

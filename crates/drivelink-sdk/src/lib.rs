//! DriveLink SDK：按名称访问 CAN 总线上电机控制器节点的端点
//!
//! # 架构设计
//!
//! 分层结构，从底层到高层：
//!
//! - **协议层** (`protocol`): 端点表、类型化编解码、帧构建与解析
//! - **CAN 层** (`can`): 适配器抽象，SocketCAN 与内存 Mock 总线
//! - **驱动层** (`driver`): IO 线程、请求 / 回复关联、节点注册表
//! - **批量操作层** (`control`): 配置下发、指标轮询、错误清除、节点发现
//!
//! # 快速开始
//!
//! ```no_run
//! use drivelink_sdk::prelude::*;
//!
//! drivelink_sdk::init_logger();
//! let link = DriveLinkBuilder::new()
//!     .interface("can0")
//!     .schema_file("flat_endpoints.json")
//!     .build()?;
//! link.write(3, "axis0.controller.config.vel_limit", 4.5f32)?;
//! # Ok::<(), DriverError>(())
//! ```

pub use drivelink_can as can;
pub use drivelink_control as control;
pub use drivelink_driver as driver;
pub use drivelink_protocol as protocol;

pub mod prelude;

use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

// 常用类型
pub use can::{CanAdapter, CanError};
pub use control::ControlError;
pub use driver::{DriveLink, DriveLinkBuilder, DriverError, LinkConfig, NodeClient};
pub use protocol::{EndpointTable, ProtocolError, Value};

/// 安装全局日志订阅者（默认级别 `info`，可由 `RUST_LOG` 覆盖）
///
/// 重复调用是无害的：已有全局订阅者时直接返回。
pub fn init_logger() {
    init_logger_with("info");
}

/// 同 [`init_logger`]，`RUST_LOG` 未设置时使用 `default_directives`
pub fn init_logger_with(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return;
    }
    // 第三方 crate 的 `log` 记录转发到 tracing
    if let Err(e) = LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init()
    {
        tracing::warn!("log bridge not installed: {}", e);
    }
}

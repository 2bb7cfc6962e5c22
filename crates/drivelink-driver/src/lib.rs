//! 驱动层模块
//!
//! 把按名称的端点访问（"把节点 3 的 vel_limit 设为 4.5"）变成正确成帧的 CAN 报文，
//! 并把异步回复匹配回发起它的请求：
//!
//! - IO 线程管理（单线程/双线程模式）
//! - 请求 / 回复关联（每个 `(node, endpoint)` 至多一个在途请求，超时重发）
//! - 节点注册表（ArcSwap 无锁快照，错误位锁存）
//! - 链路指标与取消令牌
//!
//! # 使用场景
//!
//! 大多数用户通过 [`DriveLinkBuilder`] 构建 [`DriveLink`]，
//! 批量操作只依赖 [`NodeClient`] trait。

mod builder;
pub mod cancel;
mod client;
pub mod config;
pub mod correlator;
mod error;
mod link;
pub mod metrics;
pub mod pipeline;
pub mod registry;

pub use builder::DriveLinkBuilder;
pub use cancel::CancelToken;
pub use client::NodeClient;
pub use config::LinkConfig;
pub use correlator::PendingRequest;
pub use error::DriverError;
pub use link::DriveLink;
pub use metrics::{LinkMetrics, MetricsSnapshot};
pub use pipeline::{LinkContext, TxRequest, io_loop, rx_loop, tx_loop};
pub use registry::{Node, NodeEvent, NodeRegistry};

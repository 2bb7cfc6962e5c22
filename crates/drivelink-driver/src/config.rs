//! 链路配置
//!
//! 可从 TOML 加载，所有字段都有默认值：
//!
//! ```toml
//! request_timeout_ms = 100
//! max_attempts = 3
//! node_stale_timeout_ms = 1000
//! clear_errors_endpoint = "clear_errors"
//! ```

use crate::error::DriverError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 链路配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// 单次尝试等待回复的超时（毫秒）
    pub request_timeout_ms: u64,
    /// 每个请求的最大发送次数（含首次）
    pub max_attempts: u32,
    /// 适配器接收超时（毫秒），决定 IO 线程响应退出信号的延迟
    pub receive_timeout_ms: u64,
    /// 发送队列容量
    pub tx_queue_capacity: usize,
    /// 超过该时间未见任何帧的节点视为不可达（毫秒）
    pub node_stale_timeout_ms: u64,
    /// 清除错误使用的端点名称
    pub clear_errors_endpoint: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 100,
            max_attempts: 3,
            receive_timeout_ms: 2,
            tx_queue_capacity: 10,
            node_stale_timeout_ms: 1000,
            clear_errors_endpoint: "clear_errors".to_string(),
        }
    }
}

impl LinkConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, DriverError> {
        let config: LinkConfig =
            toml::from_str(text).map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DriverError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.max_attempts == 0 {
            return Err(DriverError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(DriverError::InvalidConfig(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.tx_queue_capacity == 0 {
            return Err(DriverError::InvalidConfig(
                "tx_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.clear_errors_endpoint.is_empty() {
            return Err(DriverError::InvalidConfig(
                "clear_errors_endpoint must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn node_stale_timeout(&self) -> Duration {
        Duration::from_millis(self.node_stale_timeout_ms)
    }
}

//! 批量操作错误类型

use drivelink_driver::DriverError;
use drivelink_protocol::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    /// 配置项写入失败；其后的配置项未被尝试
    #[error("Node {node_id}: setting #{index} '{path}' failed: {source}")]
    Setting {
        node_id: u8,
        index: usize,
        path: String,
        #[source]
        source: DriverError,
    },

    /// 回读值与写入值不一致
    #[error("Node {node_id}: '{path}' verification failed (wrote {expected}, read back {actual})")]
    VerifyFailed {
        node_id: u8,
        path: String,
        expected: Value,
        actual: Value,
    },

    /// 配置值无法表示为端点值
    #[error("Invalid setting '{path}': {reason}")]
    InvalidSetting { path: String, reason: String },

    /// 配置文件错误
    #[error("Config file error: {0}")]
    ConfigFile(String),

    /// 配置档不存在
    #[error("Unknown profile '{0}'")]
    UnknownProfile(String),

    /// 固件版本不满足要求
    #[error("Node {node_id}: firmware {found} does not satisfy {required}")]
    FirmwareMismatch {
        node_id: u8,
        found: semver::Version,
        required: semver::VersionReq,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl ControlError {
    /// 底层驱动错误（若有）
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            ControlError::Setting { source, .. } => Some(source),
            ControlError::Driver(e) => Some(e),
            _ => None,
        }
    }
}

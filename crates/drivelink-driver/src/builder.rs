//! Builder 模式实现
//!
//! 提供链式构造 `DriveLink` 实例的便捷方式。

use crate::config::LinkConfig;
use crate::error::DriverError;
use crate::link::DriveLink;
#[cfg(target_os = "linux")]
use drivelink_can::SocketCanAdapter;
use drivelink_can::SplittableAdapter;
#[cfg(not(target_os = "linux"))]
use drivelink_can::{CanDeviceError, CanDeviceErrorKind, CanError};
use drivelink_protocol::EndpointTable;
use std::path::PathBuf;

/// DriveLink Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use drivelink_driver::{DriveLinkBuilder, LinkConfig};
///
/// let link = DriveLinkBuilder::new()
///     .interface("can0")
///     .schema_file("flat_endpoints.json")
///     .config(LinkConfig {
///         request_timeout_ms: 50,
///         ..LinkConfig::default()
///     })
///     .build()
///     .unwrap();
/// ```
pub struct DriveLinkBuilder {
    /// SocketCAN 接口名称（默认 "can0"）
    interface: Option<String>,
    schema: Option<EndpointTable>,
    schema_file: Option<PathBuf>,
    config: Option<LinkConfig>,
    /// 是否使用双线程模式（默认开启）
    dual_thread: bool,
}

impl DriveLinkBuilder {
    pub fn new() -> Self {
        Self {
            interface: None,
            schema: None,
            schema_file: None,
            config: None,
            dual_thread: true,
        }
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// 直接提供端点表（优先于 `schema_file`）
    pub fn schema(mut self, schema: EndpointTable) -> Self {
        self.schema = Some(schema);
        self
    }

    /// 从 JSON 文件加载端点表
    pub fn schema_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_file = Some(path.into());
        self
    }

    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn dual_thread(mut self, enabled: bool) -> Self {
        self.dual_thread = enabled;
        self
    }

    fn take_schema(&mut self) -> Result<EndpointTable, DriverError> {
        if let Some(schema) = self.schema.take() {
            return Ok(schema);
        }
        match self.schema_file.take() {
            Some(path) => EndpointTable::from_json_file(&path).map_err(DriverError::Schema),
            None => Err(DriverError::InvalidConfig(
                "no endpoint schema provided".to_string(),
            )),
        }
    }

    /// 打开 SocketCAN 接口并启动链路
    pub fn build(self) -> Result<DriveLink, DriverError> {
        #[cfg(target_os = "linux")]
        {
            let interface = self.interface.clone().unwrap_or_else(|| "can0".to_string());
            let can = SocketCanAdapter::new(interface.as_str())?;
            tracing::info!("opened SocketCAN interface '{}'", interface);
            self.build_with_adapter(can)
                .map(|link| link.with_interface(interface))
        }

        #[cfg(not(target_os = "linux"))]
        {
            Err(DriverError::Can(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::UnsupportedConfig,
                "SocketCAN is only available on Linux",
            ))))
        }
    }

    /// 使用调用者提供的适配器（Mock 总线、自定义后端）启动链路
    pub fn build_with_adapter<C>(mut self, can: C) -> Result<DriveLink, DriverError>
    where
        C: SplittableAdapter + Send + 'static,
    {
        let schema = self.take_schema()?;
        let config = self.config.take().unwrap_or_default();
        let link = if self.dual_thread {
            DriveLink::new_dual_thread(can, schema, config)?
        } else {
            DriveLink::new(can, schema, config)?
        };
        Ok(match self.interface.take() {
            Some(interface) => link.with_interface(interface),
            None => link,
        })
    }
}

impl Default for DriveLinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

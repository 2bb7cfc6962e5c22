//! 版本记录（选择子 `0x00` 的 8 字节回复）

use std::fmt;

use crate::ProtocolError;

/// 节点固件 / 硬件版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceVersion {
    pub protocol_version: u8,
    pub hw_product_line: u8,
    pub hw_version: u8,
    pub hw_variant: u8,
    pub fw_major: u8,
    pub fw_minor: u8,
    pub fw_revision: u8,
    /// 非正式发布的开发版固件
    pub fw_unreleased: bool,
}

impl DeviceVersion {
    pub fn from_payload(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 8 {
            return Err(ProtocolError::InvalidLength {
                expected: 8,
                actual: data.len(),
            });
        }
        Ok(Self {
            protocol_version: data[0],
            hw_product_line: data[1],
            hw_version: data[2],
            hw_variant: data[3],
            fw_major: data[4],
            fw_minor: data[5],
            fw_revision: data[6],
            fw_unreleased: data[7] != 0,
        })
    }

    pub fn to_payload(&self) -> [u8; 8] {
        [
            self.protocol_version,
            self.hw_product_line,
            self.hw_version,
            self.hw_variant,
            self.fw_major,
            self.fw_minor,
            self.fw_revision,
            self.fw_unreleased as u8,
        ]
    }

    /// 固件版本字符串 `major.minor.revision`
    pub fn firmware(&self) -> String {
        format!("{}.{}.{}", self.fw_major, self.fw_minor, self.fw_revision)
    }

    /// 硬件版本字符串 `product_line.version.variant`
    pub fn hardware(&self) -> String {
        format!(
            "{}.{}.{}",
            self.hw_product_line, self.hw_version, self.hw_variant
        )
    }
}

impl fmt::Display for DeviceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fw {} / hw {}", self.firmware(), self.hardware())?;
        if self.fw_unreleased {
            f.write_str(" (unreleased)")?;
        }
        Ok(())
    }
}

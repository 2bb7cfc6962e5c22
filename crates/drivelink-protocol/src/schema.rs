//! 端点表
//!
//! 由固件生成的扁平端点清单（JSON）加载，加载后只读。
//!
//! ```json
//! {
//!   "version": "0.6.9",
//!   "endpoints": {
//!     "axis0.controller.config.vel_limit": { "id": 27, "type": "float", "access": "rw" },
//!     "save_configuration": { "id": 310, "type": "function", "access": "rw" }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::ProtocolError;
use crate::ids::{FRAME_CAPACITY, RESERVED_SELECTORS, SDO_HEADER_LEN, is_direct_endpoint};
use crate::value::TypeTag;

/// 写入/调用的确认方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confirmation {
    /// 帧发出即视为完成
    None,
    /// 等待节点回显
    Echo,
}

/// 端点描述符
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub name: String,
    pub id: u16,
    pub type_tag: TypeTag,
    pub writable: bool,
    pub readable: bool,
    pub confirm: Confirmation,
}

impl EndpointDescriptor {
    /// 写/调用是否需要等待回复
    pub fn expects_reply(&self) -> bool {
        self.confirm == Confirmation::Echo
    }
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    version: Option<String>,
    endpoints: BTreeMap<String, RawEndpoint>,
}

#[derive(Deserialize)]
struct RawEndpoint {
    id: u16,
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default = "default_access")]
    access: String,
    #[serde(default)]
    confirm: Option<Confirmation>,
}

fn default_access() -> String {
    "r".to_string()
}

/// 名称 / ID 双向索引的只读端点表
///
/// 描述符以 `Arc` 共享，克隆表本身开销很小。
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    version: Option<String>,
    by_name: HashMap<String, Arc<EndpointDescriptor>>,
    by_id: HashMap<u16, Arc<EndpointDescriptor>>,
}

impl EndpointTable {
    /// 从描述符列表构建（名称或 ID 重复时报错）
    pub fn from_descriptors(
        version: Option<String>,
        descriptors: impl IntoIterator<Item = EndpointDescriptor>,
    ) -> Result<Self, ProtocolError> {
        let mut table = Self {
            version,
            ..Self::default()
        };
        for desc in descriptors {
            if table.by_name.contains_key(&desc.name) {
                return Err(ProtocolError::InvalidSchema(format!(
                    "duplicate endpoint name '{}'",
                    desc.name
                )));
            }
            if let Some(existing) = table.by_id.get(&desc.id) {
                return Err(ProtocolError::InvalidSchema(format!(
                    "endpoint id 0x{:04X} used by both '{}' and '{}'",
                    desc.id, existing.name, desc.name
                )));
            }
            check_sendable(&desc)?;
            let desc = Arc::new(desc);
            table.by_id.insert(desc.id, Arc::clone(&desc));
            table.by_name.insert(desc.name.clone(), desc);
        }
        Ok(table)
    }

    /// 从 JSON 文本加载
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let raw: RawSchema = serde_json::from_str(json)
            .map_err(|e| ProtocolError::InvalidSchema(e.to_string()))?;

        let mut descriptors = Vec::with_capacity(raw.endpoints.len());
        for (name, ep) in raw.endpoints {
            let type_tag: TypeTag = ep.type_tag.parse()?;
            let (readable, writable) = match ep.access.as_str() {
                "r" => (true, false),
                "rw" => (true, true),
                "w" => (false, true),
                other => {
                    return Err(ProtocolError::InvalidSchema(format!(
                        "endpoint '{}': unknown access mode '{}'",
                        name, other
                    )));
                },
            };
            let confirm = ep.confirm.unwrap_or(if type_tag.is_function() {
                Confirmation::Echo
            } else {
                Confirmation::None
            });
            descriptors.push(EndpointDescriptor {
                name,
                id: ep.id,
                type_tag,
                writable,
                readable,
                confirm,
            });
        }

        Self::from_descriptors(raw.version, descriptors)
    }

    /// 从 JSON 文件加载
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::InvalidSchema(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// 按名称解析
    pub fn resolve(&self, name: &str) -> Result<Arc<EndpointDescriptor>, ProtocolError> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownEndpoint {
                name: name.to_string(),
            })
    }

    /// 按 ID 反查
    pub fn resolve_by_id(&self, id: u16) -> Result<Arc<EndpointDescriptor>, ProtocolError> {
        self.by_id
            .get(&id)
            .cloned()
            .ok_or(ProtocolError::UnknownEndpointId { id })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// 固件清单版本（未提供时为 `None`）
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// 按 ID 升序遍历
    pub fn iter(&self) -> impl Iterator<Item = &Arc<EndpointDescriptor>> {
        let mut all: Vec<_> = self.by_id.values().collect();
        all.sort_by_key(|d| d.id);
        all.into_iter()
    }
}

/// 端点必须能编成单帧请求：直连 ID 不得占用保留选择子，SDO 值加头不得超过 8 字节
fn check_sendable(desc: &EndpointDescriptor) -> Result<(), ProtocolError> {
    if is_direct_endpoint(desc.id) {
        if RESERVED_SELECTORS.contains(&(desc.id as u8)) {
            return Err(ProtocolError::InvalidSchema(format!(
                "endpoint '{}': id 0x{:02X} is a reserved selector",
                desc.name, desc.id
            )));
        }
        return Ok(());
    }
    let size = SDO_HEADER_LEN + desc.type_tag.width();
    if size > FRAME_CAPACITY {
        return Err(ProtocolError::InvalidSchema(format!(
            "endpoint '{}': {} value does not fit an SDO frame ({} > {} bytes)",
            desc.name, desc.type_tag, size, FRAME_CAPACITY
        )));
    }
    Ok(())
}

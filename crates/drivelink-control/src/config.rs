//! 配置档（TOML）
//!
//! 按电机型号组织的有序配置项：
//!
//! ```toml
//! [profiles.8308]
//! save = true
//!
//! [[profiles.8308.settings]]
//! path = "axis0.config.motor.pole_pairs"
//! value = 20
//!
//! [[profiles.8308.settings]]
//! path = "axis0.config.motor.torque_constant"
//! value = 0.92
//! ```
//!
//! 配置项的顺序即下发顺序。

use crate::error::ControlError;
use drivelink_protocol::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 配置值（TOML 原生类型）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl SettingValue {
    /// 转为端点值；浮点按 float32 传输
    pub fn to_value(self, path: &str) -> Result<Value, ControlError> {
        match self {
            SettingValue::Bool(v) => Ok(Value::Bool(v)),
            SettingValue::Int(v) => Ok(Value::Int64(v)),
            SettingValue::Float(v) => {
                if !v.is_finite() || v.abs() > f32::MAX as f64 {
                    return Err(ControlError::InvalidSetting {
                        path: path.to_string(),
                        reason: format!("{} is not representable as float32", v),
                    });
                }
                Ok(Value::Float32(v as f32))
            },
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Float(v)
    }
}

/// 单个配置项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub path: String,
    pub value: SettingValue,
}

impl Setting {
    pub fn new(path: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// 一个配置档
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigProfile {
    /// 全部成功后是否持久化
    pub save: bool,
    pub settings: Vec<Setting>,
}

/// 配置文件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, ConfigProfile>,
}

impl ConfigFile {
    pub fn from_toml_str(text: &str) -> Result<Self, ControlError> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| ControlError::ConfigFile(e.to_string()))?;
        for (name, profile) in &file.profiles {
            for setting in &profile.settings {
                setting.value.to_value(&setting.path).map_err(|e| {
                    ControlError::ConfigFile(format!("profile '{}': {}", name, e))
                })?;
            }
        }
        Ok(file)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ControlError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ControlError::ConfigFile(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn profile(&self, name: &str) -> Result<&ConfigProfile, ControlError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ControlError::UnknownProfile(name.to_string()))
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}
